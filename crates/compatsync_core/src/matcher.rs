use crate::model::{CompatibilityCache, CompatibilityProfile, normalize_exe_name, normalize_token};

/// Finds the profile for an installed game.
///
/// Each signal is tried against the whole collection before falling back to
/// the next one: platform id, then executable name, then display title. The
/// first profile in collection order wins within a signal.
pub fn match_profile<'a>(
    cache: &'a CompatibilityCache,
    exe_path: &str,
    display_name: &str,
    platform_id: Option<u32>,
) -> Option<&'a CompatibilityProfile> {
    if let Some(id) = platform_id
        && let Some(profile) = cache
            .profiles
            .iter()
            .find(|profile| profile.platform_id == Some(id))
    {
        return Some(profile);
    }

    let exe = normalize_exe_name(exe_path);
    if !exe.is_empty()
        && let Some(profile) = cache.profiles.iter().find(|profile| {
            profile
                .exe_hints
                .iter()
                .any(|hint| normalize_exe_name(hint) == exe)
        })
    {
        return Some(profile);
    }

    let title = normalize_token(display_name);
    if title.is_empty() {
        return None;
    }
    cache
        .profiles
        .iter()
        .find(|profile| profile.title_key() == title)
}

#[cfg(test)]
mod tests {
    use super::match_profile;
    use crate::model::{CompatibilityCache, CompatibilityCacheMeta, CompatibilityProfile};

    fn profile(title: &str, platform_id: Option<u32>, exe_hints: &[&str]) -> CompatibilityProfile {
        let mut profile = CompatibilityProfile::new(title);
        profile.platform_id = platform_id;
        profile.exe_hints = exe_hints.iter().map(ToString::to_string).collect();
        profile
    }

    fn cache(profiles: Vec<CompatibilityProfile>) -> CompatibilityCache {
        CompatibilityCache::new(CompatibilityCacheMeta::default(), profiles)
    }

    #[test]
    fn platform_id_beats_earlier_exe_match() {
        let cache = cache(vec![
            profile("A", None, &["game"]),
            profile("B", Some(42), &[]),
        ]);
        let matched = match_profile(&cache, r"C:\x\Game.exe", "", Some(42)).expect("match");
        assert_eq!(matched.game_title, "B");
    }

    #[test]
    fn exe_name_is_compared_after_normalization() {
        let cache = cache(vec![
            profile("A", Some(1), &["other"]),
            profile("B", None, &["Game.EXE"]),
        ]);
        let matched = match_profile(&cache, "/mnt/games/game.exe", "", Some(7)).expect("match");
        assert_eq!(matched.game_title, "B");
    }

    #[test]
    fn display_name_is_last_resort() {
        let cache = cache(vec![profile("Alan Wake 2", None, &["alanwake2"])]);
        let matched = match_profile(&cache, "", "alan wake-2", None).expect("match");
        assert_eq!(matched.game_title, "Alan Wake 2");
    }

    #[test]
    fn empty_inputs_never_match() {
        let cache = cache(vec![profile("Untitled", None, &[""])]);
        assert!(match_profile(&cache, "", "", None).is_none());
        assert!(match_profile(&cache, "", "???", None).is_none());
        assert!(match_profile(&cache, "unknown.exe", "Something Else", Some(5)).is_none());
    }
}
