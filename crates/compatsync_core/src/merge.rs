use std::collections::HashMap;

use crate::model::CompatibilityProfile;

/// Applies user overrides on top of `base`, keyed by normalized game title.
///
/// Base profiles sharing a title key are collapsed to the first one. A
/// matching override then replaces that profile wholesale; anything else is
/// appended and can itself be replaced by a later override. Running the same
/// overrides twice leaves the collection unchanged.
pub fn merge_overrides(
    base: &mut Vec<CompatibilityProfile>,
    overrides: &[CompatibilityProfile],
    log: &mut Vec<String>,
) {
    let mut index_by_title: HashMap<String, usize> = HashMap::new();
    let mut kept = 0;
    base.retain(|profile| {
        let key = profile.title_key();
        // Titles without alphanumerics cannot collide meaningfully.
        if !key.is_empty() {
            if index_by_title.contains_key(&key) {
                log.push(format!(
                    "Skipping duplicate compatibility profile for {}",
                    profile.game_title
                ));
                return false;
            }
            index_by_title.insert(key, kept);
        }
        kept += 1;
        true
    });

    for profile in overrides {
        let key = profile.title_key();
        if let Some(&index) = index_by_title.get(&key) {
            base[index] = profile.clone();
            log.push(format!("Override applied for {}", profile.game_title));
        } else {
            index_by_title.insert(key, base.len());
            base.push(profile.clone());
            log.push(format!("Override appended for {}", profile.game_title));
        }
    }
}
