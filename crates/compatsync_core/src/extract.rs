use std::collections::BTreeMap;

use crate::fields::{parse_bullet_list, parse_key_values, parse_table};
use crate::model::{
    CompatNotes, CompatibilityProfile, InstallTarget, normalize_exe_name, normalize_token,
    now_utc_string,
};

const KNOWN_ISSUE_MARKER: &str = "not supported";

/// Upstream technology tokens, first match wins.
const INPUT_RULES: &[(&str, &str)] = &[
    ("dlss", "DLSS"),
    ("fsr3", "FSR3"),
    ("fsr2", "FSR2"),
    ("xess", "XeSS"),
];

const NOTE_RULES: &[NoteRule] = &[
    NoteRule {
        keywords: Keywords::Any(&["fakenvapi", "inputs hidden"]),
        action: NoteAction::RequireAuxTool,
    },
    NoteRule {
        keywords: Keywords::Any(&["overlay"]),
        action: NoteAction::RecordOverlay,
    },
    NoteRule {
        keywords: Keywords::Any(&["dlssg-to-fsr3", "frame generation"]),
        action: NoteAction::RecordExtraStep,
    },
    // Substring heuristic; "fg" also matches inside unrelated words.
    NoteRule {
        keywords: Keywords::All(&["fg", "not", "supported"]),
        action: NoteAction::DisableFrameGen,
    },
];

const PLATFORM_ID_FIELDS: &[&str] = &["Steam AppID", "Steam App ID", "AppID"];
const EXE_FIELDS: &[&str] = &["Exe", "Executable"];

#[derive(Debug, Clone, Copy)]
enum Keywords {
    Any(&'static [&'static str]),
    All(&'static [&'static str]),
}

impl Keywords {
    fn matches(self, lower: &str) -> bool {
        match self {
            Self::Any(words) => words.iter().any(|word| lower.contains(word)),
            Self::All(words) => words.iter().all(|word| lower.contains(word)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum NoteAction {
    RequireAuxTool,
    RecordOverlay,
    RecordExtraStep,
    DisableFrameGen,
}

#[derive(Debug, Clone, Copy)]
struct NoteRule {
    keywords: Keywords,
    action: NoteAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NoteSource {
    KnownIssues,
    Notes,
}

/// Parses a raw wiki page into a profile. Never fails; table problems are
/// carried in `parse_warnings`.
pub fn parse_page(page_title: &str, body: &str) -> CompatibilityProfile {
    let table = parse_table(body);
    let mut profile = extract_profile(&table.fields, page_title);
    profile.parse_warnings = table.warnings;
    profile
}

pub fn extract_profile(
    fields: &BTreeMap<String, String>,
    page_title: &str,
) -> CompatibilityProfile {
    let field = |key: &str| fields.get(key).map(|value| value.trim()).unwrap_or_default();

    let mut profile = CompatibilityProfile::new(page_title);
    let game = field("Game");
    if !game.is_empty() {
        profile.game_title = game.to_string();
    }

    profile.tested_version = match field("Version") {
        "" => field("Tested Version").to_string(),
        version => version.to_string(),
    };
    profile.os = field("OS").to_string();
    profile.gpu = field("GPU").to_string();
    profile.tags = parse_bullet_list(field("Tags"));
    profile.platform_id = PLATFORM_ID_FIELDS
        .iter()
        .find_map(|key| first_platform_id(field(*key)));

    let filename = field("Filename");
    if !filename.is_empty() {
        profile.install_target = InstallTarget::from_file_name(filename);
    }

    profile.settings.required_settings = parse_key_values(field("Settings"));
    profile.settings.frame_gen_settings = parse_key_values(field("FG-Settings"));

    extract_inputs(field("Inputs"), &mut profile.inputs, &mut profile.notes);

    for issue in parse_bullet_list(field("Known Issues")) {
        profile.notes.known_issues.push(issue.clone());
        apply_note_rules(&issue, NoteSource::KnownIssues, &mut profile.notes);
    }
    for note in parse_bullet_list(field("Notes")) {
        profile.notes.extra_steps.push(note.clone());
        apply_note_rules(&note, NoteSource::Notes, &mut profile.notes);
    }
    if profile.notes.overlays_to_disable.is_empty() {
        profile.notes.overlays_to_disable = parse_bullet_list(field("Overlays"));
    }

    for key in EXE_FIELDS {
        push_hints(&mut profile.exe_hints, field(*key), normalize_exe_name);
    }
    push_hints(&mut profile.folder_hints, field("Folder"), normalize_token);
    if profile.exe_hints.is_empty() {
        let synthesized = normalize_token(&profile.game_title);
        if !synthesized.is_empty() {
            profile.exe_hints.push(synthesized);
        }
    }

    profile.last_fetched_utc = now_utc_string();
    profile
}

fn extract_inputs(text: &str, inputs: &mut Vec<String>, notes: &mut CompatNotes) {
    for token in split_list(text) {
        let lower = token.to_lowercase();
        if lower.contains(KNOWN_ISSUE_MARKER) {
            notes.known_issues.push(token.to_string());
        }
        if let Some((_, canonical)) = INPUT_RULES.iter().find(|(needle, _)| lower.contains(needle))
        {
            inputs.push((*canonical).to_string());
        }
    }
}

fn apply_note_rules(line: &str, source: NoteSource, notes: &mut CompatNotes) {
    let lower = line.to_lowercase();
    for rule in NOTE_RULES {
        if !rule.keywords.matches(&lower) {
            continue;
        }
        match rule.action {
            NoteAction::RequireAuxTool => notes.requires_aux_tool = true,
            NoteAction::RecordOverlay => notes.overlays_to_disable.push(line.to_string()),
            NoteAction::RecordExtraStep => {
                let already_recorded = source == NoteSource::Notes
                    && notes.extra_steps.iter().any(|step| step == line);
                if !already_recorded {
                    notes.extra_steps.push(line.to_string());
                }
            }
            NoteAction::DisableFrameGen => notes.frame_gen_supported = false,
        }
    }
}

fn split_list(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\n', ','])
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn push_hints(hints: &mut Vec<String>, text: &str, normalize: fn(&str) -> String) {
    for token in split_list(text) {
        let hint = normalize(token);
        if !hint.is_empty() && !hints.contains(&hint) {
            hints.push(hint);
        }
    }
}

fn first_platform_id(text: &str) -> Option<u32> {
    text.split(|ch: char| !ch.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .find_map(|part| part.parse::<u32>().ok())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::fields::EMPTY_TABLE_WARNING;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn extracts_inputs_notes_and_install_target() {
        let fields = fields(&[
            ("Game", "Alpha"),
            ("Inputs", "DLSS, FSR3\nXeSS not supported"),
            ("Notes", "* Use fakenvapi\n* Disable Steam overlay"),
            ("Filename", "winmm.dll"),
        ]);
        let profile = extract_profile(&fields, "Alpha Page");

        assert_eq!(profile.page_name, "Alpha Page");
        assert_eq!(profile.game_title, "Alpha");
        assert_eq!(profile.inputs, vec!["DLSS", "FSR3", "XeSS"]);
        assert_eq!(profile.notes.known_issues, vec!["XeSS not supported"]);
        assert!(profile.notes.requires_aux_tool);
        assert_eq!(profile.notes.overlays_to_disable, vec!["Disable Steam overlay"]);
        assert_eq!(profile.install_target, InstallTarget::Winmm);
        assert_eq!(profile.exe_hints, vec!["alpha"]);
        assert!(profile.notes.frame_gen_supported);
        assert!(!profile.last_fetched_utc.is_empty());
    }

    #[test]
    fn unsupported_input_is_kept_and_recorded_as_known_issue() {
        let fields = fields(&[("Inputs", "DLSS not supported, FSR3")]);
        let profile = extract_profile(&fields, "Delta");
        assert_eq!(profile.inputs, vec!["DLSS", "FSR3"]);
        assert_eq!(profile.notes.known_issues, vec!["DLSS not supported"]);
        assert!(profile.notes.frame_gen_supported);
    }

    #[test]
    fn first_technology_rule_wins_and_duplicates_are_kept() {
        let fields = fields(&[("Inputs", "DLSS/FSR2\nfsr2, DLSS")]);
        let profile = extract_profile(&fields, "Beta");
        assert_eq!(profile.inputs, vec!["DLSS", "FSR2", "DLSS"]);
    }

    #[test]
    fn frame_generation_notes_are_recorded_once() {
        let fields = fields(&[
            ("Notes", "* Install dlssg-to-fsr3 for frame generation"),
            ("Known Issues", "* Frame generation stutters\n* OptiFG not supported"),
        ]);
        let profile = extract_profile(&fields, "Gamma");
        assert_eq!(
            profile.notes.extra_steps,
            vec!["Frame generation stutters", "Install dlssg-to-fsr3 for frame generation"]
        );
        assert_eq!(
            profile.notes.known_issues,
            vec!["Frame generation stutters", "OptiFG not supported"]
        );
        assert!(!profile.notes.frame_gen_supported);
    }

    #[test]
    fn overlays_field_is_a_fallback() {
        let only_field = fields(&[("Overlays", "* RTSS\n* Discord")]);
        let profile = extract_profile(&only_field, "Delta");
        assert_eq!(profile.notes.overlays_to_disable, vec!["RTSS", "Discord"]);

        let with_note = fields(&[
            ("Overlays", "* RTSS"),
            ("Known Issues", "* Crashes with overlay enabled"),
        ]);
        let profile = extract_profile(&with_note, "Delta");
        assert_eq!(profile.notes.overlays_to_disable, vec!["Crashes with overlay enabled"]);
    }

    #[test]
    fn reads_metadata_identifiers_and_settings() {
        let fields = fields(&[
            ("Tested Version", "1.6.3"),
            ("OS", "Windows 11"),
            ("GPU", "RX 7900 XTX"),
            ("Tags", "- RPG\n- Open World"),
            ("Steam App ID", "App 1091500"),
            ("Executable", r"bin\x64\Cyberpunk2077.exe, REDprelauncher.exe"),
            ("Folder", "Cyberpunk 2077"),
            ("Settings", "Dxgi=false\nFGType = optifg"),
            ("FG-Settings", "HUDFix=true"),
        ]);
        let profile = extract_profile(&fields, "Cyberpunk 2077");

        assert_eq!(profile.tested_version, "1.6.3");
        assert_eq!(profile.os, "Windows 11");
        assert_eq!(profile.gpu, "RX 7900 XTX");
        assert_eq!(profile.tags, vec!["RPG", "Open World"]);
        assert_eq!(profile.platform_id, Some(1_091_500));
        assert_eq!(profile.exe_hints, vec!["cyberpunk2077", "redprelauncher"]);
        assert_eq!(profile.folder_hints, vec!["cyberpunk2077"]);
        assert_eq!(
            profile.settings.required_settings.get("FGType").map(String::as_str),
            Some("optifg")
        );
        assert_eq!(profile.settings.frame_gen_settings.len(), 1);
        assert_eq!(profile.install_target, InstallTarget::Dxgi);
    }

    #[test]
    fn version_takes_precedence_over_tested_version() {
        let fields = fields(&[("Version", "0.7.7"), ("Tested Version", "0.7.6")]);
        assert_eq!(extract_profile(&fields, "Eps").tested_version, "0.7.7");
    }

    #[test]
    fn parse_page_keeps_warnings_for_malformed_body() {
        let profile = parse_page("Mystery Game", "no table at all");
        assert_eq!(profile.game_title, "Mystery Game");
        assert_eq!(profile.parse_warnings, vec![EMPTY_TABLE_WARNING.to_string()]);
        assert_eq!(profile.exe_hints, vec!["mysterygame"]);
    }

    #[test]
    fn parse_page_reads_fenced_table() {
        let body = "= Starfield\n\n|===\n| Game | Starfield\n| Inputs | FSR2, DLSS\n|===\n";
        let profile = parse_page("Starfield", body);
        assert!(profile.parse_warnings.is_empty());
        assert_eq!(profile.inputs, vec!["FSR2", "DLSS"]);
    }
}
