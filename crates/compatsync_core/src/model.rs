use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Proxy module filename the shim is installed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InstallTarget {
    #[default]
    Dxgi,
    Winmm,
    Dinput8,
    Other,
}

impl InstallTarget {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Dxgi => "dxgi.dll",
            Self::Winmm => "winmm.dll",
            Self::Dinput8 => "dinput8.dll",
            Self::Other => "opti_scaler.dll",
        }
    }

    pub fn from_file_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("dxgi") {
            Self::Dxgi
        } else if lower.contains("winmm") {
            Self::Winmm
        } else if lower.contains("dinput8") {
            Self::Dinput8
        } else {
            Self::Other
        }
    }
}

impl From<String> for InstallTarget {
    fn from(value: String) -> Self {
        Self::from_file_name(&value)
    }
}

impl From<InstallTarget> for String {
    fn from(value: InstallTarget) -> Self {
        value.file_name().to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompatSettings {
    #[serde(alias = "requiredIni")]
    pub required_settings: BTreeMap<String, String>,
    #[serde(alias = "fgIni")]
    pub frame_gen_settings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompatNotes {
    #[serde(alias = "requiresFakenvapi")]
    pub requires_aux_tool: bool,
    #[serde(alias = "optiFgSupported")]
    pub frame_gen_supported: bool,
    pub overlays_to_disable: Vec<String>,
    pub known_issues: Vec<String>,
    pub extra_steps: Vec<String>,
}

impl Default for CompatNotes {
    fn default() -> Self {
        Self {
            requires_aux_tool: false,
            frame_gen_supported: true,
            overlays_to_disable: Vec::new(),
            known_issues: Vec::new(),
            extra_steps: Vec::new(),
        }
    }
}

/// Compatibility knowledge for one game, derived from one wiki page or
/// authored by the user as an override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompatibilityProfile {
    pub page_name: String,
    #[serde(alias = "gameName")]
    pub game_title: String,
    #[serde(alias = "steamAppId")]
    pub platform_id: Option<u32>,
    #[serde(alias = "dll")]
    pub install_target: InstallTarget,
    pub inputs: Vec<String>,
    pub exe_hints: Vec<String>,
    pub folder_hints: Vec<String>,
    pub tested_version: String,
    pub os: String,
    pub gpu: String,
    pub settings: CompatSettings,
    pub notes: CompatNotes,
    pub tags: Vec<String>,
    pub last_fetched_utc: String,
    pub parse_warnings: Vec<String>,
}

impl CompatibilityProfile {
    pub fn new(page_name: &str) -> Self {
        Self {
            page_name: page_name.to_string(),
            game_title: page_name.to_string(),
            ..Self::default()
        }
    }

    /// Key used for override merging and duplicate detection.
    pub fn title_key(&self) -> String {
        normalize_token(&self.game_title)
    }

    /// Falls back to the page name when a stored profile carries no title.
    pub fn ensure_title(&mut self) {
        if self.game_title.trim().is_empty() {
            self.game_title = self.page_name.clone();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompatibilityCacheMeta {
    pub fetched_utc: String,
    pub source_url: String,
    pub etag: String,
    pub last_modified: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompatibilityCache {
    pub meta: CompatibilityCacheMeta,
    pub profiles: Vec<CompatibilityProfile>,
}

impl CompatibilityCache {
    pub fn new(meta: CompatibilityCacheMeta, profiles: Vec<CompatibilityProfile>) -> Self {
        let mut cache = Self { meta, profiles };
        cache.recount();
        cache
    }

    pub fn recount(&mut self) {
        self.meta.count = self.profiles.len();
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

pub fn normalize_token(value: &str) -> String {
    value
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|ch| ch.is_alphanumeric())
        .collect()
}

/// Normalizes an executable path to its bare file stem: `C:\Games\Foo.exe` → `foo`.
pub fn normalize_exe_name(path: &str) -> String {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path).trim();
    let stem = match name.len().checked_sub(4) {
        Some(split)
            if name.is_char_boundary(split) && name[split..].eq_ignore_ascii_case(".exe") =>
        {
            &name[..split]
        }
        _ => name,
    };
    normalize_token(stem)
}

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
