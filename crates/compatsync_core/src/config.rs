use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::http::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_TIMEOUT_MS, DEFAULT_USER_AGENT, HttpClientConfig,
};
use crate::sync::PageUrlStrategy;

pub const DEFAULT_RAW_PAGE_BASE: &str =
    "https://raw.githubusercontent.com/wiki/optiscaler/OptiScaler/";
pub const DEFAULT_RENDERED_PAGE_BASE: &str = "https://github.com/optiscaler/OptiScaler/wiki/";
pub const DEFAULT_INDEX_URL: &str =
    "https://raw.githubusercontent.com/wiki/optiscaler/OptiScaler/Compatibility-List.adoc";
pub const DEFAULT_PAGE_EXTENSIONS: &[&str] = &[".adoc", ".md"];
pub const DEFAULT_MAX_AGE_DAYS: u32 = 7;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CompatConfig {
    #[serde(default)]
    pub sync: SyncSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SyncSection {
    pub index_url: Option<String>,
    pub raw_page_base: Option<String>,
    pub rendered_page_base: Option<String>,
    pub page_extensions: Option<Vec<String>>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub max_age_days: Option<u32>,
}

impl CompatConfig {
    /// Resolve the index URL: env COMPATSYNC_INDEX_URL > config > DEFAULT_INDEX_URL.
    pub fn index_url(&self) -> String {
        self.index_url_with_lookup(env_lookup)
    }

    /// Resolve user agent: env COMPATSYNC_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        self.user_agent_with_lookup(env_lookup)
    }

    /// Resolve max cache age: env COMPATSYNC_MAX_AGE_DAYS > config > DEFAULT_MAX_AGE_DAYS.
    pub fn max_age_days(&self) -> u32 {
        self.max_age_days_with_lookup(env_lookup)
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        self.http_client_config_with_lookup(env_lookup)
    }

    /// Ordered candidate URL builders for wiki pages: one raw-content
    /// strategy per configured extension, then the rendered page.
    pub fn page_strategies(&self) -> Vec<PageUrlStrategy> {
        let raw_base = self
            .sync
            .raw_page_base
            .clone()
            .unwrap_or_else(|| DEFAULT_RAW_PAGE_BASE.to_string());
        let extensions = self.sync.page_extensions.clone().unwrap_or_else(|| {
            DEFAULT_PAGE_EXTENSIONS
                .iter()
                .map(ToString::to_string)
                .collect()
        });

        let mut strategies: Vec<PageUrlStrategy> = extensions
            .into_iter()
            .map(|extension| PageUrlStrategy::RawContent {
                base: raw_base.clone(),
                extension,
            })
            .collect();
        strategies.push(PageUrlStrategy::Rendered {
            base: self
                .sync
                .rendered_page_base
                .clone()
                .unwrap_or_else(|| DEFAULT_RENDERED_PAGE_BASE.to_string()),
        });
        strategies
    }

    fn index_url_with_lookup<F>(&self, lookup_env: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup_env("COMPATSYNC_INDEX_URL")
            .or_else(|| self.sync.index_url.clone())
            .unwrap_or_else(|| DEFAULT_INDEX_URL.to_string())
    }

    fn user_agent_with_lookup<F>(&self, lookup_env: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup_env("COMPATSYNC_USER_AGENT")
            .or_else(|| self.sync.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    fn max_age_days_with_lookup<F>(&self, lookup_env: F) -> u32
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup_env("COMPATSYNC_MAX_AGE_DAYS")
            .and_then(|value| value.parse::<u32>().ok())
            .or(self.sync.max_age_days)
            .unwrap_or(DEFAULT_MAX_AGE_DAYS)
    }

    fn http_client_config_with_lookup<F>(&self, lookup_env: F) -> HttpClientConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        HttpClientConfig {
            user_agent: self.user_agent_with_lookup(&lookup_env),
            timeout_ms: lookup_env("COMPATSYNC_HTTP_TIMEOUT_MS")
                .and_then(|value| value.parse::<u64>().ok())
                .or(self.sync.timeout_ms)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
            connect_timeout_ms: self
                .sync
                .connect_timeout_ms
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

/// Load and parse a CompatConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<CompatConfig> {
    if !config_path.exists() {
        return Ok(CompatConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: CompatConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_lookup(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use tempfile::tempdir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_config_or_env() {
        let config = CompatConfig::default();
        let none = lookup(&[]);
        assert_eq!(config.index_url_with_lookup(&none), DEFAULT_INDEX_URL);
        assert_eq!(config.user_agent_with_lookup(&none), DEFAULT_USER_AGENT);
        assert_eq!(config.max_age_days_with_lookup(&none), DEFAULT_MAX_AGE_DAYS);
        let http = config.http_client_config_with_lookup(&none);
        assert_eq!(http.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(http.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, CompatConfig::default());
    }

    #[test]
    fn load_config_parses_sync_section() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[sync]
index_url = "https://mirror.example/Compatibility-List.adoc"
raw_page_base = "https://mirror.example/raw/"
rendered_page_base = "https://mirror.example/wiki/"
page_extensions = [".md"]
user_agent = "test-agent/1.0"
timeout_ms = 1000
connect_timeout_ms = 250
max_age_days = 3
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        let none = lookup(&[]);
        assert_eq!(
            config.index_url_with_lookup(&none),
            "https://mirror.example/Compatibility-List.adoc"
        );
        assert_eq!(config.max_age_days_with_lookup(&none), 3);
        let http = config.http_client_config_with_lookup(&none);
        assert_eq!(http.user_agent, "test-agent/1.0");
        assert_eq!(http.timeout_ms, 1000);
        assert_eq!(http.connect_timeout_ms, 250);
        assert_eq!(
            config.page_strategies(),
            vec![
                PageUrlStrategy::RawContent {
                    base: "https://mirror.example/raw/".to_string(),
                    extension: ".md".to_string(),
                },
                PageUrlStrategy::Rendered {
                    base: "https://mirror.example/wiki/".to_string(),
                },
            ]
        );
    }

    #[test]
    fn env_overrides_config_values() {
        let config = CompatConfig {
            sync: SyncSection {
                index_url: Some("https://config.example/index".to_string()),
                max_age_days: Some(3),
                timeout_ms: Some(1000),
                ..SyncSection::default()
            },
        };
        let env = lookup(&[
            ("COMPATSYNC_INDEX_URL", "https://env.example/index"),
            ("COMPATSYNC_MAX_AGE_DAYS", "14"),
            ("COMPATSYNC_HTTP_TIMEOUT_MS", "not-a-number"),
            ("COMPATSYNC_USER_AGENT", "env-agent"),
        ]);
        assert_eq!(config.index_url_with_lookup(&env), "https://env.example/index");
        assert_eq!(config.max_age_days_with_lookup(&env), 14);
        let http = config.http_client_config_with_lookup(&env);
        assert_eq!(http.timeout_ms, 1000, "unparseable env falls back to config");
        assert_eq!(http.user_agent, "env-agent");
    }

    #[test]
    fn default_page_strategies_try_raw_extensions_then_rendered() {
        let urls: Vec<String> = CompatConfig::default()
            .page_strategies()
            .iter()
            .map(|strategy| strategy.url_for("Starfield"))
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://raw.githubusercontent.com/wiki/optiscaler/OptiScaler/Starfield.adoc",
                "https://raw.githubusercontent.com/wiki/optiscaler/OptiScaler/Starfield.md",
                "https://github.com/optiscaler/OptiScaler/wiki/Starfield",
            ]
        );
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[sync\nindex_url = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }
}
