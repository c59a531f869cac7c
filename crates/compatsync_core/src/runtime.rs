use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

use crate::config::{
    DEFAULT_INDEX_URL, DEFAULT_MAX_AGE_DAYS, DEFAULT_PAGE_EXTENSIONS, DEFAULT_RAW_PAGE_BASE,
    DEFAULT_RENDERED_PAGE_BASE,
};
use crate::http::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_TIMEOUT_MS, DEFAULT_USER_AGENT};

pub const CONFIG_FILENAME: &str = "config.toml";
pub const CACHE_FILENAME: &str = "compat_profiles.json";
pub const META_FILENAME: &str = "compat_profiles.meta.json";
pub const OVERRIDES_FILENAME: &str = "compat_overrides.json";
pub const LOG_FILENAME: &str = "compat_sync.log";
const FALLBACK_DATA_DIRNAME: &str = ".compatsync";
const EMPTY_OVERRIDES: &str = "[]\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Platform,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Platform => "platform",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub platform_data_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let platform_data_dir = ProjectDirs::from("", "", "compatsync")
            .map(|dirs| dirs.data_local_dir().to_path_buf());
        Ok(Self {
            cwd,
            platform_data_dir,
        })
    }
}

/// Files kept under the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    pub root: PathBuf,
    pub cache_dir: PathBuf,
    pub cache_path: PathBuf,
    pub meta_path: PathBuf,
    pub overrides_path: PathBuf,
    pub log_dir: PathBuf,
    pub log_path: PathBuf,
}

impl DataLayout {
    pub fn new(root: &Path) -> Self {
        let cache_dir = root.join("cache").join("compat");
        let log_dir = root.join("logs");
        Self {
            root: root.to_path_buf(),
            cache_path: cache_dir.join(CACHE_FILENAME),
            meta_path: cache_dir.join(META_FILENAME),
            overrides_path: root.join(OVERRIDES_FILENAME),
            log_path: log_dir.join(LOG_FILENAME),
            cache_dir,
            log_dir,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub layout: DataLayout,
    pub config_path: PathBuf,
    pub data_source: ValueSource,
    pub config_source: ValueSource,
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub data_dir_exists: bool,
    pub config_exists: bool,
    pub cache_exists: bool,
    pub cache_size_bytes: Option<u64>,
    pub overrides_exists: bool,
    pub warnings: Vec<String>,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "data_dir={} ({})\nconfig_path={} ({})\ncache_path={}\nmeta_path={}\noverrides_path={}\nlog_path={}",
            normalize_for_display(&self.layout.root),
            self.data_source.as_str(),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.layout.cache_path),
            normalize_for_display(&self.layout.meta_path),
            normalize_for_display(&self.layout.overrides_path),
            normalize_for_display(&self.layout.log_path),
        )
    }
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let layout = &paths.layout;
    let data_dir_exists = layout.root.exists();
    let config_exists = paths.config_path.exists();
    let overrides_exists = layout.overrides_path.exists();
    let cache_exists = layout.cache_path.exists();
    let cache_size_bytes = if cache_exists {
        let metadata = fs::metadata(&layout.cache_path)
            .with_context(|| format!("failed to inspect {}", layout.cache_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };

    let mut warnings = Vec::new();
    if !data_dir_exists {
        warnings.push("data directory is missing; run `compatsync init`".to_string());
    }
    if !cache_exists {
        warnings.push(
            "no compatibility cache yet; run `compatsync refresh` to download profiles"
                .to_string(),
        );
    }

    Ok(RuntimeStatus {
        data_dir_exists,
        config_exists,
        cache_exists,
        cache_size_bytes,
        overrides_exists,
        warnings,
    })
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
    pub wrote_overrides: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (data_dir, data_source) = if let Some(path) = overrides.data_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_blank(lookup_env("COMPATSYNC_DATA_DIR")) {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else if let Some(path) = context.platform_data_dir.as_deref() {
        (path.to_path_buf(), ValueSource::Platform)
    } else {
        (context.cwd.join(FALLBACK_DATA_DIRNAME), ValueSource::Default)
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_blank(lookup_env("COMPATSYNC_CONFIG")) {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else {
        (data_dir.join(CONFIG_FILENAME), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        layout: DataLayout::new(&data_dir),
        config_path,
        data_source,
        config_source,
    })
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let layout = &paths.layout;
    let mut created_dirs = Vec::new();
    for dir in [&layout.root, &layout.cache_dir, &layout.log_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config = if options.materialize_config {
        write_text_file(
            &paths.config_path,
            &render_materialized_config(paths),
            options.force,
        )?
    } else {
        false
    };
    // Never clobber user-authored overrides, even with --force.
    let wrote_overrides = write_text_file(&layout.overrides_path, EMPTY_OVERRIDES, false)?;

    Ok(InitReport {
        created_dirs,
        wrote_config,
        wrote_overrides,
    })
}

pub fn render_materialized_config(paths: &ResolvedPaths) -> String {
    let data_dir = normalize_for_display(&paths.layout.root);
    let extensions = DEFAULT_PAGE_EXTENSIONS
        .iter()
        .map(|extension| format!("\"{extension}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "# compatsync configuration (materialized by `compatsync init`)\n# Data directory: {data_dir}\n# Environment variables COMPATSYNC_INDEX_URL, COMPATSYNC_USER_AGENT,\n# COMPATSYNC_HTTP_TIMEOUT_MS and COMPATSYNC_MAX_AGE_DAYS take precedence.\n\n[sync]\nindex_url = \"{DEFAULT_INDEX_URL}\"\nraw_page_base = \"{DEFAULT_RAW_PAGE_BASE}\"\nrendered_page_base = \"{DEFAULT_RENDERED_PAGE_BASE}\"\npage_extensions = [{extensions}]\n# user_agent = \"{DEFAULT_USER_AGENT}\"\ntimeout_ms = {DEFAULT_TIMEOUT_MS}\nconnect_timeout_ms = {DEFAULT_CONNECT_TIMEOUT_MS}\nmax_age_days = {DEFAULT_MAX_AGE_DAYS}\n",
    )
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
