use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::merge::merge_overrides;
use crate::model::{
    CompatibilityCache, CompatibilityCacheMeta, CompatibilityProfile, now_utc_string,
};
use crate::runtime::DataLayout;

const OFFLINE_SNAPSHOT: &str = include_str!("../../../config/offline-snapshot.json");
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// On-disk shape of the cache file: the meta scalars at the top level next
/// to the profile list. The count lives only in the meta file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CacheDocument {
    fetched_utc: String,
    source_url: String,
    etag: String,
    last_modified: String,
    profiles: Vec<CompatibilityProfile>,
}

impl CacheDocument {
    fn from_cache(cache: &CompatibilityCache) -> Self {
        Self {
            fetched_utc: cache.meta.fetched_utc.clone(),
            source_url: cache.meta.source_url.clone(),
            etag: cache.meta.etag.clone(),
            last_modified: cache.meta.last_modified.clone(),
            profiles: cache.profiles.clone(),
        }
    }

    fn into_cache(self) -> CompatibilityCache {
        let mut profiles = self.profiles;
        for profile in &mut profiles {
            profile.ensure_title();
        }
        let meta = CompatibilityCacheMeta {
            fetched_utc: self.fetched_utc,
            source_url: self.source_url,
            etag: self.etag,
            last_modified: self.last_modified,
            count: 0,
        };
        CompatibilityCache::new(meta, profiles)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStore {
    cache_path: PathBuf,
    meta_path: PathBuf,
    overrides_path: PathBuf,
    log_path: PathBuf,
}

impl CacheStore {
    pub fn new(layout: &DataLayout) -> Self {
        Self {
            cache_path: layout.cache_path.clone(),
            meta_path: layout.meta_path.clone(),
            overrides_path: layout.overrides_path.clone(),
            log_path: layout.log_path.clone(),
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn overrides_path(&self) -> &Path {
        &self.overrides_path
    }

    /// Reads the persisted cache. `Ok(None)` when nothing has been stored yet.
    pub fn load(&self) -> Result<Option<CompatibilityCache>> {
        let Some(content) = read_optional(&self.cache_path)? else {
            return Ok(None);
        };
        let document: CacheDocument = serde_json::from_str(&content).with_context(|| {
            format!("failed to parse compatibility cache {}", self.cache_path.display())
        })?;
        Ok(Some(document.into_cache()))
    }

    /// Persisted cache (or an empty one) with the user's overrides applied.
    /// Override problems are reported through `log` and never fail the load.
    pub fn load_merged(&self, log: &mut Vec<String>) -> Result<CompatibilityCache> {
        let mut cache = self.load()?.unwrap_or_default();
        self.apply_overrides(&mut cache, log);
        Ok(cache)
    }

    pub fn apply_overrides(&self, cache: &mut CompatibilityCache, log: &mut Vec<String>) {
        let overrides = self.load_overrides().unwrap_or_else(|error| {
            log.push(format!("Failed to load compatibility overrides: {error:#}"));
            Vec::new()
        });
        merge_overrides(&mut cache.profiles, &overrides, log);
        cache.recount();
    }

    /// Writes the cache file, then the meta file. Each write is atomic; the
    /// pair is not.
    pub fn save(&self, cache: &CompatibilityCache) -> Result<()> {
        let document = CacheDocument::from_cache(cache);
        let encoded = serde_json::to_string_pretty(&document)
            .context("failed to encode compatibility cache")?;
        write_atomic(&self.cache_path, &encoded)?;

        let mut meta = cache.meta.clone();
        meta.count = cache.profiles.len();
        self.save_meta(&meta)
    }

    pub fn load_meta(&self) -> Result<Option<CompatibilityCacheMeta>> {
        let Some(content) = read_optional(&self.meta_path)? else {
            return Ok(None);
        };
        let meta = serde_json::from_str(&content).with_context(|| {
            format!("failed to parse compatibility meta {}", self.meta_path.display())
        })?;
        Ok(Some(meta))
    }

    pub fn save_meta(&self, meta: &CompatibilityCacheMeta) -> Result<()> {
        let encoded =
            serde_json::to_string_pretty(meta).context("failed to encode compatibility meta")?;
        write_atomic(&self.meta_path, &encoded)
    }

    /// User-authored profiles. A missing or blank file yields no overrides;
    /// entries without any title are dropped.
    pub fn load_overrides(&self) -> Result<Vec<CompatibilityProfile>> {
        let Some(content) = read_optional(&self.overrides_path)? else {
            return Ok(Vec::new());
        };
        let mut overrides: Vec<CompatibilityProfile> =
            serde_json::from_str(&content).with_context(|| {
                format!("failed to parse overrides {}", self.overrides_path.display())
            })?;
        for profile in &mut overrides {
            profile.ensure_title();
        }
        overrides.retain(|profile| !profile.game_title.trim().is_empty());
        Ok(overrides)
    }

    pub fn append_log(&self, lines: &[String]) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("failed to open {}", self.log_path.display()))?;
        let stamp = now_utc_string();
        let mut buffer = String::new();
        for line in lines {
            buffer.push_str(&format!("[{stamp}] {line}\n"));
        }
        file.write_all(buffer.as_bytes())
            .with_context(|| format!("failed to append to {}", self.log_path.display()))
    }
}

/// Collection compiled into the library, used when the index cannot be
/// reached and nothing has been cached yet.
pub fn offline_snapshot() -> Result<CompatibilityCache> {
    let document: CacheDocument = serde_json::from_str(OFFLINE_SNAPSHOT)
        .context("failed to parse bundled offline snapshot")?;
    Ok(document.into_cache())
}

pub fn is_stale(meta: &CompatibilityCacheMeta, max_age_days: u32) -> bool {
    is_stale_at(meta, max_age_days, Utc::now())
}

/// A cache is stale when its fetch time is missing, unreadable, or strictly
/// older than `max_age_days`. Timestamps in the future count as fresh.
pub fn is_stale_at(
    meta: &CompatibilityCacheMeta,
    max_age_days: u32,
    now: DateTime<Utc>,
) -> bool {
    let Some(fetched) = parse_timestamp(&meta.fetched_utc) else {
        return true;
    };
    let Some(max_age) = TimeDelta::try_days(i64::from(max_age_days)) else {
        return false;
    };
    now.signed_duration_since(fetched) > max_age
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    let prefix = value.get(..19)?;
    NaiveDateTime::parse_from_str(prefix, LEGACY_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(content))
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let Some(parent) = path.parent() else {
        bail!("invalid cache path: {}", path.display());
    };
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let mut temp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    temp.write_all(content.as_bytes())
        .and_then(|()| temp.write_all(b"\n"))
        .and_then(|()| temp.flush())
        .with_context(|| format!("failed to write {}", path.display()))?;
    temp.persist(path)
        .map_err(|error| error.error)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
