use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::extract::parse_page;
use crate::http::{FetchError, HttpFetcher, RetryPolicy, Validators, fetch_with_retry};
use crate::index::{IndexEntry, parse_index};
use crate::model::{
    CompatibilityCache, CompatibilityCacheMeta, CompatibilityProfile, now_utc_string,
};
use crate::store::{CacheStore, offline_snapshot};

pub const STATUS_INDEX_FAILED: &str = "Failed to download compatibility index.";
pub const STATUS_UNCHANGED: &str = "Compatibility index unchanged.";
pub const STATUS_EMPTY_INDEX: &str = "Compatibility index download failed.";
pub const STATUS_NO_ENTRIES: &str = "No entries discovered in compatibility index.";
pub const STATUS_NO_PROFILES: &str = "No compatibility profiles could be downloaded.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    FetchingIndex,
    FetchingPages(usize),
    Merging,
    Persisted,
    Failed,
}

/// How a wiki page slug is turned into a downloadable URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageUrlStrategy {
    RawContent { base: String, extension: String },
    Rendered { base: String },
}

impl PageUrlStrategy {
    pub fn url_for(&self, slug: &str) -> String {
        match self {
            Self::RawContent { base, extension } => format!("{base}{slug}{extension}"),
            Self::Rendered { base } => format!("{base}{slug}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub success: bool,
    pub status: String,
    pub log_lines: Vec<String>,
    /// Replacement collection. `None` means the caller keeps what it has.
    pub cache: Option<CompatibilityCache>,
    pub final_state: SyncState,
    pub persisted: bool,
    pub request_count: usize,
}

pub struct SyncEngine<F: HttpFetcher> {
    fetcher: F,
    store: CacheStore,
    policy: RetryPolicy,
    strategies: Vec<PageUrlStrategy>,
    state: SyncState,
}

impl<F: HttpFetcher> SyncEngine<F> {
    pub fn new(fetcher: F, store: CacheStore, strategies: Vec<PageUrlStrategy>) -> Self {
        Self {
            fetcher,
            store,
            policy: RetryPolicy::default(),
            strategies,
            state: SyncState::Idle,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Downloads the index and every listed page, rebuilds the collection,
    /// applies overrides and persists the result.
    ///
    /// `current` is only read: its validators drive the conditional request
    /// (unless `force_full`) and an empty `current` enables the offline
    /// snapshot fallback. On failure the caller's collection stays in place.
    ///
    /// Every run ends in `Persisted` or `Failed`. `Persisted` is also used
    /// when there was nothing to write (unchanged index, offline snapshot);
    /// `SyncOutcome::persisted` tells whether the cache file was written. A
    /// failed write ends in `Failed` but keeps `success` and the new cache.
    ///
    /// This call takes no lock; go through [`SyncRunner`] to keep one sync
    /// per process.
    pub fn refresh(
        &mut self,
        index_url: &str,
        current: &CompatibilityCache,
        force_full: bool,
    ) -> SyncOutcome {
        info!(index_url, force_full, "starting compatibility refresh");
        let mut log = Vec::new();

        self.advance(SyncState::FetchingIndex);
        let validators = if force_full {
            Validators::default()
        } else {
            Validators::from_meta(&current.meta)
        };
        let index = match fetch_with_retry(&mut self.fetcher, index_url, &validators, &self.policy)
        {
            Ok(response) => response,
            Err(error) => return self.index_unavailable(current, &error, log),
        };

        if index.is_not_modified() {
            self.advance(SyncState::Persisted);
            return self.finish(true, STATUS_UNCHANGED.to_string(), log, None, false);
        }
        if index.body.trim().is_empty() {
            return self.fail(STATUS_EMPTY_INDEX, log);
        }

        let entries = parse_index(&index.body);
        if entries.is_empty() {
            return self.fail(STATUS_NO_ENTRIES, log);
        }
        debug!(entries = entries.len(), "parsed compatibility index");

        let profiles = self.fetch_profiles(&entries, &mut log);
        if profiles.is_empty() {
            return self.fail(STATUS_NO_PROFILES, log);
        }

        self.advance(SyncState::Merging);
        let meta = CompatibilityCacheMeta {
            fetched_utc: now_utc_string(),
            source_url: index_url.to_string(),
            etag: index.etag.unwrap_or_default(),
            last_modified: index.last_modified.unwrap_or_default(),
            count: 0,
        };
        let mut cache = CompatibilityCache::new(meta, profiles);
        self.store.apply_overrides(&mut cache, &mut log);

        let mut status = format!("Fetched {} compatibility profiles.", cache.meta.count);
        let persisted = match self.store.save(&cache) {
            Ok(()) => {
                self.advance(SyncState::Persisted);
                true
            }
            Err(error) => {
                self.advance(SyncState::Failed);
                warn!(error = %format!("{error:#}"), "failed to persist compatibility cache");
                log.push(format!("Failed to save compatibility cache: {error:#}"));
                status.push_str(" Cache could not be saved.");
                false
            }
        };
        self.finish(true, status, log, Some(cache), persisted)
    }

    fn fetch_profiles(
        &mut self,
        entries: &[IndexEntry],
        log: &mut Vec<String>,
    ) -> Vec<CompatibilityProfile> {
        let mut profiles = Vec::new();
        let mut seen_slugs = HashSet::new();
        let mut seen_titles = HashSet::new();

        for (position, entry) in entries.iter().enumerate() {
            self.advance(SyncState::FetchingPages(position));
            if entry.slug.is_empty() {
                continue;
            }
            if !seen_slugs.insert(entry.slug.as_str()) {
                log.push(format!("Skipping duplicate index entry for {}", entry.title));
                continue;
            }

            let Some(body) = self.fetch_page(&entry.slug) else {
                warn!(title = %entry.title, "no page candidate could be downloaded");
                log.push(format!("Failed to download compatibility entry for {}", entry.title));
                continue;
            };

            let profile = parse_page(&entry.title, &body);
            for warning in &profile.parse_warnings {
                log.push(format!("Parse warning for {}: {warning}", entry.title));
            }
            if !seen_titles.insert(profile.title_key()) {
                log.push(format!(
                    "Skipping duplicate compatibility profile for {}",
                    profile.game_title
                ));
                continue;
            }
            profiles.push(profile);
        }
        profiles
    }

    /// First candidate URL answering 2xx with a non-empty body.
    fn fetch_page(&mut self, slug: &str) -> Option<String> {
        for strategy in &self.strategies {
            let url = strategy.url_for(slug);
            match fetch_with_retry(&mut self.fetcher, &url, &Validators::default(), &self.policy) {
                Ok(response) if response.is_success() && !response.body.trim().is_empty() => {
                    return Some(response.body);
                }
                Ok(response) => debug!(url, status = response.status, "page candidate unusable"),
                Err(error) => debug!(url, %error, "page candidate failed"),
            }
        }
        None
    }

    fn index_unavailable(
        &mut self,
        current: &CompatibilityCache,
        error: &FetchError,
        mut log: Vec<String>,
    ) -> SyncOutcome {
        warn!(%error, "compatibility index download failed");
        log.push(format!("Index download failed: {error}"));
        if !current.is_empty() {
            return self.fail(STATUS_INDEX_FAILED, log);
        }

        match offline_snapshot() {
            Ok(mut snapshot) if !snapshot.is_empty() => {
                self.advance(SyncState::Merging);
                self.store.apply_overrides(&mut snapshot, &mut log);
                log.push("Using bundled offline snapshot.".to_string());
                let status = format!(
                    "Compatibility index unavailable; loaded {} profiles from offline snapshot.",
                    snapshot.meta.count
                );
                self.advance(SyncState::Persisted);
                self.finish(true, status, log, Some(snapshot), false)
            }
            Ok(_) => self.fail(STATUS_INDEX_FAILED, log),
            Err(error) => {
                log.push(format!("Offline snapshot unavailable: {error:#}"));
                self.fail(STATUS_INDEX_FAILED, log)
            }
        }
    }

    fn fail(&mut self, status: &str, log: Vec<String>) -> SyncOutcome {
        self.advance(SyncState::Failed);
        self.finish(false, status.to_string(), log, None, false)
    }

    fn finish(
        &mut self,
        success: bool,
        status: String,
        log_lines: Vec<String>,
        cache: Option<CompatibilityCache>,
        persisted: bool,
    ) -> SyncOutcome {
        let mut file_lines = log_lines.clone();
        file_lines.push(status.clone());
        if let Err(error) = self.store.append_log(&file_lines) {
            warn!(error = %format!("{error:#}"), "failed to append compatibility sync log");
        }

        let request_count = self.fetcher.request_count();
        info!(
            success,
            persisted,
            request_count,
            status = %status,
            "compatibility refresh finished"
        );
        SyncOutcome {
            success,
            status,
            log_lines,
            cache,
            final_state: self.state,
            persisted,
            request_count,
        }
    }

    fn advance(&mut self, next: SyncState) {
        debug!(from = ?self.state, to = ?next, "sync state transition");
        self.state = next;
    }
}

#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub index_url: String,
    pub force_full: bool,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a compatibility sync is already running")]
    AlreadyRunning,
    #[error("failed to start compatibility sync thread")]
    Spawn(#[from] io::Error),
}

static SYNC_IN_FLIGHT: AtomicBool = AtomicBool::new(false);

/// Runs refreshes on a background thread. The in-flight flag is shared by
/// every runner in the process, so at most one sync runs at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncRunner;

struct InFlightGuard;

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        SYNC_IN_FLIGHT.store(false, Ordering::Release);
    }
}

impl SyncRunner {
    pub fn new() -> Self {
        Self
    }

    pub fn is_running(&self) -> bool {
        SYNC_IN_FLIGHT.load(Ordering::Acquire)
    }

    /// Starts `engine.refresh` on a new thread. The returned receiver yields
    /// exactly one outcome; the in-flight flag is cleared before it is sent.
    pub fn spawn<F>(
        &self,
        mut engine: SyncEngine<F>,
        request: RefreshRequest,
        current: CompatibilityCache,
    ) -> Result<Receiver<SyncOutcome>, SyncError>
    where
        F: HttpFetcher + Send + 'static,
    {
        if SYNC_IN_FLIGHT
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning);
        }
        let guard = InFlightGuard;

        let (sender, receiver) = mpsc::channel();
        thread::Builder::new()
            .name("compat-sync".to_string())
            .spawn(move || {
                let outcome = engine.refresh(&request.index_url, &current, request.force_full);
                drop(guard);
                if sender.send(outcome).is_err() {
                    debug!("sync outcome dropped; receiver is gone");
                }
            })?;
        Ok(receiver)
    }
}
