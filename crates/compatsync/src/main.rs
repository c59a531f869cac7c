use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use compatsync_core::config::{CompatConfig, load_config};
use compatsync_core::http::ReqwestFetcher;
use compatsync_core::matcher::match_profile;
use compatsync_core::model::CompatibilityCache;
use compatsync_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout, inspect_runtime,
    normalize_for_display, resolve_paths,
};
use compatsync_core::store::{CacheStore, is_stale};
use compatsync_core::sync::{RefreshRequest, SyncEngine, SyncRunner};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "compatsync",
    version,
    about = "Sync and match OptiScaler game compatibility profiles"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create the data directory, config file and empty override file")]
    Init(InitArgs),
    #[command(about = "Download the compatibility index and rebuild the profile cache")]
    Refresh(RefreshArgs),
    #[command(about = "Show cache state and staleness")]
    Status(StatusArgs),
    #[command(about = "Find the profile for an installed game")]
    Match(MatchArgs),
    #[command(about = "List cached profiles with overrides applied")]
    List,
    #[command(about = "Print the user override file")]
    Overrides,
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct RefreshArgs {
    #[arg(long, help = "Full refresh (ignore cached ETag/Last-Modified)")]
    full: bool,
    #[arg(long, value_name = "URL", help = "Override the configured index URL")]
    index_url: Option<String>,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[arg(long, value_name = "DAYS", help = "Override the configured maximum cache age")]
    max_age_days: Option<u32>,
}

#[derive(Debug, Args)]
struct MatchArgs {
    #[arg(long, value_name = "PATH", default_value = "")]
    exe: String,
    #[arg(long, value_name = "NAME", default_value = "")]
    name: String,
    #[arg(long, value_name = "ID")]
    app_id: Option<u32>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Refresh(args)) => run_refresh(&runtime, args),
        Some(Commands::Status(args)) => run_status(&runtime, args),
        Some(Commands::Match(args)) => run_match(&runtime, args),
        Some(Commands::List) => run_list(&runtime),
        Some(Commands::Overrides) => run_overrides(&runtime),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            force: args.force,
            ..InitOptions::default()
        },
    )?;

    println!("Initialized compatsync data layout");
    println!("data_dir: {}", normalize_for_display(&paths.layout.root));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!(
        "overrides_path: {}",
        normalize_for_display(&paths.layout.overrides_path)
    );
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("wrote_overrides: {}", report.wrote_overrides);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_refresh(runtime: &RuntimeOptions, args: RefreshArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let store = CacheStore::new(&paths.layout);
    let current = load_current_cache(&store);

    let fetcher = ReqwestFetcher::new(&config.http_client_config())?;
    let engine = SyncEngine::new(fetcher, store, config.page_strategies());
    let request = RefreshRequest {
        index_url: args.index_url.unwrap_or_else(|| config.index_url()),
        force_full: args.full,
    };

    println!("compatibility refresh");
    println!("index_url: {}", request.index_url);
    println!("full: {}", request.force_full);

    let receiver = SyncRunner::new().spawn(engine, request, current)?;
    let outcome = receiver
        .recv()
        .context("compatibility sync ended without reporting an outcome")?;

    println!("success: {}", format_flag(outcome.success));
    println!("final_state: {:?}", outcome.final_state);
    println!("persisted: {}", format_flag(outcome.persisted));
    println!("requests: {}", outcome.request_count);
    match &outcome.cache {
        Some(cache) => println!("profiles: {}", cache.meta.count),
        None => println!("profiles: <unchanged>"),
    }
    for line in &outcome.log_lines {
        println!("log: {line}");
    }
    println!("status: {}", outcome.status);
    print_diagnostics(runtime, &paths);

    if !outcome.success {
        bail!("{}", outcome.status);
    }
    Ok(())
}

fn run_status(runtime: &RuntimeOptions, args: StatusArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let status = inspect_runtime(&paths)?;
    let store = CacheStore::new(&paths.layout);
    let max_age_days = args.max_age_days.unwrap_or_else(|| config.max_age_days());

    println!("compatibility status");
    println!("data_dir: {}", normalize_for_display(&paths.layout.root));
    println!("data_dir_exists: {}", format_flag(status.data_dir_exists));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("overrides_exists: {}", format_flag(status.overrides_exists));
    println!("cache_exists: {}", format_flag(status.cache_exists));
    println!(
        "cache_size_bytes: {}",
        status
            .cache_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    match store.load_meta()? {
        Some(meta) => {
            println!("meta.fetched_utc: {}", display_or_none(&meta.fetched_utc));
            println!("meta.source_url: {}", display_or_none(&meta.source_url));
            println!("meta.etag: {}", display_or_none(&meta.etag));
            println!("meta.last_modified: {}", display_or_none(&meta.last_modified));
            println!("meta.count: {}", meta.count);
            println!("max_age_days: {max_age_days}");
            println!("stale: {}", format_flag(is_stale(&meta, max_age_days)));
        }
        None => println!("meta: <none>"),
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_match(runtime: &RuntimeOptions, args: MatchArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let store = CacheStore::new(&paths.layout);
    let mut log = Vec::new();
    let cache = store.load_merged(&mut log)?;
    print_log(&log);

    println!("compatibility match");
    println!("exe: {}", display_or_none(&args.exe));
    println!("name: {}", display_or_none(&args.name));
    println!(
        "app_id: {}",
        args.app_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );
    println!("profiles: {}", cache.meta.count);
    match match_profile(&cache, &args.exe, &args.name, args.app_id) {
        Some(profile) => {
            println!("match: {}", profile.game_title);
            println!("install_target: {}", profile.install_target.file_name());
            println!("{}", serde_json::to_string_pretty(profile)?);
        }
        None => println!("match: <none>"),
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_list(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let store = CacheStore::new(&paths.layout);
    let mut log = Vec::new();
    let cache = store.load_merged(&mut log)?;
    print_log(&log);

    println!("compatibility profiles");
    println!("count: {}", cache.meta.count);
    if cache.is_empty() {
        println!("profiles: <none> (run `compatsync refresh`)");
    }
    for profile in &cache.profiles {
        let platform_id = profile
            .platform_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "profile: {} [{}] {}",
            profile.game_title,
            platform_id,
            profile.install_target.file_name()
        );
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_overrides(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let store = CacheStore::new(&paths.layout);
    let overrides = store.load_overrides()?;

    println!("compatibility overrides");
    println!(
        "overrides_path: {}",
        normalize_for_display(store.overrides_path())
    );
    println!("count: {}", overrides.len());
    println!("{}", serde_json::to_string_pretty(&overrides)?);
    print_diagnostics(runtime, &paths);
    Ok(())
}

/// A corrupt cache must not block a refresh that would replace it.
fn load_current_cache(store: &CacheStore) -> CompatibilityCache {
    match store.load() {
        Ok(cache) => cache.unwrap_or_default(),
        Err(error) => {
            warn!(error = %format!("{error:#}"), "ignoring unreadable compatibility cache");
            CompatibilityCache::default()
        }
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let data_env = initial.layout.root.join(".env");
    if data_env.exists() {
        let _ = dotenvy::from_path_override(&data_env);
    }

    resolve_paths(&context, &overrides)
}

fn print_log(lines: &[String]) {
    for line in lines {
        println!("log: {line}");
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
        let config = load_config(&paths.config_path).unwrap_or_else(|error| {
            warn!(error = %format!("{error:#}"), "config unreadable; showing defaults");
            CompatConfig::default()
        });
        println!("index_url={}", config.index_url());
        println!("user_agent={}", config.user_agent());
        println!("max_age_days={}", config.max_age_days());
    }
}

fn display_or_none(value: &str) -> &str {
    if value.trim().is_empty() {
        "<none>"
    } else {
        value
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
