use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use tokio::time::{self, Duration, MissedTickBehavior};

use gcal_sync::{
    storage::{config::Config, id_map::IdMapFile, sync_state::SyncState},
    sync::{
        google_api::GoogleCalendarStore,
        google_token::TokenStorage,
        groupware::GroupwareStore,
        policy::{filters_from_config, obfuscators_from_config},
        reconcile::ReconciliationEngine,
        sync_engine::SyncEngine,
    },
};

pub const USAGE: &str = "Usage: gcal-sync [--config PATH] [--dry-run] [--watch] [--history]";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOptions {
    pub config: Option<PathBuf>,
    pub dry_run: bool,
    pub watch: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CliMode {
    Sync(CliOptions),
    History(CliOptions),
    Help,
}

pub fn parse_cli_mode<I>(args: I) -> Result<CliMode, String>
where
    I: IntoIterator<Item = String>,
{
    let mut options = CliOptions::default();
    let mut history = false;
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args
                    .next()
                    .filter(|value| !value.starts_with("--"))
                    .ok_or_else(|| "--config needs a path".to_string())?;
                options.config = Some(PathBuf::from(path));
            }
            "--dry-run" => options.dry_run = true,
            "--watch" => options.watch = true,
            "--history" => history = true,
            "--help" | "-h" => return Ok(CliMode::Help),
            _ => return Err(format!("Unknown argument: {}", arg)),
        }
    }

    if history {
        if options.dry_run || options.watch {
            return Err("--history cannot be combined with --dry-run or --watch".to_string());
        }
        return Ok(CliMode::History(options));
    }
    Ok(CliMode::Sync(options))
}

fn load_config(options: &CliOptions) -> anyhow::Result<Config> {
    let config = match &options.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_create()?,
    };
    Ok(config)
}

/// Wires the groupware export to the Google calendar for one pass.
///
/// The token cache is re-read every time so a long `--watch` session picks
/// up tokens refreshed by the sign-in helper.
fn build_engine(config: &Config, dry_run: bool) -> anyhow::Result<SyncEngine> {
    let timezone = config.timezone()?;
    let token = TokenStorage::new(config.google.token_cache.clone())
        .valid_token(Utc::now())
        .with_context(|| {
            format!(
                "No usable Google token in {}",
                config.google.token_cache.display()
            )
        })?;

    let source = GroupwareStore::new(config.source.export_path.clone(), timezone)
        .with_expanded_recurrences(config.source.expand_recurrences);
    let target =
        GoogleCalendarStore::new(token.access_token, config.google.calendar_id.clone(), timezone)
            .with_base_url(config.google.base_url.clone());
    let reconciler = ReconciliationEngine::new(
        filters_from_config(&config.sync),
        obfuscators_from_config(&config.obfuscation),
    );
    let state = SyncState::open(&config.sync.state_db)?;

    let mut engine = SyncEngine::new(Box::new(source), Box::new(target), reconciler, state)
        .with_window(config.sync.sync_past_days, config.sync.sync_future_days)
        .with_dry_run(dry_run);
    if let Some(path) = &config.sync.id_map {
        engine = engine.with_id_map(IdMapFile::new(path.clone()));
    }
    Ok(engine)
}

async fn sync_once(config: &Config, dry_run: bool) -> anyhow::Result<()> {
    let mut engine = build_engine(config, dry_run)?;
    let summary = engine.run(Utc::now()).await?;
    if dry_run {
        println!("Dry run: {}", summary);
    } else {
        println!("Synced: {}", summary);
    }
    Ok(())
}

pub async fn run_sync(options: CliOptions) -> anyhow::Result<()> {
    let config = load_config(&options)?;

    if !options.watch {
        return sync_once(&config, options.dry_run).await;
    }

    let minutes = config.sync.auto_sync_interval_minutes.max(1);
    tracing::info!("Watching, syncing every {} minutes", minutes);
    let mut interval = time::interval(Duration::from_secs(u64::from(minutes) * 60));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = sync_once(&config, options.dry_run).await {
                    eprintln!("Sync failed: {:#}", e);
                    tracing::error!("Sync failed: {:#}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping watch loop");
                return Ok(());
            }
        }
    }
}

pub fn run_history(options: &CliOptions) -> anyhow::Result<()> {
    let config = load_config(options)?;
    let state = SyncState::open(&config.sync.state_db)?;
    let runs = state.recent_runs(20)?;

    if runs.is_empty() {
        println!("No sync runs recorded.");
    }
    for run in runs {
        let held_back = if run.watermark < run.started_at {
            format!(" (retrying changes since {})", run.watermark.format("%Y-%m-%d %H:%M:%S"))
        } else {
            String::new()
        };
        println!(
            "{}  {}{}",
            run.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            run.summary,
            held_back
        );
    }
    Ok(())
}
