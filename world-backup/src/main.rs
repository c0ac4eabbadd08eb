//! World Backup - command line entry point

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use world_backup::daemon::shutdown::ShutdownCoordinator;
use world_backup::utils::dates::{self, DISPLAY_FORMAT};
use world_backup::{utils, BackupService, Config, SaveOutcome};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Snapshot a world file
    Save {
        world: PathBuf,

        /// Timestamp to record instead of now ("YYYY/MM/DD HH:MM:SS")
        #[arg(long, value_parser = parse_date)]
        at: Option<NaiveDateTime>,
    },

    /// List the snapshots closest to a date
    List {
        world: PathBuf,

        /// Center of the listing (default: now)
        #[arg(long, value_parser = parse_date)]
        near: Option<NaiveDateTime>,

        /// Maximum number of snapshots shown
        #[arg(long, default_value_t = 24)]
        limit: usize,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Overwrite a world file with the snapshot taken at a date
    Restore {
        world: PathBuf,

        #[arg(value_parser = parse_date)]
        at: NaiveDateTime,
    },

    /// Delete snapshots expired by the retention rules
    Cleanup {
        world: PathBuf,

        /// Evaluate retention as of this date instead of now
        #[arg(long, value_parser = parse_date)]
        at: Option<NaiveDateTime>,
    },

    /// Check full snapshots against their content hash
    Verify { world: PathBuf },

    /// Run scheduled cleanups until SIGINT/SIGTERM
    Watch { world: PathBuf },
}

fn parse_date(input: &str) -> std::result::Result<NaiveDateTime, String> {
    dates::parse_user_date(input)
        .ok_or_else(|| format!("invalid date {:?}, expected YYYY/MM/DD HH:MM:SS", input))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        config
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!("Starting world-backup v{}", env!("CARGO_PKG_VERSION"));

    let service = Arc::new(BackupService::new(config.service.clone()));
    let token = CancellationToken::new();

    match args.command {
        Command::Save { world, at } => match service.start_backup(&world, at, &token).await? {
            SaveOutcome::Full(entry) => println!("saved full snapshot {}", entry),
            SaveOutcome::Diff(entry) => println!("saved diff {}", entry),
            SaveOutcome::Throttled => println!("skipped: previous save too recent"),
        },

        Command::List {
            world,
            near,
            limit,
            json,
        } => {
            let all = service.list_backups(&world, &token).await?;
            let shown = dates::nearest(all, near.unwrap_or_else(dates::now), limit);
            if json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else if shown.is_empty() {
                println!("no backups of {}", world.display());
            } else {
                for timestamp in shown {
                    println!("{}", timestamp.format(DISPLAY_FORMAT));
                }
            }
        }

        Command::Restore { world, at } => {
            service.restore(&world, at, &token).await?;
            println!("restored {} from {}", world.display(), at.format(DISPLAY_FORMAT));
        }

        Command::Cleanup { world, at } => {
            let deleted = match at {
                Some(date) => service.cleanup_at(&world, date, &token).await?,
                None => service.start_cleanup(&world, &token).await?,
            };
            for entry in &deleted {
                println!("deleted {}", entry);
            }
            println!("{} entries deleted", deleted.len());
        }

        Command::Verify { world } => {
            let corrupt = service.verify(&world, &token).await?;
            for entry in &corrupt {
                println!("corrupt {}", entry);
            }
            if !corrupt.is_empty() {
                bail!("{} snapshots failed verification", corrupt.len());
            }
            println!("all full snapshots match their hash");
        }

        Command::Watch { world } => {
            let shutdown = ShutdownCoordinator::with_token(service.shutdown_token());
            let Some(cleanup) = service.spawn_cleanup_loop(world.clone()) else {
                bail!("cleanup period is 0, nothing to watch");
            };
            tracing::info!("Watching {}", world.display());

            shutdown.wait_for_signal().await;

            if tokio::time::timeout(config.service.worker_join_timeout(), cleanup)
                .await
                .is_err()
            {
                tracing::warn!("Cleanup loop did not stop in time");
            }
        }
    }

    service.dispose();
    Ok(())
}
