use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use shopsync_adapters::parse_timestamp;
use shopsync_sync::{
    maybe_build_scheduler, RepairPolicy, RepairScope, RunSummary, SyncConfig, SyncPipeline,
    Warehouse,
};
use tracing::{error, info};

mod logging;

/// Ran fine, nothing new upstream.
const EXIT_NO_NEW_DATA: u8 = 3;

#[derive(Debug, Parser)]
#[command(name = "shopsync")]
#[command(about = "Incremental WooCommerce order sync into a local warehouse")]
struct Cli {
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load orders created after the stored watermark.
    Sync {
        /// Also fill missing category snapshots after loading.
        #[arg(long)]
        re_enrich: bool,
        /// Also rewrite every category snapshot after loading.
        #[arg(long)]
        force_enrich_all: bool,
        /// Never run the category repair pass.
        #[arg(long, conflicts_with_all = ["re_enrich", "force_enrich_all"])]
        no_repair: bool,
    },
    /// Walk history from a start date up to now, window by window.
    Backfill {
        /// Start date (YYYY-MM-DD or RFC 3339).
        #[arg(long)]
        start: String,
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(i64).range(1..))]
        window_days: i64,
        #[arg(long)]
        force_enrich_all: bool,
    },
    /// Re-resolve category snapshots already in the warehouse.
    Repair {
        #[arg(long)]
        force: bool,
    },
    /// Create or extend the warehouse schema.
    Migrate,
    /// Run incremental sync on SYNC_CRON until interrupted.
    Schedule,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    match run(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %format!("{err:#}"), "shopsync failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Option<Commands>) -> Result<ExitCode> {
    let command = command.unwrap_or(Commands::Sync {
        re_enrich: false,
        force_enrich_all: false,
        no_repair: false,
    });
    match command {
        Commands::Sync {
            re_enrich,
            force_enrich_all,
            no_repair,
        } => {
            let policy = if force_enrich_all {
                RepairPolicy::Always(RepairScope::All)
            } else if re_enrich {
                RepairPolicy::Always(RepairScope::Missing)
            } else if no_repair {
                RepairPolicy::Never
            } else {
                RepairPolicy::WhenIdle
            };
            let config = SyncConfig::from_env()?;
            let pipeline = SyncPipeline::from_config(&config).await?;
            let summary = pipeline.run_incremental(policy).await?;
            print_summary("sync", &summary);
            Ok(exit_for(&summary))
        }
        Commands::Backfill {
            start,
            window_days,
            force_enrich_all,
        } => {
            let start = parse_timestamp(&start)
                .ok_or_else(|| anyhow!("--start {start:?} is not a date or RFC 3339 timestamp"))?;
            let window = chrono::Duration::try_days(window_days)
                .ok_or_else(|| anyhow!("--window-days {window_days} is out of range"))?;
            let scope = if force_enrich_all {
                RepairScope::All
            } else {
                RepairScope::Missing
            };
            let config = SyncConfig::from_env()?;
            let pipeline = SyncPipeline::from_config(&config).await?;
            let summary = pipeline.run_backfill(start, window, scope).await?;
            print_summary("backfill", &summary);
            Ok(exit_for(&summary))
        }
        Commands::Repair { force } => {
            let scope = if force {
                RepairScope::All
            } else {
                RepairScope::Missing
            };
            let config = SyncConfig::from_env()?;
            let pipeline = SyncPipeline::from_config(&config).await?;
            let summary = pipeline.run_repair(scope).await?;
            print_summary("repair", &summary);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Migrate => {
            let warehouse = Warehouse::connect(&SyncConfig::warehouse_url_from_env()).await?;
            let added = warehouse.ensure_schema().await?;
            if added.is_empty() {
                println!("migrate complete: schema up to date");
            } else {
                println!("migrate complete: added {}", added.join(", "));
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Schedule => {
            let config = SyncConfig::from_env()?;
            let pipeline = Arc::new(SyncPipeline::from_config(&config).await?);
            let Some(mut sched) =
                maybe_build_scheduler(&config, pipeline, RepairPolicy::WhenIdle).await?
            else {
                bail!("scheduler disabled; set SHOPSYNC_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron = %config.sync_cron, "scheduler running; ctrl-c to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for shutdown signal")?;
            sched.shutdown().await.context("stopping scheduler")?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_for(summary: &RunSummary) -> ExitCode {
    if summary.loaded_any() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_NO_NEW_DATA)
    }
}

fn print_summary(label: &str, summary: &RunSummary) {
    let watermark = summary
        .watermark_after
        .map(|w| w.since.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    let repaired = summary.repair.map_or(0, |r| r.rows_updated);
    println!(
        "{label} complete: run_id={} orders={} items={} repaired_rows={} watermark={}",
        summary.run_id, summary.orders_loaded, summary.items_loaded, repaired, watermark
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn enrich_flags_conflict_with_no_repair() {
        let parsed = Cli::try_parse_from(["shopsync", "sync", "--re-enrich", "--no-repair"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn backfill_window_must_be_positive() {
        for window in ["0", "-5"] {
            let parsed = Cli::try_parse_from([
                "shopsync",
                "backfill",
                "--start",
                "2024-01-01",
                "--window-days",
                window,
            ]);
            assert!(parsed.is_err(), "window {window} accepted");
        }
    }

    #[test]
    fn backfill_window_defaults_to_thirty_days() {
        let cli = Cli::try_parse_from(["shopsync", "backfill", "--start", "2024-01-01"]).unwrap();
        match cli.command {
            Some(Commands::Backfill { window_days, .. }) => assert_eq!(window_days, 30),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
