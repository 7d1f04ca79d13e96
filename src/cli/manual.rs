//! One-shot entry points for running a single activity by hand.

use crate::cli::run::{build_orchestrator, require_config};
use crate::config::types::ScheduleMode;
use crate::scheduler::{CollectOutcome, ReportOutcome};
use std::path::PathBuf;

pub async fn collect(
    config_path: Option<PathBuf>,
    platform_id: &str,
    group_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = require_config(config_path)?;
    let orchestrator = build_orchestrator(&config).await?;

    match orchestrator.collect_batch(group_id, platform_id).await? {
        CollectOutcome::Collected { batch, watermark } => {
            println!(
                "Collected batch {} ({} messages, {} topics, {} quotes), watermark now {}",
                batch.batch_id, batch.message_count, batch.topics_count, batch.quotes_count, watermark
            );
        }
        CollectOutcome::Skipped(reason) => println!("Skipped: {}", reason),
    }
    Ok(())
}

/// Final report in incremental mode, single-pass report in traditional mode
pub async fn report(
    config_path: Option<PathBuf>,
    platform_id: &str,
    group_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = require_config(config_path)?;
    let orchestrator = build_orchestrator(&config).await?;

    let outcome = match config.schedule.mode {
        ScheduleMode::Incremental => orchestrator.generate_final_report(group_id, platform_id).await?,
        ScheduleMode::Traditional => orchestrator.run_traditional_analysis(group_id, platform_id).await?,
    };

    match outcome {
        ReportOutcome::Dispatched {
            window_label,
            batch_count,
            message_count,
            cleaned,
        } => {
            println!(
                "Report for {} dispatched: {} messages from {} batches, {} expired batches removed",
                window_label, message_count, batch_count, cleaned
            );
            println!("Reports directory: {}", config.report.output_dir.display());
        }
        ReportOutcome::Skipped(reason) => println!("Skipped: {}", reason),
    }
    Ok(())
}

pub async fn status(
    config_path: Option<PathBuf>,
    group_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = require_config(config_path)?;
    let orchestrator = build_orchestrator(&config).await?;

    let summary = orchestrator.get_window_summary(group_id).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
