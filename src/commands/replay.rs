//! Replay recorded pipeline events through the reporter
//!
//! Input is one JSON `PipelineEvent` per line. A line may carry an `at`
//! timestamp (RFC 3339) which drives the clock when `--recorded-time` is set.

use chrono::{DateTime, Utc};
use colored::*;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::OutputFormat;
use crate::config::{Config, DeliveryMode, Sink};
use crate::metrics::timer::{Clock, ManualClock, SystemClock};
use crate::metrics::{DeliverySummary, MetricsReporter};
use crate::pipeline::{EventBus, PipelineEvent};

#[derive(Debug, Deserialize)]
struct ReplayLine {
    #[serde(default)]
    at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    event: PipelineEvent,
}

#[derive(Debug, Default, Serialize)]
pub struct ReplaySummary {
    pub events: u64,
    pub skipped: u64,
    pub delivery: DeliverySummary,
}

pub struct ReplayOptions {
    pub file: Option<PathBuf>,
    pub recorded_time: bool,
    pub dry_run: bool,
    pub format: OutputFormat,
    pub quiet: bool,
}

pub fn run(options: ReplayOptions, config: &Config) -> Result<()> {
    let mut config = config.clone();
    if options.dry_run {
        config.sinks = vec![Sink::Stdout];
        config.delivery.mode = DeliveryMode::Direct;
    }

    let recorded_clock = ManualClock::new(Utc::now());
    let clock: Arc<dyn Clock> = if options.recorded_time {
        Arc::new(recorded_clock.clone())
    } else {
        Arc::new(SystemClock)
    };

    let reporter = MetricsReporter::from_config(&config, clock).context("Failed to create metrics reporter")?;
    let stats = reporter.stats();
    log::info!("Replaying with {:?} step timing", reporter.timer_mode());

    let mut bus = EventBus::new();
    reporter.listen_to(&mut bus);
    log::debug!("{} listener(s) subscribed", bus.listener_count());

    let reader: Box<dyn BufRead> = match &options.file {
        Some(path) => Box::new(BufReader::new(
            File::open(path).context(format!("Failed to open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut summary = ReplaySummary::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read events")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let entry = match serde_json::from_str::<ReplayLine>(trimmed) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping line {}: {}", index + 1, e);
                summary.skipped += 1;
                continue;
            }
        };

        if options.recorded_time {
            match entry.at {
                Some(at) => recorded_clock.set(at),
                None => log::warn!("Line {} has no `at` time, reusing the previous one", index + 1),
            }
        }

        bus.emit(&entry.event);
        summary.events += 1;
    }

    // dropping the reporter flushes and stops delivery
    drop(bus);
    summary.delivery = stats.snapshot();

    print_summary(&summary, options.format, options.quiet)
}

fn print_summary(summary: &ReplaySummary, format: OutputFormat, quiet: bool) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(summary)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(summary)?),
        OutputFormat::Text => {
            if quiet {
                return Ok(());
            }
            println!(
                "{} Replayed {} events ({} skipped)",
                "✓".green(),
                summary.events,
                summary.skipped
            );
            let delivery = &summary.delivery;
            println!(
                "  records: {} submitted, {} delivered",
                delivery.submitted, delivery.delivered
            );
            if delivery.failed > 0 || delivery.dropped > 0 {
                println!(
                    "  {} {} failed, {} dropped",
                    "⚠".yellow(),
                    delivery.failed,
                    delivery.dropped
                );
            }
        }
    }
    Ok(())
}
