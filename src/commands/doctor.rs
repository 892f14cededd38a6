//! Diagnose stepmetrics setup issues

use colored::*;
use eyre::{Result, eyre};

use crate::config::{Config, DeliveryMode, Sink};
use crate::metrics::payload::SCHEMA_VERSION;
use crate::metrics::reporter::GIT_VERSION;
use crate::metrics::transport::KeenTransport;

pub fn run(config: &Config) -> Result<()> {
    println!("{}", "stepmetrics Doctor".bold());
    println!("{}", "═".repeat(50));
    println!();

    let mut issues = 0;

    let config_file = Config::stepmetrics_dir().join("stepmetrics.yaml");
    if config_file.exists() {
        println!("{} Config file: {}", "✓".green(), config_file.display());
    } else {
        println!("{} Config file not found: {}", "⚠".yellow(), config_file.display());
    }

    match config.keen.validate() {
        Ok(()) => println!("{} Keen credentials present (project {})", "✓".green(), config.keen.project_id),
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            println!(
                "  Set {} / {} or add them under {}",
                "KEEN_PROJECT_WRITE_KEY".cyan(),
                "KEEN_PROJECT_ID".cyan(),
                "keen:".cyan()
            );
            issues += 1;
        }
    }

    println!();
    println!("{}", "Sinks:".bold());
    if config.sinks.is_empty() {
        println!("  {} No sinks configured", "✗".red());
        issues += 1;
    }
    for sink in &config.sinks {
        match sink {
            Sink::Keen => {
                let transport = KeenTransport::new(&config.keen, config.delivery.flush_timeout());
                let url = match config.delivery.mode {
                    DeliveryMode::Direct => transport.event_url(),
                    DeliveryMode::Batched => transport.batch_url(),
                };
                println!("  {} keen → {}", "•".cyan(), url);
            }
            Sink::File => println!("  {} file → {}", "•".cyan(), Config::expand_path(&config.output).display()),
            Sink::Stdout => println!("  {} stdout", "•".cyan()),
        }
    }

    println!();
    println!("{}", "Delivery:".bold());
    match config.delivery.mode {
        DeliveryMode::Direct => println!("  direct (one request per record)"),
        DeliveryMode::Batched => println!(
            "  batched: {} records or every {}ms, {}ms request timeout, queue of {}",
            config.delivery.batch_size,
            config.delivery.flush_interval_ms,
            config.delivery.flush_timeout_ms,
            config.delivery.queue_capacity
        ),
    }
    println!("  timing: {:?}", config.tracking.mode);
    println!("  schema v{}, built from {}", SCHEMA_VERSION, GIT_VERSION);

    println!();
    if issues == 0 {
        println!("{} No issues found", "✓".green());
        Ok(())
    } else {
        Err(eyre!("{} issue(s) found", issues))
    }
}
