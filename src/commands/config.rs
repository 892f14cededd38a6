use colored::*;
use eyre::Result;

use crate::cli::{ConfigAction, OutputFormat};
use crate::config::Config;

pub fn run(action: ConfigAction, config: &Config) -> Result<()> {
    match action {
        ConfigAction::Show { format } => show(OutputFormat::resolve(format), config),
    }
}

fn show(format: OutputFormat, config: &Config) -> Result<()> {
    let mut config = config.clone();
    config.keen = config.keen.redacted();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(&config)?);
        }
        OutputFormat::Text => {
            println!("{}", "stepmetrics Configuration".bold());
            println!();

            println!("{}:", "keen".cyan());
            println!("  project_id: {}", config.keen.project_id);
            println!("  project_write_key: {}", config.keen.project_write_key);
            println!("  collection: {}", config.keen.collection);
            println!("  api_url: {}", config.keen.api_url);
            println!();

            println!("{}:", "delivery".cyan());
            println!("  mode: {:?}", config.delivery.mode);
            println!("  batch_size: {}", config.delivery.batch_size);
            println!("  flush_interval_ms: {}", config.delivery.flush_interval_ms);
            println!("  flush_timeout_ms: {}", config.delivery.flush_timeout_ms);
            println!("  queue_capacity: {}", config.delivery.queue_capacity);
            println!();

            println!("{}: {:?}", "tracking".cyan(), config.tracking.mode);
            println!("{}: {:?}", "sinks".cyan(), config.sinks);
            println!("{}: {}", "output".cyan(), config.output.display());
            println!("{}: {}", "log_level".cyan(), config.log_level.as_filter());
        }
    }

    Ok(())
}
