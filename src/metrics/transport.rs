//! Record sinks
//!
//! A transport performs the actual I/O for a record or a batch of records:
//! - Keen - POSTs to the Keen IO event API
//! - File - appends JSONL
//! - Stdout - prints formatted records

use eyre::{Context, Result, eyre};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use super::payload::MetricsPayload;
use crate::config::{Config, KeenConfig, Sink};

/// Something records can be written to
pub trait Transport: Send + Sync {
    fn send(&self, record: &MetricsPayload) -> Result<()>;

    /// Send several records in order
    fn send_batch(&self, records: &[MetricsPayload]) -> Result<()> {
        for record in records {
            self.send(record)?;
        }
        Ok(())
    }

    /// Send a batch, retrying it once if the first attempt fails
    fn deliver_batch(&self, records: &[MetricsPayload]) -> Result<()> {
        self.send_batch(records).or_else(|e| {
            log::warn!("Failed to send {} records to {}, retrying: {}", records.len(), self.name(), e);
            self.send_batch(records)
        })
    }

    fn name(&self) -> &'static str;
}

/// Keen IO HTTP event API
pub struct KeenTransport {
    agent: ureq::Agent,
    write_key: String,
    event_url: String,
    batch_url: String,
    collection: String,
}

impl KeenTransport {
    /// Every request, including connect, is bounded by `timeout`
    pub fn new(config: &KeenConfig, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        let base = config.api_url.trim_end_matches('/');
        let batch_url = format!("{}/projects/{}/events", base, config.project_id);

        Self {
            agent,
            write_key: config.project_write_key.clone(),
            event_url: format!("{}/{}", batch_url, config.collection),
            batch_url,
            collection: config.collection.clone(),
        }
    }

    pub fn event_url(&self) -> &str {
        &self.event_url
    }

    pub fn batch_url(&self) -> &str {
        &self.batch_url
    }

    fn post(&self, url: &str, body: String) -> Result<()> {
        match self
            .agent
            .post(url)
            .header("Authorization", self.write_key.as_str())
            .header("Content-Type", "application/json")
            .send(body.as_bytes())
        {
            Ok(_) => Ok(()),
            Err(e) => Err(eyre!("HTTP request to {} failed: {}", url, e)),
        }
    }
}

/// Body of a batch request: `{"<collection>": [records...]}`
pub fn batch_body(collection: &str, records: &[MetricsPayload]) -> Result<String> {
    let mut body = serde_json::Map::new();
    body.insert(
        collection.to_string(),
        serde_json::to_value(records).context("Failed to serialize batch")?,
    );
    serde_json::to_string(&body).context("Failed to serialize batch")
}

impl Transport for KeenTransport {
    fn send(&self, record: &MetricsPayload) -> Result<()> {
        let body = serde_json::to_string(record).context("Failed to serialize record")?;
        self.post(&self.event_url, body)
    }

    fn send_batch(&self, records: &[MetricsPayload]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let body = batch_body(&self.collection, records)?;
        self.post(&self.batch_url, body)
    }

    fn name(&self) -> &'static str {
        "keen"
    }
}

/// Appends one JSON record per line
pub struct FileTransport {
    path: PathBuf,
}

impl FileTransport {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn append(&self, records: &[MetricsPayload]) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).context("Failed to create output directory")?;
        }

        let mut lines = String::new();
        for record in records {
            lines.push_str(&serde_json::to_string(record).context("Failed to serialize record")?);
            lines.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context(format!("Failed to open {}", self.path.display()))?;
        file.write_all(lines.as_bytes()).context("Failed to write records")?;
        Ok(())
    }
}

impl Transport for FileTransport {
    fn send(&self, record: &MetricsPayload) -> Result<()> {
        self.append(std::slice::from_ref(record))
    }

    fn send_batch(&self, records: &[MetricsPayload]) -> Result<()> {
        self.append(records)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Prints records for humans
pub struct StdoutTransport;

impl Transport for StdoutTransport {
    fn send(&self, record: &MetricsPayload) -> Result<()> {
        println!("{}", record.format_display());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdout"
    }
}

/// Sends every record to each inner transport.
///
/// All transports are attempted; the first failure is returned. Retries are
/// per transport, so a sink that accepted a batch never receives it twice.
pub struct FanOut {
    transports: Vec<Box<dyn Transport>>,
}

impl FanOut {
    pub fn new(transports: Vec<Box<dyn Transport>>) -> Self {
        Self { transports }
    }

    fn each<F>(&self, mut op: F) -> Result<()>
    where
        F: FnMut(&dyn Transport) -> Result<()>,
    {
        let mut first_error = None;
        for transport in &self.transports {
            if let Err(e) = op(transport.as_ref()) {
                log::warn!("Failed to deliver to {} sink: {}", transport.name(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Transport for FanOut {
    fn send(&self, record: &MetricsPayload) -> Result<()> {
        self.each(|t| t.send(record))
    }

    fn send_batch(&self, records: &[MetricsPayload]) -> Result<()> {
        self.each(|t| t.send_batch(records))
    }

    fn deliver_batch(&self, records: &[MetricsPayload]) -> Result<()> {
        self.each(|t| t.deliver_batch(records))
    }

    fn name(&self) -> &'static str {
        "fan-out"
    }
}

/// Build the transport for the configured sinks
pub fn from_config(config: &Config) -> Result<Box<dyn Transport>> {
    if config.sinks.is_empty() {
        return Err(eyre!("No sinks configured"));
    }

    let mut transports: Vec<Box<dyn Transport>> = Vec::new();
    for sink in &config.sinks {
        match sink {
            Sink::Keen => transports.push(Box::new(KeenTransport::new(
                &config.keen,
                config.delivery.flush_timeout(),
            ))),
            Sink::File => transports.push(Box::new(FileTransport::new(Config::expand_path(&config.output)))),
            Sink::Stdout => transports.push(Box::new(StdoutTransport)),
        }
    }

    if transports.len() == 1 {
        return transports.pop().ok_or_else(|| eyre!("No sinks configured"));
    }
    Ok(Box::new(FanOut::new(transports)))
}
