//! Record delivery
//!
//! `DirectChannel` hands each record straight to the transport.
//! `BatchChannel` queues records for a worker thread that owns the transport
//! and flushes on a timer or once enough records are buffered.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use eyre::{Context, Result, eyre};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use super::payload::MetricsPayload;
use super::transport::Transport;
use crate::config::{DeliveryConfig, DeliveryMode};

/// Transmits records to the ingestion backend
pub trait DeliveryChannel: Send {
    /// Hand over a record. Never blocks on the network for batched delivery.
    fn submit(&self, record: MetricsPayload) -> Result<()>;

    /// Push out anything still buffered
    fn flush(&self) -> Result<()>;

    fn stats(&self) -> DeliveryStats;
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Shared delivery counters
#[derive(Debug, Clone, Default)]
pub struct DeliveryStats {
    counters: Arc<Counters>,
}

/// Point-in-time copy of `DeliveryStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliverySummary {
    pub submitted: u64,
    pub delivered: u64,
    /// Lost after the backend rejected them
    pub failed: u64,
    /// Lost before reaching the backend (queue full or closed)
    pub dropped: u64,
}

impl DeliveryStats {
    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeliverySummary {
        DeliverySummary {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// One transport call per record, on the caller's thread
pub struct DirectChannel {
    transport: Box<dyn Transport>,
    stats: DeliveryStats,
}

impl DirectChannel {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            stats: DeliveryStats::default(),
        }
    }
}

impl DeliveryChannel for DirectChannel {
    fn submit(&self, record: MetricsPayload) -> Result<()> {
        DeliveryStats::add(&self.stats.counters.submitted, 1);
        match self.transport.send(&record) {
            Ok(()) => {
                DeliveryStats::add(&self.stats.counters.delivered, 1);
                Ok(())
            }
            Err(e) => {
                DeliveryStats::add(&self.stats.counters.failed, 1);
                Err(e)
            }
        }
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> DeliveryStats {
        self.stats.clone()
    }
}

/// Tuning for `BatchChannel`
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Bound for one transport request; flush waits are derived from it
    pub flush_timeout: Duration,
    pub queue_capacity: usize,
}

impl From<&DeliveryConfig> for BatchOptions {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval(),
            flush_timeout: config.flush_timeout(),
            queue_capacity: config.queue_capacity.max(1),
        }
    }
}

enum Message {
    Record(MetricsPayload),
    Flush(Sender<()>),
}

/// Buffered delivery through a worker thread
pub struct BatchChannel {
    tx: Option<Sender<Message>>,
    worker: Option<JoinHandle<()>>,
    stats: DeliveryStats,
    flush_timeout: Duration,
}

impl BatchChannel {
    pub fn spawn(transport: Box<dyn Transport>, options: BatchOptions) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded::<Message>(options.queue_capacity.max(1));
        let stats = DeliveryStats::default();

        let worker = FlushWorker {
            transport,
            buffer: Vec::with_capacity(options.batch_size),
            batch_size: options.batch_size.max(1),
            stats: stats.clone(),
        };
        let interval = options.flush_interval;
        let handle = std::thread::Builder::new()
            .name("stepmetrics-flush".to_string())
            .spawn(move || worker.run(rx, interval))
            .context("Failed to spawn delivery worker")?;

        log::debug!(
            "Batch delivery started (batch size {}, interval {:?}, queue {})",
            options.batch_size,
            options.flush_interval,
            options.queue_capacity
        );

        Ok(Self {
            tx: Some(tx),
            worker: Some(handle),
            stats,
            flush_timeout: options.flush_timeout,
        })
    }

    fn sender(&self) -> Result<&Sender<Message>> {
        self.tx.as_ref().ok_or_else(|| eyre!("Delivery channel closed"))
    }
}

impl DeliveryChannel for BatchChannel {
    fn submit(&self, record: MetricsPayload) -> Result<()> {
        DeliveryStats::add(&self.stats.counters.submitted, 1);
        let result = match self.sender()?.try_send(Message::Record(record)) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(_)) => Err(eyre!("Delivery queue full, record dropped")),
            Err(TrySendError::Disconnected(_)) => Err(eyre!("Delivery worker stopped, record dropped")),
        };
        DeliveryStats::add(&self.stats.counters.dropped, 1);
        result
    }

    fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.sender()?
            .send_timeout(Message::Flush(ack_tx), self.flush_timeout)
            .map_err(|_| eyre!("Timed out queueing flush request"))?;

        // a flush may retry once
        ack_rx
            .recv_timeout(self.flush_timeout * 2 + Duration::from_millis(500))
            .map_err(|_| eyre!("Timed out waiting for flush"))
    }

    fn stats(&self) -> DeliveryStats {
        self.stats.clone()
    }
}

impl Drop for BatchChannel {
    fn drop(&mut self) {
        // disconnecting makes the worker drain, flush and exit
        drop(self.tx.take());
        if let Some(handle) = self.worker.take()
            && handle.join().is_err()
        {
            log::error!("Delivery worker panicked");
        }
    }
}

struct FlushWorker {
    transport: Box<dyn Transport>,
    buffer: Vec<MetricsPayload>,
    batch_size: usize,
    stats: DeliveryStats,
}

impl FlushWorker {
    fn run(mut self, rx: Receiver<Message>, interval: Duration) {
        let ticker = crossbeam_channel::tick(interval);
        loop {
            crossbeam_channel::select! {
                recv(rx) -> message => match message {
                    Ok(Message::Record(record)) => {
                        self.buffer.push(record);
                        if self.buffer.len() >= self.batch_size {
                            self.flush();
                        }
                    }
                    Ok(Message::Flush(ack)) => {
                        self.flush();
                        let _ = ack.send(());
                    }
                    Err(_) => {
                        self.flush();
                        break;
                    }
                },
                recv(ticker) -> _ => self.flush(),
            }
        }
        log::debug!("Delivery worker stopped");
    }

    /// Send the buffer; the transport retries a failed batch once
    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.buffer);

        match self.transport.deliver_batch(&batch) {
            Ok(()) => {
                log::debug!("Flushed {} records to {}", batch.len(), self.transport.name());
                DeliveryStats::add(&self.stats.counters.delivered, batch.len());
            }
            Err(e) => {
                log::error!("Dropping {} records after failed retry: {}", batch.len(), e);
                DeliveryStats::add(&self.stats.counters.failed, batch.len());
            }
        }
    }
}

/// Build the channel selected by `config.mode`
pub fn channel_for(config: &DeliveryConfig, transport: Box<dyn Transport>) -> Result<Box<dyn DeliveryChannel>> {
    match config.mode {
        DeliveryMode::Direct => Ok(Box::new(DirectChannel::new(transport))),
        DeliveryMode::Batched => Ok(Box::new(BatchChannel::spawn(transport, config.into())?)),
    }
}
