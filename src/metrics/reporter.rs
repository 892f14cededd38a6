//! Pipeline event reporter
//!
//! Turns step lifecycle events into telemetry records and hands them to a
//! delivery channel. Delivery problems are logged here and go no further:
//! the pipeline never sees them.

use eyre::{Context, Result};
use std::sync::Arc;

use super::delivery::{self, DeliveryChannel, DeliveryStats};
use super::payload::{MetricsPayload, build_finished_record, build_started_record};
use super::timer::{Clock, StepKey, StepTimer, TimerMode};
use super::transport;
use crate::config::{Config, KeenConfig};
use crate::pipeline::{BuildStepFinishedArgs, BuildStepStartedArgs, EventBus, PipelineListener};

/// Commit this binary was built from
pub const GIT_VERSION: &str = env!("GIT_COMMIT");

/// Reports build step events to the ingestion backend
pub struct MetricsReporter {
    channel: Box<dyn DeliveryChannel>,
    timer: StepTimer,
}

impl MetricsReporter {
    /// Fails with a `ConfigError` if either credential is missing
    pub fn new(
        keen: &KeenConfig,
        channel: Box<dyn DeliveryChannel>,
        clock: Arc<dyn Clock>,
        mode: TimerMode,
    ) -> Result<Self> {
        keen.validate()?;

        Ok(Self {
            channel,
            timer: StepTimer::new(mode, clock),
        })
    }

    /// Build a reporter with the configured sinks and delivery mode
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        // credentials first, so a bad config never opens a sink
        config.keen.validate()?;

        let transport = transport::from_config(config).context("Failed to set up sinks")?;
        let channel = delivery::channel_for(&config.delivery, transport)?;

        log::info!(
            "Reporting to {:?} ({:?} delivery, {:?} timing)",
            config.sinks,
            config.delivery.mode,
            config.tracking.mode
        );
        Self::new(&config.keen, channel, clock, config.tracking.mode)
    }

    pub fn stats(&self) -> DeliveryStats {
        self.channel.stats()
    }

    pub fn timer_mode(&self) -> TimerMode {
        self.timer.mode()
    }

    /// Subscribe to the bus. Takes `self` so one reporter can't be registered twice.
    pub fn listen_to(self, bus: &mut EventBus) {
        bus.add_listener(Box::new(self));
    }

    fn deliver(&self, record: MetricsPayload) {
        let event = record.event;
        let order = record.step_order;
        if let Err(e) = self.channel.submit(record) {
            log::warn!("Failed to deliver {} record for step {}: {}", event.as_str(), order, e);
        }
    }
}

impl PipelineListener for MetricsReporter {
    fn on_build_step_started(&mut self, event: &BuildStepStartedArgs) {
        log::debug!("Step {} ({}) started", event.order, event.step.name());
        self.timer.on_start(&StepKey::new(&event.options.build_id, event.order));

        let timestamp = self.timer.now().timestamp();
        let record = build_started_record(event, GIT_VERSION, timestamp);
        self.deliver(record);
    }

    fn on_build_step_finished(&mut self, event: &BuildStepFinishedArgs) {
        let elapsed = self.timer.on_finish(&StepKey::new(&event.options.build_id, event.order));
        log::debug!(
            "Step {} ({}) finished after {:.3}s, successful: {}",
            event.order,
            event.step.name(),
            elapsed,
            event.successful
        );

        let timestamp = self.timer.now().timestamp();
        let record = build_finished_record(event, GIT_VERSION, timestamp, elapsed);
        self.deliver(record);
    }
}

impl Drop for MetricsReporter {
    fn drop(&mut self) {
        if let Err(e) = self.channel.flush() {
            log::warn!("Failed to flush telemetry on shutdown: {}", e);
        }
    }
}
