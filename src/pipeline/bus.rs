//! Typed event bus
//!
//! Listeners are registered once and receive every event in emission order.
//! Dispatch is synchronous; a listener never runs concurrently with itself.

use super::{BuildStepFinishedArgs, BuildStepStartedArgs, PipelineEvent};

/// Receiver of pipeline lifecycle events
pub trait PipelineListener: Send {
    fn on_build_step_started(&mut self, event: &BuildStepStartedArgs);
    fn on_build_step_finished(&mut self, event: &BuildStepFinishedArgs);

    /// Route an event to the matching handler
    fn on_event(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::StepStarted(args) => self.on_build_step_started(args),
            PipelineEvent::StepFinished(args) => self.on_build_step_finished(args),
        }
    }
}

/// Event bus owned by the pipeline side
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<Box<dyn PipelineListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; it receives all subsequently emitted events
    pub fn add_listener(&mut self, listener: Box<dyn PipelineListener>) {
        self.listeners.push(listener);
        log::debug!("Registered pipeline listener ({} total)", self.listeners.len());
    }

    /// Deliver an event to every listener, in registration order
    pub fn emit(&mut self, event: &PipelineEvent) {
        log::trace!("Emitting {} for step {}", event.name(), event.order());
        for listener in &mut self.listeners {
            listener.on_event(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}
