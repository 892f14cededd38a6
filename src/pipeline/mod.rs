//! Pipeline lifecycle events
//!
//! The pipeline engine owns step execution and build identity. This module
//! only models the events it emits, so the reporter can subscribe to them
//! without knowing anything else about the engine.

use serde::{Deserialize, Serialize};

pub mod bus;

pub use bus::{EventBus, PipelineListener};

/// Build and application identity attached to every lifecycle event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineOptions {
    pub application_id: String,
    pub application_name: String,
    pub application_owner_name: String,
    pub application_started_by_name: String,
    pub build_id: String,
    pub deploy_id: String,
}

/// Opaque step descriptor supplied by the pipeline engine.
///
/// The reporter forwards it untouched; `name()` exists only for log lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepDescriptor(pub serde_json::Value);

impl StepDescriptor {
    pub fn name(&self) -> &str {
        self.0.get("name").and_then(|v| v.as_str()).unwrap_or("<unnamed>")
    }
}

/// Payload of the step started event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStepStartedArgs {
    #[serde(default)]
    pub options: PipelineOptions,
    #[serde(default)]
    pub step: StepDescriptor,
    pub order: u32,
}

/// Payload of the step finished event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStepFinishedArgs {
    #[serde(default)]
    pub options: PipelineOptions,
    #[serde(default)]
    pub step: StepDescriptor,
    pub order: u32,
    pub successful: bool,
}

/// Lifecycle events emitted by the pipeline engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum PipelineEvent {
    StepStarted(BuildStepStartedArgs),
    StepFinished(BuildStepFinishedArgs),
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::StepStarted(_) => "stepStarted",
            PipelineEvent::StepFinished(_) => "stepFinished",
        }
    }

    pub fn order(&self) -> u32 {
        match self {
            PipelineEvent::StepStarted(args) => args.order,
            PipelineEvent::StepFinished(args) => args.order,
        }
    }
}
