//! Telemetry record schema
//!
//! Field names and omission rules are a compatibility surface with the
//! ingestion backend. `succesful` is spelled the way the backend expects.

use colored::*;
use serde::{Deserialize, Serialize};

use crate::pipeline::{BuildStepFinishedArgs, BuildStepStartedArgs, PipelineOptions, StepDescriptor};

/// Version of the record layout below
pub const SCHEMA_VERSION: u32 = 1;

/// Event collection records are written to by default
pub const DEFAULT_COLLECTION: &str = "build-events-ewok";

/// Version control system recorded for every build
pub const VCS_GIT: &str = "git";

/// Kind of lifecycle event a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "buildStepStarted")]
    StepStarted,
    #[serde(rename = "buildStepFinished")]
    StepFinished,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::StepStarted => "buildStepStarted",
            EventName::StepFinished => "buildStepFinished",
        }
    }
}

/// Application identity, nested under `application`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPayload {
    pub id: String,
    pub name: String,
    #[serde(rename = "ownerName")]
    pub owner_name: String,
}

/// One telemetry record per lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsPayload {
    pub application: ApplicationPayload,
    #[serde(rename = "startedBy")]
    pub started_by: String,
    #[serde(rename = "buildID")]
    pub build_id: String,
    #[serde(rename = "deployID")]
    pub deploy_id: String,
    pub event: EventName,
    pub step: StepDescriptor,
    #[serde(rename = "GitVersion")]
    pub git_version: String,
    #[serde(rename = "stepOrder")]
    pub step_order: u32,
    #[serde(rename = "succesful", default, skip_serializing_if = "is_unset_or_false")]
    pub successful: Option<bool>,
    #[serde(rename = "timeElapsed", default, skip_serializing_if = "is_unset_or_zero")]
    pub time_elapsed: Option<f64>,
    pub timestamp: i64,
    #[serde(rename = "versionControl")]
    pub version_control: String,
}

fn is_unset_or_false(value: &Option<bool>) -> bool {
    !value.unwrap_or(false)
}

fn is_unset_or_zero(value: &Option<f64>) -> bool {
    value.is_none_or(|v| v == 0.0)
}

fn base_record(
    options: &PipelineOptions,
    step: &StepDescriptor,
    order: u32,
    event: EventName,
    git_version: &str,
    timestamp: i64,
) -> MetricsPayload {
    MetricsPayload {
        application: ApplicationPayload {
            id: options.application_id.clone(),
            name: options.application_name.clone(),
            owner_name: options.application_owner_name.clone(),
        },
        started_by: options.application_started_by_name.clone(),
        build_id: options.build_id.clone(),
        deploy_id: options.deploy_id.clone(),
        event,
        step: step.clone(),
        git_version: git_version.to_string(),
        step_order: order,
        successful: None,
        time_elapsed: None,
        timestamp,
        version_control: VCS_GIT.to_string(),
    }
}

/// Build the record for a step started event
pub fn build_started_record(event: &BuildStepStartedArgs, git_version: &str, timestamp: i64) -> MetricsPayload {
    base_record(
        &event.options,
        &event.step,
        event.order,
        EventName::StepStarted,
        git_version,
        timestamp,
    )
}

/// Build the record for a step finished event.
///
/// Negative elapsed values are clamped to zero.
pub fn build_finished_record(
    event: &BuildStepFinishedArgs,
    git_version: &str,
    timestamp: i64,
    elapsed_seconds: f64,
) -> MetricsPayload {
    let mut record = base_record(
        &event.options,
        &event.step,
        event.order,
        EventName::StepFinished,
        git_version,
        timestamp,
    );
    record.successful = Some(event.successful);
    record.time_elapsed = Some(elapsed_seconds.max(0.0));
    record
}

impl MetricsPayload {
    /// Format for stdout display
    pub fn format_display(&self) -> String {
        let event_colored = match self.event {
            EventName::StepStarted => self.event.as_str().cyan(),
            EventName::StepFinished => match self.successful {
                Some(true) => self.event.as_str().green(),
                _ => self.event.as_str().red(),
            },
        };

        let mut parts = vec![
            self.timestamp.to_string().dimmed().to_string(),
            event_colored.to_string(),
            format!("#{}", self.step_order),
            self.step.name().bold().to_string(),
        ];

        if !self.build_id.is_empty() {
            let short_id: String = self.build_id.chars().take(8).collect();
            parts.push(format!("[{}]", short_id).dimmed().to_string());
        }

        if let Some(elapsed) = self.time_elapsed {
            parts.push(format!("{:.3}s", elapsed));
        }

        parts.join(" ")
    }
}
