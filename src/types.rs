//! Core data model shared by the loops, the runner and the instance store.
//!
//! A [`WorkflowInstance`] is one execution of a workflow definition. Its plan
//! (the ordered [`StepDescriptor`] list) never changes after creation; only the
//! status fields are mutated, and only by the instance store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifies a step implementation inside the [`StepRegistry`](crate::registry::StepRegistry).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepKey {
    pub template_id: String,
    pub template_version: u32,
}

impl StepKey {
    pub fn new(template_id: impl Into<String>, template_version: u32) -> Self {
        Self {
            template_id: template_id.into(),
            template_version,
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.template_id, self.template_version)
    }
}

/// One entry of a workflow plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDescriptor {
    pub index: usize,
    pub step_template_id: String,
    pub step_template_version: u32,
    #[serde(default)]
    pub config: Value,
    /// When set, the step's `should_skip` hook is consulted before `start`.
    #[serde(default)]
    pub skippable: bool,
}

impl StepDescriptor {
    pub fn new(index: usize, template_id: impl Into<String>, template_version: u32) -> Self {
        Self {
            index,
            step_template_id: template_id.into(),
            step_template_version: template_version,
            config: Value::Null,
            skippable: false,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn skippable(mut self) -> Self {
        self.skippable = true;
        self
    }

    pub fn key(&self) -> StepKey {
        StepKey::new(self.step_template_id.clone(), self.step_template_version)
    }
}

/// Persisted status of a workflow instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    NotStarted,
    InProgress,
    Paused,
    Done,
    Error,
}

/// Persisted status of a single step of an instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    NotStarted,
    InProgress,
    Paused,
    Done,
    Skipped,
    Error,
}

/// Status record kept per plan entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub id: String,
    pub workflow_id: String,
    pub workflow_version: u32,
    pub status: WorkflowStatus,
    pub steps: Vec<StepDescriptor>,
    #[serde(default)]
    pub step_records: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every status change. Informational only.
    #[serde(default)]
    pub revision: u64,
}

impl WorkflowInstance {
    pub fn step(&self, index: usize) -> Option<&StepDescriptor> {
        self.steps.get(index)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Serializable error summary carried by `fail` decisions and status records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorInfo {
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    /// Render an error and its `source()` chain; the chain is cut at `stack_limit` chars.
    pub fn from_error(err: &(dyn std::error::Error + 'static), stack_limit: usize) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        let stack = if chain.is_empty() {
            None
        } else {
            Some(truncate(&chain.join("\n"), stack_limit))
        };
        Self {
            message: err.to_string(),
            stack,
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...");
    out
}

/// Caller identity forwarded to the instance store on creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
}
