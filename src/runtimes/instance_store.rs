//! Workflow instance records: creation, lookup and status bookkeeping.
//!
//! The instance record is the one piece of state shared across ticks outside
//! the continuation. The engine only needs the four operations of
//! [`InstanceStore`]; [`InMemoryInstanceStore`] also keeps the workflow
//! definitions instances are created from.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::{Arc, RwLock};

use crate::types::{
    ErrorInfo, RequestContext, StepDescriptor, StepRecord, StepStatus, WorkflowInstance,
    WorkflowStatus,
};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::id_generator::{IdGenerator, IdSource};

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum InstanceStoreError {
    #[error("workflow instance not found: {id}")]
    #[diagnostic(
        code(steploom::instance_store::not_found),
        help("The session id must name an instance created by an earlier tick.")
    )]
    NotFound { id: String },

    #[error("no workflow definition for {workflow_id}@v{workflow_version}")]
    #[diagnostic(
        code(steploom::instance_store::unknown_workflow),
        help("Define the workflow plan in the instance store before triggering it.")
    )]
    UnknownWorkflow {
        workflow_id: String,
        workflow_version: u32,
    },

    #[error("step index {index} is outside instance {id}")]
    #[diagnostic(code(steploom::instance_store::step_index))]
    StepIndex { id: String, index: usize },

    #[error("backend error: {message}")]
    #[diagnostic(
        code(steploom::instance_store::backend),
        help("Check backend connectivity and permissions.")
    )]
    Backend { message: String },
}

pub type Result<T> = std::result::Result<T, InstanceStoreError>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateInstanceRequest {
    pub workflow_id: String,
    pub workflow_version: u32,
    pub status: WorkflowStatus,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WorkflowStatusChange {
    pub instance_id: String,
    pub status: WorkflowStatus,
    pub error: Option<ErrorInfo>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StepStatusChange {
    pub instance_id: String,
    pub index: usize,
    pub status: StepStatus,
    pub message: Option<String>,
    pub error: Option<ErrorInfo>,
}

impl StepStatusChange {
    pub fn new(instance_id: impl Into<String>, index: usize, status: StepStatus) -> Self {
        Self {
            instance_id: instance_id.into(),
            index,
            status,
            message: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Create an instance of the requested workflow definition.
    async fn create_instance(
        &self,
        ctx: &RequestContext,
        request: CreateInstanceRequest,
        input: &Value,
    ) -> Result<WorkflowInstance>;

    /// Fetch an instance, failing with `NotFound` if it does not exist.
    async fn must_find_instance(&self, id: &str) -> Result<WorkflowInstance>;

    async fn change_workflow_status(&self, change: WorkflowStatusChange) -> Result<()>;

    /// Record a step status. A `None` message keeps the previous one.
    async fn change_step_status(&self, change: StepStatusChange) -> Result<()>;
}

type DefinitionKey = (String, u32);

/// Process-local instance store.
pub struct InMemoryInstanceStore {
    definitions: RwLock<FxHashMap<DefinitionKey, Vec<StepDescriptor>>>,
    instances: RwLock<FxHashMap<String, WorkflowInstance>>,
    ids: Arc<dyn IdSource>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryInstanceStore {
    fn default() -> Self {
        Self::with_sources(Arc::new(IdGenerator::new()), Arc::new(SystemClock))
    }
}

impl InMemoryInstanceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sources(ids: Arc<dyn IdSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            definitions: RwLock::new(FxHashMap::default()),
            instances: RwLock::new(FxHashMap::default()),
            ids,
            clock,
        }
    }

    /// Register (or replace) a workflow plan. Step indices are renumbered to
    /// match their position.
    pub fn define(
        &self,
        workflow_id: impl Into<String>,
        workflow_version: u32,
        steps: Vec<StepDescriptor>,
    ) -> Result<()> {
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| StepDescriptor { index, ..step })
            .collect();
        let mut map = self.definitions.write().map_err(poisoned)?;
        map.insert((workflow_id.into(), workflow_version), steps);
        Ok(())
    }

    /// Snapshot of an instance, if present.
    pub fn get(&self, id: &str) -> Result<Option<WorkflowInstance>> {
        let map = self.instances.read().map_err(poisoned)?;
        Ok(map.get(id).cloned())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.instances.read().map_err(poisoned)?.len())
    }

    fn update<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut WorkflowInstance) -> Result<()>,
    {
        let now = self.clock.now();
        let mut map = self.instances.write().map_err(poisoned)?;
        let instance = map
            .get_mut(id)
            .ok_or_else(|| InstanceStoreError::NotFound { id: id.to_string() })?;
        f(instance)?;
        instance.updated_at = now;
        instance.revision += 1;
        Ok(())
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> InstanceStoreError {
    InstanceStoreError::Backend {
        message: format!("lock poisoned: {e}"),
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn create_instance(
        &self,
        ctx: &RequestContext,
        request: CreateInstanceRequest,
        _input: &Value,
    ) -> Result<WorkflowInstance> {
        let steps = {
            let defs = self.definitions.read().map_err(poisoned)?;
            defs.get(&(request.workflow_id.clone(), request.workflow_version))
                .cloned()
                .ok_or_else(|| InstanceStoreError::UnknownWorkflow {
                    workflow_id: request.workflow_id.clone(),
                    workflow_version: request.workflow_version,
                })?
        };

        let now = self.clock.now();
        let instance = WorkflowInstance {
            id: self.ids.next_id("wi"),
            workflow_id: request.workflow_id,
            workflow_version: request.workflow_version,
            status: request.status,
            step_records: vec![StepRecord::default(); steps.len()],
            steps,
            error: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        };
        tracing::info!(
            instance = %instance.id,
            workflow = %instance.workflow_id,
            version = instance.workflow_version,
            principal = ?ctx.principal,
            "workflow instance created"
        );

        let mut map = self.instances.write().map_err(poisoned)?;
        map.insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    async fn must_find_instance(&self, id: &str) -> Result<WorkflowInstance> {
        self.get(id)?
            .ok_or_else(|| InstanceStoreError::NotFound { id: id.to_string() })
    }

    async fn change_workflow_status(&self, change: WorkflowStatusChange) -> Result<()> {
        self.update(&change.instance_id, |instance| {
            instance.status = change.status;
            if change.error.is_some() {
                instance.error = change.error;
            }
            Ok(())
        })
    }

    async fn change_step_status(&self, change: StepStatusChange) -> Result<()> {
        let now = self.clock.now();
        let id = change.instance_id.clone();
        self.update(&id, |instance| {
            let record = instance.step_records.get_mut(change.index).ok_or_else(|| {
                InstanceStoreError::StepIndex {
                    id: change.instance_id.clone(),
                    index: change.index,
                }
            })?;
            record.status = change.status;
            if change.message.is_some() {
                record.message = change.message;
            }
            if change.error.is_some() {
                record.error = change.error;
            }
            match change.status {
                StepStatus::InProgress if record.started_at.is_none() => {
                    record.started_at = Some(now);
                }
                StepStatus::Done | StepStatus::Skipped | StepStatus::Error => {
                    record.ended_at = Some(now);
                }
                _ => {}
            }
            Ok(())
        })
    }
}
