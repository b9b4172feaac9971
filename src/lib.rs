//! # Steploom: resumable, tick-driven workflow steps
//!
//! Steploom runs a workflow as an ordered plan of steps, one *tick* at a
//! time. Every tick rehydrates the engine from a serialized continuation,
//! advances at most one step, and hands the next continuation back to an
//! external scheduler together with a decision: loop now, wait N seconds,
//! pass, or fail.
//!
//! ## Core Concepts
//!
//! - **Steps**: async units of work implementing [`Step`]; they may poll
//!   with a [`WaitSpec`] or jump with [`StepOutcome::GoTo`]
//! - **Step loops**: per-step state machines that drive start, check,
//!   then-call and compensation ([`step_loop`])
//! - **Workflow loop**: the cursor over the plan that turns step results
//!   into a [`Decision`] ([`workflow_loop`])
//! - **Mementos**: versioned snapshots every component captures and
//!   restores between ticks ([`memento`])
//! - **Runtime**: [`TickRunner`](runtimes::TickRunner) for one tick,
//!   [`LocalDriver`](runtimes::LocalDriver) to run a workflow in-process
//!
//! ## Quick Start
//!
//! ```no_run
//! use async_trait::async_trait;
//! use std::sync::Arc;
//! use steploom::registry::StepRegistry;
//! use steploom::runtimes::{InMemoryInstanceStore, LocalDriver, TickInput, TickRunner};
//! use steploom::step::{Step, StepContext, StepOutcome, StepResult, WaitSpec};
//! use steploom::types::StepDescriptor;
//!
//! #[derive(Default)]
//! struct AwaitVolume;
//!
//! #[async_trait]
//! impl Step for AwaitVolume {
//!     async fn start(&mut self, _ctx: &mut StepContext<'_>) -> StepResult<StepOutcome> {
//!         Ok(WaitSpec::seconds(20)
//!             .max_attempts(60)
//!             .until("is_ready")
//!             .into())
//!     }
//!
//!     async fn check(&mut self, _method: &str, _ctx: &mut StepContext<'_>) -> StepResult<bool> {
//!         Ok(true)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     let mut registry = StepRegistry::new();
//!     registry.register_default::<AwaitVolume>("await-volume", 1)?;
//!
//!     let instances = Arc::new(InMemoryInstanceStore::new());
//!     instances.define("provision", 1, vec![StepDescriptor::new(0, "await-volume", 1)])?;
//!
//!     let runner = TickRunner::new(registry, instances);
//!     let report = LocalDriver::new(&runner)
//!         .drive(TickInput::trigger("provision", 1, serde_json::json!({})))
//!         .await?;
//!     println!("{:?}", report.outcome());
//!     Ok(())
//! }
//! ```

pub mod container;
pub mod error;
pub mod event_bus;
pub mod memento;
pub mod observers;
pub mod provider;
pub mod registry;
pub mod reporters;
pub mod run_demo;
pub mod runtimes;
pub mod scope;
pub mod step;
pub mod step_loop;
pub mod stores;
pub mod telemetry;
pub mod types;
pub mod utils;
pub mod workflow_loop;

#[cfg(test)]
mod testing;

pub use error::{EngineError, Result};
pub use step::{Step, StepContext, StepError, StepOutcome, StepResult, WaitSpec};
pub use workflow_loop::Decision;
