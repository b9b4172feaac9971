//! Tick runtime: the entry point an external scheduler calls, plus the
//! collaborators it needs between ticks.
//!
//! - **[`TickRunner`]** - rehydrates the loops from a [`TickInput`], runs one
//!   tick and returns a [`TickOutput`] carrying the decision and the next
//!   continuation
//! - **[`InstanceStore`]** - creation and status bookkeeping of workflow
//!   instances ([`InMemoryInstanceStore`] provided)
//! - **[`LocalDriver`]** - in-process scheduler that keeps ticking until a
//!   terminal decision
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use steploom::registry::StepRegistry;
//! use steploom::runtimes::{InMemoryInstanceStore, LocalDriver, TickInput, TickRunner};
//! # async fn example(registry: StepRegistry) -> Result<(), Box<dyn std::error::Error>> {
//! let instances = Arc::new(InMemoryInstanceStore::new());
//! instances.define("provision", 1, vec![])?;
//! let runner = TickRunner::new(registry, instances);
//!
//! let report = LocalDriver::new(&runner)
//!     .drive(TickInput::trigger("provision", 1, serde_json::json!({})))
//!     .await?;
//! println!("finished with {:?}", report.outcome());
//! # Ok(())
//! # }
//! ```

pub mod driver;
pub mod instance_store;
pub mod journal;
pub mod runner;
pub mod runtime_config;
pub mod tick;

pub use driver::{DriveReport, DriverError, LocalDriver};
pub use instance_store::{
    CreateInstanceRequest, InMemoryInstanceStore, InstanceStore, InstanceStoreError,
    StepStatusChange, WorkflowStatusChange,
};
pub use runner::TickRunner;
pub use runtime_config::{ConfigError, RuntimeConfig};
pub use tick::{LoopState, TickInput, TickMeta, TickOutput};
