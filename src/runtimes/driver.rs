//! In-process stand-in for the external scheduler.

use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

use super::runner::TickRunner;
use super::tick::{TickInput, TickOutput};
use crate::error::EngineError;
use crate::workflow_loop::Decision;

#[derive(Debug, Error, Diagnostic)]
pub enum DriverError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),

    #[error("workflow did not finish within {limit} ticks")]
    #[diagnostic(
        code(steploom::driver::loop_limit),
        help("Raise STEPLOOM_MAX_LOCAL_LOOPS or check for a goto cycle.")
    )]
    LoopLimit { limit: usize },
}

/// Everything one local run produced.
#[derive(Clone, Debug)]
pub struct DriveReport {
    pub session_id: Option<String>,
    pub decisions: Vec<Decision>,
    pub last: TickOutput,
}

impl DriveReport {
    pub fn outcome(&self) -> Option<&Decision> {
        self.decisions.last()
    }

    pub fn waits(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| matches!(d, Decision::Wait { .. }))
            .count()
    }
}

/// Feeds each tick's continuation back into the runner until the workflow
/// passes or fails.
pub struct LocalDriver<'r> {
    runner: &'r TickRunner,
}

impl<'r> LocalDriver<'r> {
    pub fn new(runner: &'r TickRunner) -> Self {
        Self { runner }
    }

    #[instrument(skip_all, err)]
    pub async fn drive(&self, trigger: TickInput) -> Result<DriveReport, DriverError> {
        let config = self.runner.config();
        let mut tick = trigger;
        let mut decisions = Vec::new();

        for _ in 0..config.max_local_loops {
            let output = self.runner.run_tick(&tick).await?;
            let decision = output.decision();
            decisions.push(decision.clone());

            if decision.is_terminal() {
                let session_id = output
                    .session_id
                    .clone()
                    .or_else(|| tick.session_id().map(str::to_string));
                return Ok(DriveReport {
                    session_id,
                    decisions,
                    last: output,
                });
            }
            if let Decision::Wait { seconds } = decision {
                if config.honor_waits {
                    tracing::info!(seconds, "waiting before next tick");
                    tokio::time::sleep(Duration::from_secs(seconds)).await;
                }
            }
            tick = output.continuation(&tick);
        }

        Err(DriverError::LoopLimit {
            limit: config.max_local_loops,
        })
    }
}
