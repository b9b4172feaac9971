//! Wire shapes of one tick invocation.
//!
//! ```text
//! in:  { input, meta: { workflowId?, workflowVersion?, sessionId?, triggerId?, ... },
//!        loop?: { memento, slp, wp, ssp, sessionId? } }
//! out: { shouldWait, shouldLoop, shouldPass, shouldFail, wait?, error?,
//!        sessionId?, memento, slp, wp, ssp }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{ErrorInfo, RequestContext};
use crate::workflow_loop::Decision;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickInput {
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub meta: TickMeta,
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_state: Option<LoopState>,
}

impl TickInput {
    /// First tick of a new workflow run.
    pub fn trigger(workflow_id: impl Into<String>, workflow_version: u32, input: Value) -> Self {
        Self {
            input,
            meta: TickMeta {
                workflow_id: Some(workflow_id.into()),
                workflow_version: Some(workflow_version),
                ..TickMeta::default()
            },
            loop_state: None,
        }
    }

    /// Session this tick continues, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.meta
            .session_id
            .as_deref()
            .or_else(|| self.loop_state.as_ref()?.session_id.as_deref())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Delivery id of a trigger. A redelivered trigger with the same id is
    /// answered with the first delivery's output instead of a new instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,
    #[serde(default)]
    pub request_context: RequestContext,
    /// Scheduler metadata the engine passes through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Continuation state produced by the previous tick.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopState {
    #[serde(default)]
    pub memento: Value,
    #[serde(default)]
    pub slp: Value,
    #[serde(default)]
    pub wp: Value,
    #[serde(default)]
    pub ssp: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickOutput {
    pub should_wait: u8,
    pub should_loop: u8,
    pub should_pass: u8,
    pub should_fail: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Present only on the tick that created the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub memento: Value,
    pub slp: Value,
    pub wp: Value,
    pub ssp: Value,
}

impl TickOutput {
    pub(crate) fn new(
        decision: &Decision,
        state: LoopState,
        created_session: Option<String>,
    ) -> Self {
        let mut out = TickOutput {
            session_id: created_session,
            memento: state.memento,
            slp: state.slp,
            wp: state.wp,
            ssp: state.ssp,
            ..TickOutput::default()
        };
        match decision {
            Decision::Loop => out.should_loop = 1,
            Decision::Wait { seconds } => {
                out.should_wait = 1;
                out.wait = Some(*seconds);
            }
            Decision::Pass => out.should_pass = 1,
            Decision::Fail(error) => {
                out.should_fail = 1;
                out.error = Some(error.clone());
            }
        }
        out
    }

    pub fn decision(&self) -> Decision {
        if self.should_fail == 1 {
            Decision::Fail(
                self.error
                    .clone()
                    .unwrap_or_else(|| ErrorInfo::msg("workflow failed")),
            )
        } else if self.should_pass == 1 {
            Decision::Pass
        } else if self.should_wait == 1 {
            Decision::Wait {
                seconds: self.wait.unwrap_or(0),
            }
        } else {
            Decision::Loop
        }
    }

    /// Input for the next tick of the same session.
    pub fn continuation(&self, previous: &TickInput) -> TickInput {
        let session_id = self
            .session_id
            .clone()
            .or_else(|| previous.session_id().map(str::to_string));
        TickInput {
            input: previous.input.clone(),
            meta: previous.meta.clone(),
            loop_state: Some(LoopState {
                memento: self.memento.clone(),
                slp: self.slp.clone(),
                wp: self.wp.clone(),
                ssp: self.ssp.clone(),
                session_id,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn input_parses_the_wire_shape() {
        let tick: TickInput = serde_json::from_value(json!({
            "input": {"region": "eu"},
            "meta": {
                "workflowId": "wf",
                "workflowVersion": 2,
                "triggerId": "d-1",
                "traceId": "t-1"
            },
            "loop": {"memento": {"status": "running"}, "sessionId": "wi-1"}
        }))
        .unwrap();
        assert_eq!(tick.meta.workflow_id.as_deref(), Some("wf"));
        assert_eq!(tick.meta.workflow_version, Some(2));
        assert_eq!(tick.meta.trigger_id.as_deref(), Some("d-1"));
        assert_eq!(tick.meta.extra["traceId"], "t-1");
        assert!(!tick.meta.extra.contains_key("triggerId"));
        assert_eq!(tick.session_id(), Some("wi-1"));
        assert_eq!(tick.loop_state.unwrap().slp, Value::Null);
    }

    #[test]
    fn meta_session_wins_over_loop_session() {
        let mut tick = TickInput::default();
        tick.meta.session_id = Some("wi-meta".into());
        tick.loop_state = Some(LoopState {
            session_id: Some("wi-loop".into()),
            ..LoopState::default()
        });
        assert_eq!(tick.session_id(), Some("wi-meta"));
    }

    #[test]
    fn output_flags_match_the_decision() {
        let out = TickOutput::new(&Decision::Wait { seconds: 20 }, LoopState::default(), None);
        let wire = serde_json::to_value(&out).unwrap();
        assert_eq!(wire["shouldWait"], 1);
        assert_eq!(wire["shouldLoop"], 0);
        assert_eq!(wire["wait"], 20);
        assert!(wire.get("sessionId").is_none());
        assert_eq!(out.decision(), Decision::Wait { seconds: 20 });
    }

    #[test]
    fn continuation_carries_the_created_session() {
        let first = TickInput::trigger("wf", 1, json!({"a": 1}));
        let out = TickOutput::new(&Decision::Loop, LoopState::default(), Some("wi-9".into()));
        let next = out.continuation(&first);
        assert_eq!(next.session_id(), Some("wi-9"));
        assert_eq!(next.input, json!({"a": 1}));
        let after =
            TickOutput::new(&Decision::Loop, LoopState::default(), None).continuation(&next);
        assert_eq!(after.session_id(), Some("wi-9"));
    }
}
