use crate::event_bus::Event;
use crate::types::ErrorInfo;

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta
pub const RESET_COLOR: &str = "\x1b[0m";

/// Rendered output for a telemetry item that can be consumed by sinks.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl EventRender {
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

pub trait TelemetryFormatter: Send + Sync {
    fn render_event(&self, event: &Event) -> EventRender;
    fn render_error(&self, error: &ErrorInfo) -> EventRender;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PlainFormatter;

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &Event) -> EventRender {
        EventRender {
            context: Some(event.scope_label().to_string()),
            lines: vec![format!("{LINE_COLOR}{event}{RESET_COLOR}\n")],
        }
    }

    fn render_error(&self, error: &ErrorInfo) -> EventRender {
        let mut lines = vec![format!("{LINE_COLOR}  error: {}{RESET_COLOR}\n", error.message)];
        if let Some(stack) = &error.stack {
            lines.extend(
                stack
                    .lines()
                    .map(|l| format!("{LINE_COLOR}    {l}{RESET_COLOR}\n")),
            );
        }
        EventRender {
            context: None,
            lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_render_lists_the_cause_chain() {
        let error = ErrorInfo {
            message: "attach failed".into(),
            stack: Some("caused by: device busy\ncaused by: timeout".into()),
        };
        let render = PlainFormatter.render_error(&error);
        assert_eq!(render.lines.len(), 3);
        assert!(render.join_lines().contains("caused by: timeout"));
    }
}
