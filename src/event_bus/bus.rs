use std::sync::{Arc, Mutex};

use tokio::{sync::oneshot, task};

use super::event::Event;
use super::sink::{EventSink, StdOutSink};
use crate::telemetry::{CONTEXT_COLOR, PlainFormatter, RESET_COLOR, TelemetryFormatter};

/// Receives lifecycle events and forwards rendered lines to a sink.
pub struct EventBus {
    output_sink: Arc<Mutex<dyn EventSink>>,
    formatter: Arc<dyn TelemetryFormatter>,
    event_channel: (flume::Sender<Event>, flume::Receiver<Event>),
    listener: Arc<Mutex<Option<ListenerState>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(StdOutSink::default())
    }
}

impl EventBus {
    pub fn with_sink<T>(sink: T) -> Self
    where
        T: EventSink + 'static,
    {
        Self::with_sink_and_formatter(sink, PlainFormatter)
    }

    pub fn with_sink_and_formatter<T, F>(sink: T, formatter: F) -> Self
    where
        T: EventSink + 'static,
        F: TelemetryFormatter + 'static,
    {
        Self {
            output_sink: Arc::new(Mutex::new(sink)),
            formatter: Arc::new(formatter),
            event_channel: flume::unbounded(),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    pub fn get_sender(&self) -> flume::Sender<Event> {
        self.event_channel.0.clone()
    }

    /// Spawn the background writer task. A second call is a no-op.
    pub fn listen_for_events(&self) {
        let Ok(mut guard) = self.listener.lock() else {
            tracing::warn!("event bus listener lock poisoned; events will not be written");
            return;
        };
        if guard.is_some() {
            return;
        }
        let receiver = self.event_channel.1.clone();
        let output = self.output_sink.clone();
        let formatter = self.formatter.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = task::spawn(async move {
            let mut current_scope: Option<String> = None;
            loop {
                tokio::select! {
                    biased;
                    recv = receiver.recv_async() => match recv {
                        Err(_) => break,
                        Ok(event) => write_event(&*formatter, &output, &mut current_scope, &event),
                    },
                    _ = &mut shutdown_rx => {
                        for event in receiver.drain() {
                            write_event(&*formatter, &output, &mut current_scope, &event);
                        }
                        break;
                    }
                }
            }
        });
        *guard = Some(ListenerState {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the writer task after it has drained queued events.
    pub async fn stop_listener(&self) {
        let state = match self.listener.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(state) = state {
            let _ = state.shutdown_tx.send(());
            if let Err(e) = state.handle.await {
                tracing::debug!(error = %e, "event bus listener ended abnormally");
            }
        }
    }
}

fn write_event(
    formatter: &dyn TelemetryFormatter,
    output: &Mutex<dyn EventSink>,
    current_scope: &mut Option<String>,
    event: &Event,
) {
    let render = formatter.render_event(event);
    let mut body = render.join_lines();
    if let Some(error) = event.error() {
        body.push_str(&formatter.render_error(error).join_lines());
    }
    let message = match render.context {
        Some(scope) if current_scope.as_deref() != Some(scope.as_str()) => {
            let line = format!("{CONTEXT_COLOR}{scope}{RESET_COLOR}: {body}");
            *current_scope = Some(scope);
            line
        }
        Some(_) => body,
        None => {
            *current_scope = None;
            body
        }
    };

    let written = output
        .lock()
        .map_err(|poisoned| std::io::Error::other(format!("poisoned mutex: {poisoned}")))
        .and_then(|mut sink| sink.write(&message));
    if let Err(e) = written {
        tracing::warn!(error = %e, "event bus write failed");
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.listener.lock() {
            if let Some(state) = guard.take() {
                let _ = state.shutdown_tx.send(());
                state.handle.abort();
            }
        }
    }
}

struct ListenerState {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}
