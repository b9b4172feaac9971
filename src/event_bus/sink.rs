use std::io::{self, Result as IoResult, Stdout, Write};
use std::sync::{Arc, Mutex};

/// Output device for rendered event lines.
pub trait EventSink: Sync + Send {
    fn write(&mut self, message: &str) -> IoResult<()>;
}

pub struct StdOutSink {
    handle: Stdout,
}

impl Default for StdOutSink {
    fn default() -> Self {
        Self {
            handle: io::stdout(),
        }
    }
}

impl EventSink for StdOutSink {
    fn write(&mut self, message: &str) -> IoResult<()> {
        self.handle.write_all(message.as_bytes())?;
        self.handle.flush()
    }
}

/// Keeps rendered lines in memory; clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn write(&mut self, message: &str) -> IoResult<()> {
        self.entries
            .lock()
            .map_err(|e| io::Error::other(format!("poisoned mutex: {e}")))?
            .push(message.to_string());
        Ok(())
    }
}
