//! JSON-lines Sink
//!
//! Writes one JSON object per line, for replays and debugging.

use crate::{EventSink, SinkError};
use async_trait::async_trait;
use flowwatch_core::FlowEvent;
use parking_lot::Mutex;
use std::io::{self, Write};

/// Writes events as JSON lines
pub struct StdoutSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl StdoutSink {
    /// Sink writing to the process stdout
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }

    /// Sink writing to any writer
    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for StdoutSink {
    async fn deliver(&self, event: &FlowEvent) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut out = self.out.lock();
        out.write_all(&line)?;
        out.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}
