use tracing::warn;

use crate::error::Result;

/// Receives `(tag, value, step)` scalar events, e.g. a dashboard writer.
pub trait MetricsSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: u64) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn add_scalar(&mut self, _tag: &str, _value: f64, _step: u64) -> Result<()> {
        Ok(())
    }
}

/// Best-effort front for an optional sink. Sink errors are logged and
/// dropped; they never reach the training loop.
#[derive(Default)]
pub struct MetricsLogger {
    sink: Option<Box<dyn MetricsSink>>,
    dropped: u64,
}

impl MetricsLogger {
    pub fn new(sink: Box<dyn MetricsSink>) -> MetricsLogger {
        MetricsLogger { sink: Some(sink), dropped: 0 }
    }

    pub fn disabled() -> MetricsLogger {
        MetricsLogger::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Events the sink failed to accept so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn scalar(&mut self, tag: &str, value: f64, step: u64) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.add_scalar(tag, value, step) {
                self.dropped += 1;
                warn!(tag, step, error = %e, "metrics sink rejected scalar");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.flush() {
                warn!(error = %e, "metrics sink flush failed");
            }
        }
    }
}
