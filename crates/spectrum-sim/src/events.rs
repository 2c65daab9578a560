//! Process-wide error sink
//!
//! Components never crash on a bad frame or a dead socket. They report the
//! failure here and carry on; a single logger task drains the sink.

use tokio::sync::mpsc;
use tracing::warn;

use crate::error::SimError;

/// A failure reported by some component
#[derive(Debug)]
pub struct ErrorReport {
    /// Who hit the error (e.g. "channel 37", "connection 4 (127.0.0.1:50112)")
    pub source: String,
    /// What went wrong
    pub error: SimError,
}

/// Receiving end of the error sink
pub type ErrorReceiver = mpsc::UnboundedReceiver<ErrorReport>;

/// Cloneable handle for reporting errors
#[derive(Debug, Clone)]
pub struct ErrorSink {
    tx: mpsc::UnboundedSender<ErrorReport>,
}

impl ErrorSink {
    /// Create a sink and the receiver its consumer drains
    pub fn channel() -> (Self, ErrorReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report an error; never blocks
    ///
    /// Reports are discarded once the consumer is gone.
    pub fn report(&self, source: impl Into<String>, error: impl Into<SimError>) {
        let _ = self.tx.send(ErrorReport {
            source: source.into(),
            error: error.into(),
        });
    }
}

/// Log every report until all sinks are dropped
pub async fn run_error_logger(mut rx: ErrorReceiver) {
    while let Some(report) = rx.recv().await {
        warn!(source = %report.source, "{}", report.error);
    }
}
