//! Hierarchical progress reporting
//!
//! Every long-running call takes a [`Progress`]. It only reports; it never
//! cancels or otherwise changes what the call does. Steps nest with
//! [`Progress::resolve`], producing messages such as
//! `Save table | Row 3/10 | Data annotation 'mask'`.

use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Receiver of progress messages
pub trait ProgressSink: Send + Sync {
    fn message(&self, path: &str, message: &str);
}

/// Default sink: emits each message as a `tracing` debug event
#[derive(Debug, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn message(&self, path: &str, message: &str) {
        if path.is_empty() {
            debug!(target: "spillway::progress", "{}", message);
        } else {
            debug!(target: "spillway::progress", "{} | {}", path, message);
        }
    }
}

/// A position in the progress hierarchy plus the sink receiving its messages
#[derive(Clone)]
pub struct Progress {
    path: String,
    sink: Arc<dyn ProgressSink>,
}

impl Progress {
    pub fn new() -> Self {
        Self::with_sink(Arc::new(TracingSink))
    }

    pub fn with_sink(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            path: String::new(),
            sink,
        }
    }

    /// Child progress for a named sub-step
    pub fn resolve(&self, step: impl fmt::Display) -> Self {
        let path = if self.path.is_empty() {
            step.to_string()
        } else {
            format!("{} | {}", self.path, step)
        };
        Self {
            path,
            sink: Arc::clone(&self.sink),
        }
    }

    /// Child progress for step `index` of `total`, announcing it to the sink
    pub fn resolve_and_log(&self, step: impl fmt::Display, index: usize, total: usize) -> Self {
        let child = self.resolve(format!("{} {}/{}", step, index + 1, total));
        child.sink.message(&child.path, "");
        child
    }

    pub fn log(&self, message: impl AsRef<str>) {
        self.sink.message(&self.path, message.as_ref());
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress").field("path", &self.path).finish()
    }
}
