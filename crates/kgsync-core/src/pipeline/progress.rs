//! Progress reporting for long-running graph tasks

use std::fmt;
use std::sync::{Arc, Mutex};

/// Status sent when the stored graph is missing or empty
pub const FETCH_FAILED: i32 = -1;
/// Status sent when a run aborts with an error
pub const PIPELINE_FAILED: i32 = -2;

/// One observable step of a pipeline run
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Message(String),
    Error { code: i32, message: String },
}

impl ProgressEvent {
    pub fn message(text: impl Into<String>) -> Self {
        Self::Message(text.into())
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    pub fn fetch_failed(message: impl Into<String>) -> Self {
        Self::error(FETCH_FAILED, message)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(text) => write!(f, "{}", text),
            Self::Error { code, message } => write!(f, "[{}] {}", code, message),
        }
    }
}

/// Caller-supplied sink for progress events
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Send `event` to the callback when one is set
pub fn notify(progress: Option<&ProgressCallback>, event: ProgressEvent) {
    if let Some(callback) = progress {
        callback(event);
    }
}

/// Records every event it receives
#[derive(Debug, Clone, Default)]
pub struct ProgressLog {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback appending to this log
    pub fn callback(&self) -> ProgressCallback {
        let events = Arc::clone(&self.events);
        Arc::new(move |event: ProgressEvent| {
            if let Ok(mut events) = events.lock() {
                events.push(event);
            }
        })
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().iter().map(ToString::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_collects_events() {
        let log = ProgressLog::new();
        let callback = log.callback();
        notify(Some(&callback), ProgressEvent::message("Fetch the existing graph."));
        notify(Some(&callback), ProgressEvent::fetch_failed("Failed to fetch the graph."));
        notify(None, ProgressEvent::message("dropped"));

        let events = log.events();
        assert_eq!(events.len(), 2);
        assert!(!events[0].is_error());
        assert_eq!(
            events[1],
            ProgressEvent::Error {
                code: FETCH_FAILED,
                message: "Failed to fetch the graph.".into()
            }
        );
        assert_eq!(log.messages()[1], "[-1] Failed to fetch the graph.");
    }
}
