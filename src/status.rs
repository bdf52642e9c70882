//! Progress reporting
//!
//! Components emit free-text [`ProgressEvent`]s; the severity is classified
//! once here rather than by each caller. A [`StatusReporter`] is a pure sink:
//! nothing it does can influence the control flow of an export.

use std::sync::Mutex;
use tracing::{error, info, warn};

/// Severity of a progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
}

impl Severity {
    /// Infer severity from message text
    ///
    /// Error keywords win over warning keywords, which win over success
    /// keywords; anything else is informational.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let contains_any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if contains_any(&["error", "failed", "cannot", "could not"]) {
            Self::Error
        } else if contains_any(&["warning", "caution", "partial"]) {
            Self::Warning
        } else if contains_any(&["success", "complete", "saved"]) {
            Self::Success
        } else {
            Self::Info
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Success => "success",
        }
    }
}

/// One human-readable progress update
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub message: String,
    pub percent_complete: Option<f32>,
    pub severity: Severity,
}

impl ProgressEvent {
    /// Event whose severity is inferred from the message
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let severity = Severity::classify(&message);
        Self {
            message,
            percent_complete: None,
            severity,
        }
    }

    /// Event with an explicit severity
    pub fn with_severity(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            percent_complete: None,
            severity,
        }
    }

    /// Attach a completion percentage, clamped to `0..=100`
    #[must_use]
    pub fn percent(mut self, percent: f32) -> Self {
        self.percent_complete = Some(percent.clamp(0.0, 100.0));
        self
    }
}

/// Sink for progress events
pub trait StatusReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

impl<F> StatusReporter for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn report(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Forwards events to `tracing` at a level chosen by severity
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl StatusReporter for TracingReporter {
    fn report(&self, event: &ProgressEvent) {
        let percent = event.percent_complete;
        match event.severity {
            Severity::Error => error!(target: "climate_export::status", ?percent, "{}", event.message),
            Severity::Warning => warn!(target: "climate_export::status", ?percent, "{}", event.message),
            Severity::Info | Severity::Success => {
                info!(target: "climate_export::status", severity = event.severity.as_str(), ?percent, "{}", event.message)
            }
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.message).collect()
    }

    /// Events at the given severity
    pub fn with_severity(&self, severity: Severity) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.severity == severity)
            .collect()
    }
}

impl StatusReporter for CollectingReporter {
    fn report(&self, event: &ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
