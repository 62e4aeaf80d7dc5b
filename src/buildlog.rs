//! Build Log - Explicit Event Collector
//!
//! Components record what they repaired or skipped here.
//! The caller owns the log and decides how to render it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Repair,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildEvent {
    pub at: DateTime<Utc>,
    pub level: EventLevel,
    pub rule: String,
    pub subject: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildLog {
    events: Vec<BuildEvent>,
}

impl BuildLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        level: EventLevel,
        rule: &str,
        subject: Option<&str>,
        message: impl Into<String>,
    ) {
        let message = message.into();
        let subject_str = subject.unwrap_or("-");
        match level {
            EventLevel::Info => tracing::info!(rule, subject = subject_str, "{}", message),
            EventLevel::Repair => tracing::info!(rule, subject = subject_str, repair = true, "{}", message),
            EventLevel::Warning => tracing::warn!(rule, subject = subject_str, "{}", message),
            EventLevel::Error => tracing::error!(rule, subject = subject_str, "{}", message),
        }
        self.events.push(BuildEvent {
            at: Utc::now(),
            level,
            rule: rule.to_string(),
            subject: subject.map(str::to_string),
            message,
        });
    }

    pub fn info(&mut self, rule: &str, subject: &str, message: impl Into<String>) {
        self.record(EventLevel::Info, rule, Some(subject), message);
    }

    pub fn repair(&mut self, rule: &str, subject: &str, message: impl Into<String>) {
        self.record(EventLevel::Repair, rule, Some(subject), message);
    }

    pub fn warn(&mut self, rule: &str, subject: &str, message: impl Into<String>) {
        self.record(EventLevel::Warning, rule, Some(subject), message);
    }

    pub fn error(&mut self, rule: &str, message: impl Into<String>) {
        self.record(EventLevel::Error, rule, None, message);
    }

    pub fn events(&self) -> &[BuildEvent] {
        &self.events
    }

    pub fn repairs(&self) -> impl Iterator<Item = &BuildEvent> {
        self.events.iter().filter(|e| e.level == EventLevel::Repair)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &BuildEvent> {
        self.events.iter().filter(|e| e.level == EventLevel::Warning)
    }

    pub fn count_rule(&self, rule: &str) -> usize {
        self.events.iter().filter(|e| e.rule == rule).count()
    }

    pub fn has_errors(&self) -> bool {
        self.events.iter().any(|e| e.level == EventLevel::Error)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order() {
        let mut log = BuildLog::new();
        log.repair("identifier", "BP/items/sword.json", "foo:sword -> factory:sword");
        log.warn("unsafe_path", "../etc/passwd", "skipped");
        log.info("archive", "out.mcaddon", "written");

        let rules: Vec<_> = log.events().iter().map(|e| e.rule.as_str()).collect();
        assert_eq!(rules, vec!["identifier", "unsafe_path", "archive"]);
        assert_eq!(log.repairs().count(), 1);
        assert_eq!(log.warnings().count(), 1);
        assert!(!log.has_errors());
    }

    #[test]
    fn test_serializes_levels_snake_case() {
        let mut log = BuildLog::new();
        log.error("batch", "nothing usable");
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["events"][0]["level"], "error");
        assert!(json["events"][0]["subject"].is_null());
    }
}
