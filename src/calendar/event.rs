use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calendar::RecurrencePattern;

#[derive(Debug, Error, PartialEq)]
pub enum EventError {
    #[error("Event '{0}' ends before it starts")]
    EndsBeforeStart(String),
    #[error("Reminder '{0}' must start and end at the same instant")]
    ReminderWithDuration(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    NormalEvent,
    Anniversary,
    AllDayEvent,
    Meeting,
    Reminder,
}

impl EventType {
    /// Anniversaries are day-granular just like all-day events.
    pub fn is_all_day(self) -> bool {
        matches!(self, EventType::AllDayEvent | EventType::Anniversary)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::NormalEvent => "NormalEvent",
            EventType::Anniversary => "Anniversary",
            EventType::AllDayEvent => "AllDayEvent",
            EventType::Meeting => "Meeting",
            EventType::Reminder => "Reminder",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NormalEvent" => Ok(EventType::NormalEvent),
            "Anniversary" => Ok(EventType::Anniversary),
            "AllDayEvent" => Ok(EventType::AllDayEvent),
            "Meeting" => Ok(EventType::Meeting),
            "Reminder" => Ok(EventType::Reminder),
            other => Err(format!("Unknown event type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub content: String,
    pub location: String,
    pub start: Option<DateTime<FixedOffset>>,
    pub end: Option<DateTime<FixedOffset>>,
    pub last_updated: DateTime<Utc>,
    pub event_type: EventType,
    pub private: bool,
    pub recurrence: Option<RecurrencePattern>,
}

impl CalendarEvent {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: String::new(),
            location: String::new(),
            start: Some(start),
            end: Some(end),
            last_updated: Utc::now(),
            event_type: EventType::NormalEvent,
            private: false,
            recurrence: None,
        }
    }

    pub fn with_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    pub fn with_last_updated(mut self, last_updated: DateTime<Utc>) -> Self {
        self.last_updated = last_updated;
        self
    }

    pub fn with_recurrence(mut self, recurrence: RecurrencePattern) -> Self {
        self.recurrence = Some(recurrence);
        self
    }

    pub fn is_all_day(&self) -> bool {
        self.event_type.is_all_day()
    }

    pub fn is_complete(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.start.map(|start| start.date_naive())
    }

    /// Date of the last occurrence, or of the only one for single events.
    pub fn last_start_date(&self) -> Option<NaiveDate> {
        let start = self.start?;
        let last = match &self.recurrence {
            Some(pattern) => pattern.last_start(start).unwrap_or(start),
            None => start,
        };
        Some(last.date_naive().max(start.date_naive()))
    }

    pub fn duration(&self) -> Option<Duration> {
        Some(self.end? - self.start?)
    }

    pub fn validate(&self) -> Result<(), EventError> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(EventError::EndsBeforeStart(self.title.clone()));
            }
            if self.event_type == EventType::Reminder && start != end {
                return Err(EventError::ReminderWithDuration(self.title.clone()));
            }
        }
        Ok(())
    }

    /// Title plus start, enough for an operator to find the entry by hand.
    pub fn describe(&self) -> String {
        match self.start {
            Some(start) if self.is_all_day() => {
                format!("'{}' on {}", self.title, start.format("%Y-%m-%d"))
            }
            Some(start) => format!("'{}' at {}", self.title, start.to_rfc3339()),
            None => format!("'{}' (no start time)", self.title),
        }
    }
}
