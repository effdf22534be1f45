use chrono::NaiveDate;

use crate::calendar::{CalendarEvent, EventType};
use crate::storage::config::{ObfuscationConfig, SyncConfig};

/// Admission control over events, AND-composed by the reconciliation engine.
pub trait EventFilter: Send + Sync {
    fn accept(&self, event: &CalendarEvent) -> bool;
}

/// In-place redaction applied to payloads right before they are written.
pub trait EventObfuscator: Send + Sync {
    fn obfuscate(&self, event: &mut CalendarEvent);
}

pub struct EventTypeFilter {
    allowed: Vec<EventType>,
}

impl EventTypeFilter {
    pub fn new(allowed: Vec<EventType>) -> Self {
        Self { allowed }
    }
}

impl EventFilter for EventTypeFilter {
    fn accept(&self, event: &CalendarEvent) -> bool {
        self.allowed.contains(&event.event_type)
    }
}

pub struct PrivateEventFilter;

impl EventFilter for PrivateEventFilter {
    fn accept(&self, event: &CalendarEvent) -> bool {
        !event.private
    }
}

/// Keeps events with an occurrence in `[from, to]`. A recurring event is
/// judged by the span from its first to its last occurrence.
pub struct DateRangeFilter {
    from: NaiveDate,
    to: NaiveDate,
}

impl DateRangeFilter {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }
}

impl EventFilter for DateRangeFilter {
    fn accept(&self, event: &CalendarEvent) -> bool {
        match (event.start_date(), event.last_start_date()) {
            (Some(first), Some(last)) => first <= self.to && self.from <= last,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactedField {
    Title,
    Content,
    Location,
}

pub struct FieldObfuscator {
    field: RedactedField,
    replacement: String,
    private_only: bool,
}

impl FieldObfuscator {
    pub fn new(field: RedactedField, replacement: impl Into<String>) -> Self {
        Self {
            field,
            replacement: replacement.into(),
            private_only: false,
        }
    }

    pub fn private_only(mut self) -> Self {
        self.private_only = true;
        self
    }
}

impl EventObfuscator for FieldObfuscator {
    fn obfuscate(&self, event: &mut CalendarEvent) {
        if self.private_only && !event.private {
            return;
        }
        let target = match self.field {
            RedactedField::Title => &mut event.title,
            RedactedField::Content => &mut event.content,
            RedactedField::Location => &mut event.location,
        };
        target.clone_from(&self.replacement);
    }
}

pub fn filters_from_config(config: &SyncConfig) -> Vec<Box<dyn EventFilter>> {
    let mut filters: Vec<Box<dyn EventFilter>> =
        vec![Box::new(EventTypeFilter::new(config.event_types.clone()))];
    if !config.include_private {
        filters.push(Box::new(PrivateEventFilter));
    }
    filters
}

pub fn obfuscators_from_config(config: &ObfuscationConfig) -> Vec<Box<dyn EventObfuscator>> {
    let requested = [
        (config.title, RedactedField::Title, config.replacement_title.as_str()),
        (config.content, RedactedField::Content, ""),
        (config.location, RedactedField::Location, ""),
    ];

    requested
        .into_iter()
        .filter(|(enabled, _, _)| *enabled)
        .map(|(_, field, replacement)| {
            let obfuscator = FieldObfuscator::new(field, replacement);
            let obfuscator = if config.private_only {
                obfuscator.private_only()
            } else {
                obfuscator
            };
            Box::new(obfuscator) as Box<dyn EventObfuscator>
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{Frequency, RecurrencePattern};
    use chrono::{DateTime, FixedOffset, TimeZone};

    fn at(day: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, day, 10, 0, 0)
            .unwrap()
    }

    fn event() -> CalendarEvent {
        let mut event = CalendarEvent::new("id1", "Dentist", at(1), at(1));
        event.content = "Bring insurance card".to_string();
        event.location = "Main St 5".to_string();
        event
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[test]
    fn type_filter_accepts_configured_types_only() {
        let filter = EventTypeFilter::new(vec![EventType::Meeting]);

        assert!(filter.accept(&event().with_type(EventType::Meeting)));
        assert!(!filter.accept(&event().with_type(EventType::Reminder)));
    }

    #[test]
    fn private_filter_rejects_private_events() {
        let mut private = event();
        private.private = true;

        assert!(!PrivateEventFilter.accept(&private));
        assert!(PrivateEventFilter.accept(&event()));
    }

    #[test]
    fn date_range_filter_is_inclusive() {
        let filter = DateRangeFilter::new(date(1), date(3));

        assert!(filter.accept(&event()));
        assert!(filter.accept(&CalendarEvent::new("x", "x", at(3), at(3))));
        assert!(!filter.accept(&CalendarEvent::new("x", "x", at(4), at(4))));
    }

    #[test]
    fn date_range_filter_keeps_series_running_into_window() {
        let filter = DateRangeFilter::new(date(10), date(20));
        let weekly = RecurrencePattern::regular(Frequency::Weekly, 1, 3, at(15));
        let counted = RecurrencePattern {
            until: None,
            ..RecurrencePattern::regular(Frequency::Weekly, 1, 3, at(15))
        };
        let irregular = RecurrencePattern::irregular(vec![at(1), at(4), at(12)]);

        assert!(filter.accept(&event().with_recurrence(weekly)));
        assert!(filter.accept(&event().with_recurrence(counted)));
        assert!(filter.accept(&event().with_recurrence(irregular)));
        assert!(!filter.accept(&event()));
    }

    #[test]
    fn date_range_filter_rejects_series_ended_before_window() {
        let filter = DateRangeFilter::new(date(10), date(20));
        let daily = RecurrencePattern::regular(Frequency::Daily, 1, 5, at(5));

        assert!(!filter.accept(&event().with_recurrence(daily)));
    }

    #[test]
    fn date_range_filter_rejects_events_without_start() {
        let mut undated = event();
        undated.start = None;

        assert!(!DateRangeFilter::new(date(1), date(3)).accept(&undated));
    }

    #[test]
    fn field_obfuscator_replaces_only_its_field() {
        let mut redacted = event();

        FieldObfuscator::new(RedactedField::Title, "Busy").obfuscate(&mut redacted);

        assert_eq!(redacted.title, "Busy");
        assert_eq!(redacted.content, "Bring insurance card");
        assert_eq!(redacted.location, "Main St 5");
    }

    #[test]
    fn private_only_obfuscator_leaves_public_events_alone() {
        let obfuscator = FieldObfuscator::new(RedactedField::Location, "").private_only();
        let mut public = event();
        let mut private = event();
        private.private = true;

        obfuscator.obfuscate(&mut public);
        obfuscator.obfuscate(&mut private);

        assert_eq!(public.location, "Main St 5");
        assert_eq!(private.location, "");
    }

    #[test]
    fn filters_from_config_adds_private_filter_when_excluded() {
        let mut config = SyncConfig::default();
        config.include_private = false;

        let filters = filters_from_config(&config);

        assert_eq!(filters.len(), 2);
    }

    #[test]
    fn obfuscators_from_config_follow_enabled_fields() {
        let config = ObfuscationConfig {
            title: true,
            content: false,
            location: true,
            replacement_title: "Blocked".to_string(),
            private_only: false,
        };
        let mut redacted = event();

        for obfuscator in obfuscators_from_config(&config) {
            obfuscator.obfuscate(&mut redacted);
        }

        assert_eq!(redacted.title, "Blocked");
        assert_eq!(redacted.content, "Bring insurance card");
        assert_eq!(redacted.location, "");
    }
}
