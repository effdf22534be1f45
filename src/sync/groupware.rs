use async_trait::async_trait;
use chrono::{DateTime, Days, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::PathBuf;

use crate::calendar::{CalendarEvent, EventType};
use crate::recurrence::infer;
use crate::sync::policy::{DateRangeFilter, EventFilter};
use crate::sync::store::{CalendarStore, DateRange, StoreError};

/// One calendar entry as exported from the groupware store. Recurring entries
/// carry every occurrence explicitly instead of a rule.
#[derive(Debug, Deserialize)]
struct GroupwareEntry {
    unid: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    location: String,
    appointment_type: String,
    #[serde(default)]
    start_date_times: Vec<NaiveDateTime>,
    #[serde(default)]
    end_date_times: Vec<NaiveDateTime>,
    last_modified: DateTime<Utc>,
    #[serde(default)]
    private: bool,
}

fn event_type_from_code(code: &str) -> Result<EventType, String> {
    match code.trim() {
        "0" => Ok(EventType::NormalEvent),
        "1" => Ok(EventType::Anniversary),
        "2" => Ok(EventType::AllDayEvent),
        "3" => Ok(EventType::Meeting),
        "4" => Ok(EventType::Reminder),
        other => Err(format!("unknown appointment type '{}'", other)),
    }
}

/// Read-only source store backed by a JSON export file.
pub struct GroupwareStore {
    path: PathBuf,
    timezone: Tz,
    expand_recurrences: bool,
}

impl GroupwareStore {
    pub fn new(path: PathBuf, timezone: Tz) -> Self {
        Self {
            path,
            timezone,
            expand_recurrences: false,
        }
    }

    /// Emit one event per occurrence instead of one event with a recurrence.
    pub fn with_expanded_recurrences(mut self, expand: bool) -> Self {
        self.expand_recurrences = expand;
        self
    }

    fn localize(&self, local: &NaiveDateTime) -> Result<DateTime<Tz>, String> {
        self.timezone
            .from_local_datetime(local)
            .earliest()
            .ok_or_else(|| format!("{} does not exist in {}", local, self.timezone.name()))
    }

    fn convert(&self, entry: GroupwareEntry) -> Result<Vec<CalendarEvent>, String> {
        let event_type = event_type_from_code(&entry.appointment_type)?;
        let all_day = event_type.is_all_day();

        let mut locals = entry.start_date_times.clone();
        locals.sort();
        let first_local = *locals.first().ok_or("no start time")?;
        let starts = locals
            .iter()
            .map(|local| {
                if all_day {
                    self.localize(&local.date().and_time(NaiveTime::MIN))
                } else {
                    self.localize(local)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let duration = match (event_type, entry.end_date_times.first()) {
            (EventType::Reminder, _) | (_, None) => Duration::zero(),
            (_, Some(end)) if all_day => {
                Duration::days((end.date() - first_local.date()).num_days())
            }
            (_, Some(end)) => *end - first_local,
        };
        if duration < Duration::zero() {
            return Err("ends before it starts".to_string());
        }

        let template = CalendarEvent {
            id: entry.unid.clone(),
            title: entry.subject,
            content: entry.body,
            location: entry.location,
            start: None,
            end: None,
            last_updated: entry.last_modified,
            event_type,
            private: entry.private,
            recurrence: None,
        };
        let occurrence = |start: &DateTime<Tz>| {
            let mut event = template.clone();
            event.start = Some(start.fixed_offset());
            let end = if all_day {
                // whole days, so a DST change inside the span keeps midnight
                start.clone().checked_add_days(Days::new(duration.num_days() as u64))
            } else {
                Some(start.clone() + duration)
            };
            event.end = end.map(|end| end.fixed_offset());
            event
        };

        if starts.len() > 1 && self.expand_recurrences {
            return Ok(starts
                .iter()
                .map(|start| {
                    let mut event = occurrence(start);
                    event.id = format!("{}/{}", entry.unid, start.format("%Y%m%d"));
                    event
                })
                .collect());
        }

        let mut event = occurrence(&starts[0]);
        if starts.len() > 1 {
            event.recurrence = Some(infer(&starts));
        }
        Ok(vec![event])
    }
}

#[async_trait]
impl CalendarStore for GroupwareStore {
    async fn get_events(&self, range: &DateRange) -> Result<Vec<CalendarEvent>, StoreError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let entries: Vec<GroupwareEntry> = serde_json::from_str(&content)
            .map_err(|e| StoreError::ParseError(format!("{}: {}", self.path.display(), e)))?;

        tracing::info!("Read {} groupware entries from {}", entries.len(), self.path.display());

        let window = DateRangeFilter::new(range.start, range.end);
        let mut events = Vec::new();
        for entry in entries {
            let unid = entry.unid.clone();
            match self.convert(entry) {
                Ok(converted) => events.extend(
                    converted
                        .into_iter()
                        .filter(|e| window.accept(e)),
                ),
                Err(reason) => tracing::warn!("Skipping groupware entry {}: {}", unid, reason),
            }
        }

        tracing::info!("Loaded {} groupware events in range", events.len());
        Ok(events)
    }

    async fn insert(&self, _event: &CalendarEvent) -> Result<String, StoreError> {
        Err(StoreError::ReadOnly(self.path.display().to_string()))
    }

    async fn update(&self, _id: &str, _event: &CalendarEvent) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly(self.path.display().to_string()))
    }

    async fn delete(&self, _id: &str) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly(self.path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Frequency;
    use chrono::NaiveDate;
    use chrono_tz::Europe::Berlin;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn march() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        )
    }

    fn write_export(dir: &TempDir, json: &str) -> PathBuf {
        let path = dir.path().join("export.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    fn load(json: &str, expand: bool) -> Vec<CalendarEvent> {
        let dir = TempDir::new().unwrap();
        let store = GroupwareStore::new(write_export(&dir, json), Berlin)
            .with_expanded_recurrences(expand);
        tokio_test::block_on(store.get_events(&march())).unwrap()
    }

    const WEEKLY_MEETING: &str = r#"[{
        "unid": "A1",
        "subject": "Team sync",
        "body": "Agenda in wiki",
        "location": "Room 4",
        "appointment_type": "3",
        "start_date_times": ["2024-03-04T10:00:00", "2024-03-11T10:00:00", "2024-03-18T10:00:00"],
        "end_date_times": ["2024-03-04T11:00:00", "2024-03-11T11:00:00", "2024-03-18T11:00:00"],
        "last_modified": "2024-02-01T08:00:00Z"
    }]"#;

    #[test]
    fn single_meeting_converts_in_configured_zone() {
        let events = load(
            r#"[{"unid": "B2", "subject": "Dentist", "appointment_type": "0",
                 "start_date_times": ["2024-03-05T08:30:00"],
                 "end_date_times": ["2024-03-05T09:15:00"],
                 "last_modified": "2024-02-01T08:00:00Z", "private": true}]"#,
            false,
        );

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.id, "B2");
        assert_eq!(event.event_type, EventType::NormalEvent);
        assert_eq!(event.start.unwrap().to_rfc3339(), "2024-03-05T08:30:00+01:00");
        assert_eq!(event.end.unwrap().to_rfc3339(), "2024-03-05T09:15:00+01:00");
        assert!(event.private);
        assert!(event.recurrence.is_none());
    }

    #[test]
    fn recurring_entry_gets_inferred_pattern() {
        let events = load(WEEKLY_MEETING, false);

        assert_eq!(events.len(), 1);
        let recurrence = events[0].recurrence.as_ref().unwrap();
        assert_eq!(recurrence.frequency, Frequency::Weekly);
        assert_eq!(recurrence.interval, 1);
        assert_eq!(recurrence.count, Some(3));
        assert_eq!(events[0].location, "Room 4");
    }

    #[test]
    fn series_started_before_range_is_kept_while_it_runs_into_range() {
        let events = load(
            r#"[{"unid": "G7", "subject": "Weekly 1:1", "appointment_type": "3",
                 "start_date_times": ["2024-02-19T10:00:00", "2024-02-26T10:00:00",
                                      "2024-03-04T10:00:00", "2024-03-11T10:00:00"],
                 "end_date_times": ["2024-02-19T10:30:00"],
                 "last_modified": "2024-02-01T08:00:00Z"}]"#,
            false,
        );

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start.unwrap().to_rfc3339(), "2024-02-19T10:00:00+01:00");
        assert_eq!(events[0].recurrence.as_ref().unwrap().count, Some(4));
    }

    #[test]
    fn expanded_entry_yields_one_event_per_occurrence() {
        let events = load(WEEKLY_MEETING, true);

        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["A1/20240304", "A1/20240311", "A1/20240318"]);
        assert!(events.iter().all(|e| e.recurrence.is_none()));
        assert!(events.iter().all(|e| e.duration() == Some(Duration::hours(1))));
    }

    #[test]
    fn all_day_entry_drops_time_of_day() {
        let events = load(
            r#"[{"unid": "C3", "subject": "Offsite", "appointment_type": "2",
                 "start_date_times": ["2024-03-07T09:00:00"],
                 "end_date_times": ["2024-03-08T17:00:00"],
                 "last_modified": "2024-02-01T08:00:00Z"}]"#,
            false,
        );

        assert_eq!(events[0].start.unwrap().to_rfc3339(), "2024-03-07T00:00:00+01:00");
        assert_eq!(events[0].end.unwrap().to_rfc3339(), "2024-03-08T00:00:00+01:00");
    }

    #[test]
    fn reminder_has_no_duration() {
        let events = load(
            r#"[{"unid": "D4", "subject": "Call", "appointment_type": "4",
                 "start_date_times": ["2024-03-07T09:00:00"],
                 "end_date_times": ["2024-03-07T09:30:00"],
                 "last_modified": "2024-02-01T08:00:00Z"}]"#,
            false,
        );

        assert_eq!(events[0].start, events[0].end);
        assert!(events[0].validate().is_ok());
    }

    #[test]
    fn broken_entries_are_skipped() {
        let events = load(
            r#"[
                {"unid": "E5", "appointment_type": "0", "last_modified": "2024-02-01T08:00:00Z"},
                {"unid": "F6", "appointment_type": "9",
                 "start_date_times": ["2024-03-07T09:00:00"],
                 "last_modified": "2024-02-01T08:00:00Z"},
                {"unid": "G7", "appointment_type": "0",
                 "start_date_times": ["2024-03-07T09:00:00"],
                 "end_date_times": ["2024-03-07T08:00:00"],
                 "last_modified": "2024-02-01T08:00:00Z"},
                {"unid": "H8", "appointment_type": "0",
                 "start_date_times": ["2024-03-07T09:00:00"],
                 "last_modified": "2024-02-01T08:00:00Z"}
            ]"#,
            false,
        );

        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["H8"]);
    }

    #[test]
    fn entries_outside_range_are_dropped() {
        let events = load(
            r#"[{"unid": "I9", "appointment_type": "0",
                 "start_date_times": ["2024-04-02T09:00:00"],
                 "last_modified": "2024-02-01T08:00:00Z"}]"#,
            false,
        );

        assert!(events.is_empty());
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let store = GroupwareStore::new(write_export(&dir, "{ not json"), Berlin);

        let result = tokio_test::block_on(store.get_events(&march()));

        assert!(matches!(result, Err(StoreError::ParseError(_))));
    }

    #[test]
    fn store_is_read_only() {
        let store = GroupwareStore::new(PathBuf::from("/tmp/export.json"), Berlin);
        let event = CalendarEvent::new(
            "x",
            "x",
            Berlin.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap().fixed_offset(),
            Berlin.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap().fixed_offset(),
        );

        let result = tokio_test::block_on(store.insert(&event));

        assert!(matches!(result, Err(StoreError::ReadOnly(_))));
    }
}
