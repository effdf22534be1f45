use async_trait::async_trait;
use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::calendar::{CalendarEvent, EventType, RecurrencePattern};
use crate::recurrence::encode::dtstart_line;
use crate::recurrence::{encode_lines, expand, infer};
use crate::sync::store::{CalendarStore, DateRange, StoreError};

/// Private extended property remembering the source event type, which the
/// Google data model has no field for.
const EVENT_TYPE_PROPERTY: &str = "gcalSyncEventType";

#[derive(Debug, Default, Serialize, Deserialize)]
struct GoogleEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    #[serde(default)]
    start: GoogleDateTime,
    #[serde(default)]
    end: GoogleDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    visibility: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recurrence: Option<Vec<String>>,
    #[serde(rename = "extendedProperties", skip_serializing_if = "Option::is_none")]
    extended_properties: Option<ExtendedProperties>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GoogleDateTime {
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ExtendedProperties {
    #[serde(default)]
    private: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct EventListResponse {
    items: Option<Vec<GoogleEvent>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

pub struct GoogleCalendarStore {
    base_url: String,
    access_token: String,
    calendar_id: String,
    timezone: Tz,
    client: reqwest::Client,
}

impl GoogleCalendarStore {
    pub fn new(access_token: String, calendar_id: String, timezone: Tz) -> Self {
        Self {
            base_url: "https://www.googleapis.com/calendar/v3".to_string(),
            access_token,
            calendar_id,
            timezone,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn events_url(&self) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(&self.calendar_id)
        )
    }

    fn event_url(&self, event_id: &str) -> String {
        format!("{}/{}", self.events_url(), urlencoding::encode(event_id))
    }

    fn midnight(&self, date: NaiveDate) -> Result<DateTime<FixedOffset>, StoreError> {
        self.timezone
            .from_local_datetime(&date.and_time(NaiveTime::MIN))
            .earliest()
            .map(|dt| dt.fixed_offset())
            .ok_or_else(|| {
                StoreError::ParseError(format!(
                    "No midnight on {} in {}",
                    date,
                    self.timezone.name()
                ))
            })
    }

    /// All-day end dates are exclusive on the wire; `is_end` shifts them back a day.
    fn parse_bound(
        &self,
        bound: &GoogleDateTime,
        is_end: bool,
    ) -> Result<Option<DateTime<FixedOffset>>, StoreError> {
        if let Some(date_time) = &bound.date_time {
            let parsed = DateTime::parse_from_rfc3339(date_time).map_err(|e| {
                StoreError::ParseError(format!("Invalid dateTime '{}': {}", date_time, e))
            })?;
            return Ok(Some(parsed));
        }
        let Some(date) = &bound.date else {
            return Ok(None);
        };
        let mut date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| StoreError::ParseError(format!("Invalid date '{}': {}", date, e)))?;
        if is_end {
            date = date.pred_opt().unwrap_or(date);
        }
        self.midnight(date).map(Some)
    }

    fn parse_recurrence(
        &self,
        lines: &[String],
        start: DateTime<FixedOffset>,
        all_day: bool,
    ) -> Option<RecurrencePattern> {
        let mut text = dtstart_line(start, self.timezone, all_day);
        for line in lines {
            text.push('\n');
            text.push_str(line);
        }
        match expand(&text, self.timezone) {
            Ok(dates) => Some(infer(&dates)),
            Err(e) => {
                tracing::warn!("Ignoring unsupported recurrence {:?}: {}", lines, e);
                None
            }
        }
    }

    fn convert_from_google_event(&self, ge: GoogleEvent) -> Result<CalendarEvent, StoreError> {
        let id = ge.id.ok_or_else(|| StoreError::ParseError("Missing event id".to_string()))?;
        let all_day = ge.start.date.is_some();
        let start = self.parse_bound(&ge.start, false)?;
        let end = self.parse_bound(&ge.end, true)?;

        let stored_type = ge
            .extended_properties
            .as_ref()
            .and_then(|props| props.private.get(EVENT_TYPE_PROPERTY))
            .and_then(|name| name.parse::<EventType>().ok());
        let event_type = match stored_type {
            // someone may have toggled all-day in the Google UI since
            Some(event_type) if event_type.is_all_day() == all_day => event_type,
            _ if all_day => EventType::AllDayEvent,
            _ => EventType::NormalEvent,
        };

        let recurrence = match (&ge.recurrence, start) {
            (Some(lines), Some(start)) if !lines.is_empty() => {
                self.parse_recurrence(lines, start, all_day)
            }
            _ => None,
        };

        let last_updated = ge
            .updated
            .as_deref()
            .and_then(|updated| DateTime::parse_from_rfc3339(updated).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let event = CalendarEvent {
            id,
            title: ge.summary.unwrap_or_default(),
            content: ge.description.unwrap_or_default(),
            location: ge.location.unwrap_or_default(),
            start,
            end,
            last_updated,
            event_type,
            private: ge.visibility.as_deref() == Some("private"),
            recurrence,
        };
        event
            .validate()
            .map_err(|e| StoreError::ParseError(format!("{} ({})", e, event.id)))?;
        Ok(event)
    }

    fn convert_to_google_event(&self, event: &CalendarEvent) -> Result<GoogleEvent, StoreError> {
        let (Some(start), Some(end)) = (event.start, event.end) else {
            return Err(StoreError::ParseError(format!(
                "Event {} has no complete time window",
                event.describe()
            )));
        };
        let all_day = event.is_all_day();

        let (start_bound, end_bound) = if all_day {
            let first = start.date_naive();
            let last = end.date_naive().max(first);
            let exclusive_end = last
                .checked_add_days(Days::new(1))
                .ok_or_else(|| StoreError::ParseError(format!("Date out of range: {}", last)))?;
            (date_bound(first), date_bound(exclusive_end))
        } else {
            (self.timed_bound(start), self.timed_bound(end))
        };

        let recurrence = match &event.recurrence {
            Some(pattern) if pattern.is_recurring() => {
                let lines = encode_lines(pattern, start, end, self.timezone, all_day)
                    .map_err(|e| StoreError::ParseError(e.to_string()))?;
                // Google takes DTSTART from the event's own start
                Some(lines.into_iter().filter(|l| !l.starts_with("DTSTART")).collect())
            }
            _ => None,
        };

        let mut private_props = HashMap::new();
        private_props.insert(
            EVENT_TYPE_PROPERTY.to_string(),
            event.event_type.as_str().to_string(),
        );

        Ok(GoogleEvent {
            summary: Some(event.title.clone()),
            description: Some(event.content.clone()),
            location: Some(event.location.clone()),
            start: start_bound,
            end: end_bound,
            visibility: event.private.then(|| "private".to_string()),
            recurrence,
            extended_properties: Some(ExtendedProperties {
                private: private_props,
            }),
            ..GoogleEvent::default()
        })
    }

    fn timed_bound(&self, instant: DateTime<FixedOffset>) -> GoogleDateTime {
        GoogleDateTime {
            date_time: Some(instant.to_rfc3339()),
            date: None,
            time_zone: Some(self.timezone.name().to_string()),
        }
    }
}

fn date_bound(date: NaiveDate) -> GoogleDateTime {
    GoogleDateTime {
        date_time: None,
        date: Some(date.format("%Y-%m-%d").to_string()),
        time_zone: None,
    }
}

async fn check_status(
    response: reqwest::Response,
    subject: &str,
) -> Result<reqwest::Response, StoreError> {
    let status = response.status();

    if status == 401 {
        tracing::error!("Authentication failed for {}", subject);
        return Err(StoreError::AuthenticationFailed);
    }

    if status == 404 {
        tracing::error!("Not found: {}", subject);
        return Err(StoreError::NotFound(subject.to_string()));
    }

    if status == 429 {
        tracing::warn!("Rate limit exceeded");
        return Err(StoreError::RateLimited);
    }

    if !status.is_success() {
        let body = response.text().await?;
        tracing::error!("Request for {} failed. Status: {}, Body: {}", subject, status, body);
        return Err(StoreError::RequestError(format!("Status {}: {}", status, body)));
    }

    Ok(response)
}

#[async_trait]
impl CalendarStore for GoogleCalendarStore {
    async fn get_events(&self, range: &DateRange) -> Result<Vec<CalendarEvent>, StoreError> {
        let time_min = self.midnight(range.start)?.to_rfc3339();
        let time_max = range
            .end
            .checked_add_days(Days::new(1))
            .map(|day_after| self.midnight(day_after))
            .transpose()?
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| time_min.clone());

        tracing::info!("Fetching events from {} to {}", range.start, range.end);

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("timeMin", time_min.clone()),
                ("timeMax", time_max.clone()),
                ("singleEvents", "false".to_string()),
                ("maxResults", "2500".to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let response = self
                .client
                .get(self.events_url())
                .bearer_auth(&self.access_token)
                .query(&query)
                .send()
                .await?;
            tracing::info!("Fetch events response status: {}", response.status());

            let page: EventListResponse =
                check_status(response, &self.calendar_id).await?.json().await?;
            for ge in page.items.unwrap_or_default() {
                if ge.status.as_deref() == Some("cancelled") {
                    continue;
                }
                match self.convert_from_google_event(ge) {
                    Ok(event) => events.push(event),
                    Err(e) => tracing::warn!("Skipping unreadable Google event: {}", e),
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::info!("Fetched {} events successfully", events.len());
        Ok(events)
    }

    async fn insert(&self, event: &CalendarEvent) -> Result<String, StoreError> {
        let google_event = self.convert_to_google_event(event)?;

        tracing::info!("Creating event {}", event.describe());
        tracing::debug!("POST {} with payload: {:?}", self.events_url(), google_event);

        let response = self
            .client
            .post(self.events_url())
            .bearer_auth(&self.access_token)
            .json(&google_event)
            .send()
            .await?;

        let created: GoogleEvent = check_status(response, &self.calendar_id).await?.json().await?;
        let id = created
            .id
            .ok_or_else(|| StoreError::ParseError("Created event has no id".to_string()))?;
        tracing::info!("Event created successfully with ID: {}", id);
        Ok(id)
    }

    async fn update(&self, id: &str, event: &CalendarEvent) -> Result<(), StoreError> {
        let google_event = self.convert_to_google_event(event)?;

        tracing::info!("Updating event {}: {}", id, event.describe());
        tracing::debug!("PUT {} with payload: {:?}", self.event_url(id), google_event);

        let response = self
            .client
            .put(self.event_url(id))
            .bearer_auth(&self.access_token)
            .json(&google_event)
            .send()
            .await?;

        check_status(response, id).await?;
        tracing::info!("Event {} updated successfully", id);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.event_url(id))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        if response.status() == 410 {
            tracing::info!("Event {} was already deleted", id);
            return Ok(());
        }

        check_status(response, id).await?;
        tracing::info!("Event {} deleted", id);
        Ok(())
    }
}
