use chrono::{DateTime, Duration, FixedOffset, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::calendar::{Frequency, PatternError, RecurrencePattern};

pub const DATE_FORMAT: &str = "%Y%m%d";
pub const LOCAL_FORMAT: &str = "%Y%m%dT%H%M%S";
pub const UTC_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, Error, PartialEq)]
pub enum EncodeError {
    #[error("Invalid recurrence: {0}")]
    InvalidPattern(#[from] PatternError),
    #[error("Event ends before it starts")]
    NegativeDuration,
    #[error("All-day recurrence needs an occurrence count")]
    MissingCount,
    #[error("Timed recurrence needs an until instant")]
    MissingUntil,
}

/// Encodes `pattern` as iCalendar content lines joined by `\n`.
///
/// The first line is always `DTSTART`, followed by either an `RRULE` or an
/// `RDATE` line. A non-recurring pattern encodes to an empty string.
pub fn encode(
    pattern: &RecurrencePattern,
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    timezone: Tz,
    all_day: bool,
) -> Result<String, EncodeError> {
    Ok(encode_lines(pattern, start, end, timezone, all_day)?.join("\n"))
}

pub fn encode_lines(
    pattern: &RecurrencePattern,
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    timezone: Tz,
    all_day: bool,
) -> Result<Vec<String>, EncodeError> {
    pattern.validate()?;
    if !pattern.is_recurring() {
        return Ok(Vec::new());
    }

    let duration = end - start;
    if duration < Duration::zero() {
        return Err(EncodeError::NegativeDuration);
    }

    let recurrence = if pattern.frequency == Frequency::Irregular {
        rdate_line(&pattern.explicit_dates, duration, timezone, all_day)
    } else {
        rrule_line(pattern, all_day)?
    };

    Ok(vec![dtstart_line(start, timezone, all_day), recurrence])
}

pub(crate) fn dtstart_line(start: DateTime<FixedOffset>, timezone: Tz, all_day: bool) -> String {
    if all_day {
        format!("DTSTART;VALUE=DATE:{}", start.date_naive().format(DATE_FORMAT))
    } else {
        format!(
            "DTSTART;TZID={}:{}",
            timezone.name(),
            start.with_timezone(&timezone).format(LOCAL_FORMAT)
        )
    }
}

fn rdate_line(
    dates: &[DateTime<FixedOffset>],
    duration: Duration,
    timezone: Tz,
    all_day: bool,
) -> String {
    if all_day {
        let values: Vec<String> = dates
            .iter()
            .map(|date| date.date_naive().format(DATE_FORMAT).to_string())
            .collect();
        return format!("RDATE;VALUE=DATE:{}", values.join(","));
    }

    let periods: Vec<String> = dates
        .iter()
        .map(|start| {
            let end = *start + duration;
            format!(
                "{}/{}",
                start.with_timezone(&timezone).format(LOCAL_FORMAT),
                end.with_timezone(&timezone).format(LOCAL_FORMAT)
            )
        })
        .collect();
    format!(
        "RDATE;VALUE=PERIOD;TZID={}:{}",
        timezone.name(),
        periods.join(",")
    )
}

fn rrule_line(pattern: &RecurrencePattern, all_day: bool) -> Result<String, EncodeError> {
    let mut parts = vec![format!("FREQ={}", frequency_token(pattern.frequency))];

    if pattern.interval > 1 {
        parts.push(format!("INTERVAL={}", pattern.interval));
    }
    if pattern.frequency == Frequency::Weekly && pattern.interval == 2 {
        parts.push("WKST=SU".to_string());
    }

    if all_day {
        let count = pattern.count.ok_or(EncodeError::MissingCount)?;
        parts.push(format!("COUNT={}", count));
    } else {
        let until = pattern.until.ok_or(EncodeError::MissingUntil)?;
        parts.push(format!("UNTIL={}", until.with_timezone(&Utc).format(UTC_FORMAT)));
    }

    Ok(format!("RRULE:{}", parts.join(";")))
}

fn frequency_token(frequency: Frequency) -> &'static str {
    match frequency {
        Frequency::Daily => "DAILY",
        Frequency::Weekly => "WEEKLY",
        Frequency::Monthly => "MONTHLY",
        Frequency::Yearly => "YEARLY",
        // validate() keeps these out of rrule_line
        Frequency::None | Frequency::Irregular => "",
    }
}
