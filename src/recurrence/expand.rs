use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::calendar::Frequency;
use crate::recurrence::encode::{DATE_FORMAT, LOCAL_FORMAT, UTC_FORMAT};
use crate::recurrence::infer::Step;

pub const MAX_OCCURRENCES: usize = 3660;

#[derive(Debug, Error, PartialEq)]
pub enum RecurrenceParseError {
    #[error("Malformed content line: {0}")]
    MalformedLine(String),
    #[error("Recurrence has no DTSTART")]
    MissingStart,
    #[error("Unsupported property: {0}")]
    UnsupportedProperty(String),
    #[error("Unsupported rule part: {0}")]
    UnsupportedRulePart(String),
    #[error("Unknown time zone: {0}")]
    UnknownTimezone(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Recurrence rule has neither COUNT nor UNTIL")]
    Unbounded,
    #[error("Recurrence expands to more than {0} occurrences")]
    TooManyOccurrences(usize),
    #[error("Local time {0} does not exist in {1}")]
    NonexistentLocalTime(NaiveDateTime, String),
}

struct ContentLine<'a> {
    name: &'a str,
    params: Vec<(&'a str, &'a str)>,
    value: &'a str,
}

impl<'a> ContentLine<'a> {
    fn parse(line: &'a str) -> Result<Self, RecurrenceParseError> {
        let malformed = || RecurrenceParseError::MalformedLine(line.to_string());
        let (head, value) = line.split_once(':').ok_or_else(malformed)?;
        let mut parts = head.split(';');
        let name = parts.next().filter(|n| !n.is_empty()).ok_or_else(malformed)?;
        let params = parts
            .map(|p| p.split_once('=').ok_or_else(malformed))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { name, params, value })
    }

    fn param(&self, key: &str) -> Option<&'a str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| *v)
    }

    fn is_date_valued(&self) -> bool {
        self.param("VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
    }

    fn timezone(&self, default: Tz) -> Result<Tz, RecurrenceParseError> {
        match self.param("TZID") {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| RecurrenceParseError::UnknownTimezone(name.to_string())),
            None => Ok(default),
        }
    }
}

/// A local wall-clock time pinned to a zone.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    local: NaiveDateTime,
    tz: Tz,
}

impl Anchor {
    fn resolve(&self, local: NaiveDateTime) -> Result<DateTime<Tz>, RecurrenceParseError> {
        self.tz.from_local_datetime(&local).earliest().ok_or_else(|| {
            RecurrenceParseError::NonexistentLocalTime(local, self.tz.name().to_string())
        })
    }
}

enum Until {
    Instant(DateTime<Utc>),
    Date(NaiveDate),
}

impl Until {
    fn admits(&self, occurrence: &DateTime<Tz>) -> bool {
        match self {
            Until::Instant(until) => occurrence.with_timezone(&Utc) <= *until,
            Until::Date(until) => occurrence.date_naive() <= *until,
        }
    }
}

struct Rule {
    frequency: Frequency,
    interval: u32,
    count: Option<usize>,
    until: Option<Until>,
}

/// Expands `DTSTART`/`RRULE`/`RDATE` lines into sorted occurrence starts.
///
/// Date-only values and values without `TZID` are read in `default_tz`.
pub fn expand(encoded: &str, default_tz: Tz) -> Result<Vec<DateTime<Tz>>, RecurrenceParseError> {
    let mut start = None;
    let mut rules = Vec::new();
    let mut extra = Vec::new();

    for raw in encoded.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let line = ContentLine::parse(raw)?;
        if line.name.eq_ignore_ascii_case("DTSTART") {
            let tz = line.timezone(default_tz)?;
            start = Some(parse_anchor(line.value, line.is_date_valued(), tz)?);
        } else if line.name.eq_ignore_ascii_case("RRULE") {
            rules.push(parse_rule(line.value)?);
        } else if line.name.eq_ignore_ascii_case("RDATE") {
            extra.extend(parse_rdate(&line, default_tz)?);
        } else {
            return Err(RecurrenceParseError::UnsupportedProperty(line.name.to_string()));
        }
    }

    let anchor = start.ok_or(RecurrenceParseError::MissingStart)?;
    let mut occurrences = vec![anchor.resolve(anchor.local)?];
    for rule in &rules {
        occurrences.extend(expand_rule(&anchor, rule)?);
    }
    occurrences.extend(extra);

    occurrences.sort();
    occurrences.dedup();
    if occurrences.len() > MAX_OCCURRENCES {
        return Err(RecurrenceParseError::TooManyOccurrences(MAX_OCCURRENCES));
    }
    Ok(occurrences)
}

fn parse_anchor(value: &str, date_only: bool, tz: Tz) -> Result<Anchor, RecurrenceParseError> {
    let invalid = || RecurrenceParseError::InvalidValue(value.to_string());
    if date_only {
        let date = NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| invalid())?;
        return Ok(Anchor { local: date.and_time(NaiveTime::MIN), tz });
    }
    if value.ends_with('Z') {
        let local = NaiveDateTime::parse_from_str(value, UTC_FORMAT).map_err(|_| invalid())?;
        return Ok(Anchor { local, tz: Tz::UTC });
    }
    let local = NaiveDateTime::parse_from_str(value, LOCAL_FORMAT).map_err(|_| invalid())?;
    Ok(Anchor { local, tz })
}

fn parse_rule(value: &str) -> Result<Rule, RecurrenceParseError> {
    let invalid = || RecurrenceParseError::InvalidValue(value.to_string());
    let mut frequency = None;
    let mut interval = 1;
    let mut count = None;
    let mut until = None;

    for part in value.split(';').filter(|p| !p.is_empty()) {
        let (key, val) = part.split_once('=').ok_or_else(invalid)?;
        match key.to_ascii_uppercase().as_str() {
            "FREQ" => {
                frequency = Some(match val.to_ascii_uppercase().as_str() {
                    "DAILY" => Frequency::Daily,
                    "WEEKLY" => Frequency::Weekly,
                    "MONTHLY" => Frequency::Monthly,
                    "YEARLY" => Frequency::Yearly,
                    _ => return Err(RecurrenceParseError::UnsupportedRulePart(part.to_string())),
                })
            }
            "INTERVAL" => {
                interval = val.parse::<u32>().ok().filter(|i| *i > 0).ok_or_else(invalid)?;
            }
            "COUNT" => count = Some(val.parse::<usize>().map_err(|_| invalid())?),
            "UNTIL" => until = Some(parse_until(val)?),
            // Only affects BYDAY expansion, which this grammar never emits.
            "WKST" => {}
            _ => return Err(RecurrenceParseError::UnsupportedRulePart(part.to_string())),
        }
    }

    let frequency = frequency.ok_or_else(invalid)?;
    if count.is_none() && until.is_none() {
        return Err(RecurrenceParseError::Unbounded);
    }
    Ok(Rule { frequency, interval, count, until })
}

fn parse_until(value: &str) -> Result<Until, RecurrenceParseError> {
    let invalid = || RecurrenceParseError::InvalidValue(value.to_string());
    if value.len() == 8 {
        let date = NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| invalid())?;
        return Ok(Until::Date(date));
    }
    let instant = NaiveDateTime::parse_from_str(value, UTC_FORMAT).map_err(|_| invalid())?;
    Ok(Until::Instant(instant.and_utc()))
}

fn parse_rdate(
    line: &ContentLine<'_>,
    default_tz: Tz,
) -> Result<Vec<DateTime<Tz>>, RecurrenceParseError> {
    let tz = line.timezone(default_tz)?;
    let date_only = line.is_date_valued();
    line.value
        .split(',')
        .filter(|v| !v.is_empty())
        .map(|value| {
            // PERIOD values are start/end pairs, only the start is an occurrence.
            let start = value.split_once('/').map_or(value, |(start, _)| start);
            let anchor = parse_anchor(start, date_only, tz)?;
            anchor.resolve(anchor.local)
        })
        .collect()
}

fn expand_rule(anchor: &Anchor, rule: &Rule) -> Result<Vec<DateTime<Tz>>, RecurrenceParseError> {
    let step = Step::for_rule(rule.frequency, rule.interval)
        .ok_or_else(|| RecurrenceParseError::InvalidValue(format!("{:?}", rule.frequency)))?;

    let mut occurrences = Vec::new();
    for k in 0u32.. {
        if rule.count.is_some_and(|count| occurrences.len() >= count) {
            break;
        }
        if occurrences.len() > MAX_OCCURRENCES {
            return Err(RecurrenceParseError::TooManyOccurrences(MAX_OCCURRENCES));
        }

        let local = match step.times(k) {
            Step::Days(days) => anchor.local.checked_add_days(chrono::Days::new(days)),
            Step::Months(months) => anchor.local.checked_add_months(chrono::Months::new(months)),
        }
        .ok_or_else(|| RecurrenceParseError::InvalidValue(anchor.local.to_string()))?;
        let occurrence = anchor.resolve(local)?;

        if rule.until.as_ref().is_some_and(|until| !until.admits(&occurrence)) {
            break;
        }
        occurrences.push(occurrence);
    }
    Ok(occurrences)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Berlin;
    use pretty_assertions::assert_eq;

    fn berlin(y: i32, m: u32, d: u32, h: u32) -> DateTime<Tz> {
        Berlin.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn start_only_yields_single_occurrence() {
        let dates = expand("DTSTART;TZID=Europe/Berlin:20240301T100000", Tz::UTC).unwrap();

        assert_eq!(dates, vec![berlin(2024, 3, 1, 10)]);
    }

    #[test]
    fn daily_rule_stops_at_until() {
        let dates = expand(
            "DTSTART;TZID=Europe/Berlin:20240301T100000\nRRULE:FREQ=DAILY;UNTIL=20240303T090000Z",
            Tz::UTC,
        )
        .unwrap();

        assert_eq!(
            dates,
            vec![berlin(2024, 3, 1, 10), berlin(2024, 3, 2, 10), berlin(2024, 3, 3, 10)]
        );
    }

    #[test]
    fn weekly_rule_keeps_wall_clock_across_dst() {
        let dates = expand(
            "DTSTART;TZID=Europe/Berlin:20240325T100000\nRRULE:FREQ=WEEKLY;COUNT=2",
            Tz::UTC,
        )
        .unwrap();

        assert_eq!(dates, vec![berlin(2024, 3, 25, 10), berlin(2024, 4, 1, 10)]);
    }

    #[test]
    fn all_day_count_rule_uses_default_zone() {
        let dates = expand(
            "DTSTART;VALUE=DATE:20240131\nRRULE:FREQ=MONTHLY;INTERVAL=2;COUNT=3",
            Berlin,
        )
        .unwrap();

        assert_eq!(
            dates,
            vec![berlin(2024, 1, 31, 0), berlin(2024, 3, 31, 0), berlin(2024, 5, 31, 0)]
        );
    }

    #[test]
    fn utc_start_is_supported() {
        let dates = expand("DTSTART:20240301T090000Z\nRRULE:FREQ=YEARLY;COUNT=2", Berlin).unwrap();

        assert_eq!(dates.len(), 2);
        assert_eq!(dates[1].with_timezone(&Utc).to_rfc3339(), "2025-03-01T09:00:00+00:00");
    }

    #[test]
    fn rdate_periods_contribute_their_starts() {
        let dates = expand(
            "DTSTART;TZID=Europe/Berlin:20240301T100000\n\
             RDATE;VALUE=PERIOD;TZID=Europe/Berlin:\
             20240301T100000/20240301T110000,20240305T100000/20240305T110000",
            Tz::UTC,
        )
        .unwrap();

        assert_eq!(dates, vec![berlin(2024, 3, 1, 10), berlin(2024, 3, 5, 10)]);
    }

    #[test]
    fn unbounded_rule_is_rejected() {
        let result = expand("DTSTART:20240301T090000Z\nRRULE:FREQ=DAILY", Tz::UTC);

        assert_eq!(result, Err(RecurrenceParseError::Unbounded));
    }

    #[test]
    fn byday_rules_are_unsupported() {
        let result = expand(
            "DTSTART:20240301T090000Z\nRRULE:FREQ=WEEKLY;BYDAY=MO,WE;COUNT=4",
            Tz::UTC,
        );

        assert_eq!(
            result,
            Err(RecurrenceParseError::UnsupportedRulePart("BYDAY=MO,WE".to_string()))
        );
    }

    #[test]
    fn exdate_is_unsupported() {
        let result = expand(
            "DTSTART:20240301T090000Z\nEXDATE:20240302T090000Z",
            Tz::UTC,
        );

        assert_eq!(
            result,
            Err(RecurrenceParseError::UnsupportedProperty("EXDATE".to_string()))
        );
    }

    #[test]
    fn missing_start_is_rejected() {
        let result = expand("RRULE:FREQ=DAILY;COUNT=2", Tz::UTC);

        assert_eq!(result, Err(RecurrenceParseError::MissingStart));
    }

    #[test]
    fn unknown_zone_is_rejected() {
        let result = expand("DTSTART;TZID=Mars/Olympus:20240301T100000", Tz::UTC);

        assert_eq!(
            result,
            Err(RecurrenceParseError::UnknownTimezone("Mars/Olympus".to_string()))
        );
    }

    #[test]
    fn runaway_rule_is_capped() {
        let result = expand("DTSTART:20240301T090000Z\nRRULE:FREQ=DAILY;COUNT=100000", Tz::UTC);

        assert_eq!(result, Err(RecurrenceParseError::TooManyOccurrences(MAX_OCCURRENCES)));
    }
}
