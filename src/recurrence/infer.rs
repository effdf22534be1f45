use chrono::{DateTime, Days, Months, TimeZone};

use crate::calendar::{Frequency, RecurrencePattern};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Days(u64),
    Months(u32),
}

impl Step {
    pub(crate) fn for_rule(frequency: Frequency, interval: u32) -> Option<Self> {
        match frequency {
            Frequency::Daily => Some(Step::Days(u64::from(interval))),
            Frequency::Weekly => Some(Step::Days(7 * u64::from(interval))),
            Frequency::Monthly => Some(Step::Months(interval)),
            Frequency::Yearly => Some(Step::Months(12 * interval)),
            Frequency::None | Frequency::Irregular => None,
        }
    }

    pub(crate) fn times(self, n: u32) -> Self {
        match self {
            Step::Days(days) => Step::Days(days * u64::from(n)),
            Step::Months(months) => Step::Months(months * n),
        }
    }

    /// Shifting works on the local wall clock of `Tz`, so a 10:00 meeting stays
    /// at 10:00 across a DST change.
    pub(crate) fn shift<Tz: TimeZone>(self, from: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self {
            Step::Days(days) => from.clone().checked_add_days(Days::new(days)),
            Step::Months(months) => from.clone().checked_add_months(Months::new(months)),
        }
    }
}

struct Candidate {
    frequency: Frequency,
    interval: u32,
    step: Step,
}

// Priority order: the first candidate that fits the first pair wins.
const CANDIDATES: [Candidate; 5] = [
    Candidate { frequency: Frequency::Daily, interval: 1, step: Step::Days(1) },
    Candidate { frequency: Frequency::Weekly, interval: 1, step: Step::Days(7) },
    Candidate { frequency: Frequency::Weekly, interval: 2, step: Step::Days(14) },
    Candidate { frequency: Frequency::Monthly, interval: 1, step: Step::Months(1) },
    Candidate { frequency: Frequency::Yearly, interval: 1, step: Step::Months(12) },
];

impl Candidate {
    fn follows<Tz: TimeZone>(&self, prev: &DateTime<Tz>, next: &DateTime<Tz>) -> bool {
        self.step.shift(prev).is_some_and(|shifted| shifted == *next)
    }
}

/// Derives the recurrence of a sorted list of occurrence starts.
///
/// The first consecutive pair fixes frequency and interval. Every later pair
/// has to follow exactly that step; the first one that does not turns the
/// whole list into an irregular pattern holding the dates verbatim.
pub fn infer<Tz: TimeZone>(dates: &[DateTime<Tz>]) -> RecurrencePattern {
    if dates.len() < 2 {
        return RecurrencePattern::none();
    }

    let mut fixed: Option<&Candidate> = None;
    for pair in dates.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        match fixed {
            Some(candidate) if candidate.follows(prev, next) => {}
            Some(candidate) => {
                tracing::debug!(
                    "Occurrence {} breaks {:?}/{} pattern, falling back to explicit dates",
                    next.fixed_offset().to_rfc3339(),
                    candidate.frequency,
                    candidate.interval
                );
                return irregular(dates);
            }
            None => match CANDIDATES.iter().find(|c| c.follows(prev, next)) {
                Some(candidate) => fixed = Some(candidate),
                None => return irregular(dates),
            },
        }
    }

    match (fixed, dates.last()) {
        (Some(candidate), Some(last)) => RecurrencePattern::regular(
            candidate.frequency,
            candidate.interval,
            dates.len() as u32,
            last.fixed_offset(),
        ),
        _ => irregular(dates),
    }
}

fn irregular<Tz: TimeZone>(dates: &[DateTime<Tz>]) -> RecurrencePattern {
    RecurrencePattern::irregular(dates.iter().map(DateTime::fixed_offset).collect())
}
