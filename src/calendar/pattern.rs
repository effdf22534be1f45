use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recurrence::infer::Step;

#[derive(Debug, Error, PartialEq)]
pub enum PatternError {
    #[error("Interval must be at least 1")]
    ZeroInterval,
    #[error("{0:?} recurrence needs an until instant or an occurrence count")]
    MissingTermination(Frequency),
    #[error("Irregular recurrence needs at least one explicit date")]
    NoExplicitDates,
    #[error("Explicit dates are only allowed on irregular recurrences")]
    UnexpectedExplicitDates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    None,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Irregular,
}

impl Frequency {
    pub fn is_regular(self) -> bool {
        matches!(
            self,
            Frequency::Daily | Frequency::Weekly | Frequency::Monthly | Frequency::Yearly
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrencePattern {
    pub frequency: Frequency,
    pub interval: u32,
    pub until: Option<DateTime<FixedOffset>>,
    pub count: Option<u32>,
    pub explicit_dates: Vec<DateTime<FixedOffset>>,
}

impl RecurrencePattern {
    /// A single occurrence, nothing to repeat.
    pub fn none() -> Self {
        Self {
            frequency: Frequency::None,
            interval: 1,
            until: None,
            count: None,
            explicit_dates: Vec::new(),
        }
    }

    pub fn regular(
        frequency: Frequency,
        interval: u32,
        count: u32,
        until: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            frequency,
            interval,
            until: Some(until),
            count: Some(count),
            explicit_dates: Vec::new(),
        }
    }

    pub fn irregular(dates: Vec<DateTime<FixedOffset>>) -> Self {
        Self {
            frequency: Frequency::Irregular,
            interval: 1,
            until: None,
            count: None,
            explicit_dates: dates,
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.frequency != Frequency::None
    }

    /// Start of the final occurrence of a series whose first start is `first`.
    pub fn last_start(&self, first: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        if self.frequency == Frequency::Irregular {
            return self.explicit_dates.iter().max().copied();
        }
        if !self.frequency.is_regular() {
            return Some(first);
        }
        if let Some(until) = self.until {
            return Some(until);
        }
        let count = self.count?;
        Step::for_rule(self.frequency, self.interval)?
            .times(count.saturating_sub(1))
            .shift(&first)
    }

    pub fn validate(&self) -> Result<(), PatternError> {
        if self.interval == 0 {
            return Err(PatternError::ZeroInterval);
        }
        match self.frequency {
            Frequency::None => Ok(()),
            Frequency::Irregular if self.explicit_dates.is_empty() => {
                Err(PatternError::NoExplicitDates)
            }
            Frequency::Irregular => Ok(()),
            frequency => {
                if !self.explicit_dates.is_empty() {
                    return Err(PatternError::UnexpectedExplicitDates);
                }
                if self.until.is_none() && self.count.is_none() {
                    return Err(PatternError::MissingTermination(frequency));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, d, 9, 0, 0)
            .unwrap()
    }

    #[test]
    fn none_pattern_is_not_recurring() {
        let pattern = RecurrencePattern::none();

        assert!(!pattern.is_recurring());
        assert!(pattern.validate().is_ok());
    }

    #[test]
    fn regular_pattern_carries_both_terminations() {
        let pattern = RecurrencePattern::regular(Frequency::Weekly, 2, 4, day(29));

        assert_eq!(pattern.count, Some(4));
        assert_eq!(pattern.until, Some(day(29)));
        assert!(pattern.validate().is_ok());
    }

    #[test]
    fn regular_pattern_without_termination_is_invalid() {
        let mut pattern = RecurrencePattern::regular(Frequency::Daily, 1, 3, day(3));
        pattern.until = None;
        pattern.count = None;

        assert_eq!(
            pattern.validate(),
            Err(PatternError::MissingTermination(Frequency::Daily))
        );
    }

    #[test]
    fn irregular_pattern_needs_dates() {
        let pattern = RecurrencePattern::irregular(vec![]);

        assert_eq!(pattern.validate(), Err(PatternError::NoExplicitDates));
    }

    #[test]
    fn explicit_dates_on_regular_pattern_are_invalid() {
        let mut pattern = RecurrencePattern::regular(Frequency::Daily, 1, 2, day(2));
        pattern.explicit_dates = vec![day(1), day(2)];

        assert_eq!(pattern.validate(), Err(PatternError::UnexpectedExplicitDates));
    }

    #[test]
    fn zero_interval_is_invalid() {
        let mut pattern = RecurrencePattern::regular(Frequency::Monthly, 1, 2, day(2));
        pattern.interval = 0;

        assert_eq!(pattern.validate(), Err(PatternError::ZeroInterval));
    }

    #[test]
    fn last_start_prefers_until() {
        let pattern = RecurrencePattern::regular(Frequency::Weekly, 1, 3, day(15));

        assert_eq!(pattern.last_start(day(1)), Some(day(15)));
    }

    #[test]
    fn last_start_from_count_steps_by_interval() {
        let mut pattern = RecurrencePattern::regular(Frequency::Daily, 2, 4, day(7));
        pattern.until = None;

        assert_eq!(pattern.last_start(day(1)), Some(day(7)));
    }

    #[test]
    fn last_start_of_irregular_is_latest_explicit_date() {
        let pattern = RecurrencePattern::irregular(vec![day(2), day(20), day(9)]);

        assert_eq!(pattern.last_start(day(2)), Some(day(20)));
        assert_eq!(RecurrencePattern::none().last_start(day(2)), Some(day(2)));
    }

    #[test]
    fn only_calendar_units_are_regular() {
        assert!(Frequency::Daily.is_regular());
        assert!(Frequency::Yearly.is_regular());
        assert!(!Frequency::None.is_regular());
        assert!(!Frequency::Irregular.is_regular());
    }
}
