use crate::calendar::CalendarEvent;

/// Whether `a` and `b` denote the same occurrence in two different stores.
///
/// There is no identifier shared between stores, so the time window is the
/// key: all-day events match on their start date, timed events on exact start
/// and end instants. An all-day event never matches a timed one, and events
/// missing either bound never match anything.
pub fn matches(a: &CalendarEvent, b: &CalendarEvent) -> bool {
    let (Some(a_start), Some(a_end)) = (a.start, a.end) else {
        return false;
    };
    let (Some(b_start), Some(b_end)) = (b.start, b.end) else {
        return false;
    };

    match (a.is_all_day(), b.is_all_day()) {
        (true, true) => a_start.date_naive() == b_start.date_naive(),
        (false, false) => a_start == b_start && a_end == b_end,
        _ => false,
    }
}
