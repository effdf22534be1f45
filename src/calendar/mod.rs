pub mod event;
pub mod pattern;

pub use event::{CalendarEvent, EventError, EventType};
pub use pattern::{Frequency, PatternError, RecurrencePattern};
