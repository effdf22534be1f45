//! Recurrence handling for entries that arrive as explicit occurrence lists.
//!
//! [`infer`] turns the occurrence list into a compact [`RecurrencePattern`],
//! [`encode`] writes it in iCalendar `RRULE`/`RDATE` form and [`expand`]
//! reads that form back into occurrences.
//!
//! [`RecurrencePattern`]: crate::calendar::RecurrencePattern

pub mod encode;
pub mod expand;
pub mod infer;

pub use encode::{encode, encode_lines, EncodeError};
pub use expand::{expand, RecurrenceParseError};
pub use infer::infer;
