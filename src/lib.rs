pub mod calendar;
pub mod recurrence;
pub mod storage;
pub mod sync;

pub use calendar::{CalendarEvent, EventType, Frequency, RecurrencePattern};
pub use sync::reconcile::{ReconciliationEngine, SyncPlan};
pub use sync::sync_engine::{SyncEngine, SyncSummary};
