use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use thiserror::Error;

use crate::calendar::CalendarEvent;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Request error: {0}")]
    RequestError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Failed to read store: {0}")]
    IoError(#[from] std::io::Error),
    #[error("{0} is read-only")]
    ReadOnly(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn around(center: NaiveDate, days_past: u32, days_future: u32) -> Self {
        let start = center
            .checked_sub_days(Days::new(u64::from(days_past)))
            .unwrap_or(center);
        let end = center
            .checked_add_days(Days::new(u64::from(days_future)))
            .unwrap_or(center);
        Self { start, end }
    }
}

/// The four operations the sync engine needs from a calendar backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CalendarStore: Send + Sync {
    async fn get_events(&self, range: &DateRange) -> Result<Vec<CalendarEvent>, StoreError>;

    async fn insert(&self, event: &CalendarEvent) -> Result<String, StoreError>;

    async fn update(&self, id: &str, event: &CalendarEvent) -> Result<(), StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}
