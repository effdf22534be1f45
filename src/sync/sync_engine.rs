use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::calendar::CalendarEvent;
use crate::storage::id_map::{IdMap, IdMapError, IdMapFile};
use crate::storage::sync_state::{StateError, SyncState};
use crate::sync::policy::{DateRangeFilter, EventFilter};
use crate::sync::reconcile::{ReconcileError, ReconciliationEngine, SyncPlan};
use crate::sync::store::{CalendarStore, DateRange, StoreError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to read source calendar: {0}")]
    Source(StoreError),
    #[error("Failed to read target calendar: {0}")]
    Target(StoreError),
    #[error("Reconciliation aborted: {0}")]
    Reconcile(#[from] ReconcileError),
    #[error("Sync state error: {0}")]
    State(#[from] StateError),
    #[error("ID map error: {0}")]
    IdMap(#[from] IdMapError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
}

impl SyncSummary {
    fn planned(plan: &SyncPlan) -> Self {
        Self {
            inserted: plan.to_insert.len(),
            updated: plan.to_update.len(),
            deleted: plan.to_delete.len(),
            failed: 0,
        }
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inserted, {} updated, {} deleted, {} failed",
            self.inserted, self.updated, self.deleted, self.failed
        )
    }
}

/// One-way synchronization from a source calendar into a target calendar.
pub struct SyncEngine {
    source: Box<dyn CalendarStore>,
    target: Box<dyn CalendarStore>,
    reconciler: ReconciliationEngine,
    state: SyncState,
    id_map: Option<IdMapFile>,
    past_days: u32,
    future_days: u32,
    dry_run: bool,
}

impl SyncEngine {
    pub fn new(
        source: Box<dyn CalendarStore>,
        target: Box<dyn CalendarStore>,
        reconciler: ReconciliationEngine,
        state: SyncState,
    ) -> Self {
        Self {
            source,
            target,
            reconciler,
            state,
            id_map: None,
            past_days: 30,
            future_days: 365,
            dry_run: false,
        }
    }

    pub fn with_window(mut self, past_days: u32, future_days: u32) -> Self {
        self.past_days = past_days;
        self.future_days = future_days;
        self
    }

    pub fn with_id_map(mut self, id_map: IdMapFile) -> Self {
        self.id_map = Some(id_map);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Runs one synchronization pass.
    ///
    /// Fetch and reconciliation errors abort before any write. Failures of
    /// single writes are logged and counted and the run is still recorded.
    /// The recorded watermark is `now` unless an update failed, in which case
    /// it stays just below that source event's `last_updated`.
    pub async fn run(&mut self, now: DateTime<Utc>) -> Result<SyncSummary, SyncError> {
        let watermark = self.state.watermark()?.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let range = DateRange::around(now.date_naive(), self.past_days, self.future_days);
        tracing::info!(
            "Starting sync for {} to {} (changes since {})",
            range.start,
            range.end,
            watermark
        );

        let source = self.source.get_events(&range).await.map_err(SyncError::Source)?;
        let target = self.target.get_events(&range).await.map_err(SyncError::Target)?;

        let window = DateRangeFilter::new(range.start, range.end);
        let source: Vec<CalendarEvent> = source.into_iter().filter(|e| window.accept(e)).collect();
        let target: Vec<CalendarEvent> = target.into_iter().filter(|e| window.accept(e)).collect();

        let mut id_map = match &self.id_map {
            Some(file) => Some(file.load()?),
            None => None,
        };
        if let Some(map) = id_map.as_mut() {
            let in_window: HashSet<&str> = source.iter().map(|e| e.id.as_str()).collect();
            let pruned = map.retain_sources(&in_window);
            if pruned > 0 {
                tracing::debug!("Dropped {} ID mappings for sources outside the window", pruned);
            }
        }

        let plan = self
            .reconciler
            .reconcile(source, target, id_map.as_ref(), watermark)?;

        if self.dry_run {
            log_plan(&plan);
            return Ok(SyncSummary::planned(&plan));
        }

        let (summary, oldest_failed_update) = self.apply(plan, id_map.as_mut()).await;

        if let (Some(file), Some(map)) = (&self.id_map, &id_map) {
            file.save(map)?;
        }

        // a failed update is only retried while its source change is newer
        // than the watermark
        let next_watermark = match oldest_failed_update {
            Some(last_updated) => last_updated
                .checked_sub_signed(Duration::microseconds(1))
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
                .min(now),
            None => now,
        };
        if next_watermark < now {
            tracing::warn!(
                "Holding watermark at {} so failed updates are retried",
                next_watermark
            );
        }
        self.state.record_run(now, next_watermark, &summary)?;

        tracing::info!("Sync finished: {}", summary);
        Ok(summary)
    }

    /// Applies `plan` to the target. Returns the counts and the oldest
    /// `last_updated` among source events whose update failed.
    async fn apply(
        &self,
        plan: SyncPlan,
        mut id_map: Option<&mut IdMap>,
    ) -> (SyncSummary, Option<DateTime<Utc>>) {
        let mut summary = SyncSummary::default();
        let mut oldest_failed_update: Option<DateTime<Utc>> = None;

        for event in &plan.to_delete {
            match self.target.delete(&event.id).await {
                Ok(()) => {
                    summary.deleted += 1;
                    if let Some(map) = id_map.as_deref_mut() {
                        map.remove_target(&event.id);
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to delete {}: {}", event.describe(), e);
                    summary.failed += 1;
                }
            }
        }

        for update in &plan.to_update {
            match self.target.update(&update.target_id, &update.event).await {
                Ok(()) => {
                    summary.updated += 1;
                    if let Some(map) = id_map.as_deref_mut() {
                        map.insert(update.event.id.clone(), update.target_id.clone());
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to update {}: {}", update.event.describe(), e);
                    summary.failed += 1;
                    let last_updated = update.event.last_updated;
                    oldest_failed_update = Some(match oldest_failed_update {
                        Some(oldest) => oldest.min(last_updated),
                        None => last_updated,
                    });
                }
            }
        }

        for event in &plan.to_insert {
            match self.target.insert(event).await {
                Ok(target_id) => {
                    summary.inserted += 1;
                    if let Some(map) = id_map.as_deref_mut() {
                        map.insert(event.id.clone(), target_id);
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to insert {}: {}", event.describe(), e);
                    summary.failed += 1;
                }
            }
        }

        (summary, oldest_failed_update)
    }
}

fn log_plan(plan: &SyncPlan) {
    for event in &plan.to_delete {
        tracing::info!("[dry run] would delete {}", event.describe());
    }
    for update in &plan.to_update {
        tracing::info!(
            "[dry run] would update {} with {}",
            update.target_id,
            update.event.describe()
        );
    }
    for event in &plan.to_insert {
        tracing::info!("[dry run] would insert {}", event.describe());
    }
}
