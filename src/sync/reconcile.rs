use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::calendar::CalendarEvent;
use crate::storage::id_map::IdMap;
use crate::sync::matcher::matches;
use crate::sync::policy::{EventFilter, EventObfuscator};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Source event {} matches {matches} target events", .event.describe())]
    DuplicateMatch {
        event: Box<CalendarEvent>,
        matches: usize,
    },
    #[error("Target event {} is matched by {sources} source events", .event.describe())]
    SharedTarget {
        event: Box<CalendarEvent>,
        sources: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedUpdate {
    pub target_id: String,
    pub event: CalendarEvent,
}

/// The three disjoint operation sets produced by a reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    pub to_insert: Vec<CalendarEvent>,
    pub to_update: Vec<PlannedUpdate>,
    pub to_delete: Vec<CalendarEvent>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

pub struct ReconciliationEngine {
    filters: Vec<Box<dyn EventFilter>>,
    obfuscators: Vec<Box<dyn EventObfuscator>>,
}

impl ReconciliationEngine {
    pub fn new(
        filters: Vec<Box<dyn EventFilter>>,
        obfuscators: Vec<Box<dyn EventObfuscator>>,
    ) -> Self {
        Self {
            filters,
            obfuscators,
        }
    }

    fn admits(&self, event: &CalendarEvent) -> bool {
        self.filters.iter().all(|filter| filter.accept(event))
    }

    /// Plans the writes that make `target` converge toward `source`.
    ///
    /// Matched pairs are only updated when the source changed after
    /// `stale_before`. Any ambiguous pairing aborts the whole plan. When an
    /// `id_map` is given, a source mapped to a present target is paired with
    /// it directly and that target is taken out of time-window matching.
    pub fn reconcile(
        &self,
        source: Vec<CalendarEvent>,
        target: Vec<CalendarEvent>,
        id_map: Option<&IdMap>,
        stale_before: DateTime<Utc>,
    ) -> Result<SyncPlan, ReconcileError> {
        let source: Vec<CalendarEvent> = source.into_iter().filter(|e| self.admits(e)).collect();
        let target: Vec<CalendarEvent> = target.into_iter().filter(|e| self.admits(e)).collect();

        let claimed = claim_by_id(&source, &target, id_map);
        let claimed_targets: HashSet<usize> = claimed.values().copied().collect();

        let source_matches: Vec<Vec<usize>> = source
            .iter()
            .enumerate()
            .map(|(si, s)| match claimed.get(&si) {
                Some(ti) => vec![*ti],
                None => target
                    .iter()
                    .enumerate()
                    .filter(|(ti, t)| !claimed_targets.contains(ti) && matches(s, t))
                    .map(|(ti, _)| ti)
                    .collect(),
            })
            .collect();

        let mut matched_by = vec![0usize; target.len()];
        for (si, found) in source_matches.iter().enumerate() {
            if found.len() > 1 {
                return Err(ReconcileError::DuplicateMatch {
                    event: Box::new(source[si].clone()),
                    matches: found.len(),
                });
            }
            for ti in found {
                matched_by[*ti] += 1;
            }
        }
        if let Some((ti, sources)) = matched_by.iter().enumerate().find(|(_, n)| **n > 1) {
            return Err(ReconcileError::SharedTarget {
                event: Box::new(target[ti].clone()),
                sources: *sources,
            });
        }

        let mut plan = SyncPlan::default();
        let mut unchanged = 0;
        for (s, found) in source.into_iter().zip(source_matches) {
            match found.first() {
                None => plan.to_insert.push(s),
                Some(ti) if s.last_updated > stale_before => plan.to_update.push(PlannedUpdate {
                    target_id: target[*ti].id.clone(),
                    event: s,
                }),
                Some(_) => unchanged += 1,
            }
        }
        plan.to_delete = target
            .into_iter()
            .zip(matched_by)
            .filter(|(_, n)| *n == 0)
            .map(|(t, _)| t)
            .collect();

        for event in plan
            .to_insert
            .iter_mut()
            .chain(plan.to_update.iter_mut().map(|u| &mut u.event))
        {
            for obfuscator in &self.obfuscators {
                obfuscator.obfuscate(event);
            }
        }

        tracing::info!(
            "Planned {} inserts, {} updates, {} deletes ({} unchanged)",
            plan.to_insert.len(),
            plan.to_update.len(),
            plan.to_delete.len(),
            unchanged
        );
        Ok(plan)
    }
}

fn claim_by_id(
    source: &[CalendarEvent],
    target: &[CalendarEvent],
    id_map: Option<&IdMap>,
) -> HashMap<usize, usize> {
    let Some(id_map) = id_map else {
        return HashMap::new();
    };
    let target_index: HashMap<&str, usize> = target
        .iter()
        .enumerate()
        .map(|(ti, t)| (t.id.as_str(), ti))
        .collect();

    source
        .iter()
        .enumerate()
        .filter_map(|(si, s)| {
            let target_id = id_map.get(&s.id)?;
            target_index.get(target_id).map(|ti| (si, *ti))
        })
        .collect()
}
