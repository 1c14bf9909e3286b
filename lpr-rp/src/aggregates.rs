//! Plate aggregate lookup boundary
//!
//! Storage belongs to the persistence collaborator. The pipeline only asks
//! it for the current aggregate of a plate, synchronously, right before
//! planning; the collaborator answers from whatever it keeps in memory.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use lpr_common::model::{NormalizedPlate, PlateAggregate, UpsertPlan};

/// Supplies the existing aggregate for a plate, if the collaborator knows one
pub trait AggregateLookup: Send + Sync {
    fn find(&self, plate: &NormalizedPlate) -> Option<PlateAggregate>;
}

/// Collaborator that knows no aggregates (every plate looks new)
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAggregates;

impl AggregateLookup for NoAggregates {
    fn find(&self, _plate: &NormalizedPlate) -> Option<PlateAggregate> {
        None
    }
}

/// Map-backed aggregate store that applies plans
///
/// Stands in for persistence in the replay CLI and in tests.
#[derive(Debug, Default)]
pub struct InMemoryAggregates {
    inner: RwLock<HashMap<NormalizedPlate, PlateAggregate>>,
}

impl InMemoryAggregates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one plan (insert or replace the aggregate)
    pub fn apply(&self, plan: &UpsertPlan) {
        let aggregate = plan.aggregate().clone();
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(aggregate.plate().clone(), aggregate);
    }

    /// Seed an aggregate loaded from elsewhere
    pub fn insert(&self, aggregate: PlateAggregate) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(aggregate.plate().clone(), aggregate);
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All aggregates sorted by plate
    pub fn snapshot(&self) -> Vec<PlateAggregate> {
        let mut all: Vec<PlateAggregate> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.plate().cmp(b.plate()));
        all
    }
}

impl AggregateLookup for InMemoryAggregates {
    fn find(&self, plate: &NormalizedPlate) -> Option<PlateAggregate> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(plate)
            .cloned()
    }
}
