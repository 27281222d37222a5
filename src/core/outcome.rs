// src/core/outcome.rs

//! Determinations recorded by scripts, keyed by the correlation id of the fire that
//! started them.

use crate::{constants::MAX_RETAINED_OUTCOMES, core::commons::lock};
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Recorded {
    values: HashMap<Uuid, Vec<String>>,
    /// Correlation ids in the order they first determined.
    order: VecDeque<Uuid>,
}

/// Holds at most `capacity` fires' determinations; the oldest are dropped first.
#[derive(Debug)]
pub struct OutcomeStore {
    recorded: Mutex<Recorded>,
    capacity: usize,
}

impl Default for OutcomeStore {
    fn default() -> Self {
        Self::with_capacity(MAX_RETAINED_OUTCOMES)
    }
}

impl OutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            recorded: Mutex::new(Recorded::default()),
            capacity: capacity.max(1),
        }
    }

    /// Appends a determination. A script may determine more than once.
    pub fn record(&self, correlation_id: Uuid, value: impl Into<String>) {
        let mut recorded = lock(&self.recorded);
        if !recorded.values.contains_key(&correlation_id) {
            while recorded.order.len() >= self.capacity {
                let Some(oldest) = recorded.order.pop_front() else {
                    break;
                };
                if recorded.values.remove(&oldest).is_some() {
                    log::debug!("Dropped unpolled determinations of fire {}.", oldest);
                }
            }
            recorded.order.push_back(correlation_id);
        }
        recorded
            .values
            .entry(correlation_id)
            .or_default()
            .push(value.into());
    }

    pub fn get(&self, correlation_id: Uuid) -> Option<Vec<String>> {
        lock(&self.recorded).values.get(&correlation_id).cloned()
    }

    pub fn first(&self, correlation_id: Uuid) -> Option<String> {
        lock(&self.recorded)
            .values
            .get(&correlation_id)
            .and_then(|values| values.first().cloned())
    }

    /// Removes and returns the determinations, for callers that poll exactly once.
    pub fn take(&self, correlation_id: Uuid) -> Option<Vec<String>> {
        let mut recorded = lock(&self.recorded);
        let values = recorded.values.remove(&correlation_id)?;
        recorded.order.retain(|id| *id != correlation_id);
        Some(values)
    }

    pub fn len(&self) -> usize {
        lock(&self.recorded).values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
