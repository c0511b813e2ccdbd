//! Per-call consumption aggregation.
//!
//! A fresh tree is built for every monitoring pass: one [`SourceLeaf`] per
//! registered source the user owns, under a [`UserAggregate`] root that sums
//! them. Leaves never fail; a failing source contributes 0.0 and is counted
//! in [`Consumption::failed`].

use std::ops::Add;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::MeterError;
use crate::ids::UserId;
use crate::reading::{NewReading, Reading};
use crate::storage::HistoryStore;

use super::adapter::SourceAdapter;
use super::extraction::ReadingExtractor;

/// Aggregated value plus how many sources contributed to it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Consumption {
    /// Sum of contributed values.
    pub total: f64,
    /// Sources that produced and stored a reading.
    pub reported: usize,
    /// Sources that degraded to 0.0.
    pub failed: usize,
}

impl Consumption {
    fn reported(value: f64) -> Self {
        Self {
            total: value,
            reported: 1,
            failed: 0,
        }
    }

    fn failed() -> Self {
        Self {
            total: 0.0,
            reported: 0,
            failed: 1,
        }
    }
}

impl Add for Consumption {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            total: self.total + rhs.total,
            reported: self.reported + rhs.reported,
            failed: self.failed + rhs.failed,
        }
    }
}

/// Node of the aggregation tree.
pub trait ConsumptionComponent: Send + Sync {
    /// Computes this node's consumption.
    fn consumption(&self) -> Consumption;
}

/// Leaf reading one source for one user.
pub struct SourceLeaf {
    source_id: String,
    adapter: Arc<dyn SourceAdapter>,
    extractor: Arc<dyn ReadingExtractor>,
    history: Arc<dyn HistoryStore>,
    user_id: UserId,
}

impl SourceLeaf {
    /// Binds a leaf to a source and its collaborators.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        adapter: Arc<dyn SourceAdapter>,
        extractor: Arc<dyn ReadingExtractor>,
        history: Arc<dyn HistoryStore>,
        user_id: UserId,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            adapter,
            extractor,
            history,
            user_id,
        }
    }

    /// Fetches, extracts and stores one reading.
    fn read(&self) -> Result<Reading, MeterError> {
        let handle = self.adapter.current_handle()?;
        let value = self.extractor.extract(&handle);
        let reading = self.history.save_reading(NewReading {
            user_id: self.user_id,
            source_id: self.source_id.clone(),
            recorded_at: Utc::now(),
            value,
            provenance: handle.to_string(),
        })?;
        Ok(reading)
    }
}

impl ConsumptionComponent for SourceLeaf {
    fn consumption(&self) -> Consumption {
        match self.read() {
            Ok(reading) => {
                debug!(
                    user = %self.user_id,
                    source = %self.source_id,
                    value = reading.value,
                    provenance = %reading.provenance,
                    "reading stored"
                );
                Consumption::reported(reading.value)
            }
            Err(err) => {
                warn!(user = %self.user_id, source = %self.source_id, error = %err, "source contributed 0.0");
                Consumption::failed()
            }
        }
    }
}

/// Root of the tree: sums its children.
#[derive(Default)]
pub struct UserAggregate {
    components: Vec<Box<dyn ConsumptionComponent>>,
}

impl UserAggregate {
    /// An empty aggregate (consumption 0.0).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a child node.
    pub fn add(&mut self, component: Box<dyn ConsumptionComponent>) {
        self.components.push(component);
    }
}

impl ConsumptionComponent for UserAggregate {
    fn consumption(&self) -> Consumption {
        self.components
            .iter()
            .map(|c| c.consumption())
            .fold(Consumption::default(), Add::add)
    }
}
