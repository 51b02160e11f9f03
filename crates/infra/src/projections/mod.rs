//! Read model builders.
//!
//! Projections fold committed envelopes into query-optimized records. They
//! are rebuildable from the store, and idempotent under at-least-once
//! delivery: a per-stream cursor skips sequence numbers already applied.

pub mod billings;
pub mod invoices;

use std::collections::HashMap;

use thiserror::Error;

use levy_core::AggregateId;

use crate::event_store::EventStoreError;

pub use billings::{BillingReadModel, BillingsProjection};
pub use invoices::{InvoiceFilter, InvoiceReadModel, InvoicesProjection, PaymentFilter, PaymentReadModel};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),
    #[error("event does not belong to stream: {0}")]
    StreamMismatch(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
    #[error("no read model for {0}")]
    MissingReadModel(String),
    #[error(transparent)]
    Store(#[from] EventStoreError),
}

/// Last applied sequence number per stream.
#[derive(Debug, Default)]
pub(crate) struct StreamCursors {
    positions: HashMap<AggregateId, u64>,
}

impl StreamCursors {
    /// `Ok(false)` when `seq` was already applied.
    pub(crate) fn admit(&self, aggregate_id: AggregateId, seq: u64) -> Result<bool, ProjectionError> {
        let last = self.positions.get(&aggregate_id).copied().unwrap_or(0);
        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(false);
        }
        if seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        Ok(true)
    }

    pub(crate) fn advance(&mut self, aggregate_id: AggregateId, seq: u64) {
        self.positions.insert(aggregate_id, seq);
    }

    pub(crate) fn clear(&mut self) {
        self.positions.clear();
    }
}
