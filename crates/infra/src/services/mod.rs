//! Billing application services.
//!
//! [`BillingServices`] is built once at startup and shared. It owns the
//! command dispatcher, the projections it keeps current, the directory and
//! the external collaborators. Every write goes through the dispatcher and
//! is followed by a catch-up of the affected projections, so a caller always
//! reads its own writes.

pub mod directory;
pub mod generator;
pub mod import;
pub mod ledger;
pub mod lifecycle;
pub mod overdue;
pub mod reminders;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::watch;

use levy_billing::{Invoice, InvoiceCommand, InvoiceId};
use levy_core::{AggregateId, DomainError};
use levy_events::{EventEnvelope, InMemoryEventBus};

use crate::collaborators::{ExternalServiceError, LogMailer, Mailer, PdfRenderer, TextInvoiceRenderer};
use crate::command_dispatcher::{CommandDispatcher, DispatchError, StreamCommit};
use crate::config::BillingConfig;
use crate::directory::InMemoryDirectory;
use crate::event_store::{InMemoryEventStore, StoredEvent};
use crate::projections::billings::BILLING_AGGREGATE_TYPE;
use crate::projections::invoices::INVOICE_AGGREGATE_TYPE;
use crate::projections::{BillingsProjection, InvoiceReadModel, InvoicesProjection, ProjectionError};
use crate::retry::RetryPolicy;

pub use directory::PropertyRemoval;
pub use generator::{BillingChanges, GenerationReport};
pub use import::{ImportReport, ImportRow, RejectedRow, parse_payment_csv};
pub use ledger::NewPayment;
pub use overdue::OverdueSweep;
pub use reminders::{BatchReport, ExportReport};

pub type EventStoreHandle = Arc<InMemoryEventStore>;
pub type EventBusHandle = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type Dispatcher = CommandDispatcher<EventStoreHandle, EventBusHandle>;

/// Failure surfaced by a billing operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("illegal state transition: {0}")]
    State(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    ExternalService(#[from] ExternalServiceError),
    #[error("unauthorized")]
    Unauthorized,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

impl From<DispatchError> for ServiceError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Concurrency(msg) => ServiceError::Conflict(format!("concurrent modification: {msg}")),
            DispatchError::Conflict(msg) => ServiceError::Conflict(msg),
            DispatchError::Validation(msg) => ServiceError::Validation(msg),
            DispatchError::State(msg) => ServiceError::State(msg),
            DispatchError::NotFound(what) => ServiceError::NotFound(what),
            DispatchError::Unauthorized => ServiceError::Unauthorized,
            other @ (DispatchError::InvariantViolation(_)
            | DispatchError::Deserialize(_)
            | DispatchError::Store(_)) => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        DispatchError::from(value).into()
    }
}

impl From<ProjectionError> for ServiceError {
    fn from(value: ProjectionError) -> Self {
        ServiceError::Internal(format!("projection: {value}"))
    }
}

pub struct BillingServices {
    dispatcher: Dispatcher,
    invoices: InvoicesProjection,
    billings: BillingsProjection,
    directory: InMemoryDirectory,
    renderer: Arc<dyn PdfRenderer>,
    mailer: Arc<dyn Mailer>,
    retry_policy: RetryPolicy,
    config: BillingConfig,
    /// Serializes invoice generation so serials and OCR numbers never collide.
    generation: Mutex<()>,
    /// Cancellation handles of in-flight reminder/export batches.
    batches: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl std::fmt::Debug for BillingServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingServices")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BillingServices {
    /// In-memory store and bus, plain-text renderer, logging mailer.
    pub fn new(config: BillingConfig) -> Self {
        let retry_policy = RetryPolicy::exponential(
            config.external_retries,
            Duration::from_millis(200),
            Duration::from_secs(5),
        );
        Self {
            dispatcher: CommandDispatcher::new(
                Arc::new(InMemoryEventStore::new()),
                Arc::new(InMemoryEventBus::new()),
            ),
            invoices: InvoicesProjection::in_memory(),
            billings: BillingsProjection::in_memory(),
            directory: InMemoryDirectory::new(),
            renderer: Arc::new(TextInvoiceRenderer::new()),
            mailer: Arc::new(LogMailer::new()),
            retry_policy,
            config,
            generation: Mutex::new(()),
            batches: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PdfRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn event_bus(&self) -> &EventBusHandle {
        self.dispatcher.bus()
    }

    pub fn invoice_projection(&self) -> &InvoicesProjection {
        &self.invoices
    }

    pub fn billing_projection(&self) -> &BillingsProjection {
        &self.billings
    }

    pub fn directory(&self) -> &InMemoryDirectory {
        &self.directory
    }

    pub fn mailer(&self) -> &Arc<dyn Mailer> {
        &self.mailer
    }

    /// Rebuild every projection from the full event log.
    pub fn rebuild_projections(&self) -> Result<(), ServiceError> {
        let store = self.dispatcher.store();
        self.invoices.rebuild(store)?;
        self.billings.rebuild(store)?;
        Ok(())
    }

    /// Register a cancellation handle for a batch. A reused id replaces the
    /// previous handle.
    pub fn open_batch(&self, batch_id: &str) -> Result<watch::Receiver<bool>, ServiceError> {
        let (tx, rx) = watch::channel(false);
        self.batches
            .lock()
            .map_err(|_| ServiceError::Internal("batch registry lock poisoned".to_string()))?
            .insert(batch_id.to_string(), tx);
        Ok(rx)
    }

    pub fn close_batch(&self, batch_id: &str) {
        if let Ok(mut batches) = self.batches.lock() {
            batches.remove(batch_id);
        }
    }

    /// Signal an in-flight batch to stop. NotFound when no such batch runs.
    pub fn cancel_batch(&self, batch_id: &str) -> Result<(), ServiceError> {
        let batches = self
            .batches
            .lock()
            .map_err(|_| ServiceError::Internal("batch registry lock poisoned".to_string()))?;
        let tx = batches
            .get(batch_id)
            .ok_or_else(|| ServiceError::not_found(format!("batch {batch_id}")))?;
        tx.send_replace(true);
        tracing::info!(batch_id, "batch cancellation requested");
        Ok(())
    }

    /// Append staged streams atomically, then refresh the projections.
    pub(crate) fn commit(&self, commits: Vec<StreamCommit>) -> Result<Vec<StoredEvent>, ServiceError> {
        let committed = self.dispatcher.commit(commits)?;
        self.catch_up(&committed)?;
        Ok(committed)
    }

    /// Bring the projections up to date for every stream touched by `committed`.
    pub(crate) fn catch_up(&self, committed: &[StoredEvent]) -> Result<(), ServiceError> {
        let store = self.dispatcher.store();
        let streams: BTreeSet<(&str, AggregateId)> = committed
            .iter()
            .map(|e| (e.aggregate_type.as_str(), e.aggregate_id))
            .collect();
        for (aggregate_type, aggregate_id) in streams {
            match aggregate_type {
                INVOICE_AGGREGATE_TYPE => self.invoices.catch_up(store, aggregate_id)?,
                BILLING_AGGREGATE_TYPE => self.billings.catch_up(store, aggregate_id)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Run `attempt` again after an optimistic conflict, up to the configured
    /// number of retries. Each attempt must reload the aggregate.
    pub(crate) fn with_command_retries<T>(
        &self,
        operation: &str,
        mut attempt: impl FnMut() -> Result<T, DispatchError>,
    ) -> Result<T, ServiceError> {
        let mut retries = 0;
        loop {
            match attempt() {
                Err(DispatchError::Concurrency(msg)) if retries < self.config.command_retries => {
                    retries += 1;
                    tracing::debug!(operation, attempt = retries, reason = %msg, "stale aggregate; reloading");
                }
                other => return other.map_err(ServiceError::from),
            }
        }
    }

    /// Decide one command against the current invoice and commit it, with
    /// conflict retries. Returns the refreshed read model.
    pub(crate) fn execute_invoice(
        &self,
        invoice_id: InvoiceId,
        operation: &str,
        command: &InvoiceCommand,
    ) -> Result<(InvoiceReadModel, bool), ServiceError> {
        let committed = self.with_command_retries(operation, || {
            self.dispatcher.dispatch(invoice_id.0, INVOICE_AGGREGATE_TYPE, command.clone(), |id| {
                Invoice::empty(InvoiceId::new(id))
            })
        })?;
        self.catch_up(&committed)?;
        let invoice = self.invoice(invoice_id)?;
        Ok((invoice, !committed.is_empty()))
    }

    pub fn invoice(&self, invoice_id: InvoiceId) -> Result<InvoiceReadModel, ServiceError> {
        self.invoices
            .get(&invoice_id)
            .ok_or_else(|| ServiceError::not_found(format!("invoice {invoice_id}")))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::EventStoreError;

    #[test]
    fn dispatch_errors_map_onto_the_service_taxonomy() {
        assert!(matches!(
            ServiceError::from(DispatchError::Concurrency("x".into())),
            ServiceError::Conflict(_)
        ));
        assert!(matches!(
            ServiceError::from(DomainError::state("cancelled")),
            ServiceError::State(_)
        ));
        assert!(matches!(
            ServiceError::from(DomainError::invalid_id("nope")),
            ServiceError::Validation(_)
        ));
        assert!(matches!(
            ServiceError::from(DispatchError::Store(EventStoreError::Unavailable("down".into()))),
            ServiceError::Internal(_)
        ));
    }

    #[test]
    fn conflicts_are_retried_then_surfaced() {
        let services = fixtures::services();
        let mut calls = 0;
        let result: Result<(), ServiceError> = services.with_command_retries("test", || {
            calls += 1;
            Err(DispatchError::Concurrency("stale".into()))
        });
        assert!(matches!(result, Err(ServiceError::Conflict(_))));
        assert_eq!(calls, 1 + services.config().command_retries);
    }

    #[test]
    fn cancelling_an_unknown_batch_is_not_found() {
        let services = fixtures::services();
        assert!(matches!(services.cancel_batch("nope"), Err(ServiceError::NotFound(_))));

        let rx = services.open_batch("b1").unwrap();
        services.cancel_batch("b1").unwrap();
        assert!(*rx.borrow());
        services.close_batch("b1");
        assert!(services.cancel_batch("b1").is_err());
    }
}
