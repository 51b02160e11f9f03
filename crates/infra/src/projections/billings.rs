use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use levy_billing::{BillingEvent, BillingId, BillingTerms, InvoiceId};
use levy_core::AggregateId;
use levy_events::EventEnvelope;

use super::{ProjectionError, StreamCursors};
use crate::event_store::{EventStore, EventStoreError};
use crate::read_model::{InMemoryReadStore, ReadStore};

pub const BILLING_AGGREGATE_TYPE: &str = "billing.billing";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingReadModel {
    pub billing_id: BillingId,
    pub terms: BillingTerms,
    pub invoices_generated: bool,
    pub invoice_ids: Vec<InvoiceId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// Live billings. Deleted billings leave the read model.
#[derive(Debug)]
pub struct BillingsProjection<S = InMemoryReadStore<BillingId, BillingReadModel>>
where
    S: ReadStore<BillingId, BillingReadModel>,
{
    store: S,
    cursors: Mutex<StreamCursors>,
}

impl BillingsProjection {
    pub fn in_memory() -> Self {
        Self::new(InMemoryReadStore::new())
    }
}

impl<S> BillingsProjection<S>
where
    S: ReadStore<BillingId, BillingReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: Mutex::new(StreamCursors::default()),
        }
    }

    pub fn get(&self, billing_id: &BillingId) -> Option<BillingReadModel> {
        self.store.get(billing_id)
    }

    /// Newest period first.
    pub fn list(&self) -> Vec<BillingReadModel> {
        let mut out = self.store.list();
        out.sort_by(|a, b| {
            (b.terms.year, b.terms.period).cmp(&(a.terms.year, a.terms.period))
        });
        out
    }

    pub fn find_by_period(&self, year: i32, period: u32) -> Option<BillingReadModel> {
        self.store
            .list()
            .into_iter()
            .find(|b| b.terms.year == year && b.terms.period == period)
    }

    pub fn catch_up<E>(&self, store: &E, aggregate_id: AggregateId) -> Result<(), ProjectionError>
    where
        E: EventStore + ?Sized,
    {
        for stored in store.load_stream(aggregate_id)? {
            self.apply_envelope(&stored.to_envelope())?;
        }
        Ok(())
    }

    pub fn rebuild<E>(&self, store: &E) -> Result<(), ProjectionError>
    where
        E: EventStore + ?Sized,
    {
        {
            let mut cursors = self.cursors.lock().map_err(|_| poisoned())?;
            self.store.clear();
            cursors.clear();
        }
        for stored in store.load_all()? {
            self.apply_envelope(&stored.to_envelope())?;
        }
        Ok(())
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != BILLING_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = self.cursors.lock().map_err(|_| poisoned())?;
        if !cursors.admit(aggregate_id, seq)? {
            return Ok(());
        }

        let ev: BillingEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
        let billing_id = ev.billing_id();
        if billing_id.0 != aggregate_id {
            return Err(ProjectionError::StreamMismatch(
                "event billing_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            BillingEvent::BillingCreated(e) => {
                self.store.upsert(
                    billing_id,
                    BillingReadModel {
                        billing_id,
                        terms: e.terms,
                        invoices_generated: false,
                        invoice_ids: Vec::new(),
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                        version: seq,
                    },
                );
            }
            BillingEvent::BillingUpdated(e) => {
                let mut rm = self.existing(billing_id)?;
                rm.terms = e.terms;
                rm.updated_at = e.occurred_at;
                rm.version = seq;
                self.store.upsert(billing_id, rm);
            }
            BillingEvent::InvoicesGenerated(e) => {
                let mut rm = self.existing(billing_id)?;
                rm.invoices_generated = true;
                rm.invoice_ids = e.invoice_ids;
                rm.updated_at = e.occurred_at;
                rm.version = seq;
                self.store.upsert(billing_id, rm);
            }
            BillingEvent::BillingDeleted(_) => {
                self.store.remove(&billing_id);
            }
        }

        cursors.advance(aggregate_id, seq);
        Ok(())
    }

    fn existing(&self, billing_id: BillingId) -> Result<BillingReadModel, ProjectionError> {
        self.store
            .get(&billing_id)
            .ok_or_else(|| ProjectionError::MissingReadModel(format!("billing {billing_id}")))
    }
}

fn poisoned() -> ProjectionError {
    ProjectionError::Store(EventStoreError::Unavailable("projection cursor lock poisoned".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_dispatcher::CommandDispatcher;
    use crate::event_store::InMemoryEventStore;
    use chrono::{NaiveDate, TimeZone};
    use levy_billing::{Billing, BillingCommand, BillingKind, CreateBilling, DeleteBilling, FeeSchedule};
    use levy_events::InMemoryEventBus;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn terms(year: i32, period: u32) -> BillingTerms {
        BillingTerms {
            year,
            period,
            kind: BillingKind::AnnualFee,
            description: format!("Avgift {year}/{period}"),
            fee: FeeSchedule::Flat { amount: Decimal::new(120000, 2) },
            issue_date: NaiveDate::from_ymd_opt(year, 1, 2).unwrap(),
            due_date: NaiveDate::from_ymd_opt(year, 2, 1).unwrap(),
        }
    }

    #[test]
    fn created_billings_are_listed_newest_first_and_deleted_ones_disappear() {
        let dispatcher = CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()));
        let projection = BillingsProjection::in_memory();
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();

        let mut ids = Vec::new();
        for (year, period) in [(2023, 1), (2024, 1), (2024, 2)] {
            let billing_id = BillingId::new(AggregateId::new());
            let cmd = BillingCommand::CreateBilling(CreateBilling { billing_id, terms: terms(year, period), occurred_at: at });
            dispatcher
                .dispatch(billing_id.0, BILLING_AGGREGATE_TYPE, cmd, |aid| Billing::empty(BillingId::new(aid)))
                .unwrap();
            projection.catch_up(dispatcher.store(), billing_id.0).unwrap();
            ids.push(billing_id);
        }

        let periods: Vec<_> = projection.list().iter().map(|b| (b.terms.year, b.terms.period)).collect();
        assert_eq!(periods, vec![(2024, 2), (2024, 1), (2023, 1)]);
        assert_eq!(projection.find_by_period(2024, 1).unwrap().billing_id, ids[1]);

        let delete = BillingCommand::DeleteBilling(DeleteBilling { billing_id: ids[0], occurred_at: at });
        dispatcher
            .dispatch(ids[0].0, BILLING_AGGREGATE_TYPE, delete, |aid| Billing::empty(BillingId::new(aid)))
            .unwrap();
        projection.catch_up(dispatcher.store(), ids[0].0).unwrap();
        assert!(projection.get(&ids[0]).is_none());
        assert!(projection.find_by_period(2023, 1).is_none());
    }
}
