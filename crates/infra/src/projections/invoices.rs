use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use levy_billing::{
    BillingId, InvoiceEvent, InvoiceId, InvoiceStatus, OcrNumber, Payment, PaymentType, parse_invoice_number,
};
use levy_core::{AggregateId, OwnerId, PaymentId, PropertyId};
use levy_events::EventEnvelope;

use super::{ProjectionError, StreamCursors};
use crate::event_store::EventStore;
use crate::read_model::{InMemoryReadStore, ReadStore};

pub const INVOICE_AGGREGATE_TYPE: &str = "billing.invoice";

/// Queryable invoice, including its payments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceReadModel {
    pub invoice_id: InvoiceId,
    pub billing_id: BillingId,
    pub property_id: PropertyId,
    pub owner_id: OwnerId,
    pub invoice_number: String,
    pub ocr: OcrNumber,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub sent: bool,
    pub payments: Vec<Payment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Stream revision this record reflects.
    pub version: u64,
}

impl InvoiceReadModel {
    pub fn outstanding_amount(&self) -> Decimal {
        (self.total_amount - self.paid_amount).max(Decimal::ZERO)
    }

    fn number_key(&self) -> (i32, u32) {
        parse_invoice_number(&self.invoice_number).unwrap_or((0, 0))
    }
}

/// Payment plus the invoice that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReadModel {
    pub invoice_id: InvoiceId,
    pub payment: Payment,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceFilter {
    pub status: Option<InvoiceStatus>,
    pub property_id: Option<PropertyId>,
    pub billing_id: Option<BillingId>,
}

impl InvoiceFilter {
    pub fn matches(&self, rm: &InvoiceReadModel) -> bool {
        self.status.is_none_or(|s| rm.status == s)
            && self.property_id.is_none_or(|p| rm.property_id == p)
            && self.billing_id.is_none_or(|b| rm.billing_id == b)
    }
}

/// Date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub payment_type: Option<PaymentType>,
}

impl PaymentFilter {
    pub fn matches(&self, payment: &Payment) -> bool {
        self.from.is_none_or(|from| payment.payment_date >= from)
            && self.to.is_none_or(|to| payment.payment_date <= to)
            && self.payment_type.is_none_or(|t| payment.payment_type == t)
    }
}

#[derive(Debug)]
pub struct InvoicesProjection<
    S = InMemoryReadStore<InvoiceId, InvoiceReadModel>,
    P = InMemoryReadStore<PaymentId, PaymentReadModel>,
> where
    S: ReadStore<InvoiceId, InvoiceReadModel>,
    P: ReadStore<PaymentId, PaymentReadModel>,
{
    invoices: S,
    payments: P,
    /// Held for the whole of an apply so check, write and advance are atomic.
    cursors: Mutex<StreamCursors>,
}

impl InvoicesProjection {
    pub fn in_memory() -> Self {
        Self::new(InMemoryReadStore::new(), InMemoryReadStore::new())
    }
}

impl<S, P> InvoicesProjection<S, P>
where
    S: ReadStore<InvoiceId, InvoiceReadModel>,
    P: ReadStore<PaymentId, PaymentReadModel>,
{
    pub fn new(invoices: S, payments: P) -> Self {
        Self {
            invoices,
            payments,
            cursors: Mutex::new(StreamCursors::default()),
        }
    }

    pub fn get(&self, invoice_id: &InvoiceId) -> Option<InvoiceReadModel> {
        self.invoices.get(invoice_id)
    }

    /// Ordered by invoice year, then serial.
    pub fn query(&self, filter: &InvoiceFilter) -> Vec<InvoiceReadModel> {
        let mut out: Vec<_> = self.invoices.list().into_iter().filter(|rm| filter.matches(rm)).collect();
        out.sort_by_key(|rm| rm.number_key());
        out
    }

    pub fn list(&self) -> Vec<InvoiceReadModel> {
        self.query(&InvoiceFilter::default())
    }

    pub fn find_by_ocr(&self, ocr: &OcrNumber) -> Option<InvoiceReadModel> {
        self.invoices.list().into_iter().find(|rm| &rm.ocr == ocr)
    }

    pub fn payment(&self, payment_id: &PaymentId) -> Option<PaymentReadModel> {
        self.payments.get(payment_id)
    }

    /// Ordered by payment date, then registration time.
    pub fn payments(&self, filter: &PaymentFilter) -> Vec<PaymentReadModel> {
        let mut out: Vec<_> = self.payments.list().into_iter().filter(|p| filter.matches(&p.payment)).collect();
        out.sort_by_key(|p| (p.payment.payment_date, p.payment.registered_at));
        out
    }

    /// Highest serial already used in `year` (0 when none).
    pub fn last_serial(&self, year: i32) -> u32 {
        self.invoices
            .list()
            .iter()
            .filter_map(|rm| parse_invoice_number(&rm.invoice_number))
            .filter(|(y, _)| *y == year)
            .map(|(_, serial)| serial)
            .max()
            .unwrap_or(0)
    }

    /// Apply everything the store holds for one invoice beyond the cursor.
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
            self.invoices.clear();
            self.payments.clear();
            cursors.clear();
        }
        for stored in store.load_all()? {
            self.apply_envelope(&stored.to_envelope())?;
        }
        Ok(())
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != INVOICE_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = self.cursors.lock().map_err(|_| poisoned())?;
        if !cursors.admit(aggregate_id, seq)? {
            return Ok(());
        }

        let ev: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
        let invoice_id = ev.invoice_id();
        if invoice_id.0 != aggregate_id {
            return Err(ProjectionError::StreamMismatch(
                "event invoice_id does not match envelope aggregate_id".to_string(),
            ));
        }

        let mut rm = match &ev {
            InvoiceEvent::InvoiceIssued(e) => InvoiceReadModel {
                invoice_id: e.invoice_id,
                billing_id: e.billing_id,
                property_id: e.property_id,
                owner_id: e.owner_id,
                invoice_number: e.invoice_number.clone(),
                ocr: e.ocr.clone(),
                total_amount: e.total_amount,
                paid_amount: Decimal::ZERO,
                due_date: e.due_date,
                status: InvoiceStatus::Created,
                sent: false,
                payments: Vec::new(),
                created_at: e.occurred_at,
                updated_at: e.occurred_at,
                version: 0,
            },
            _ => self
                .invoices
                .get(&invoice_id)
                .ok_or_else(|| ProjectionError::MissingReadModel(format!("invoice {invoice_id}")))?,
        };

        match ev {
            InvoiceEvent::InvoiceIssued(_) => {}
            InvoiceEvent::InvoiceSent(e) => {
                rm.sent = true;
                rm.status = e.status;
                rm.updated_at = e.occurred_at;
            }
            InvoiceEvent::PaymentRegistered(e) => {
                self.payments.upsert(
                    e.payment.payment_id,
                    PaymentReadModel { invoice_id, payment: e.payment.clone() },
                );
                rm.payments.push(e.payment);
                rm.paid_amount = e.paid_amount;
                rm.status = e.status;
                rm.updated_at = e.occurred_at;
            }
            InvoiceEvent::PaymentUpdated(e) => {
                self.payments.upsert(
                    e.payment.payment_id,
                    PaymentReadModel { invoice_id, payment: e.payment.clone() },
                );
                if let Some(existing) = rm.payments.iter_mut().find(|p| p.payment_id == e.payment.payment_id) {
                    *existing = e.payment;
                }
                rm.paid_amount = e.paid_amount;
                rm.status = e.status;
                rm.updated_at = e.occurred_at;
            }
            InvoiceEvent::PaymentDeleted(e) => {
                self.payments.remove(&e.payment_id);
                rm.payments.retain(|p| p.payment_id != e.payment_id);
                rm.paid_amount = e.paid_amount;
                rm.status = e.status;
                rm.updated_at = e.occurred_at;
            }
            InvoiceEvent::InvoiceMarkedOverdue(e) => {
                rm.status = InvoiceStatus::Overdue;
                rm.updated_at = e.occurred_at;
            }
            InvoiceEvent::InvoiceCancelled(e) => {
                rm.status = InvoiceStatus::Cancelled;
                rm.updated_at = e.occurred_at;
            }
        }

        rm.version = seq;
        self.invoices.upsert(invoice_id, rm);
        cursors.advance(aggregate_id, seq);
        Ok(())
    }
}

fn poisoned() -> ProjectionError {
    ProjectionError::Store(crate::event_store::EventStoreError::Unavailable(
        "projection cursor lock poisoned".to_string(),
    ))
}
