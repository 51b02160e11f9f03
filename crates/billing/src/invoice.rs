use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use levy_core::{Aggregate, AggregateId, AggregateRoot, DomainError, OwnerId, PaymentId, PropertyId};
use levy_events::Event;

use crate::billing::BillingId;
use crate::money::validate_amount;
use crate::ocr::OcrNumber;
use crate::payment::{Payment, PaymentType, total_paid};
use crate::status::{InvoiceStatus, LifecycleFacts, derive_status};

/// Invoice identifier (one event stream per invoice).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for InvoiceId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(AggregateId::from_str(s)?))
    }
}

/// Invoice numbers read `"{year}-{serial}"`, the serial counting from 1 per year.
pub fn format_invoice_number(year: i32, serial: u32) -> String {
    format!("{year}-{serial}")
}

pub fn parse_invoice_number(number: &str) -> Option<(i32, u32)> {
    let (year, serial) = number.split_once('-')?;
    Some((year.parse().ok()?, serial.parse().ok()?))
}

/// What happens when a payment would push the paid amount above the total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverpaymentPolicy {
    #[default]
    Reject,
    Allow,
}

impl FromStr for OverpaymentPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(OverpaymentPolicy::Reject),
            "allow" => Ok(OverpaymentPolicy::Allow),
            _ => Err(DomainError::validation(format!("unknown overpayment policy '{s}'"))),
        }
    }
}

/// Aggregate root: Invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    billing_id: Option<BillingId>,
    property_id: Option<PropertyId>,
    owner_id: Option<OwnerId>,
    invoice_number: String,
    ocr: Option<OcrNumber>,
    total_amount: Decimal,
    paid_amount: Decimal,
    due_date: NaiveDate,
    status: InvoiceStatus,
    sent: bool,
    payments: Vec<Payment>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-issued aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            billing_id: None,
            property_id: None,
            owner_id: None,
            invoice_number: String::new(),
            ocr: None,
            total_amount: Decimal::ZERO,
            paid_amount: Decimal::ZERO,
            due_date: NaiveDate::MIN,
            status: InvoiceStatus::Created,
            sent: false,
            payments: Vec::new(),
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn billing_id(&self) -> Option<BillingId> {
        self.billing_id
    }

    pub fn property_id(&self) -> Option<PropertyId> {
        self.property_id
    }

    pub fn owner_id(&self) -> Option<OwnerId> {
        self.owner_id
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn ocr(&self) -> Option<&OcrNumber> {
        self.ocr.as_ref()
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn paid_amount(&self) -> Decimal {
        self.paid_amount
    }

    pub fn outstanding_amount(&self) -> Decimal {
        (self.total_amount - self.paid_amount).max(Decimal::ZERO)
    }

    pub fn due_date(&self) -> NaiveDate {
        self.due_date
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn payment(&self, payment_id: PaymentId) -> Option<&Payment> {
        self.payments.iter().find(|p| p.payment_id == payment_id)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn facts(&self) -> LifecycleFacts {
        LifecycleFacts {
            current: self.status,
            total_amount: self.total_amount,
            due_date: self.due_date,
            sent: self.sent,
        }
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: IssueInvoice. Produced by the billing generator only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInvoice {
    pub invoice_id: InvoiceId,
    pub billing_id: BillingId,
    pub property_id: PropertyId,
    pub owner_id: OwnerId,
    pub invoice_number: String,
    pub ocr: OcrNumber,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkInvoiceSent {
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayment {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub amount: Decimal,
    pub payment_type: PaymentType,
    pub payment_date: NaiveDate,
    pub reference: Option<String>,
    pub policy: OverpaymentPolicy,
    pub occurred_at: DateTime<Utc>,
}

/// Replaces every attribute of an existing payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePayment {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub amount: Decimal,
    pub payment_type: PaymentType,
    pub payment_date: NaiveDate,
    pub reference: Option<String>,
    pub policy: OverpaymentPolicy,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePayment {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

/// `as_of` is the business date compared against the due date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkInvoiceOverdue {
    pub invoice_id: InvoiceId,
    pub as_of: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInvoice {
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    IssueInvoice(IssueInvoice),
    MarkInvoiceSent(MarkInvoiceSent),
    RegisterPayment(RegisterPayment),
    UpdatePayment(UpdatePayment),
    DeletePayment(DeletePayment),
    MarkInvoiceOverdue(MarkInvoiceOverdue),
    CancelInvoice(CancelInvoice),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub invoice_id: InvoiceId,
    pub billing_id: BillingId,
    pub property_id: PropertyId,
    pub owner_id: OwnerId,
    pub invoice_number: String,
    pub ocr: OcrNumber,
    pub total_amount: Decimal,
    pub due_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSent {
    pub invoice_id: InvoiceId,
    pub status: InvoiceStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Payment events carry the resulting balance and status so that the ledger
/// change and the status change commit together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRegistered {
    pub invoice_id: InvoiceId,
    pub payment: Payment,
    pub paid_amount: Decimal,
    pub status: InvoiceStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentUpdated {
    pub invoice_id: InvoiceId,
    pub payment: Payment,
    pub paid_amount: Decimal,
    pub status: InvoiceStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDeleted {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub paid_amount: Decimal,
    pub status: InvoiceStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceMarkedOverdue {
    pub invoice_id: InvoiceId,
    pub as_of: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCancelled {
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceIssued(InvoiceIssued),
    InvoiceSent(InvoiceSent),
    PaymentRegistered(PaymentRegistered),
    PaymentUpdated(PaymentUpdated),
    PaymentDeleted(PaymentDeleted),
    InvoiceMarkedOverdue(InvoiceMarkedOverdue),
    InvoiceCancelled(InvoiceCancelled),
}

impl InvoiceEvent {
    pub fn invoice_id(&self) -> InvoiceId {
        match self {
            InvoiceEvent::InvoiceIssued(e) => e.invoice_id,
            InvoiceEvent::InvoiceSent(e) => e.invoice_id,
            InvoiceEvent::PaymentRegistered(e) => e.invoice_id,
            InvoiceEvent::PaymentUpdated(e) => e.invoice_id,
            InvoiceEvent::PaymentDeleted(e) => e.invoice_id,
            InvoiceEvent::InvoiceMarkedOverdue(e) => e.invoice_id,
            InvoiceEvent::InvoiceCancelled(e) => e.invoice_id,
        }
    }
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceIssued(_) => "billing.invoice.issued",
            InvoiceEvent::InvoiceSent(_) => "billing.invoice.sent",
            InvoiceEvent::PaymentRegistered(_) => "billing.invoice.payment_registered",
            InvoiceEvent::PaymentUpdated(_) => "billing.invoice.payment_updated",
            InvoiceEvent::PaymentDeleted(_) => "billing.invoice.payment_deleted",
            InvoiceEvent::InvoiceMarkedOverdue(_) => "billing.invoice.marked_overdue",
            InvoiceEvent::InvoiceCancelled(_) => "billing.invoice.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceIssued(e) => e.occurred_at,
            InvoiceEvent::InvoiceSent(e) => e.occurred_at,
            InvoiceEvent::PaymentRegistered(e) => e.occurred_at,
            InvoiceEvent::PaymentUpdated(e) => e.occurred_at,
            InvoiceEvent::PaymentDeleted(e) => e.occurred_at,
            InvoiceEvent::InvoiceMarkedOverdue(e) => e.occurred_at,
            InvoiceEvent::InvoiceCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceIssued(e) => {
                self.id = e.invoice_id;
                self.billing_id = Some(e.billing_id);
                self.property_id = Some(e.property_id);
                self.owner_id = Some(e.owner_id);
                self.invoice_number = e.invoice_number.clone();
                self.ocr = Some(e.ocr.clone());
                self.total_amount = e.total_amount;
                self.paid_amount = Decimal::ZERO;
                self.due_date = e.due_date;
                self.status = InvoiceStatus::Created;
                self.sent = false;
                self.payments.clear();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            InvoiceEvent::InvoiceSent(e) => {
                self.sent = true;
                self.status = e.status;
            }
            InvoiceEvent::PaymentRegistered(e) => {
                self.payments.push(e.payment.clone());
                self.paid_amount = e.paid_amount;
                self.status = e.status;
            }
            InvoiceEvent::PaymentUpdated(e) => {
                if let Some(existing) = self
                    .payments
                    .iter_mut()
                    .find(|p| p.payment_id == e.payment.payment_id)
                {
                    *existing = e.payment.clone();
                }
                self.paid_amount = e.paid_amount;
                self.status = e.status;
            }
            InvoiceEvent::PaymentDeleted(e) => {
                self.payments.retain(|p| p.payment_id != e.payment_id);
                self.paid_amount = e.paid_amount;
                self.status = e.status;
            }
            InvoiceEvent::InvoiceMarkedOverdue(_) => {
                self.status = InvoiceStatus::Overdue;
            }
            InvoiceEvent::InvoiceCancelled(_) => {
                self.status = InvoiceStatus::Cancelled;
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::IssueInvoice(cmd) => self.handle_issue(cmd),
            InvoiceCommand::MarkInvoiceSent(cmd) => self.handle_mark_sent(cmd),
            InvoiceCommand::RegisterPayment(cmd) => self.handle_register_payment(cmd),
            InvoiceCommand::UpdatePayment(cmd) => self.handle_update_payment(cmd),
            InvoiceCommand::DeletePayment(cmd) => self.handle_delete_payment(cmd),
            InvoiceCommand::MarkInvoiceOverdue(cmd) => self.handle_mark_overdue(cmd),
            InvoiceCommand::CancelInvoice(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Invoice {
    fn ensure_issued(&self, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("invoice {invoice_id}")));
        }
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    fn ensure_payments_mutable(&self) -> Result<(), DomainError> {
        if self.status == InvoiceStatus::Cancelled {
            return Err(DomainError::state("payments of a cancelled invoice cannot change"));
        }
        Ok(())
    }

    fn ensure_within_total(&self, paid: Decimal, policy: OverpaymentPolicy) -> Result<(), DomainError> {
        if policy == OverpaymentPolicy::Reject && paid > self.total_amount {
            return Err(DomainError::validation(format!(
                "payment would exceed the invoice total ({paid} > {})",
                self.total_amount
            )));
        }
        Ok(())
    }

    fn handle_issue(&self, cmd: &IssueInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }
        validate_amount(cmd.amount, "invoice amount")?;
        if cmd.invoice_number.trim().is_empty() {
            return Err(DomainError::validation("invoice number must not be empty"));
        }

        Ok(vec![InvoiceEvent::InvoiceIssued(InvoiceIssued {
            invoice_id: cmd.invoice_id,
            billing_id: cmd.billing_id,
            property_id: cmd.property_id,
            owner_id: cmd.owner_id,
            invoice_number: cmd.invoice_number.clone(),
            ocr: cmd.ocr.clone(),
            total_amount: cmd.amount,
            due_date: cmd.due_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_sent(&self, cmd: &MarkInvoiceSent) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_issued(cmd.invoice_id)?;
        if self.status.is_settled() {
            return Err(DomainError::state(format!(
                "cannot mark a {} invoice as sent",
                self.status
            )));
        }
        if self.sent {
            return Ok(vec![]);
        }

        let status = if self.status == InvoiceStatus::Created {
            InvoiceStatus::Sent
        } else {
            self.status
        };
        Ok(vec![InvoiceEvent::InvoiceSent(InvoiceSent {
            invoice_id: cmd.invoice_id,
            status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_register_payment(&self, cmd: &RegisterPayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        validate_amount(cmd.amount, "payment amount")?;
        self.ensure_issued(cmd.invoice_id)?;
        self.ensure_payments_mutable()?;

        if self.payment(cmd.payment_id).is_some() {
            return Err(DomainError::conflict(format!(
                "payment {} already registered",
                cmd.payment_id
            )));
        }

        let paid_amount = self
            .paid_amount
            .checked_add(cmd.amount)
            .ok_or_else(|| DomainError::invariant("paid amount overflow"))?;
        self.ensure_within_total(paid_amount, cmd.policy)?;

        let status = derive_status(&self.facts(), paid_amount, cmd.occurred_at.date_naive());
        Ok(vec![InvoiceEvent::PaymentRegistered(PaymentRegistered {
            invoice_id: cmd.invoice_id,
            payment: Payment {
                payment_id: cmd.payment_id,
                amount: cmd.amount,
                payment_type: cmd.payment_type,
                payment_date: cmd.payment_date,
                reference: cmd.reference.clone(),
                registered_at: cmd.occurred_at,
            },
            paid_amount,
            status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_payment(&self, cmd: &UpdatePayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        validate_amount(cmd.amount, "payment amount")?;
        self.ensure_issued(cmd.invoice_id)?;
        self.ensure_payments_mutable()?;

        let existing = self
            .payment(cmd.payment_id)
            .ok_or_else(|| DomainError::not_found(format!("payment {}", cmd.payment_id)))?;

        let updated = Payment {
            payment_id: cmd.payment_id,
            amount: cmd.amount,
            payment_type: cmd.payment_type,
            payment_date: cmd.payment_date,
            reference: cmd.reference.clone(),
            registered_at: existing.registered_at,
        };
        if &updated == existing {
            return Ok(vec![]);
        }

        let others = total_paid(self.payments.iter().filter(|p| p.payment_id != cmd.payment_id));
        let paid_amount = others
            .checked_add(cmd.amount)
            .ok_or_else(|| DomainError::invariant("paid amount overflow"))?;
        self.ensure_within_total(paid_amount, cmd.policy)?;

        let status = derive_status(&self.facts(), paid_amount, cmd.occurred_at.date_naive());
        Ok(vec![InvoiceEvent::PaymentUpdated(PaymentUpdated {
            invoice_id: cmd.invoice_id,
            payment: updated,
            paid_amount,
            status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete_payment(&self, cmd: &DeletePayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_issued(cmd.invoice_id)?;
        self.ensure_payments_mutable()?;

        if self.payment(cmd.payment_id).is_none() {
            return Err(DomainError::not_found(format!("payment {}", cmd.payment_id)));
        }

        let paid_amount = total_paid(self.payments.iter().filter(|p| p.payment_id != cmd.payment_id));
        let status = derive_status(&self.facts(), paid_amount, cmd.occurred_at.date_naive());
        Ok(vec![InvoiceEvent::PaymentDeleted(PaymentDeleted {
            invoice_id: cmd.invoice_id,
            payment_id: cmd.payment_id,
            paid_amount,
            status,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// No-op unless the invoice is still open and strictly past due on `as_of`.
    fn handle_mark_overdue(&self, cmd: &MarkInvoiceOverdue) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_issued(cmd.invoice_id)?;
        if !self.status.is_overdue_candidate() || cmd.as_of <= self.due_date {
            return Ok(vec![]);
        }

        Ok(vec![InvoiceEvent::InvoiceMarkedOverdue(InvoiceMarkedOverdue {
            invoice_id: cmd.invoice_id,
            as_of: cmd.as_of,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_issued(cmd.invoice_id)?;
        match self.status {
            InvoiceStatus::Cancelled => Err(DomainError::state("invoice is already cancelled")),
            InvoiceStatus::Paid => Err(DomainError::state(
                "a paid invoice cannot be cancelled; remove its payments first",
            )),
            _ => Ok(vec![InvoiceEvent::InvoiceCancelled(InvoiceCancelled {
                invoice_id: cmd.invoice_id,
                reason: cmd.reason.clone(),
                occurred_at: cmd.occurred_at,
            })]),
        }
    }
}
