use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use levy_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use levy_events::Event;

use crate::invoice::InvoiceId;
use crate::money::FeeSchedule;

/// Billing run identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BillingId(pub AggregateId);

impl BillingId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BillingId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for BillingId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(AggregateId::from_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingKind {
    AnnualFee,
    ExtraCharge,
    Other,
}

/// Editable terms of a billing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingTerms {
    pub year: i32,
    pub period: u32,
    pub kind: BillingKind,
    pub description: String,
    pub fee: FeeSchedule,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
}

impl BillingTerms {
    pub fn validate(&self) -> Result<(), DomainError> {
        if !(2000..=2099).contains(&self.year) {
            return Err(DomainError::validation(format!(
                "billing year {} is out of range (2000..=2099)",
                self.year
            )));
        }
        if self.period == 0 {
            return Err(DomainError::validation("billing period starts at 1"));
        }
        if self.description.trim().is_empty() {
            return Err(DomainError::validation("billing description must not be empty"));
        }
        if self.due_date < self.issue_date {
            return Err(DomainError::validation("due date must not precede the issue date"));
        }
        self.fee.validate()
    }
}

/// Aggregate root: Billing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Billing {
    id: BillingId,
    terms: Option<BillingTerms>,
    invoice_ids: Vec<InvoiceId>,
    invoices_generated: bool,
    deleted: bool,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
}

impl Billing {
    pub fn empty(id: BillingId) -> Self {
        Self {
            id,
            terms: None,
            invoice_ids: Vec::new(),
            invoices_generated: false,
            deleted: false,
            created_at: None,
            updated_at: None,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> BillingId {
        self.id
    }

    /// Created and not deleted.
    pub fn exists(&self) -> bool {
        self.terms.is_some() && !self.deleted
    }

    pub fn terms(&self) -> Option<&BillingTerms> {
        self.terms.as_ref()
    }

    pub fn invoice_ids(&self) -> &[InvoiceId] {
        &self.invoice_ids
    }

    pub fn invoices_generated(&self) -> bool {
        self.invoices_generated
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl AggregateRoot for Billing {
    type Id = BillingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBilling {
    pub billing_id: BillingId,
    pub terms: BillingTerms,
    pub occurred_at: DateTime<Utc>,
}

/// Replaces the terms wholesale; the service merges partial edits first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBilling {
    pub billing_id: BillingId,
    pub terms: BillingTerms,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordInvoicesGenerated {
    pub billing_id: BillingId,
    pub invoice_ids: Vec<InvoiceId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteBilling {
    pub billing_id: BillingId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingCommand {
    CreateBilling(CreateBilling),
    UpdateBilling(UpdateBilling),
    RecordInvoicesGenerated(RecordInvoicesGenerated),
    DeleteBilling(DeleteBilling),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingCreated {
    pub billing_id: BillingId,
    pub terms: BillingTerms,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingUpdated {
    pub billing_id: BillingId,
    pub terms: BillingTerms,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicesGenerated {
    pub billing_id: BillingId,
    pub invoice_ids: Vec<InvoiceId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingDeleted {
    pub billing_id: BillingId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingEvent {
    BillingCreated(BillingCreated),
    BillingUpdated(BillingUpdated),
    InvoicesGenerated(InvoicesGenerated),
    BillingDeleted(BillingDeleted),
}

impl BillingEvent {
    pub fn billing_id(&self) -> BillingId {
        match self {
            BillingEvent::BillingCreated(e) => e.billing_id,
            BillingEvent::BillingUpdated(e) => e.billing_id,
            BillingEvent::InvoicesGenerated(e) => e.billing_id,
            BillingEvent::BillingDeleted(e) => e.billing_id,
        }
    }
}

impl Event for BillingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BillingEvent::BillingCreated(_) => "billing.billing.created",
            BillingEvent::BillingUpdated(_) => "billing.billing.updated",
            BillingEvent::InvoicesGenerated(_) => "billing.billing.invoices_generated",
            BillingEvent::BillingDeleted(_) => "billing.billing.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BillingEvent::BillingCreated(e) => e.occurred_at,
            BillingEvent::BillingUpdated(e) => e.occurred_at,
            BillingEvent::InvoicesGenerated(e) => e.occurred_at,
            BillingEvent::BillingDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Billing {
    type Command = BillingCommand;
    type Event = BillingEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BillingEvent::BillingCreated(e) => {
                self.id = e.billing_id;
                self.terms = Some(e.terms.clone());
                self.created_at = Some(e.occurred_at);
            }
            BillingEvent::BillingUpdated(e) => {
                self.terms = Some(e.terms.clone());
            }
            BillingEvent::InvoicesGenerated(e) => {
                self.invoice_ids = e.invoice_ids.clone();
                self.invoices_generated = true;
            }
            BillingEvent::BillingDeleted(_) => {
                self.deleted = true;
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BillingCommand::CreateBilling(cmd) => self.handle_create(cmd),
            BillingCommand::UpdateBilling(cmd) => self.handle_update(cmd),
            BillingCommand::RecordInvoicesGenerated(cmd) => self.handle_record_generated(cmd),
            BillingCommand::DeleteBilling(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Billing {
    fn ensure_mutable(&self, billing_id: BillingId, action: &str) -> Result<(), DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found(format!("billing {billing_id}")));
        }
        if self.id != billing_id {
            return Err(DomainError::invariant("billing_id mismatch"));
        }
        if self.invoices_generated {
            return Err(DomainError::state(format!(
                "cannot {action} a billing whose invoices have been generated"
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateBilling) -> Result<Vec<BillingEvent>, DomainError> {
        if self.terms.is_some() {
            return Err(DomainError::conflict("billing already exists"));
        }
        cmd.terms.validate()?;

        Ok(vec![BillingEvent::BillingCreated(BillingCreated {
            billing_id: cmd.billing_id,
            terms: cmd.terms.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateBilling) -> Result<Vec<BillingEvent>, DomainError> {
        self.ensure_mutable(cmd.billing_id, "edit")?;
        cmd.terms.validate()?;
        if self.terms.as_ref() == Some(&cmd.terms) {
            return Ok(vec![]);
        }

        Ok(vec![BillingEvent::BillingUpdated(BillingUpdated {
            billing_id: cmd.billing_id,
            terms: cmd.terms.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_generated(
        &self,
        cmd: &RecordInvoicesGenerated,
    ) -> Result<Vec<BillingEvent>, DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found(format!("billing {}", cmd.billing_id)));
        }
        if self.invoices_generated {
            return Err(DomainError::conflict("invoices have already been generated for this billing"));
        }
        if cmd.invoice_ids.is_empty() {
            return Err(DomainError::validation("a billing run must produce at least one invoice"));
        }

        Ok(vec![BillingEvent::InvoicesGenerated(InvoicesGenerated {
            billing_id: cmd.billing_id,
            invoice_ids: cmd.invoice_ids.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteBilling) -> Result<Vec<BillingEvent>, DomainError> {
        self.ensure_mutable(cmd.billing_id, "delete")?;

        Ok(vec![BillingEvent::BillingDeleted(BillingDeleted {
            billing_id: cmd.billing_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use levy_events::execute;
    use rust_decimal::Decimal;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap()
    }

    fn terms() -> BillingTerms {
        BillingTerms {
            year: 2024,
            period: 1,
            kind: BillingKind::AnnualFee,
            description: "Årsavgift 2024".to_string(),
            fee: FeeSchedule::Flat { amount: Decimal::new(120000, 2) },
            issue_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        }
    }

    fn created() -> Billing {
        let billing_id = BillingId::new(AggregateId::new());
        let mut billing = Billing::empty(billing_id);
        let cmd = BillingCommand::CreateBilling(CreateBilling { billing_id, terms: terms(), occurred_at: now() });
        execute(&mut billing, &cmd).unwrap();
        billing
    }

    fn generated(billing: &mut Billing) {
        let cmd = BillingCommand::RecordInvoicesGenerated(RecordInvoicesGenerated {
            billing_id: billing.id_typed(),
            invoice_ids: vec![InvoiceId::new(AggregateId::new())],
            occurred_at: now(),
        });
        execute(billing, &cmd).unwrap();
    }

    #[test]
    fn create_validates_terms() {
        let billing = Billing::empty(BillingId::new(AggregateId::new()));
        let mut bad = terms();
        bad.due_date = NaiveDate::from_ymd_opt(2023, 12, 1).unwrap();
        let cmd = BillingCommand::CreateBilling(CreateBilling {
            billing_id: billing.id_typed(),
            terms: bad,
            occurred_at: now(),
        });
        match billing.handle(&cmd).unwrap_err() {
            DomainError::Validation(msg) if msg.contains("due date") => {}
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn generation_is_recorded_once() {
        let mut billing = created();
        generated(&mut billing);
        assert!(billing.invoices_generated());
        assert_eq!(billing.invoice_ids().len(), 1);

        let again = BillingCommand::RecordInvoicesGenerated(RecordInvoicesGenerated {
            billing_id: billing.id_typed(),
            invoice_ids: vec![InvoiceId::new(AggregateId::new())],
            occurred_at: now(),
        });
        assert!(matches!(billing.handle(&again), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn generated_billing_is_immutable() {
        let mut billing = created();
        generated(&mut billing);

        let mut edited = terms();
        edited.description = "changed".to_string();
        let update = BillingCommand::UpdateBilling(UpdateBilling {
            billing_id: billing.id_typed(),
            terms: edited,
            occurred_at: now(),
        });
        match billing.handle(&update).unwrap_err() {
            DomainError::State(msg) if msg.contains("cannot edit") => {}
            other => panic!("expected state error, got {other:?}"),
        }

        let delete = BillingCommand::DeleteBilling(DeleteBilling { billing_id: billing.id_typed(), occurred_at: now() });
        assert!(matches!(billing.handle(&delete), Err(DomainError::State(_))));
    }

    #[test]
    fn deleted_billing_no_longer_exists() {
        let mut billing = created();
        let delete = BillingCommand::DeleteBilling(DeleteBilling { billing_id: billing.id_typed(), occurred_at: now() });
        execute(&mut billing, &delete).unwrap();
        assert!(!billing.exists());
        assert!(matches!(billing.handle(&delete), Err(DomainError::NotFound(_))));
    }

    #[test]
    fn unchanged_update_is_a_no_op() {
        let billing = created();
        let update = BillingCommand::UpdateBilling(UpdateBilling {
            billing_id: billing.id_typed(),
            terms: terms(),
            occurred_at: now(),
        });
        assert!(billing.handle(&update).unwrap().is_empty());
    }
}
