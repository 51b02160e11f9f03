//! Billing runs: create, edit, delete and expand into invoices.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use levy_billing::{
    Billing, BillingCommand, BillingId, BillingKind, BillingTerms, CreateBilling, DeleteBilling,
    FeeSchedule, Invoice, InvoiceCommand, InvoiceId, IssueInvoice, OcrNumber, RecordInvoicesGenerated,
    UpdateBilling, format_invoice_number,
};
use levy_core::AggregateId;

use super::{BillingServices, ServiceError};
use crate::command_dispatcher::{PendingStream, StreamCommit};
use crate::projections::billings::BILLING_AGGREGATE_TYPE;
use crate::projections::invoices::INVOICE_AGGREGATE_TYPE;
use crate::projections::{BillingReadModel, InvoiceFilter, InvoiceReadModel};

/// Partial edit of a billing's terms; absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BillingChanges {
    pub year: Option<i32>,
    pub period: Option<u32>,
    pub kind: Option<BillingKind>,
    pub description: Option<String>,
    pub fee: Option<FeeSchedule>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
}

impl BillingChanges {
    pub fn apply_to(&self, terms: &BillingTerms) -> BillingTerms {
        BillingTerms {
            year: self.year.unwrap_or(terms.year),
            period: self.period.unwrap_or(terms.period),
            kind: self.kind.unwrap_or(terms.kind),
            description: self.description.clone().unwrap_or_else(|| terms.description.clone()),
            fee: self.fee.clone().unwrap_or_else(|| terms.fee.clone()),
            issue_date: self.issue_date.unwrap_or(terms.issue_date),
            due_date: self.due_date.unwrap_or(terms.due_date),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub billing: BillingReadModel,
    pub invoices: Vec<InvoiceReadModel>,
}

impl BillingServices {
    /// Create a billing run, optionally generating its invoices in the same
    /// commit.
    pub fn create_billing(&self, terms: BillingTerms, generate_invoices: bool) -> Result<BillingReadModel, ServiceError> {
        terms.validate()?;
        let _guard = self.lock_generation()?;

        if self.billings.find_by_period(terms.year, terms.period).is_some() {
            return Err(ServiceError::Conflict(format!(
                "a billing for {} period {} already exists",
                terms.year, terms.period
            )));
        }

        let billing_id = BillingId::new(AggregateId::new());
        let mut billing = self.open_billing(billing_id)?;
        billing.execute(&BillingCommand::CreateBilling(CreateBilling {
            billing_id,
            terms: terms.clone(),
            occurred_at: Utc::now(),
        }))?;

        let mut commits = if generate_invoices {
            self.stage_invoices(&mut billing, &terms)?
        } else {
            Vec::new()
        };
        let invoice_count = commits.len();
        commits.push(billing.into_commit());
        self.commit(commits)?;

        tracing::info!(
            billing_id = %billing_id,
            year = terms.year,
            period = terms.period,
            invoices = invoice_count,
            "billing created"
        );
        self.billing(billing_id)
    }

    /// Expand a billing into one invoice per active property. Generating a
    /// second time is a conflict and creates nothing.
    pub fn generate_invoices(&self, billing_id: BillingId) -> Result<GenerationReport, ServiceError> {
        let _guard = self.lock_generation()?;

        let mut billing = self.open_billing(billing_id)?;
        let terms = billing
            .aggregate()
            .terms()
            .filter(|_| billing.aggregate().exists())
            .cloned()
            .ok_or_else(|| ServiceError::not_found(format!("billing {billing_id}")))?;
        if billing.aggregate().invoices_generated() || !self.invoices_of(billing_id).is_empty() {
            return Err(ServiceError::Conflict(format!(
                "invoices have already been generated for billing {billing_id}"
            )));
        }

        let mut commits = self.stage_invoices(&mut billing, &terms)?;
        commits.push(billing.into_commit());
        self.commit(commits)?;

        let invoices = self.invoices_of(billing_id);
        tracing::info!(billing_id = %billing_id, invoices = invoices.len(), "invoices generated");
        Ok(GenerationReport {
            billing: self.billing(billing_id)?,
            invoices,
        })
    }

    pub fn update_billing(&self, billing_id: BillingId, changes: &BillingChanges) -> Result<BillingReadModel, ServiceError> {
        let _guard = self.lock_generation()?;

        let mut billing = self.open_billing(billing_id)?;
        let current = billing
            .aggregate()
            .terms()
            .filter(|_| billing.aggregate().exists())
            .cloned()
            .ok_or_else(|| ServiceError::not_found(format!("billing {billing_id}")))?;
        let terms = changes.apply_to(&current);

        if let Some(other) = self.billings.find_by_period(terms.year, terms.period) {
            if other.billing_id != billing_id {
                return Err(ServiceError::Conflict(format!(
                    "a billing for {} period {} already exists",
                    terms.year, terms.period
                )));
            }
        }

        billing.execute(&BillingCommand::UpdateBilling(UpdateBilling {
            billing_id,
            terms,
            occurred_at: Utc::now(),
        }))?;
        self.commit(vec![billing.into_commit()])?;
        self.billing(billing_id)
    }

    pub fn delete_billing(&self, billing_id: BillingId) -> Result<(), ServiceError> {
        let _guard = self.lock_generation()?;

        let mut billing = self.open_billing(billing_id)?;
        billing.execute(&BillingCommand::DeleteBilling(DeleteBilling {
            billing_id,
            occurred_at: Utc::now(),
        }))?;
        self.commit(vec![billing.into_commit()])?;
        tracing::info!(billing_id = %billing_id, "billing deleted");
        Ok(())
    }

    pub fn billing(&self, billing_id: BillingId) -> Result<BillingReadModel, ServiceError> {
        self.billings
            .get(&billing_id)
            .ok_or_else(|| ServiceError::not_found(format!("billing {billing_id}")))
    }

    pub fn billings(&self) -> Vec<BillingReadModel> {
        self.billings.list()
    }

    pub fn billing_invoices(&self, billing_id: BillingId) -> Result<Vec<InvoiceReadModel>, ServiceError> {
        self.billing(billing_id)?;
        Ok(self.invoices_of(billing_id))
    }

    fn invoices_of(&self, billing_id: BillingId) -> Vec<InvoiceReadModel> {
        self.invoices.query(&InvoiceFilter {
            billing_id: Some(billing_id),
            ..InvoiceFilter::default()
        })
    }

    fn open_billing(&self, billing_id: BillingId) -> Result<PendingStream<Billing>, ServiceError> {
        Ok(self
            .dispatcher
            .open(billing_id.0, BILLING_AGGREGATE_TYPE, |id| Billing::empty(BillingId::new(id)))?)
    }

    /// Serializes generation with directory changes that depend on it.
    pub(super) fn lock_generation(&self) -> Result<std::sync::MutexGuard<'_, ()>, ServiceError> {
        self.generation
            .lock()
            .map_err(|_| ServiceError::Internal("generation lock poisoned".to_string()))
    }

    /// Stage one issued invoice per active property and record them on the
    /// billing. Nothing is written; the caller commits everything at once.
    fn stage_invoices(
        &self,
        billing: &mut PendingStream<Billing>,
        terms: &BillingTerms,
    ) -> Result<Vec<StreamCommit>, ServiceError> {
        let properties = self.directory.active_properties();
        if properties.is_empty() {
            return Err(ServiceError::Validation("no active property to bill".to_string()));
        }
        let total_shares: Decimal = properties.iter().map(|p| p.share_ratio).sum();

        let billing_id = billing.aggregate().id_typed();
        let occurred_at = Utc::now();
        let mut serial = self.invoices.last_serial(terms.year);
        let mut commits = Vec::with_capacity(properties.len() + 1);
        let mut invoice_ids = Vec::with_capacity(properties.len());

        for property in &properties {
            let amount = terms.fee.amount_for(property.share_ratio, total_shares)?;
            if amount <= Decimal::ZERO {
                return Err(ServiceError::Validation(format!(
                    "property {} would be billed {amount}",
                    property.number
                )));
            }

            serial += 1;
            let ocr = OcrNumber::generate(terms.year, property.number, serial)?;
            if self.invoices.find_by_ocr(&ocr).is_some() {
                return Err(ServiceError::Conflict(format!("OCR number {ocr} is already in use")));
            }

            let invoice_id = InvoiceId::new(AggregateId::new());
            let mut invoice = self
                .dispatcher
                .open(invoice_id.0, INVOICE_AGGREGATE_TYPE, |id| Invoice::empty(InvoiceId::new(id)))?;
            invoice.execute(&InvoiceCommand::IssueInvoice(IssueInvoice {
                invoice_id,
                billing_id,
                property_id: property.property_id,
                owner_id: property.owner_id,
                invoice_number: format_invoice_number(terms.year, serial),
                ocr,
                amount,
                due_date: terms.due_date,
                occurred_at,
            }))?;
            commits.push(invoice.into_commit());
            invoice_ids.push(invoice_id);
        }

        billing.execute(&BillingCommand::RecordInvoicesGenerated(RecordInvoicesGenerated {
            billing_id,
            invoice_ids,
            occurred_at,
        }))?;
        Ok(commits)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use levy_billing::{InvoiceStatus, ocr};
    use std::collections::HashSet;

    #[test]
    fn generation_issues_one_created_invoice_per_property() {
        let (services, invoices) = generated(3);
        assert_eq!(invoices.len(), 3);

        let numbers: Vec<&str> = invoices.iter().map(|i| i.invoice_number.as_str()).collect();
        assert_eq!(numbers, vec!["2024-1", "2024-2", "2024-3"]);
        for invoice in &invoices {
            assert_eq!(invoice.status, InvoiceStatus::Created);
            assert_eq!(invoice.total_amount, kr(1200));
            assert_eq!(invoice.due_date, date(2024, 2, 1));
            assert!(ocr::is_valid(invoice.ocr.as_str()));
        }
        assert_eq!(invoices[0].ocr.as_str(), "24000100016");

        let billing = services.billing(invoices[0].billing_id).unwrap();
        assert!(billing.invoices_generated);
        assert_eq!(billing.invoice_ids.len(), 3);
    }

    #[test]
    fn generating_twice_is_a_conflict_and_creates_nothing() {
        let (services, invoices) = generated(2);
        let billing_id = invoices[0].billing_id;

        let err = services.generate_invoices(billing_id).unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let all = services.billing_invoices(billing_id).unwrap();
        let properties: HashSet<_> = all.iter().map(|i| i.property_id).collect();
        assert_eq!(all.len(), 2);
        assert_eq!(properties.len(), 2);
    }

    #[test]
    fn separate_generation_continues_the_yearly_serial() {
        let services = seeded(2);
        let first = services.create_billing(annual_fee_2024(), false).unwrap();
        let report = services.generate_invoices(first.billing_id).unwrap();
        assert_eq!(report.invoices.len(), 2);

        let extra = BillingTerms {
            period: 2,
            kind: BillingKind::ExtraCharge,
            description: "Vägunderhåll".to_string(),
            ..annual_fee_2024()
        };
        let second = services.create_billing(extra, true).unwrap();
        let numbers: Vec<String> = services
            .billing_invoices(second.billing_id)
            .unwrap()
            .into_iter()
            .map(|i| i.invoice_number)
            .collect();
        assert_eq!(numbers, vec!["2024-3", "2024-4"]);
    }

    #[test]
    fn shared_fee_is_split_by_share_ratio() {
        let services = seeded(0);
        let dir = services.directory();
        let owner = dir
            .add_owner(levy_billing::Owner {
                owner_id: levy_core::OwnerId::new(),
                name: "Anna".to_string(),
                email: None,
                phone: None,
            })
            .unwrap();
        for (number, share) in [(1, Decimal::ONE), (2, Decimal::TWO)] {
            dir.add_property(levy_billing::Property {
                property_id: levy_core::PropertyId::new(),
                number,
                designation: format!("Ängen 1:{number}"),
                share_ratio: share,
                address: None,
                owner_id: owner.owner_id,
                active: true,
            })
            .unwrap();
        }

        let terms = BillingTerms {
            fee: FeeSchedule::Shared { total: kr(1000) },
            ..annual_fee_2024()
        };
        let billing = services.create_billing(terms, true).unwrap();
        let amounts: Vec<Decimal> = services
            .billing_invoices(billing.billing_id)
            .unwrap()
            .iter()
            .map(|i| i.total_amount)
            .collect();
        assert_eq!(amounts, vec![kr(333), kr(667)]);
    }

    #[test]
    fn failed_generation_commits_nothing() {
        let services = seeded(0);
        let err = services.create_billing(annual_fee_2024(), true).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(services.billings().is_empty());
        assert!(services.invoice_projection().list().is_empty());
    }

    #[test]
    fn duplicate_period_is_a_conflict() {
        let services = seeded(1);
        services.create_billing(annual_fee_2024(), false).unwrap();
        let err = services.create_billing(annual_fee_2024(), false).unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[test]
    fn generated_billings_are_frozen() {
        let (services, invoices) = generated(1);
        let billing_id = invoices[0].billing_id;

        let changes = BillingChanges {
            description: Some("Ny text".to_string()),
            ..BillingChanges::default()
        };
        assert!(matches!(services.update_billing(billing_id, &changes), Err(ServiceError::State(_))));
        assert!(matches!(services.delete_billing(billing_id), Err(ServiceError::State(_))));
    }

    #[test]
    fn update_merges_changes_and_guards_the_period() {
        let services = seeded(1);
        let first = services.create_billing(annual_fee_2024(), false).unwrap();
        let second = services
            .create_billing(BillingTerms { period: 2, ..annual_fee_2024() }, false)
            .unwrap();

        let clash = BillingChanges { period: Some(1), ..BillingChanges::default() };
        assert!(matches!(
            services.update_billing(second.billing_id, &clash),
            Err(ServiceError::Conflict(_))
        ));

        let edit = BillingChanges {
            description: Some("Årsavgift 2024 (rev)".to_string()),
            ..BillingChanges::default()
        };
        let updated = services.update_billing(first.billing_id, &edit).unwrap();
        assert_eq!(updated.terms.description, "Årsavgift 2024 (rev)");
        assert_eq!(updated.terms.fee, annual_fee_2024().fee);

        services.delete_billing(first.billing_id).unwrap();
        assert!(matches!(services.billing(first.billing_id), Err(ServiceError::NotFound(_))));
        assert_eq!(services.billings().len(), 1);
    }
}
