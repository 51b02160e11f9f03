//! Overdue scanner.

use chrono::{NaiveDate, Utc};
use serde::Serialize;

use levy_billing::{InvoiceCommand, InvoiceId, MarkInvoiceOverdue};

use super::{BillingServices, ServiceError};
use crate::projections::InvoiceReadModel;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverdueSweep {
    pub transitioned: Vec<InvoiceId>,
    pub failed: Vec<(InvoiceId, String)>,
}

impl OverdueSweep {
    pub fn count(&self) -> usize {
        self.transitioned.len()
    }
}

impl BillingServices {
    /// Move every open invoice whose due date lies before `today` to OVERDUE.
    ///
    /// The read model only nominates candidates; each invoice re-checks
    /// eligibility against its own stream, so one paid in the meantime is
    /// left alone. A failing invoice is reported and does not stop the sweep.
    pub fn mark_overdue_invoices(&self, today: NaiveDate) -> OverdueSweep {
        let candidates: Vec<InvoiceReadModel> = self
            .invoices
            .list()
            .into_iter()
            .filter(|rm| rm.status.is_overdue_candidate() && rm.due_date < today)
            .collect();

        let mut sweep = OverdueSweep::default();
        for candidate in candidates {
            let id = candidate.invoice_id;
            match self.transition_overdue(id, today) {
                Ok(true) => sweep.transitioned.push(id),
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(invoice_id = %id, error = %err, "overdue transition failed");
                    sweep.failed.push((id, err.to_string()));
                }
            }
        }

        tracing::info!(
            %today,
            transitioned = sweep.count(),
            failed = sweep.failed.len(),
            "overdue sweep finished"
        );
        sweep
    }

    /// Single-invoice overdue transition; StateError when not eligible.
    pub fn mark_overdue(&self, invoice_id: InvoiceId, today: NaiveDate) -> Result<InvoiceReadModel, ServiceError> {
        if !self.transition_overdue(invoice_id, today)? {
            let invoice = self.invoice(invoice_id)?;
            return Err(ServiceError::State(format!(
                "a {} invoice due {} cannot become overdue on {today}",
                invoice.status, invoice.due_date
            )));
        }
        self.invoice(invoice_id)
    }

    fn transition_overdue(&self, invoice_id: InvoiceId, today: NaiveDate) -> Result<bool, ServiceError> {
        let command = InvoiceCommand::MarkInvoiceOverdue(MarkInvoiceOverdue {
            invoice_id,
            as_of: today,
            occurred_at: Utc::now(),
        });
        let (_, changed) = self.execute_invoice(invoice_id, "mark_overdue", &command)?;
        Ok(changed)
    }
}
