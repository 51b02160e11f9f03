//! Invoice lifecycle operations and invoice queries.

use chrono::{NaiveDate, Utc};

use levy_billing::{
    CancelInvoice, InvoiceCommand, InvoiceId, InvoiceStatus, MarkInvoiceSent, OcrNumber,
};

use super::{BillingServices, ServiceError};
use crate::projections::{InvoiceFilter, InvoiceReadModel};

impl BillingServices {
    /// `CREATED -> SENT`. Open invoices in other states only record the flag.
    pub fn mark_as_sent(&self, invoice_id: InvoiceId) -> Result<InvoiceReadModel, ServiceError> {
        let command = InvoiceCommand::MarkInvoiceSent(MarkInvoiceSent {
            invoice_id,
            occurred_at: Utc::now(),
        });
        let (invoice, changed) = self.execute_invoice(invoice_id, "mark_as_sent", &command)?;
        if changed {
            tracing::info!(invoice_id = %invoice_id, status = %invoice.status, "invoice marked as sent");
        }
        Ok(invoice)
    }

    pub fn cancel(&self, invoice_id: InvoiceId, reason: Option<String>) -> Result<InvoiceReadModel, ServiceError> {
        let command = InvoiceCommand::CancelInvoice(CancelInvoice {
            invoice_id,
            reason,
            occurred_at: Utc::now(),
        });
        let (invoice, _) = self.execute_invoice(invoice_id, "cancel_invoice", &command)?;
        tracing::info!(invoice_id = %invoice_id, "invoice cancelled");
        Ok(invoice)
    }

    /// Explicit status change. Only transitions with a command behind them
    /// can be requested; payment-derived states cannot.
    pub fn set_status(
        &self,
        invoice_id: InvoiceId,
        target: InvoiceStatus,
        today: NaiveDate,
    ) -> Result<InvoiceReadModel, ServiceError> {
        let current = self.invoice(invoice_id)?;
        if current.status == target {
            return Ok(current);
        }

        match target {
            InvoiceStatus::Sent => self.mark_as_sent(invoice_id),
            InvoiceStatus::Cancelled => self.cancel(invoice_id, None),
            InvoiceStatus::Overdue => self.mark_overdue(invoice_id, today),
            InvoiceStatus::Created | InvoiceStatus::PartiallyPaid | InvoiceStatus::Paid => {
                Err(ServiceError::State(format!(
                    "{target} is derived from payments and cannot be set directly"
                )))
            }
        }
    }

    pub fn invoices(&self, filter: &InvoiceFilter) -> Vec<InvoiceReadModel> {
        self.invoices.query(filter)
    }

    pub fn invoice_by_ocr(&self, ocr: &str) -> Result<InvoiceReadModel, ServiceError> {
        let ocr = OcrNumber::parse(ocr)?;
        self.invoices
            .find_by_ocr(&ocr)
            .ok_or_else(|| ServiceError::not_found(format!("invoice with OCR {ocr}")))
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::services::NewPayment;
    use levy_billing::PaymentType;

    #[test]
    fn sending_moves_created_to_sent_once() {
        let (services, invoices) = generated(1);
        let id = invoices[0].invoice_id;

        let sent = services.mark_as_sent(id).unwrap();
        assert_eq!(sent.status, InvoiceStatus::Sent);
        assert!(sent.sent);

        let again = services.mark_as_sent(id).unwrap();
        assert_eq!(again.version, sent.version);
    }

    #[test]
    fn sending_a_partially_paid_invoice_keeps_its_status() {
        let (services, invoices) = generated(1);
        let id = invoices[0].invoice_id;
        services
            .register_payment(
                id,
                NewPayment {
                    amount: kr(100),
                    payment_type: PaymentType::Swish,
                    payment_date: date(2024, 1, 15),
                    reference: None,
                },
            )
            .unwrap();

        let invoice = services.mark_as_sent(id).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::PartiallyPaid);
        assert!(invoice.sent);
    }

    #[test]
    fn cancelled_is_terminal() {
        let (services, invoices) = generated(1);
        let id = invoices[0].invoice_id;

        services.cancel(id, None).unwrap();
        assert!(matches!(services.cancel(id, None), Err(ServiceError::State(_))));
        assert!(matches!(services.mark_as_sent(id), Err(ServiceError::State(_))));
        assert_eq!(services.invoice(id).unwrap().status, InvoiceStatus::Cancelled);
    }

    #[test]
    fn set_status_routes_to_lifecycle_commands() {
        let (services, invoices) = generated(2);
        let (a, b) = (invoices[0].invoice_id, invoices[1].invoice_id);
        let today = date(2024, 1, 10);

        assert_eq!(services.set_status(a, InvoiceStatus::Sent, today).unwrap().status, InvoiceStatus::Sent);
        assert!(matches!(
            services.set_status(a, InvoiceStatus::Paid, today),
            Err(ServiceError::State(_))
        ));
        // not yet due
        assert!(matches!(
            services.set_status(b, InvoiceStatus::Overdue, today),
            Err(ServiceError::State(_))
        ));
        assert_eq!(
            services.set_status(b, InvoiceStatus::Overdue, date(2024, 2, 2)).unwrap().status,
            InvoiceStatus::Overdue
        );
        assert_eq!(
            services.set_status(b, InvoiceStatus::Cancelled, today).unwrap().status,
            InvoiceStatus::Cancelled
        );
        // setting the current status is a no-op
        assert!(services.set_status(b, InvoiceStatus::Cancelled, today).is_ok());
    }

    #[test]
    fn invoices_can_be_found_by_ocr_and_filtered() {
        let (services, invoices) = generated(2);
        let found = services.invoice_by_ocr(invoices[1].ocr.as_str()).unwrap();
        assert_eq!(found.invoice_id, invoices[1].invoice_id);
        assert!(matches!(services.invoice_by_ocr("12345"), Err(ServiceError::Validation(_))));

        services.mark_as_sent(invoices[0].invoice_id).unwrap();
        let sent = services.invoices(&InvoiceFilter {
            status: Some(InvoiceStatus::Sent),
            ..InvoiceFilter::default()
        });
        assert_eq!(sent.len(), 1);
        let by_property = services.invoices(&InvoiceFilter {
            property_id: Some(invoices[1].property_id),
            ..InvoiceFilter::default()
        });
        assert_eq!(by_property.len(), 1);
    }
}
