//! Payment ledger: register, correct and remove payments.
//!
//! The paid amount and status are re-derived inside the invoice aggregate,
//! so each payment change and its status change commit as one event.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

use levy_billing::{
    DeletePayment, InvoiceCommand, InvoiceId, OcrNumber, Payment, PaymentType, RegisterPayment, UpdatePayment,
};
use levy_core::PaymentId;

use super::{BillingServices, ServiceError};
use crate::projections::{InvoiceReadModel, PaymentFilter, PaymentReadModel};

/// Payment details as entered by a treasurer or read from a bank file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub amount: Decimal,
    pub payment_type: PaymentType,
    pub payment_date: NaiveDate,
    pub reference: Option<String>,
}

impl BillingServices {
    pub fn register_payment(&self, invoice_id: InvoiceId, payment: NewPayment) -> Result<PaymentReadModel, ServiceError> {
        let payment_id = PaymentId::new();
        let command = InvoiceCommand::RegisterPayment(RegisterPayment {
            invoice_id,
            payment_id,
            amount: payment.amount,
            payment_type: payment.payment_type,
            payment_date: payment.payment_date,
            reference: payment.reference,
            policy: self.config.overpayment,
            occurred_at: Utc::now(),
        });
        let (invoice, _) = self.execute_invoice(invoice_id, "register_payment", &command)?;
        tracing::info!(
            invoice_id = %invoice_id,
            payment_id = %payment_id,
            status = %invoice.status,
            "payment registered"
        );
        self.payment(payment_id)
    }

    /// The OCR checksum is verified before any lookup.
    pub fn register_payment_by_ocr(&self, ocr: &str, payment: NewPayment) -> Result<PaymentReadModel, ServiceError> {
        let ocr = OcrNumber::parse(ocr)?;
        let invoice = self
            .invoices
            .find_by_ocr(&ocr)
            .ok_or_else(|| ServiceError::not_found(format!("invoice with OCR {ocr}")))?;
        self.register_payment(invoice.invoice_id, payment)
    }

    pub fn update_payment(&self, payment_id: PaymentId, payment: NewPayment) -> Result<PaymentReadModel, ServiceError> {
        let owner = self.payment(payment_id)?;
        let command = InvoiceCommand::UpdatePayment(UpdatePayment {
            invoice_id: owner.invoice_id,
            payment_id,
            amount: payment.amount,
            payment_type: payment.payment_type,
            payment_date: payment.payment_date,
            reference: payment.reference,
            policy: self.config.overpayment,
            occurred_at: Utc::now(),
        });
        self.execute_invoice(owner.invoice_id, "update_payment", &command)?;
        self.payment(payment_id)
    }

    /// Returns the invoice as it stands without the payment.
    pub fn delete_payment(&self, payment_id: PaymentId) -> Result<InvoiceReadModel, ServiceError> {
        let owner = self.payment(payment_id)?;
        let command = InvoiceCommand::DeletePayment(DeletePayment {
            invoice_id: owner.invoice_id,
            payment_id,
            occurred_at: Utc::now(),
        });
        let (invoice, _) = self.execute_invoice(owner.invoice_id, "delete_payment", &command)?;
        tracing::info!(
            invoice_id = %owner.invoice_id,
            payment_id = %payment_id,
            status = %invoice.status,
            "payment deleted"
        );
        Ok(invoice)
    }

    pub fn payment(&self, payment_id: PaymentId) -> Result<PaymentReadModel, ServiceError> {
        self.invoices
            .payment(&payment_id)
            .ok_or_else(|| ServiceError::not_found(format!("payment {payment_id}")))
    }

    pub fn invoice_payments(&self, invoice_id: InvoiceId) -> Result<Vec<Payment>, ServiceError> {
        Ok(self.invoice(invoice_id)?.payments)
    }

    pub fn payments(&self, filter: &PaymentFilter) -> Vec<PaymentReadModel> {
        self.invoices.payments(filter)
    }
}
