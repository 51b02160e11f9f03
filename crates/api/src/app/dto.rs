use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};

use levy_billing::{Owner, Payment, PaymentType, Property, to_currency};
use levy_core::OwnerId;
use levy_infra::projections::{BillingReadModel, InvoiceReadModel, PaymentReadModel};
use levy_infra::services::{BatchReport, ImportReport, NewPayment, OverdueSweep};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateOwnerRequest {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl CreateOwnerRequest {
    pub fn into_owner(self) -> Owner {
        Owner {
            owner_id: OwnerId::new(),
            name: self.name,
            email: self.email,
            phone: self.phone,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePropertyRequest {
    pub number: u32,
    pub designation: String,
    pub share_ratio: Decimal,
    pub address: Option<String>,
    pub owner_id: OwnerId,
}

impl CreatePropertyRequest {
    pub fn into_property(self) -> Property {
        Property {
            property_id: levy_core::PropertyId::new(),
            number: self.number,
            designation: self.designation,
            share_ratio: self.share_ratio,
            address: self.address,
            owner_id: self.owner_id,
            active: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateBillingQuery {
    #[serde(rename = "generateInvoices", default)]
    pub generate_invoices: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceListQuery {
    pub status: Option<String>,
    pub property_id: Option<String>,
    pub billing_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: String,
    /// Reference date for an OVERDUE request; defaults to today.
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelInvoiceRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkOverdueQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub amount: Decimal,
    #[serde(rename = "type", default)]
    pub payment_type: PaymentType,
    pub payment_date: Option<NaiveDate>,
    pub reference: Option<String>,
}

impl PaymentRequest {
    pub fn into_new_payment(self, today: NaiveDate) -> NewPayment {
        NewPayment {
            amount: self.amount,
            payment_type: self.payment_type,
            payment_date: self.payment_date.unwrap_or(today),
            reference: self.reference,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OcrPaymentRequest {
    pub ocr: String,
    pub amount: Decimal,
    #[serde(rename = "type", default)]
    pub payment_type: PaymentType,
    pub payment_date: Option<NaiveDate>,
    pub reference: Option<String>,
}

impl OcrPaymentRequest {
    pub fn split(self, today: NaiveDate) -> (String, NewPayment) {
        let payment = NewPayment {
            amount: self.amount,
            payment_type: self.payment_type,
            payment_date: self.payment_date.unwrap_or(today),
            reference: self.reference,
        };
        (self.ocr, payment)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentListQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    #[serde(rename = "type")]
    pub payment_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub invoice_ids: Vec<String>,
    /// Client-chosen id, usable with the batch cancel endpoint.
    pub batch_id: Option<String>,
}

// -------------------------
// JSON mapping helpers
// -------------------------

/// Amounts travel as decimal strings with two decimals.
pub fn amount(value: Decimal) -> String {
    to_currency(value).to_string()
}

pub fn payment_to_json(payment: &Payment) -> Value {
    json!({
        "id": payment.payment_id.to_string(),
        "amount": amount(payment.amount),
        "type": payment.payment_type.as_str(),
        "payment_date": payment.payment_date,
        "reference": payment.reference,
        "registered_at": payment.registered_at.to_rfc3339(),
    })
}

pub fn payment_rm_to_json(rm: &PaymentReadModel) -> Value {
    let mut value = payment_to_json(&rm.payment);
    value["invoice_id"] = json!(rm.invoice_id.to_string());
    value
}

pub fn invoice_to_json(rm: &InvoiceReadModel) -> Value {
    json!({
        "id": rm.invoice_id.to_string(),
        "billing_id": rm.billing_id.to_string(),
        "property_id": rm.property_id.to_string(),
        "owner_id": rm.owner_id.to_string(),
        "invoice_number": rm.invoice_number,
        "ocr": rm.ocr.as_str(),
        "total_amount": amount(rm.total_amount),
        "paid_amount": amount(rm.paid_amount),
        "outstanding_amount": amount(rm.outstanding_amount()),
        "due_date": rm.due_date,
        "status": rm.status.as_str(),
        "sent": rm.sent,
        "payments": rm.payments.iter().map(payment_to_json).collect::<Vec<_>>(),
        "created_at": rm.created_at.to_rfc3339(),
        "updated_at": rm.updated_at.to_rfc3339(),
        "version": rm.version,
    })
}

pub fn billing_to_json(rm: &BillingReadModel) -> Value {
    let terms = &rm.terms;
    json!({
        "id": rm.billing_id.to_string(),
        "year": terms.year,
        "period": terms.period,
        "kind": terms.kind,
        "description": terms.description,
        "fee": terms.fee,
        "issue_date": terms.issue_date,
        "due_date": terms.due_date,
        "invoices_generated": rm.invoices_generated,
        "invoice_ids": rm.invoice_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        "created_at": rm.created_at.to_rfc3339(),
        "updated_at": rm.updated_at.to_rfc3339(),
        "version": rm.version,
    })
}

fn failures(failed: &[(levy_billing::InvoiceId, String)]) -> Vec<Value> {
    failed
        .iter()
        .map(|(id, reason)| json!({ "invoice_id": id.to_string(), "reason": reason }))
        .collect()
}

fn ids(ids: &[levy_billing::InvoiceId]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

pub fn overdue_sweep_to_json(sweep: &OverdueSweep) -> Value {
    json!({
        "count": sweep.count(),
        "transitioned": ids(&sweep.transitioned),
        "failed": failures(&sweep.failed),
    })
}

/// `completed_key` names the success bucket: `sent` for reminders,
/// `exported` for PDF exports.
pub fn batch_report_to_json(batch_id: &str, report: &BatchReport, completed_key: &str) -> Value {
    let mut value = json!({
        "batch_id": batch_id,
        "skipped": ids(&report.skipped),
        "failed": failures(&report.failed),
        "cancelled": ids(&report.cancelled),
    });
    value[completed_key] = json!(ids(&report.completed));
    value
}

pub fn import_report_to_json(report: &ImportReport) -> Value {
    json!({
        "total": report.total(),
        "accepted": report
            .accepted
            .iter()
            .map(|(row, payment)| json!({ "line": row.line, "payment": payment_rm_to_json(payment) }))
            .collect::<Vec<_>>(),
        "rejected": report
            .rejected
            .iter()
            .map(|r| json!({ "line": r.row.line, "raw": r.row.raw, "reason": r.reason }))
            .collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_always_carry_two_decimals() {
        assert_eq!(amount(Decimal::new(1200, 0)), "1200.00");
        assert_eq!(amount(Decimal::new(3335, 1)), "333.50");
    }

    #[test]
    fn payment_request_defaults_type_and_date() {
        let body: PaymentRequest = serde_json::from_value(json!({ "amount": "500.00" })).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 1, 20).unwrap();
        let payment = body.into_new_payment(today);
        assert_eq!(payment.payment_type, PaymentType::Bankgiro);
        assert_eq!(payment.payment_date, today);
        assert_eq!(payment.amount, Decimal::new(50000, 2));
    }

    #[test]
    fn payment_type_is_read_from_the_type_field() {
        let body: PaymentRequest =
            serde_json::from_value(json!({ "amount": "10", "type": "SWISH", "payment_date": "2024-01-05" })).unwrap();
        assert_eq!(body.payment_type, PaymentType::Swish);
    }
}
