//! Billing domain (event-sourced).
//!
//! Invoices, payments and billing runs for a property association,
//! implemented as deterministic domain logic: no IO, no HTTP, no storage.

pub mod billing;
pub mod directory;
pub mod invoice;
pub mod money;
pub mod ocr;
pub mod payment;
pub mod status;

pub use billing::{
    Billing, BillingCommand, BillingCreated, BillingDeleted, BillingEvent, BillingId, BillingKind,
    BillingTerms, BillingUpdated, CreateBilling, DeleteBilling, InvoicesGenerated, RecordInvoicesGenerated,
    UpdateBilling,
};
pub use directory::{Association, Owner, Property, PropertyDeletionPolicy};
pub use invoice::{
    CancelInvoice, DeletePayment, Invoice, InvoiceCancelled, InvoiceCommand, InvoiceEvent,
    InvoiceId, InvoiceIssued, InvoiceMarkedOverdue, InvoiceSent, IssueInvoice, MarkInvoiceOverdue,
    MarkInvoiceSent, OverpaymentPolicy, PaymentDeleted, PaymentRegistered, PaymentUpdated,
    RegisterPayment, UpdatePayment, format_invoice_number, parse_invoice_number,
};
pub use money::{FeeSchedule, to_currency, validate_amount};
pub use ocr::OcrNumber;
pub use payment::{Payment, PaymentType, total_paid};
pub use status::{InvoiceStatus, LifecycleFacts, derive_status};
