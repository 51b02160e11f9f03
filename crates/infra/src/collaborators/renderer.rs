use std::fmt::Write as _;

use async_trait::async_trait;

use levy_billing::{Association, InvoiceId, Owner, Property, to_currency};

use super::ExternalServiceError;
use crate::projections::InvoiceReadModel;

/// Everything printed on one invoice.
#[derive(Debug, Clone)]
pub struct InvoiceDocument {
    pub invoice: InvoiceReadModel,
    pub property: Option<Property>,
    pub owner: Option<Owner>,
    pub association: Association,
    /// Render as a payment reminder (adds the reminder fee line).
    pub reminder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub invoice_id: InvoiceId,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Several rendered documents as one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentBundle {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render(&self, document: &InvoiceDocument) -> Result<RenderedDocument, ExternalServiceError>;

    fn bundle(&self, documents: &[RenderedDocument]) -> Result<DocumentBundle, ExternalServiceError>;
}

/// Plain-text stand-in for a PDF engine.
#[derive(Debug, Clone, Default)]
pub struct TextInvoiceRenderer;

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

impl TextInvoiceRenderer {
    pub fn new() -> Self {
        Self
    }

    fn render_text(document: &InvoiceDocument) -> Result<String, std::fmt::Error> {
        let inv = &document.invoice;
        let assoc = &document.association;
        let mut out = String::new();

        writeln!(out, "{}", if document.reminder { "PAYMENT REMINDER" } else { "INVOICE" })?;
        writeln!(out, "{}", assoc.name)?;
        if let Some(org) = &assoc.organisation_number {
            writeln!(out, "Org. no: {org}")?;
        }
        writeln!(out)?;
        writeln!(out, "Invoice no: {}", inv.invoice_number)?;
        writeln!(out, "OCR:        {}", inv.ocr)?;
        writeln!(out, "Due date:   {}", inv.due_date)?;
        if let Some(property) = &document.property {
            writeln!(out, "Property:   {} ({})", property.designation, property.number)?;
        }
        if let Some(owner) = &document.owner {
            writeln!(out, "Owner:      {}", owner.name)?;
        }
        writeln!(out)?;
        writeln!(out, "Amount:      {}", to_currency(inv.total_amount))?;
        writeln!(out, "Paid:        {}", to_currency(inv.paid_amount))?;
        let mut due = inv.outstanding_amount();
        if document.reminder {
            if let Some(fee) = assoc.reminder_fee.filter(|f| !f.is_zero()) {
                writeln!(out, "Reminder fee: {}", to_currency(fee))?;
                due += fee;
            }
        }
        writeln!(out, "To pay:      {}", to_currency(due))?;
        if let Some(bankgiro) = &assoc.bankgiro {
            writeln!(out, "Bankgiro:    {bankgiro}")?;
        }
        if let Some(plusgiro) = &assoc.plusgiro {
            writeln!(out, "Plusgiro:    {plusgiro}")?;
        }
        if let Some(text) = &assoc.invoice_text {
            writeln!(out)?;
            writeln!(out, "{text}")?;
        }
        Ok(out)
    }
}

#[async_trait]
impl PdfRenderer for TextInvoiceRenderer {
    async fn render(&self, document: &InvoiceDocument) -> Result<RenderedDocument, ExternalServiceError> {
        let text = Self::render_text(document)
            .map_err(|e| ExternalServiceError::permanent("pdf", format!("formatting failed: {e}")))?;
        Ok(RenderedDocument {
            invoice_id: document.invoice.invoice_id,
            file_name: format!("invoice-{}.txt", document.invoice.invoice_number),
            content_type: TEXT_CONTENT_TYPE.to_string(),
            bytes: text.into_bytes(),
        })
    }

    /// Documents separated by form feeds.
    fn bundle(&self, documents: &[RenderedDocument]) -> Result<DocumentBundle, ExternalServiceError> {
        let mut bytes = Vec::new();
        for (idx, doc) in documents.iter().enumerate() {
            if idx > 0 {
                bytes.extend_from_slice(b"\x0c\n");
            }
            bytes.extend_from_slice(&doc.bytes);
        }
        Ok(DocumentBundle {
            file_name: "invoices.txt".to_string(),
            content_type: TEXT_CONTENT_TYPE.to_string(),
            bytes,
        })
    }
}
