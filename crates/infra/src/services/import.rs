//! Bulk payment import from bank files.
//!
//! Rows look like `ocr, amount, date[, type][, reference]`, separated by `,`
//! or `;`. With `;` the amount may use a decimal comma. Rows are applied one
//! at a time in file order, so two rows for the same invoice land in the
//! order the bank reported them.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use levy_billing::PaymentType;

use super::{BillingServices, NewPayment};
use crate::projections::PaymentReadModel;

/// One non-blank data line of an import file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRow {
    /// 1-based line number in the source file.
    pub line: usize,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    pub row: ImportRow,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub accepted: Vec<(ImportRow, PaymentReadModel)>,
    pub rejected: Vec<RejectedRow>,
}

impl ImportReport {
    pub fn total(&self) -> usize {
        self.accepted.len() + self.rejected.len()
    }
}

/// Split a file into data rows, dropping blank lines and a leading header.
pub fn parse_payment_csv(text: &str) -> Vec<ImportRow> {
    let mut rows = Vec::new();
    let mut seen_data = false;
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim().trim_start_matches('\u{feff}');
        if trimmed.is_empty() {
            continue;
        }
        if !seen_data && trimmed.to_ascii_lowercase().starts_with("ocr") {
            seen_data = true;
            continue;
        }
        seen_data = true;
        rows.push(ImportRow {
            line: idx + 1,
            raw: trimmed.to_string(),
        });
    }
    rows
}

fn parse_row(raw: &str) -> Result<(String, NewPayment), String> {
    let delimiter = if raw.contains(';') { ';' } else { ',' };
    let fields: Vec<&str> = raw.split(delimiter).map(|f| f.trim().trim_matches('"').trim()).collect();
    if fields.len() < 3 {
        return Err(format!("expected at least 3 fields, found {}", fields.len()));
    }

    let ocr = fields[0].to_string();

    let mut amount_text: String = fields[1].chars().filter(|c| !c.is_whitespace()).collect();
    if delimiter == ';' {
        amount_text = amount_text.replace(',', ".");
    }
    let amount: Decimal = amount_text
        .parse()
        .map_err(|_| format!("'{}' is not an amount", fields[1]))?;

    let payment_date = NaiveDate::parse_from_str(fields[2], "%Y-%m-%d")
        .map_err(|_| format!("'{}' is not a date (YYYY-MM-DD)", fields[2]))?;

    let payment_type = match fields.get(3).filter(|t| !t.is_empty()) {
        Some(t) => t.parse::<PaymentType>().map_err(|e| e.to_string())?,
        None => PaymentType::Bankgiro,
    };

    let reference = fields.get(4).filter(|r| !r.is_empty()).map(|r| r.to_string());

    Ok((
        ocr,
        NewPayment {
            amount,
            payment_type,
            payment_date,
            reference,
        },
    ))
}

impl BillingServices {
    /// Apply rows independently and in order. A bad row is reported and
    /// never stops the batch.
    pub fn import_batch(&self, rows: Vec<ImportRow>) -> ImportReport {
        let mut report = ImportReport::default();
        for row in rows {
            let outcome = parse_row(&row.raw).and_then(|(ocr, payment)| {
                self.register_payment_by_ocr(&ocr, payment).map_err(|e| e.to_string())
            });
            match outcome {
                Ok(payment) => report.accepted.push((row, payment)),
                Err(reason) => {
                    tracing::warn!(line = row.line, %reason, "import row rejected");
                    report.rejected.push(RejectedRow { row, reason });
                }
            }
        }
        tracing::info!(
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            "payment import finished"
        );
        report
    }

    pub fn import_payments_csv(&self, text: &str) -> ImportReport {
        self.import_batch(parse_payment_csv(text))
    }
}
