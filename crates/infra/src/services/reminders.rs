//! Reminder and export batches.
//!
//! Both are bounded fan-outs over the external collaborators: at most
//! `dispatch_concurrency` invoices are in flight, transient collaborator
//! failures are retried with backoff, and every requested invoice ends up in
//! exactly one bucket of the [`BatchReport`].

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;

use levy_billing::{Association, InvoiceId, InvoiceStatus, to_currency};

use super::{BillingServices, ServiceError};
use crate::collaborators::{
    Attachment, DocumentBundle, Email, ExternalServiceError, InvoiceDocument, RenderedDocument,
};
use crate::projections::InvoiceReadModel;

/// Per-invoice outcome of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Reminded (send) or rendered (export).
    pub completed: Vec<InvoiceId>,
    pub skipped: Vec<InvoiceId>,
    pub failed: Vec<(InvoiceId, String)>,
    /// Not finished when the batch was cancelled.
    pub cancelled: Vec<InvoiceId>,
}

#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    pub documents: Vec<RenderedDocument>,
    pub report: BatchReport,
}

struct Reminder {
    document: InvoiceDocument,
    to: String,
}

impl BillingServices {
    /// Render and mail a reminder for each open invoice. PAID and CANCELLED
    /// invoices are skipped.
    pub async fn send_reminders(&self, invoice_ids: &[InvoiceId], cancel: watch::Receiver<bool>) -> BatchReport {
        let association = self.directory.association();
        let mut report = BatchReport::default();
        let mut jobs = Vec::new();

        for invoice_id in dedup(invoice_ids) {
            let Some(invoice) = self.invoices.get(&invoice_id) else {
                report.failed.push((invoice_id, format!("invoice {invoice_id} not found")));
                continue;
            };
            if invoice.status.is_settled() {
                report.skipped.push(invoice_id);
                continue;
            }
            let owner = self.directory.owner(&invoice.owner_id);
            let Some(to) = owner.as_ref().and_then(|o| o.email.clone()) else {
                report.failed.push((invoice_id, "owner has no email address".to_string()));
                continue;
            };
            jobs.push((
                invoice_id,
                Reminder {
                    document: self.document(invoice, association.clone(), true),
                    to,
                },
            ));
        }

        let renderer = self.renderer.clone();
        let mailer = self.mailer.clone();
        let policy = self.retry_policy.clone();
        let from = self.config.mail_from.clone();
        let outcome = fan_out(self.config.dispatch_concurrency, jobs, cancel, move |job: Reminder| {
            let (renderer, mailer, policy, from) = (renderer.clone(), mailer.clone(), policy.clone(), from.clone());
            async move {
                let rendered = policy.run("render_invoice", || renderer.render(&job.document)).await?;
                let email = reminder_email(&from, &job, rendered);
                policy.run("send_reminder", || mailer.send(&email)).await
            }
        })
        .await;

        report.completed = outcome.completed.into_iter().map(|(id, ())| id).collect();
        report.failed.extend(outcome.failed);
        report.cancelled = outcome.cancelled;
        tracing::info!(
            sent = report.completed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled.len(),
            "reminder batch finished"
        );
        report
    }

    /// Render every requested invoice except CANCELLED ones.
    pub async fn export_invoices_to_pdf(&self, invoice_ids: &[InvoiceId], cancel: watch::Receiver<bool>) -> ExportReport {
        let association = self.directory.association();
        let mut report = BatchReport::default();
        let mut jobs = Vec::new();

        for invoice_id in dedup(invoice_ids) {
            match self.invoices.get(&invoice_id) {
                None => report.failed.push((invoice_id, format!("invoice {invoice_id} not found"))),
                Some(invoice) if invoice.status == InvoiceStatus::Cancelled => report.skipped.push(invoice_id),
                Some(invoice) => jobs.push((invoice_id, self.document(invoice, association.clone(), false))),
            }
        }

        let renderer = self.renderer.clone();
        let policy = self.retry_policy.clone();
        let outcome = fan_out(self.config.dispatch_concurrency, jobs, cancel, move |document: InvoiceDocument| {
            let (renderer, policy) = (renderer.clone(), policy.clone());
            async move { policy.run("render_invoice", || renderer.render(&document)).await }
        })
        .await;

        report.completed = outcome.completed.iter().map(|(id, _)| *id).collect();
        report.failed.extend(outcome.failed);
        report.cancelled = outcome.cancelled;
        tracing::info!(
            rendered = report.completed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled.len(),
            "export batch finished"
        );
        ExportReport {
            documents: outcome.completed.into_iter().map(|(_, doc)| doc).collect(),
            report,
        }
    }

    /// Combine rendered documents into one download.
    pub fn bundle_documents(&self, documents: &[RenderedDocument]) -> Result<DocumentBundle, ServiceError> {
        Ok(self.renderer.bundle(documents)?)
    }

    fn document(&self, invoice: InvoiceReadModel, association: Association, reminder: bool) -> InvoiceDocument {
        InvoiceDocument {
            property: self.directory.property(&invoice.property_id),
            owner: self.directory.owner(&invoice.owner_id),
            invoice,
            association,
            reminder,
        }
    }
}

fn dedup(ids: &[InvoiceId]) -> Vec<InvoiceId> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

fn reminder_email(from: &str, job: &Reminder, rendered: RenderedDocument) -> Email {
    let invoice = &job.document.invoice;
    let association = &job.document.association;
    let fee = association.reminder_fee.unwrap_or(Decimal::ZERO);
    let to_pay = invoice.outstanding_amount() + fee;

    let mut body = format!(
        "Hello,\n\nOur records show that invoice {} (due {}) is still unpaid.\n\
         Outstanding: {}\n",
        invoice.invoice_number,
        invoice.due_date,
        to_currency(invoice.outstanding_amount()),
    );
    if !fee.is_zero() {
        body.push_str(&format!("Reminder fee: {}\n", to_currency(fee)));
    }
    body.push_str(&format!("To pay: {}\nOCR: {}\n", to_currency(to_pay), invoice.ocr));
    if let Some(bankgiro) = &association.bankgiro {
        body.push_str(&format!("Bankgiro: {bankgiro}\n"));
    }
    body.push_str(&format!("\n{}\n", association.name));

    let mut email = Email::new(from, job.to.clone(), format!("Payment reminder: invoice {}", invoice.invoice_number))
        .text(body)
        .attach(Attachment {
            file_name: rendered.file_name,
            content_type: rendered.content_type,
            bytes: rendered.bytes,
        });
    if let Some(reply_to) = &association.email {
        email = email.reply_to(reply_to.clone());
    }
    email
}

struct FanOut<T> {
    completed: Vec<(InvoiceId, T)>,
    failed: Vec<(InvoiceId, String)>,
    cancelled: Vec<InvoiceId>,
}

/// Resolves once cancellation is requested; never if the sender is gone.
async fn cancellation(mut cancel: watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Run `work` for each job with at most `width` in flight. Results keep the
/// input order. On cancellation no further job starts and in-flight jobs are
/// aborted; whatever already finished is kept.
async fn fan_out<J, T, F, Fut>(
    width: usize,
    jobs: Vec<(InvoiceId, J)>,
    cancel: watch::Receiver<bool>,
    work: F,
) -> FanOut<T>
where
    J: Send + 'static,
    T: Send + 'static,
    F: Fn(J) -> Fut,
    Fut: Future<Output = Result<T, ExternalServiceError>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(width.max(1)));
    let mut set = JoinSet::new();
    let mut in_flight: BTreeMap<usize, InvoiceId> = BTreeMap::new();
    let mut finished = Vec::new();
    let mut unstarted = Vec::new();

    let cancelled = cancellation(cancel);
    tokio::pin!(cancelled);
    let mut is_cancelled = false;

    let mut queue = jobs.into_iter().enumerate();
    while let Some((idx, (invoice_id, job))) = queue.next() {
        let permit = tokio::select! {
            biased;
            _ = &mut cancelled => {
                is_cancelled = true;
                None
            }
            permit = semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            unstarted.push(invoice_id);
            break;
        };

        let task = work(job);
        in_flight.insert(idx, invoice_id);
        set.spawn(async move {
            let _permit = permit;
            (idx, task.await)
        });
    }
    unstarted.extend(queue.map(|(_, (invoice_id, _))| invoice_id));
    if is_cancelled {
        set.abort_all();
    }

    loop {
        let joined = tokio::select! {
            biased;
            _ = &mut cancelled, if !is_cancelled => {
                is_cancelled = true;
                set.abort_all();
                None
            }
            joined = set.join_next() => Some(joined),
        };
        match joined {
            None => {}
            Some(None) => break,
            Some(Some(Ok((idx, result)))) => {
                if let Some(invoice_id) = in_flight.remove(&idx) {
                    finished.push((idx, invoice_id, result));
                }
            }
            Some(Some(Err(err))) => {
                if !err.is_cancelled() {
                    tracing::warn!(error = %err, "batch task panicked");
                }
            }
        }
    }
    finished.sort_by_key(|(idx, _, _)| *idx);

    let mut out = FanOut {
        completed: Vec::new(),
        failed: Vec::new(),
        cancelled: Vec::new(),
    };
    for (_, invoice_id, result) in finished {
        match result {
            Ok(value) => out.completed.push((invoice_id, value)),
            Err(err) => {
                tracing::warn!(invoice_id = %invoice_id, error = %err, "batch item failed");
                out.failed.push((invoice_id, err.to_string()));
            }
        }
    }
    // Left in flight: aborted on cancellation, or panicked.
    for (_, invoice_id) in in_flight {
        if is_cancelled {
            out.cancelled.push(invoice_id);
        } else {
            out.failed.push((invoice_id, "task aborted".to_string()));
        }
    }
    out.cancelled.extend(unstarted);
    out
}
