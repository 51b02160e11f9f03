//! External collaborators: document rendering and mail transport.
//!
//! Only the interfaces matter to billing. The bundled implementations are a
//! plain-text renderer and a mailer that logs instead of sending.

pub mod mailer;
pub mod renderer;

use thiserror::Error;

pub use mailer::{Attachment, Email, LogMailer, Mailer};
pub use renderer::{DocumentBundle, InvoiceDocument, PdfRenderer, RenderedDocument, TextInvoiceRenderer};

/// Failure of a collaborator call. `retryable` marks transient failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{service}: {message}")]
pub struct ExternalServiceError {
    pub service: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl ExternalServiceError {
    pub fn transient(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            service,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            service,
            message: message.into(),
            retryable: false,
        }
    }
}
