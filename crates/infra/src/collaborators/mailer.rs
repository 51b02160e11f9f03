use async_trait::async_trait;

use super::ExternalServiceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// An outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
    pub reply_to: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl Email {
    pub fn new(from: impl Into<String>, to: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: vec![to.into()],
            subject: subject.into(),
            text: None,
            html: None,
            reply_to: None,
            attachments: Vec::new(),
        }
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text = Some(body.into());
        self
    }

    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html = Some(body.into());
        self
    }

    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn validate(&self) -> Result<(), ExternalServiceError> {
        if self.from.is_empty() {
            return Err(ExternalServiceError::permanent("mail", "sender address is required"));
        }
        if self.to.iter().all(|to| to.is_empty()) {
            return Err(ExternalServiceError::permanent("mail", "recipient address is required"));
        }
        if self.subject.is_empty() {
            return Err(ExternalServiceError::permanent("mail", "subject is required"));
        }
        if self.text.is_none() && self.html.is_none() {
            return Err(ExternalServiceError::permanent("mail", "a text or html body is required"));
        }
        Ok(())
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), ExternalServiceError>;

    fn is_healthy(&self) -> bool;
}

/// Logs message metadata instead of sending. Bodies are never logged.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

impl LogMailer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), ExternalServiceError> {
        email.validate()?;
        tracing::info!(
            from = %email.from,
            recipients = email.to.len(),
            subject = %email.subject,
            attachments = email.attachments.len(),
            "mail accepted by log transport"
        );
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_mailer_rejects_incomplete_mail() {
        let mailer = LogMailer::new();
        let missing_body = Email::new("kassor@example.org", "owner@example.org", "Påminnelse");
        let err = mailer.send(&missing_body).await.unwrap_err();
        assert!(!err.retryable);

        let ok = missing_body.text("Betala gärna").attach(Attachment {
            file_name: "faktura.txt".to_string(),
            content_type: "text/plain".to_string(),
            bytes: b"x".to_vec(),
        });
        mailer.send(&ok).await.unwrap();
    }
}
