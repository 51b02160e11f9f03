//! Runtime configuration for the billing services, read from the environment.

use std::time::Duration;

use thiserror::Error;

use levy_billing::{OverpaymentPolicy, PropertyDeletionPolicy};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BillingConfig {
    pub overpayment: OverpaymentPolicy,
    pub property_deletion: PropertyDeletionPolicy,
    /// Width of the reminder/export fan-out.
    pub dispatch_concurrency: usize,
    /// Retries for transient collaborator failures.
    pub external_retries: u32,
    /// Reload-and-retry rounds after an optimistic concurrency conflict.
    pub command_retries: u32,
    pub mail_from: String,
    /// Periodic overdue sweep; `None` disables it.
    pub overdue_sweep_interval: Option<Duration>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            overpayment: OverpaymentPolicy::Reject,
            property_deletion: PropertyDeletionPolicy::Reject,
            dispatch_concurrency: 4,
            external_retries: 3,
            command_retries: 3,
            mail_from: "no-reply@levy.local".to_string(),
            overdue_sweep_interval: None,
        }
    }
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset keys keep their defaults; set but unparsable keys are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup("LEVY_OVERPAYMENT") {
            config.overpayment = raw.parse().map_err(|e| invalid("LEVY_OVERPAYMENT", e))?;
        }
        if let Some(raw) = lookup("LEVY_PROPERTY_DELETION") {
            config.property_deletion = raw.parse().map_err(|e| invalid("LEVY_PROPERTY_DELETION", e))?;
        }
        if let Some(raw) = lookup("LEVY_DISPATCH_CONCURRENCY") {
            let width: usize = raw.trim().parse().map_err(|e| invalid("LEVY_DISPATCH_CONCURRENCY", e))?;
            if width == 0 {
                return Err(invalid("LEVY_DISPATCH_CONCURRENCY", "must be at least 1"));
            }
            config.dispatch_concurrency = width;
        }
        if let Some(raw) = lookup("LEVY_EXTERNAL_RETRIES") {
            config.external_retries = raw.trim().parse().map_err(|e| invalid("LEVY_EXTERNAL_RETRIES", e))?;
        }
        if let Some(raw) = lookup("LEVY_COMMAND_RETRIES") {
            config.command_retries = raw.trim().parse().map_err(|e| invalid("LEVY_COMMAND_RETRIES", e))?;
        }
        if let Some(raw) = lookup("LEVY_MAIL_FROM") {
            if !raw.contains('@') {
                return Err(invalid("LEVY_MAIL_FROM", "not an email address"));
            }
            config.mail_from = raw;
        }
        if let Some(raw) = lookup("LEVY_OVERDUE_SWEEP_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|e| invalid("LEVY_OVERDUE_SWEEP_SECS", e))?;
            config.overdue_sweep_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }
}

fn invalid(key: &'static str, message: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.to_string(),
    }
}
