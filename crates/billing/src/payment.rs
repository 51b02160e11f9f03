//! Payments recorded against an invoice.

use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use levy_core::{DomainError, Entity, PaymentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    #[default]
    Bankgiro,
    Postgiro,
    Swish,
    Manual,
    Other,
}

impl PaymentType {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentType::Bankgiro => "BANKGIRO",
            PaymentType::Postgiro => "POSTGIRO",
            PaymentType::Swish => "SWISH",
            PaymentType::Manual => "MANUAL",
            PaymentType::Other => "OTHER",
        }
    }
}

impl core::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BANKGIRO" => Ok(PaymentType::Bankgiro),
            "POSTGIRO" => Ok(PaymentType::Postgiro),
            "SWISH" => Ok(PaymentType::Swish),
            "MANUAL" => Ok(PaymentType::Manual),
            "OTHER" => Ok(PaymentType::Other),
            _ => Err(DomainError::validation(format!("unknown payment type '{s}'"))),
        }
    }
}

/// One payment. Owned by exactly one invoice stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: PaymentId,
    pub amount: Decimal,
    pub payment_type: PaymentType,
    pub payment_date: NaiveDate,
    pub reference: Option<String>,
    pub registered_at: DateTime<Utc>,
}

impl Entity for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.payment_id
    }
}

pub fn total_paid<'a>(payments: impl IntoIterator<Item = &'a Payment>) -> Decimal {
    payments.into_iter().map(|p| p.amount).sum()
}
