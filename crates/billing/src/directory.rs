//! Association directory: the association itself, owners and properties.
//!
//! Plain records, stored by the infrastructure's directory store rather than
//! event-sourced.

use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use levy_core::{DomainError, Entity, OwnerId, PropertyId};

use crate::ocr::MAX_COMPONENT;

/// Sender context printed on invoices and reminders.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Association {
    pub name: String,
    pub organisation_number: Option<String>,
    pub bankgiro: Option<String>,
    pub plusgiro: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub invoice_text: Option<String>,
    pub reminder_fee: Option<Decimal>,
    pub reminder_days: Option<u32>,
}

impl Association {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("association name must not be empty"));
        }
        if let Some(fee) = self.reminder_fee {
            if fee < Decimal::ZERO {
                return Err(DomainError::validation("reminder fee must not be negative"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub owner_id: OwnerId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Owner {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("owner name must not be empty"));
        }
        if let Some(email) = &self.email {
            if !email.contains('@') {
                return Err(DomainError::validation(format!("'{email}' is not an email address")));
            }
        }
        Ok(())
    }
}

impl Entity for Owner {
    type Id = OwnerId;

    fn id(&self) -> &Self::Id {
        &self.owner_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub property_id: PropertyId,
    /// Sequential number; part of every OCR reference for this property.
    pub number: u32,
    /// Cadastral label, e.g. "Ängen 1:12".
    pub designation: String,
    pub share_ratio: Decimal,
    pub address: Option<String>,
    pub owner_id: OwnerId,
    /// Inactive properties are skipped by billing runs.
    pub active: bool,
}

impl Property {
    pub fn validate(&self) -> Result<(), DomainError> {
        if !(1..=MAX_COMPONENT).contains(&self.number) {
            return Err(DomainError::validation(format!(
                "property number {} is out of range (1..={MAX_COMPONENT})",
                self.number
            )));
        }
        if self.designation.trim().is_empty() {
            return Err(DomainError::validation("property designation must not be empty"));
        }
        if self.share_ratio <= Decimal::ZERO {
            return Err(DomainError::validation("share ratio must be positive"));
        }
        Ok(())
    }
}

impl Entity for Property {
    type Id = PropertyId;

    fn id(&self) -> &Self::Id {
        &self.property_id
    }
}

/// Deleting a property that invoices already reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyDeletionPolicy {
    #[default]
    Reject,
    /// Deactivate and keep the record.
    SoftBlock,
}

impl FromStr for PropertyDeletionPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(PropertyDeletionPolicy::Reject),
            "soft_block" | "softblock" => Ok(PropertyDeletionPolicy::SoftBlock),
            _ => Err(DomainError::validation(format!("unknown property deletion policy '{s}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn property(number: u32, share: Decimal) -> Property {
        Property {
            property_id: PropertyId::new(),
            number,
            designation: "Ängen 1:12".to_string(),
            share_ratio: share,
            address: None,
            owner_id: OwnerId::new(),
            active: true,
        }
    }

    #[test]
    fn property_number_must_fit_ocr() {
        assert!(property(1, Decimal::ONE).validate().is_ok());
        assert!(property(0, Decimal::ONE).validate().is_err());
        assert!(property(10_000, Decimal::ONE).validate().is_err());
    }

    #[test]
    fn share_ratio_must_be_positive() {
        match property(3, Decimal::ZERO).validate().unwrap_err() {
            DomainError::Validation(msg) if msg.contains("share ratio") => {}
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn owner_email_is_checked_loosely() {
        let mut owner = Owner {
            owner_id: OwnerId::new(),
            name: "Karin Berg".to_string(),
            email: Some("karin.example.org".to_string()),
            phone: None,
        };
        assert!(owner.validate().is_err());
        owner.email = Some("karin@example.org".to_string());
        assert!(owner.validate().is_ok());
    }

    #[test]
    fn deletion_policy_parses() {
        assert_eq!("soft_block".parse::<PropertyDeletionPolicy>().unwrap(), PropertyDeletionPolicy::SoftBlock);
        assert_eq!(PropertyDeletionPolicy::default(), PropertyDeletionPolicy::Reject);
        assert!("cascade".parse::<PropertyDeletionPolicy>().is_err());
    }
}
