//! Invoice lifecycle: states and the status derivation rules.

use core::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use levy_core::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Created,
    Sent,
    PartiallyPaid,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 6] = [
        InvoiceStatus::Created,
        InvoiceStatus::Sent,
        InvoiceStatus::PartiallyPaid,
        InvoiceStatus::Paid,
        InvoiceStatus::Overdue,
        InvoiceStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Created => "CREATED",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::PartiallyPaid => "PARTIALLY_PAID",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Overdue => "OVERDUE",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }

    /// States the overdue sweep moves to `Overdue`.
    pub fn is_overdue_candidate(self) -> bool {
        matches!(
            self,
            InvoiceStatus::Created | InvoiceStatus::Sent | InvoiceStatus::PartiallyPaid
        )
    }

    /// Settled invoices: reminders are pointless.
    pub fn is_settled(self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InvoiceStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::validation(format!("unknown invoice status '{s}'")))
    }
}

/// Everything status derivation needs besides the paid amount and the date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleFacts {
    pub current: InvoiceStatus,
    pub total_amount: Decimal,
    pub due_date: NaiveDate,
    pub sent: bool,
}

/// Status implied by `paid_amount` on `today`, first matching rule wins.
pub fn derive_status(facts: &LifecycleFacts, paid_amount: Decimal, today: NaiveDate) -> InvoiceStatus {
    if facts.current == InvoiceStatus::Cancelled {
        return InvoiceStatus::Cancelled;
    }
    if paid_amount >= facts.total_amount {
        return InvoiceStatus::Paid;
    }
    if paid_amount > Decimal::ZERO {
        return InvoiceStatus::PartiallyPaid;
    }
    // OVERDUE stays overdue; PAID here means every payment was removed.
    let past_due_eligible = facts.current.is_overdue_candidate()
        || matches!(facts.current, InvoiceStatus::Overdue | InvoiceStatus::Paid);
    if today > facts.due_date && past_due_eligible {
        return InvoiceStatus::Overdue;
    }
    if facts.sent {
        return InvoiceStatus::Sent;
    }
    InvoiceStatus::Created
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn facts(current: InvoiceStatus, sent: bool) -> LifecycleFacts {
        LifecycleFacts {
            current,
            total_amount: Decimal::new(120000, 2),
            due_date: date(2024, 2, 1),
            sent,
        }
    }

    #[test]
    fn cancelled_is_sticky() {
        let f = facts(InvoiceStatus::Cancelled, true);
        assert_eq!(
            derive_status(&f, Decimal::new(120000, 2), date(2024, 3, 1)),
            InvoiceStatus::Cancelled
        );
    }

    #[test]
    fn payments_take_priority_over_dates() {
        let f = facts(InvoiceStatus::Overdue, true);
        assert_eq!(derive_status(&f, Decimal::new(50000, 2), date(2024, 3, 1)), InvoiceStatus::PartiallyPaid);
        assert_eq!(derive_status(&f, Decimal::new(120000, 2), date(2024, 3, 1)), InvoiceStatus::Paid);
    }

    #[test]
    fn unpaid_after_due_date_is_overdue() {
        let f = facts(InvoiceStatus::Sent, true);
        assert_eq!(derive_status(&f, Decimal::ZERO, date(2024, 2, 2)), InvoiceStatus::Overdue);
        // due date itself is not late
        assert_eq!(derive_status(&f, Decimal::ZERO, date(2024, 2, 1)), InvoiceStatus::Sent);
    }

    #[test]
    fn reopened_paid_invoice_falls_back_to_sent_or_created() {
        assert_eq!(
            derive_status(&facts(InvoiceStatus::Paid, true), Decimal::ZERO, date(2024, 1, 15)),
            InvoiceStatus::Sent
        );
        assert_eq!(
            derive_status(&facts(InvoiceStatus::Paid, false), Decimal::ZERO, date(2024, 1, 15)),
            InvoiceStatus::Created
        );
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("partially_paid".parse::<InvoiceStatus>().unwrap(), InvoiceStatus::PartiallyPaid);
        assert!("open".parse::<InvoiceStatus>().is_err());
        assert_eq!(serde_json::to_string(&InvoiceStatus::PartiallyPaid).unwrap(), "\"PARTIALLY_PAID\"");
    }

    fn any_status() -> impl Strategy<Value = InvoiceStatus> {
        prop::sample::select(InvoiceStatus::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn fully_paid_non_cancelled_invoice_is_paid(
            current in any_status(),
            sent in any::<bool>(),
            extra in 0i64..100_000,
            day in 1u32..28,
        ) {
            prop_assume!(current != InvoiceStatus::Cancelled);
            let f = facts(current, sent);
            let paid = f.total_amount + Decimal::new(extra, 2);
            prop_assert_eq!(derive_status(&f, paid, date(2024, 3, day)), InvoiceStatus::Paid);
        }

        #[test]
        fn partial_payment_never_yields_paid(
            current in any_status(),
            sent in any::<bool>(),
            cents in 1i64..120000,
            day in 1u32..28,
        ) {
            let f = facts(current, sent);
            let status = derive_status(&f, Decimal::new(cents, 2), date(2024, 3, day));
            prop_assert_ne!(status, InvoiceStatus::Paid);
        }
    }
}
