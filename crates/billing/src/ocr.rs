//! OCR payment references.
//!
//! Layout: `YY PPPP SSSS C`: billing year modulo 100, property number,
//! invoice serial within the year, and a mod-10 (Luhn) check digit.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use levy_core::{DomainError, ValueObject};

/// Largest property number or invoice serial that fits the layout.
pub const MAX_COMPONENT: u32 = 9999;

/// A checksummed OCR reference. Only constructible through validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OcrNumber(String);

impl ValueObject for OcrNumber {}

impl OcrNumber {
    pub fn generate(year: i32, property_number: u32, serial: u32) -> Result<Self, DomainError> {
        if !(1..=MAX_COMPONENT).contains(&property_number) {
            return Err(DomainError::validation(format!(
                "property number {property_number} does not fit an OCR reference (1..={MAX_COMPONENT})"
            )));
        }
        if !(1..=MAX_COMPONENT).contains(&serial) {
            return Err(DomainError::validation(format!(
                "invoice serial {serial} does not fit an OCR reference (1..={MAX_COMPONENT})"
            )));
        }

        let prefix = format!("{:02}{property_number:04}{serial:04}", year.rem_euclid(100));
        let check = check_digit(&prefix)
            .ok_or_else(|| DomainError::invariant("OCR prefix contains non-digits"))?;
        Ok(Self(format!("{prefix}{check}")))
    }

    /// Parse operator or bank input. Embedded whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let digits: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if !is_valid(&digits) {
            return Err(DomainError::validation(format!(
                "'{raw}' is not a valid OCR reference"
            )));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for OcrNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OcrNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OcrNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OcrNumber> for String {
    fn from(value: OcrNumber) -> Self {
        value.0
    }
}

/// Mod-10 check digit over `digits`; `None` if any character is not a digit.
///
/// Walking right to left, the rightmost digit and every second one after it
/// are doubled (minus 9 when above 9).
pub fn check_digit(digits: &str) -> Option<u32> {
    let mut sum = 0u32;
    let mut double = true;
    for c in digits.chars().rev() {
        let mut d = c.to_digit(10)?;
        if double {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        double = !double;
    }
    Some((10 - sum % 10) % 10)
}

/// True when the last digit is the check digit of everything before it.
pub fn is_valid(candidate: &str) -> bool {
    if candidate.len() < 2 || !candidate.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let (prefix, last) = candidate.split_at(candidate.len() - 1);
    check_digit(prefix) == last.chars().next().and_then(|c| c.to_digit(10))
}
