//! Money value object with exact decimal arithmetic.
//!
//! All monetary amounts are `rust_decimal::Decimal` — money is never
//! represented or computed in binary floating point. A `Money` carries its
//! currency so additions across currencies fail loudly instead of silently
//! mixing units.

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::ValidationError;

/// Supported ISO 4217 currency codes and their minor-unit exponents.
///
/// The exponent is the number of decimal places in the currency's minor
/// unit (2 for USD cents, 0 for JPY).
static SUPPORTED_CURRENCIES: Lazy<HashMap<&'static str, u32>> = Lazy::new(|| {
    HashMap::from([
        ("USD", 2),
        ("EUR", 2),
        ("GBP", 2),
        ("CAD", 2),
        ("AUD", 2),
        ("CHF", 2),
        ("SEK", 2),
        ("NOK", 2),
        ("DKK", 2),
        ("JPY", 0),
    ])
});

/// Validated ISO 4217 currency code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    /// Parses and validates a currency code.
    ///
    /// Accepts lowercase input (providers deliver e.g. "usd" on the wire)
    /// but only codes in the supported set are accepted.
    pub fn new(code: &str) -> Result<Self, ValidationError> {
        let upper = code.to_ascii_uppercase();
        if SUPPORTED_CURRENCIES.contains_key(upper.as_str()) {
            let bytes = upper.as_bytes();
            Ok(Self([bytes[0], bytes[1], bytes[2]]))
        } else {
            Err(ValidationError::invalid_format(
                "currency",
                format!("unsupported currency code: {}", code),
            ))
        }
    }

    /// Returns the three-letter code.
    pub fn code(&self) -> &str {
        // Only constructed from validated ASCII uppercase.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }

    /// Number of decimal places in the currency's minor unit.
    pub fn minor_unit_exponent(&self) -> u32 {
        SUPPORTED_CURRENCIES.get(self.code()).copied().unwrap_or(2)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.code().to_string()
    }
}

/// Exact decimal amount in a specific currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Money {
    /// Creates a money value. The amount may be zero or negative; use
    /// [`Money::positive`] where the domain requires a strictly positive
    /// amount.
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Creates a money value that must be strictly positive.
    pub fn positive(amount: Decimal, currency: Currency) -> Result<Self, ValidationError> {
        if amount <= Decimal::ZERO {
            return Err(ValidationError::not_positive("amount", amount.to_string()));
        }
        Ok(Self { amount, currency })
    }

    /// Zero in the given currency.
    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Adds another amount of the same currency.
    pub fn checked_add(&self, other: &Money) -> Result<Money, ValidationError> {
        self.require_same_currency(other)?;
        Ok(Money::new(self.amount + other.amount, self.currency))
    }

    /// Subtracts another amount of the same currency.
    pub fn checked_sub(&self, other: &Money) -> Result<Money, ValidationError> {
        self.require_same_currency(other)?;
        Ok(Money::new(self.amount - other.amount, self.currency))
    }

    /// Converts to the provider wire format: an integer count of minor
    /// units (e.g. 10.50 USD -> 1050, 500 JPY -> 500).
    pub fn to_minor_units(&self) -> i64 {
        let scaled = self.amount * Decimal::from(10i64.pow(self.currency.minor_unit_exponent()));
        scaled.round().try_into().unwrap_or(i64::MAX)
    }

    /// Builds a money value from a provider's minor-unit integer.
    pub fn from_minor_units(minor: i64, currency: Currency) -> Self {
        let amount = Decimal::new(minor, currency.minor_unit_exponent());
        Self { amount, currency }
    }

    fn require_same_currency(&self, other: &Money) -> Result<(), ValidationError> {
        if self.currency != other.currency {
            return Err(ValidationError::invalid_format(
                "currency",
                format!(
                    "currency mismatch: {} vs {}",
                    self.currency, other.currency
                ),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}
