//! Payment actions requested from the customer.
//!
//! An action describes what the merchant is asking the customer to approve:
//! either a single payment of a fixed amount or a payment method kept on file
//! for later charges.

use std::fmt;

use serde::{Deserialize, Serialize};

/// ISO 4217 currency supported by the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// United States dollar.
    Usd,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usd => f.write_str("USD"),
        }
    }
}

/// An amount of money in minor units (e.g. cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the smallest unit of `currency`.
    pub amount: u64,
    /// Currency of the amount.
    pub currency: Currency,
}

impl Money {
    /// Creates an amount in US dollar cents.
    #[must_use]
    pub const fn usd(cents: u64) -> Self {
        Self {
            amount: cents,
            currency: Currency::Usd,
        }
    }
}

/// A payment action attached to a customer request.
///
/// # JSON Format
///
/// ```json
/// { "type": "ONE_TIME_PAYMENT", "scope_id": "BRAND_1", "amount": 500, "currency": "USD" }
/// { "type": "ON_FILE_PAYMENT", "scope_id": "BRAND_1", "account_reference_id": "acct-9" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// A single payment. A missing amount lets the customer approve any amount.
    OneTimePayment {
        /// Merchant or brand scope the payment applies to.
        scope_id: String,
        /// Amount to charge, in minor units.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<u64>,
        /// Currency of `amount`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        currency: Option<Currency>,
    },
    /// A payment method stored for future charges.
    OnFilePayment {
        /// Merchant or brand scope the grant applies to.
        scope_id: String,
        /// Merchant-side account identifier the grant is linked to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account_reference_id: Option<String>,
    },
}

impl Action {
    /// Creates a one-time payment action.
    #[must_use]
    pub fn one_time(scope_id: impl Into<String>, money: Option<Money>) -> Self {
        Self::OneTimePayment {
            scope_id: scope_id.into(),
            amount: money.map(|m| m.amount),
            currency: money.map(|m| m.currency),
        }
    }

    /// Creates an on-file payment action.
    #[must_use]
    pub fn on_file(scope_id: impl Into<String>, account_reference_id: Option<String>) -> Self {
        Self::OnFilePayment {
            scope_id: scope_id.into(),
            account_reference_id,
        }
    }

    /// Returns the scope this action applies to.
    #[must_use]
    pub fn scope_id(&self) -> &str {
        match self {
            Self::OneTimePayment { scope_id, .. } | Self::OnFilePayment { scope_id, .. } => {
                scope_id
            }
        }
    }

    /// Returns the money attached to a one-time payment, if fully specified.
    #[must_use]
    pub const fn money(&self) -> Option<Money> {
        match self {
            Self::OneTimePayment {
                amount: Some(amount),
                currency: Some(currency),
                ..
            } => Some(Money {
                amount: *amount,
                currency: *currency,
            }),
            _ => None,
        }
    }
}
