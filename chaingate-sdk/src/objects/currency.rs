//! Currency, mode, key type and lifecycle enums shared by every API.
//!
//! These are the API/DTO versions without `sqlx::Type`. For database
//! operations, use the mirror enums in `chaingate-core::entities`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Returned when a string does not name a known enum value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

/// Crypto currencies a payment can be settled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptoCurrency {
    Eth,
    Btc,
}

impl CryptoCurrency {
    pub const ALL: [CryptoCurrency; 2] = [CryptoCurrency::Eth, CryptoCurrency::Btc];

    pub const fn as_str(self) -> &'static str {
        match self {
            CryptoCurrency::Eth => "eth",
            CryptoCurrency::Btc => "btc",
        }
    }

    /// Human readable network name.
    pub const fn display_name(self) -> &'static str {
        match self {
            CryptoCurrency::Eth => "Ethereum",
            CryptoCurrency::Btc => "Bitcoin",
        }
    }
}

impl std::fmt::Display for CryptoCurrency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CryptoCurrency {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eth" => Ok(CryptoCurrency::Eth),
            "btc" => Ok(CryptoCurrency::Btc),
            _ => Err(ParseEnumError::new("crypto currency", s)),
        }
    }
}

/// Fiat currencies a price can be denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FiatCurrency {
    Usd,
    Chf,
}

impl FiatCurrency {
    pub const fn as_str(self) -> &'static str {
        match self {
            FiatCurrency::Usd => "usd",
            FiatCurrency::Chf => "chf",
        }
    }
}

impl std::fmt::Display for FiatCurrency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FiatCurrency {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "usd" => Ok(FiatCurrency::Usd),
            "chf" => Ok(FiatCurrency::Chf),
            _ => Err(ParseEnumError::new("fiat currency", s)),
        }
    }
}

/// Partition of keys, wallets and payments into production and test data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Main,
    Test,
}

impl Mode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Mode::Main => "main",
            Mode::Test => "test",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "main" => Ok(Mode::Main),
            "test" => Ok(Mode::Test),
            _ => Err(ParseEnumError::new("mode", s)),
        }
    }
}

/// Kind of merchant API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyType {
    /// Displayable key, stored reversibly.
    Public,
    /// Hashed key, only a hint is ever shown again.
    Secret,
}

impl ApiKeyType {
    pub const fn as_str(self) -> &'static str {
        match self {
            ApiKeyType::Public => "public",
            ApiKeyType::Secret => "secret",
        }
    }
}

impl std::fmt::Display for ApiKeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiKeyType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(ApiKeyType::Public),
            "secret" => Ok(ApiKeyType::Secret),
            _ => Err(ParseEnumError::new("api key type", s)),
        }
    }
}

/// Payment lifecycle state as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    CurrencySelection,
    Waiting,
    PartiallyPaid,
    Paid,
    Confirmed,
    Forwarded,
    Finished,
    Expired,
    Failed,
}

impl PaymentState {
    pub const fn as_str(self) -> &'static str {
        match self {
            PaymentState::CurrencySelection => "currency_selection",
            PaymentState::Waiting => "waiting",
            PaymentState::PartiallyPaid => "partially_paid",
            PaymentState::Paid => "paid",
            PaymentState::Confirmed => "confirmed",
            PaymentState::Forwarded => "forwarded",
            PaymentState::Finished => "finished",
            PaymentState::Expired => "expired",
            PaymentState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s {
            "currency_selection" => PaymentState::CurrencySelection,
            "waiting" => PaymentState::Waiting,
            "partially_paid" => PaymentState::PartiallyPaid,
            "paid" => PaymentState::Paid,
            "confirmed" => PaymentState::Confirmed,
            "forwarded" => PaymentState::Forwarded,
            "finished" => PaymentState::Finished,
            "expired" => PaymentState::Expired,
            "failed" => PaymentState::Failed,
            _ => return Err(ParseEnumError::new("payment state", s)),
        };
        Ok(state)
    }
}

/// One entry of the currency list offered to a buyer during selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyDetail {
    pub name: String,
    pub short_name: CryptoCurrency,
    /// Smallest units per whole coin, as a decimal string.
    pub conversion_factor: String,
}
