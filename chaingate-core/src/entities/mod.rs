pub mod api_key;
pub mod merchant;
pub mod payment;

use chaingate_sdk::objects::{
    ApiKeyType as SdkApiKeyType, CryptoCurrency as SdkCryptoCurrency,
    FiatCurrency as SdkFiatCurrency, Mode as SdkMode, PaymentState as SdkPaymentState,
};
use num_bigint::BigUint;

/// Crypto currency for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `chaingate_sdk::objects::CryptoCurrency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "crypto_currency")]
pub enum CryptoCurrencyName {
    Eth,
    Btc,
}

impl From<CryptoCurrencyName> for SdkCryptoCurrency {
    fn from(value: CryptoCurrencyName) -> Self {
        match value {
            CryptoCurrencyName::Eth => SdkCryptoCurrency::Eth,
            CryptoCurrencyName::Btc => SdkCryptoCurrency::Btc,
        }
    }
}

impl From<SdkCryptoCurrency> for CryptoCurrencyName {
    fn from(value: SdkCryptoCurrency) -> Self {
        match value {
            SdkCryptoCurrency::Eth => CryptoCurrencyName::Eth,
            SdkCryptoCurrency::Btc => CryptoCurrencyName::Btc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "fiat_currency")]
pub enum FiatCurrencyName {
    Usd,
    Chf,
}

impl From<FiatCurrencyName> for SdkFiatCurrency {
    fn from(value: FiatCurrencyName) -> Self {
        match value {
            FiatCurrencyName::Usd => SdkFiatCurrency::Usd,
            FiatCurrencyName::Chf => SdkFiatCurrency::Chf,
        }
    }
}

impl From<SdkFiatCurrency> for FiatCurrencyName {
    fn from(value: SdkFiatCurrency) -> Self {
        match value {
            SdkFiatCurrency::Usd => FiatCurrencyName::Usd,
            SdkFiatCurrency::Chf => FiatCurrencyName::Chf,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "payment_mode")]
pub enum ModeName {
    Main,
    Test,
}

impl From<ModeName> for SdkMode {
    fn from(value: ModeName) -> Self {
        match value {
            ModeName::Main => SdkMode::Main,
            ModeName::Test => SdkMode::Test,
        }
    }
}

impl From<SdkMode> for ModeName {
    fn from(value: SdkMode) -> Self {
        match value {
            SdkMode::Main => ModeName::Main,
            SdkMode::Test => ModeName::Test,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "api_key_type")]
pub enum ApiKeyTypeName {
    Public,
    Secret,
}

impl From<ApiKeyTypeName> for SdkApiKeyType {
    fn from(value: ApiKeyTypeName) -> Self {
        match value {
            ApiKeyTypeName::Public => SdkApiKeyType::Public,
            ApiKeyTypeName::Secret => SdkApiKeyType::Secret,
        }
    }
}

impl From<SdkApiKeyType> for ApiKeyTypeName {
    fn from(value: SdkApiKeyType) -> Self {
        match value {
            SdkApiKeyType::Public => ApiKeyTypeName::Public,
            SdkApiKeyType::Secret => ApiKeyTypeName::Secret,
        }
    }
}

/// Payment lifecycle state for database operations.
///
/// Declaration order is lifecycle order. `Expired` and `Failed` are side
/// exits rather than steps and are handled separately by
/// [`PaymentStateName::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "payment_state")]
pub enum PaymentStateName {
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

impl PaymentStateName {
    /// No transition leaves a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PaymentStateName::Finished | PaymentStateName::Expired | PaymentStateName::Failed
        )
    }

    /// Whether `next` may be appended after `self`.
    ///
    /// Reports may arrive in any order, so a late `Paid` after `Confirmed`
    /// is still recorded. `Expired` only applies before any payment was
    /// seen and `CurrencySelection` is only ever the first state.
    pub fn can_transition_to(self, next: PaymentStateName) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            PaymentStateName::CurrencySelection => false,
            PaymentStateName::Expired => matches!(
                self,
                PaymentStateName::CurrencySelection | PaymentStateName::Waiting
            ),
            _ => true,
        }
    }
}

impl From<PaymentStateName> for SdkPaymentState {
    fn from(value: PaymentStateName) -> Self {
        match value {
            PaymentStateName::CurrencySelection => SdkPaymentState::CurrencySelection,
            PaymentStateName::Waiting => SdkPaymentState::Waiting,
            PaymentStateName::PartiallyPaid => SdkPaymentState::PartiallyPaid,
            PaymentStateName::Paid => SdkPaymentState::Paid,
            PaymentStateName::Confirmed => SdkPaymentState::Confirmed,
            PaymentStateName::Forwarded => SdkPaymentState::Forwarded,
            PaymentStateName::Finished => SdkPaymentState::Finished,
            PaymentStateName::Expired => SdkPaymentState::Expired,
            PaymentStateName::Failed => SdkPaymentState::Failed,
        }
    }
}

impl From<SdkPaymentState> for PaymentStateName {
    fn from(value: SdkPaymentState) -> Self {
        match value {
            SdkPaymentState::CurrencySelection => PaymentStateName::CurrencySelection,
            SdkPaymentState::Waiting => PaymentStateName::Waiting,
            SdkPaymentState::PartiallyPaid => PaymentStateName::PartiallyPaid,
            SdkPaymentState::Paid => PaymentStateName::Paid,
            SdkPaymentState::Confirmed => PaymentStateName::Confirmed,
            SdkPaymentState::Forwarded => PaymentStateName::Forwarded,
            SdkPaymentState::Finished => PaymentStateName::Finished,
            SdkPaymentState::Expired => PaymentStateName::Expired,
            SdkPaymentState::Failed => PaymentStateName::Failed,
        }
    }
}

impl std::fmt::Display for PaymentStateName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(SdkPaymentState::from(*self).as_str())
    }
}

/// Parse a `NUMERIC(78,0)` column read back as text.
pub(crate) fn parse_amount(column: &str, text: &str) -> Result<BigUint, sqlx::Error> {
    text.parse::<BigUint>()
        .map_err(|e| sqlx::Error::Decode(format!("invalid {column} amount {text:?}: {e}").into()))
}
