//! Conversion between smallest on-chain units and decimal display strings.
//!
//! Amounts are `BigUint` throughout. Division by the conversion factor is
//! done as exact integer arithmetic (`amount * 10^precision / factor`)
//! with round-half-to-even on the remainder, so the text is exact to the
//! configured number of places at any magnitude.

use crate::entities::CryptoCurrencyName;
use chaingate_sdk::objects::{CryptoCurrency, CurrencyDetail};
use num_bigint::BigUint;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrecisionError {
    #[error("no conversion configured for currency {0}")]
    UnsupportedCurrency(CryptoCurrency),

    #[error("invalid amount {0:?}")]
    InvalidAmount(String),

    #[error("{currency} amounts have at most {max} decimal places")]
    TooManyDecimals { currency: CryptoCurrency, max: u32 },
}

/// Conversion entry for one currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyPrecision {
    /// Smallest units per coin is `10^decimals`.
    pub decimals: u32,
    /// Places printed by [`PrecisionTable::to_display`].
    pub display_precision: u32,
}

impl CurrencyPrecision {
    pub fn factor(&self) -> BigUint {
        pow10(self.decimals)
    }
}

/// Per-currency conversion factors and display precisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecisionTable {
    entries: Vec<(CryptoCurrencyName, CurrencyPrecision)>,
}

impl Default for PrecisionTable {
    /// ETH in wei (10^18, 18 places) and BTC in satoshi (10^8, 8 places).
    fn default() -> Self {
        Self::empty()
            .with(
                CryptoCurrencyName::Eth,
                CurrencyPrecision {
                    decimals: 18,
                    display_precision: 18,
                },
            )
            .with(
                CryptoCurrencyName::Btc,
                CurrencyPrecision {
                    decimals: 8,
                    display_precision: 8,
                },
            )
    }
}

impl PrecisionTable {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add or replace the entry for `currency`.
    pub fn with(mut self, currency: CryptoCurrencyName, precision: CurrencyPrecision) -> Self {
        self.entries.retain(|(c, _)| *c != currency);
        self.entries.push((currency, precision));
        self
    }

    pub fn get(&self, currency: CryptoCurrencyName) -> Result<&CurrencyPrecision, PrecisionError> {
        self.entries
            .iter()
            .find(|(c, _)| *c == currency)
            .map(|(_, p)| p)
            .ok_or(PrecisionError::UnsupportedCurrency(currency.into()))
    }

    /// `amount` smallest units as a fixed-point string, e.g. `"0.50000000"`.
    ///
    /// Zero is always `"0"`.
    pub fn to_display(
        &self,
        currency: CryptoCurrencyName,
        amount: &BigUint,
    ) -> Result<String, PrecisionError> {
        let precision = self.get(currency)?;
        if *amount == BigUint::ZERO {
            return Ok("0".to_string());
        }

        let factor = precision.factor();
        let scaled = amount * &pow10(precision.display_precision);
        let mut quotient = &scaled / &factor;
        let remainder = &scaled % &factor;

        let twice = &remainder + &remainder;
        if twice > factor || (twice == factor && quotient.bit(0)) {
            quotient += BigUint::from(1u32);
        }

        Ok(format_fixed(&quotient, precision.display_precision))
    }

    /// Parse a decimal string (`"0.5"`, `"12"`) into smallest units.
    pub fn from_display(
        &self,
        currency: CryptoCurrencyName,
        text: &str,
    ) -> Result<BigUint, PrecisionError> {
        let precision = self.get(currency)?;
        let invalid = || PrecisionError::InvalidAmount(text.to_owned());

        let (int_part, frac_part) = match text.split_once('.') {
            Some((i, f)) => (i, f),
            None => (text, ""),
        };
        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty())
            || !all_digits(int_part)
            || !all_digits(frac_part)
        {
            return Err(invalid());
        }

        let frac_trimmed = frac_part.trim_end_matches('0');
        if frac_trimmed.len() > precision.decimals as usize {
            return Err(PrecisionError::TooManyDecimals {
                currency: currency.into(),
                max: precision.decimals,
            });
        }

        let mut digits = String::with_capacity(int_part.len() + precision.decimals as usize);
        digits.push_str(int_part);
        digits.push_str(frac_trimmed);
        for _ in frac_trimmed.len()..precision.decimals as usize {
            digits.push('0');
        }
        if digits.is_empty() {
            return Ok(BigUint::ZERO);
        }
        digits.parse::<BigUint>().map_err(|_| invalid())
    }

    /// Entries for the buyer's currency selection list.
    pub fn details(&self) -> Vec<CurrencyDetail> {
        self.entries
            .iter()
            .map(|(currency, precision)| {
                let currency = CryptoCurrency::from(*currency);
                CurrencyDetail {
                    name: currency.display_name().to_string(),
                    short_name: currency,
                    conversion_factor: precision.factor().to_string(),
                }
            })
            .collect()
    }
}

fn pow10(exponent: u32) -> BigUint {
    BigUint::from(10u32).pow(exponent)
}

fn format_fixed(value: &BigUint, places: u32) -> String {
    let digits = value.to_string();
    if places == 0 {
        return digits;
    }
    let places = places as usize;
    let padded = if digits.len() <= places {
        format!("{}{}", "0".repeat(places + 1 - digits.len()), digits)
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - places);
    format!("{int_part}.{frac_part}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(s: &str) -> BigUint {
        s.parse().unwrap()
    }

    #[test]
    fn test_reference_values() {
        let table = PrecisionTable::default();
        assert_eq!(
            table
                .to_display(CryptoCurrencyName::Eth, &big("1000000000000000000"))
                .unwrap(),
            "1.000000000000000000"
        );
        assert_eq!(
            table
                .to_display(CryptoCurrencyName::Btc, &big("100000000"))
                .unwrap(),
            "1.00000000"
        );
        assert_eq!(
            table
                .to_display(CryptoCurrencyName::Eth, &BigUint::ZERO)
                .unwrap(),
            "0"
        );
        assert_eq!(
            table
                .to_display(CryptoCurrencyName::Btc, &big("50000000"))
                .unwrap(),
            "0.50000000"
        );
    }

    #[test]
    fn test_large_and_tiny_amounts_are_exact() {
        let table = PrecisionTable::default();
        assert_eq!(
            table
                .to_display(
                    CryptoCurrencyName::Eth,
                    &big("123456789012345678901234567890")
                )
                .unwrap(),
            "123456789012.345678901234567890"
        );
        assert_eq!(
            table
                .to_display(CryptoCurrencyName::Eth, &big("1"))
                .unwrap(),
            "0.000000000000000001"
        );
    }

    #[test]
    fn test_rounds_half_to_even() {
        let table = PrecisionTable::empty().with(
            CryptoCurrencyName::Btc,
            CurrencyPrecision {
                decimals: 8,
                display_precision: 2,
            },
        );
        let show = |n: &str| table.to_display(CryptoCurrencyName::Btc, &big(n)).unwrap();
        assert_eq!(show("12345000"), "0.12");
        assert_eq!(show("12500000"), "0.12");
        assert_eq!(show("13500000"), "0.14");
        assert_eq!(show("12500001"), "0.13");
        assert_eq!(show("199500000"), "2.00");
    }

    #[test]
    fn test_unsupported_currency() {
        let table = PrecisionTable::empty();
        assert_eq!(
            table.to_display(CryptoCurrencyName::Eth, &big("1")),
            Err(PrecisionError::UnsupportedCurrency(CryptoCurrency::Eth))
        );
    }

    #[test]
    fn test_from_display() {
        let table = PrecisionTable::default();
        assert_eq!(
            table.from_display(CryptoCurrencyName::Btc, "0.5").unwrap(),
            big("50000000")
        );
        assert_eq!(
            table.from_display(CryptoCurrencyName::Btc, "12").unwrap(),
            big("1200000000")
        );
        assert_eq!(
            table
                .from_display(CryptoCurrencyName::Btc, "0.123456780")
                .unwrap(),
            big("12345678")
        );
        assert!(matches!(
            table.from_display(CryptoCurrencyName::Btc, "0.123456789"),
            Err(PrecisionError::TooManyDecimals { max: 8, .. })
        ));
        assert!(matches!(
            table.from_display(CryptoCurrencyName::Btc, "1e8"),
            Err(PrecisionError::InvalidAmount(_))
        ));
        assert!(matches!(
            table.from_display(CryptoCurrencyName::Btc, "."),
            Err(PrecisionError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_details_list() {
        let details = PrecisionTable::default().details();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].name, "Ethereum");
        assert_eq!(details[0].conversion_factor, "1000000000000000000");
        assert_eq!(details[1].short_name, CryptoCurrency::Btc);
        assert_eq!(details[1].conversion_factor, "100000000");
    }
}
