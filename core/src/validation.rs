//! Local argument checks run before any request is built.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::BitPayError;
use crate::types::Price;

static PAIRING_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{7}$").expect("static regex"));
static CURRENCY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{3}$").expect("static regex"));
static FIAT_PRICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+(\.[0-9]{2})?$").expect("static regex"));
static BTC_PRICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+(\.[0-9]{1,6})?$").expect("static regex"));

/// Exactly seven ASCII letters or digits.
pub fn pairing_code_valid(pairing_code: &str) -> Result<(), BitPayError> {
    if PAIRING_CODE.is_match(pairing_code) {
        Ok(())
    } else {
        Err(BitPayError::InvalidArgument("Pairing code is invalid".into()))
    }
}

/// Exactly three uppercase ASCII letters.
pub fn currency_valid(currency: &str) -> Result<(), BitPayError> {
    if CURRENCY.is_match(currency) {
        Ok(())
    } else {
        Err(BitPayError::InvalidArgument(
            "Illegal Argument: Currency is invalid".into(),
        ))
    }
}

/// Any finite number, or a decimal string with exactly two fraction digits.
/// BTC prices may also carry one to six fraction digits.
pub fn price_format_valid(price: &Price, currency: &str) -> Result<(), BitPayError> {
    let valid = match price {
        Price::Number(n) => n.is_finite(),
        Price::Text(s) => FIAT_PRICE.is_match(s) || (currency == "BTC" && BTC_PRICE.is_match(s)),
    };
    if valid {
        Ok(())
    } else {
        Err(BitPayError::InvalidArgument(
            "Illegal Argument: Price must be formatted as a float".into(),
        ))
    }
}
