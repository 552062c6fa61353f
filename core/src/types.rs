//! Domain types for the BitPay API.
//!
//! # Design
//! Only the invoice fields the client itself reasons about are typed. The
//! remaining fields of the server's invoice object are kept in `extra` so
//! nothing the API returns is dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BitPayError;

/// Invoice price as supplied by the caller.
///
/// Numbers are sent as JSON numbers; strings are sent verbatim after
/// format validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Price {
    Number(f64),
    Text(String),
}

impl From<f64> for Price {
    fn from(value: f64) -> Self {
        Price::Number(value)
    }
}

impl From<u32> for Price {
    fn from(value: u32) -> Self {
        Price::Number(f64::from(value))
    }
}

impl From<&str> for Price {
    fn from(value: &str) -> Self {
        Price::Text(value.to_owned())
    }
}

impl From<String> for Price {
    fn from(value: String) -> Self {
        Price::Text(value)
    }
}

/// An invoice as returned in the `data` field of the invoice endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Top-level JSON wrapper of every API response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Take the `data` payload; a success envelope without one is a parse
    /// failure.
    pub fn into_data(self) -> Result<Value, BitPayError> {
        self.data
            .ok_or_else(|| BitPayError::Parse("response envelope has no data field".into()))
    }

    /// Deserialize the `data` payload into `T`.
    pub fn data_as<T: serde::de::DeserializeOwned>(self) -> Result<T, BitPayError> {
        serde_json::from_value(self.into_data()?)
            .map_err(|e| BitPayError::Parse(format!("unexpected data shape: {e}")))
    }
}
