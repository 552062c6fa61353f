//! Error types for the BitPay client.
//!
//! # Design
//! Validation failures (`InvalidArgument`) are detected before any network
//! traffic. Transport failures (`Connection`) and non-2xx answers (`Api`) are
//! kept apart so callers can decide what, if anything, to retry. Nothing in
//! this crate retries on its own.

use thiserror::Error;

/// Errors returned by `Client` operations and the request builder.
#[derive(Debug, Error)]
pub enum BitPayError {
    /// Missing API URI or unusable key material at construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed pairing code, price or currency.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// DNS, connect, TLS or timeout failure in the transport.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server answered with a non-2xx status. `message` is the
    /// server-supplied `error` field, or the raw body when there is none.
    #[error("{status}: {message}")]
    Api { status: u16, message: String },

    /// No token for the facade after a fresh refresh.
    #[error("not authorized for facade: {facade}")]
    NotAuthorized { facade: String },

    /// A successful response whose body is not the expected JSON envelope.
    #[error("response parse error: {0}")]
    Parse(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),
}
