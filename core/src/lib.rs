//! Signed REST client for the BitPay payment API.
//!
//! # Overview
//! Every authenticated request carries an ECDSA signature over
//! `base_uri + path + body` (`X-Signature`) and the signer's compressed
//! public key (`X-Identity`). Tokens are issued per facade (permission
//! scope) and fetched fresh from the server before each token-bearing call.
//!
//! # Design
//! - `RequestBuilder` turns a path, optional token and params into a fully
//!   signed `HttpRequest`. It never touches the network.
//! - `Transport` executes a request. `UreqTransport` is the blocking default;
//!   tests substitute their own.
//! - `Client` validates inputs, resolves tokens, dispatches through the
//!   transport and unwraps the `{data | error}` response envelope.
//!
//! ```no_run
//! use bitpay_client::{Client, ClientOptions};
//!
//! # fn main() -> Result<(), bitpay_client::BitPayError> {
//! let mut client = Client::new(ClientOptions::new("https://test.bitpay.com"))?;
//! client.pair_pos_client("abc1234")?;
//! let invoice = client.create_invoice(10.0, "USD")?;
//! println!("pay at {:?}", invoice.url);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod keys;
pub mod request;
pub mod tokens;
pub mod transport;
pub mod types;
pub mod validation;

pub use client::{query_filter, Client, DEFAULT_FACADE};
pub use config::ClientOptions;
pub use error::BitPayError;
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use keys::{derive_client_id, generate_pem, KeyMaterial};
pub use request::{Access, RequestBuilder};
pub use tokens::TokenStore;
pub use transport::{Transport, UreqTransport};
pub use types::{Envelope, Invoice, Price};
