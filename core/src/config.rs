//! Client construction options.
//!
//! # Design
//! The client never reads the process environment. `ClientOptions` is
//! filled explicitly by the caller, or through `ClientOptions::from_env`
//! when environment-driven setup is wanted.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use crate::error::BitPayError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Value of `X-Accept-Version` on every request.
pub const API_VERSION: &str = "2.0.0";

/// Value of `X-BitPay-Plugin-Info` on every request.
pub const PLUGIN_INFO: &str = concat!("Rustlib", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_USER_AGENT: &str = concat!("BitPay_Rust_Client_v", env!("CARGO_PKG_VERSION"));

/// Connect and read ceilings applied by the default transport.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

pub const ENV_API_URI: &str = "BITPAY_API_URI";
pub const ENV_API_URI_FALLBACK: &str = "API_URI";
pub const ENV_PEM: &str = "BITPAY_PEM";
pub const ENV_PEM_FILE: &str = "BITPAY_PEM_FILE";
pub const ENV_INSECURE: &str = "BITPAY_INSECURE";

/// Options for `Client::new`.
///
/// A missing `pem` means a new key pair is generated. `insecure` turns off
/// TLS certificate verification and should stay off outside of local
/// testing. `debug` logs full request and response bodies at debug level.
#[derive(Clone, Default)]
pub struct ClientOptions {
    pub pem: Option<String>,
    pub api_uri: Option<String>,
    pub user_agent: Option<String>,
    pub tokens: HashMap<String, String>,
    pub insecure: bool,
    pub debug: bool,
}

impl ClientOptions {
    pub fn new(api_uri: &str) -> Self {
        Self {
            api_uri: Some(api_uri.to_string()),
            ..Self::default()
        }
    }

    pub fn with_pem(mut self, pem: impl Into<String>) -> Self {
        self.pem = Some(pem.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_tokens(mut self, tokens: HashMap<String, String>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Load a `.env` file if present, then read `BITPAY_API_URI` (or
    /// `API_URI`), `BITPAY_PEM` or `BITPAY_PEM_FILE`, and `BITPAY_INSECURE`.
    pub fn from_env() -> Result<Self, BitPayError> {
        dotenvy::dotenv().ok();

        let api_uri = env::var(ENV_API_URI)
            .or_else(|_| env::var(ENV_API_URI_FALLBACK))
            .ok();

        let pem = match (env::var(ENV_PEM), env::var(ENV_PEM_FILE)) {
            (Ok(pem), _) => Some(pem),
            (Err(_), Ok(path)) => Some(std::fs::read_to_string(&path).map_err(|e| {
                BitPayError::Configuration(format!("failed to read {ENV_PEM_FILE} {path}: {e}"))
            })?),
            (Err(_), Err(_)) => None,
        };

        let insecure = env::var(ENV_INSECURE)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            pem,
            api_uri,
            insecure,
            ..Self::default()
        })
    }

    pub(crate) fn resolve_api_uri(&self) -> Result<&str, BitPayError> {
        match self.api_uri.as_deref().map(str::trim) {
            Some(uri) if !uri.is_empty() => Ok(uri),
            _ => Err(BitPayError::Configuration("API URI is not configured".into())),
        }
    }

    pub(crate) fn resolve_user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("pem", &self.pem.as_ref().map(|_| "<redacted>"))
            .field("api_uri", &self.api_uri)
            .field("user_agent", &self.user_agent)
            .field("tokens", &self.tokens.keys().collect::<Vec<_>>())
            .field("insecure", &self.insecure)
            .field("debug", &self.debug)
            .finish()
    }
}
