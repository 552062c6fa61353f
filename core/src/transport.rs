//! Blocking HTTP transport.
//!
//! # Design
//! `Transport` is the only place the client touches the network. Status
//! codes are returned as data, never as errors, so that envelope handling
//! stays in one place. Every transport failure is a `Connection` error and
//! nothing here retries.

use std::fmt;

use tracing::debug;

use crate::config::{CONNECT_TIMEOUT, READ_TIMEOUT};
use crate::error::BitPayError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Executes one request and returns the response as read.
pub trait Transport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, BitPayError>;
}

/// `ureq`-backed transport with fixed connect and read timeouts.
pub struct UreqTransport {
    agent: ureq::Agent,
    debug: bool,
}

impl UreqTransport {
    /// `insecure` disables certificate verification. `debug` logs headers
    /// and bodies of every exchange.
    pub fn new(insecure: bool, debug: bool) -> Self {
        let tls = ureq::tls::TlsConfig::builder()
            .disable_verification(insecure)
            .build();
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(Some(CONNECT_TIMEOUT))
            .timeout_recv_response(Some(READ_TIMEOUT))
            .timeout_recv_body(Some(READ_TIMEOUT))
            .tls_config(tls)
            .build()
            .new_agent();
        Self { agent, debug }
    }
}

impl fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UreqTransport")
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(false, false)
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, BitPayError> {
        if self.debug {
            debug!(
                method = request.method.as_str(),
                url = %request.url,
                headers = ?request.headers,
                body = ?request.body,
                "sending request"
            );
        }

        let result = match request.method {
            HttpMethod::Get => {
                let mut builder = self.agent.get(request.url.as_str());
                for (name, value) in &request.headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                builder.call()
            }
            HttpMethod::Post => {
                let mut builder = self.agent.post(request.url.as_str());
                for (name, value) in &request.headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                builder.send(request.body.as_deref().unwrap_or_default().as_bytes())
            }
        };

        let mut response = result.map_err(|e| BitPayError::Connection(e.to_string()))?;
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| BitPayError::Connection(format!("failed to read response: {e}")))?;

        if self.debug {
            debug!(status, headers = ?headers, body = %body, "received response");
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
