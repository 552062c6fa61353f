//! BitPay API client: pairing, token refresh and invoices.
//!
//! # Design
//! `Client` owns its key material, its token store and one transport. Every
//! operation that needs a facade token re-fetches the full token listing
//! first; there is no token cache beyond the last listing. Inputs are
//! validated before any request is built, and the token store is only
//! replaced once a refresh has fully succeeded.

use std::fmt::Display;

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::ClientOptions;
use crate::error::BitPayError;
use crate::http::{HttpRequest, HttpResponse};
use crate::keys::KeyMaterial;
use crate::request::{Access, RequestBuilder};
use crate::tokens::TokenStore;
use crate::transport::{Transport, UreqTransport};
use crate::types::{Envelope, Invoice, Price};
use crate::validation::{currency_valid, pairing_code_valid, price_format_valid};

/// Facade used when the caller does not name one.
pub const DEFAULT_FACADE: &str = "pos";

const TOKENS_PATH: &str = "/tokens";
const INVOICES_PATH: &str = "/invoices";

/// Synchronous client for the BitPay REST API.
///
/// Not meant to be shared across threads; use one client per worker or
/// serialize access.
#[derive(Debug)]
pub struct Client<T: Transport = UreqTransport> {
    builder: RequestBuilder,
    tokens: TokenStore,
    transport: T,
}

impl Client<UreqTransport> {
    /// Build a client over the default `ureq` transport.
    pub fn new(options: ClientOptions) -> Result<Self, BitPayError> {
        let transport = UreqTransport::new(options.insecure, options.debug);
        Self::with_transport(options, transport)
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(options: ClientOptions, transport: T) -> Result<Self, BitPayError> {
        let api_uri = options.resolve_api_uri()?;
        let keys = match options.pem.as_deref() {
            Some(pem) => KeyMaterial::from_pem(pem)?,
            None => KeyMaterial::generate()?,
        };
        let builder = RequestBuilder::new(api_uri, options.resolve_user_agent(), keys);

        Ok(Self {
            builder,
            tokens: TokenStore::from(options.tokens),
            transport,
        })
    }

    pub fn client_id(&self) -> &str {
        self.builder.keys().client_id()
    }

    /// The PEM this client signs with, for persisting the identity.
    pub fn pem(&self) -> &str {
        self.builder.keys().pem()
    }

    pub fn api_uri(&self) -> &str {
        self.builder.base_uri()
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Unauthenticated POST to the pairing endpoint.
    pub fn pair_client(&self, params: &Map<String, Value>) -> Result<Envelope, BitPayError> {
        let request = self.builder.build_post(TOKENS_PATH, None, params)?;
        self.process_request(&request)
    }

    /// Pair using a server-side pairing code from the merchant dashboard.
    pub fn pair_pos_client(&self, pairing_code: &str) -> Result<Envelope, BitPayError> {
        pairing_code_valid(pairing_code)?;

        let mut params = Map::new();
        params.insert("pairingCode".into(), Value::String(pairing_code.to_owned()));
        self.pair_client(&params)
    }

    /// Fetch all tokens for this identity and replace the local store.
    pub fn refresh_tokens(&mut self) -> Result<&TokenStore, BitPayError> {
        let request = self.builder.build_get(TOKENS_PATH, Access::Identity, None)?;
        let data = self.process_request(&request)?.into_data()?;
        let fresh = TokenStore::from_listing(&data)?;
        self.tokens.replace(fresh);
        Ok(&self.tokens)
    }

    /// Refresh, then return the token for `facade`.
    pub fn get_token(&mut self, facade: &str) -> Result<String, BitPayError> {
        self.refresh_tokens()?
            .get(facade)
            .map(str::to_owned)
            .ok_or_else(|| BitPayError::NotAuthorized {
                facade: facade.to_owned(),
            })
    }

    /// Create an invoice on the `pos` facade.
    pub fn create_invoice(
        &mut self,
        price: impl Into<Price>,
        currency: &str,
    ) -> Result<Invoice, BitPayError> {
        self.create_invoice_for(DEFAULT_FACADE, price, currency, Map::new())
    }

    /// Create an invoice on `facade` with extra invoice fields in `params`.
    pub fn create_invoice_for(
        &mut self,
        facade: &str,
        price: impl Into<Price>,
        currency: &str,
        mut params: Map<String, Value>,
    ) -> Result<Invoice, BitPayError> {
        let price: Price = price.into();
        currency_valid(currency)?;
        price_format_valid(&price, currency)?;

        let price =
            serde_json::to_value(&price).map_err(|e| BitPayError::Serialization(e.to_string()))?;
        params.insert("price".into(), price);
        params.insert("currency".into(), Value::String(currency.to_owned()));

        let token = self.get_token(facade)?;
        let request = self.builder.build_post(INVOICES_PATH, Some(&token), &params)?;
        self.process_request(&request)?.data_as()
    }

    /// Fetch an invoice through the `pos` facade.
    pub fn get_invoice(&mut self, id: &str) -> Result<Invoice, BitPayError> {
        self.get_invoice_for(id, DEFAULT_FACADE, &[] as &[(&str, &str)])
    }

    /// Fetch an invoice through `facade`. `filters` are appended to the
    /// query unencoded, see [`query_filter`].
    pub fn get_invoice_for<K: Display, V: Display>(
        &mut self,
        id: &str,
        facade: &str,
        filters: &[(K, V)],
    ) -> Result<Invoice, BitPayError> {
        let token = self.get_token(facade)?;
        let filter = query_filter(filters);
        let request = self.builder.build_get(
            &format!("{INVOICES_PATH}/{id}"),
            Access::Token(&token),
            filter.as_deref(),
        )?;
        self.process_request(&request)?.data_as()
    }

    /// Fetch the public view of an invoice. No token, no signature.
    pub fn get_public_invoice(&self, id: &str) -> Result<Invoice, BitPayError> {
        let request =
            self.builder
                .build_get(&format!("{INVOICES_PATH}/{id}"), Access::Public, None)?;
        self.process_request(&request)?.data_as()
    }

    /// Send `request` and unwrap the response envelope.
    pub fn process_request(&self, request: &HttpRequest) -> Result<Envelope, BitPayError> {
        debug!(method = request.method.as_str(), url = %request.url, "dispatching request");
        let response = self.transport.send(request)?;
        debug!(status = response.status, "response received");
        interpret_response(response)
    }
}

/// Join filters as `&key=value` pairs. Keys and values are not encoded and
/// the result starts with `&`; the request builder places it after the
/// `?token=` segment.
pub fn query_filter<K: Display, V: Display>(params: &[(K, V)]) -> Option<String> {
    if params.is_empty() {
        return None;
    }
    Some(
        params
            .iter()
            .map(|(key, value)| format!("&{key}={value}"))
            .collect(),
    )
}

/// 2xx bodies must be a JSON envelope. Anything else becomes `Api`, using
/// the `error` field when the body has one.
fn interpret_response(response: HttpResponse) -> Result<Envelope, BitPayError> {
    if response.is_success() {
        return serde_json::from_str(&response.body)
            .map_err(|e| BitPayError::Parse(format!("invalid JSON response: {e}")));
    }

    let message = match serde_json::from_str::<Value>(&response.body) {
        Ok(Value::Object(body)) => match body.get("error") {
            Some(Value::String(error)) => error.clone(),
            Some(other) => other.to_string(),
            None => response.body.clone(),
        },
        _ => response.body.clone(),
    };
    Err(BitPayError::Api {
        status: response.status,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};

    const BASE_URI: &str = "https://test.bitpay.com";

    /// Replays canned responses and records every request it sees.
    #[derive(Debug, Default)]
    struct FakeTransport {
        replies: RefCell<VecDeque<Result<HttpResponse, String>>>,
        seen: RefCell<Vec<HttpRequest>>,
    }

    impl FakeTransport {
        fn reply(self, status: u16, body: &str) -> Self {
            self.replies.borrow_mut().push_back(Ok(HttpResponse {
                status,
                headers: Vec::new(),
                body: body.to_string(),
            }));
            self
        }

        fn fail(self, message: &str) -> Self {
            self.replies.borrow_mut().push_back(Err(message.to_string()));
            self
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.seen.borrow().clone()
        }
    }

    impl Transport for FakeTransport {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, BitPayError> {
            self.seen.borrow_mut().push(request.clone());
            match self.replies.borrow_mut().pop_front() {
                Some(Ok(response)) => Ok(response),
                Some(Err(message)) => Err(BitPayError::Connection(message)),
                None => Err(BitPayError::Connection("no reply queued".into())),
            }
        }
    }

    fn client(transport: FakeTransport) -> Client<FakeTransport> {
        Client::with_transport(ClientOptions::new(BASE_URI), transport).unwrap()
    }

    fn body_of(request: &HttpRequest) -> Value {
        serde_json::from_str(request.body.as_deref().unwrap()).unwrap()
    }

    #[test]
    fn missing_api_uri_fails_construction() {
        let err = Client::with_transport(ClientOptions::default(), FakeTransport::default())
            .unwrap_err();
        assert!(matches!(err, BitPayError::Configuration(_)));
    }

    #[test]
    fn supplied_pem_keeps_identity() {
        let first = client(FakeTransport::default());
        let second = Client::with_transport(
            ClientOptions::new(BASE_URI).with_pem(first.pem()),
            FakeTransport::default(),
        )
        .unwrap();
        assert_eq!(first.client_id(), second.client_id());
    }

    #[test]
    fn invalid_pem_fails_construction() {
        let err = Client::with_transport(
            ClientOptions::new(BASE_URI).with_pem("garbage"),
            FakeTransport::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BitPayError::Configuration(_)));
    }

    #[test]
    fn construction_tokens_populate_store() {
        let tokens = HashMap::from([("pos".to_string(), "t1".to_string())]);
        let c = Client::with_transport(
            ClientOptions::new(BASE_URI).with_tokens(tokens),
            FakeTransport::default(),
        )
        .unwrap();
        assert_eq!(c.tokens().get("pos"), Some("t1"));
    }

    #[test]
    fn pair_pos_client_posts_pairing_code_unsigned() {
        let c = client(FakeTransport::default().reply(200, r#"{"data":[{"token":"t1","facade":"pos"}]}"#));
        let envelope = c.pair_pos_client("abc1234").unwrap();
        assert_eq!(envelope.data.unwrap()[0]["token"], "t1");

        let requests = c.transport().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(requests[0].url, "https://test.bitpay.com/tokens");
        assert!(requests[0].header("X-Signature").is_none());

        let body = body_of(&requests[0]);
        assert_eq!(body["pairingCode"], "abc1234");
        assert_eq!(body["id"], c.client_id());
        assert!(body.get("token").is_none());
    }

    #[test]
    fn invalid_pairing_code_makes_no_request() {
        let c = client(FakeTransport::default());
        for code in ["abc123", "abc12345", "abc_123"] {
            let err = c.pair_pos_client(code).unwrap_err();
            assert!(matches!(err, BitPayError::InvalidArgument(_)));
        }
        assert!(c.transport().requests().is_empty());
    }

    #[test]
    fn refresh_tokens_is_signed_identity_get() {
        let mut c = client(FakeTransport::default().reply(200, r#"{"data":[{"pos":"t1"},{"merchant":"t2"}]}"#));
        let tokens = c.refresh_tokens().unwrap();
        assert_eq!(tokens.get("pos"), Some("t1"));
        assert_eq!(tokens.get("merchant"), Some("t2"));

        let requests = c.transport().requests();
        assert_eq!(requests[0].method, HttpMethod::Get);
        assert!(requests[0].url.starts_with("https://test.bitpay.com/tokens?guid="));
        assert!(requests[0].header("X-Signature").is_some());
        assert!(requests[0].body.is_none());
    }

    #[test]
    fn refresh_replaces_previous_tokens() {
        let tokens = HashMap::from([("a".to_string(), "1".to_string())]);
        let mut c = Client::with_transport(
            ClientOptions::new(BASE_URI).with_tokens(tokens),
            FakeTransport::default()
                .reply(200, r#"{"data":[{"b":"2"}]}"#)
                .reply(200, r#"{"data":[{"b":"2"}]}"#),
        )
        .unwrap();

        c.refresh_tokens().unwrap();
        assert_eq!(c.tokens().get("a"), None);

        let err = c.get_token("a").unwrap_err();
        assert!(matches!(err, BitPayError::NotAuthorized { facade } if facade == "a"));
    }

    #[test]
    fn get_token_always_refreshes() {
        let mut c = client(
            FakeTransport::default()
                .reply(200, r#"{"data":[{"pos":"t1"}]}"#)
                .reply(200, r#"{"data":[{"pos":"t2"}]}"#),
        );
        assert_eq!(c.get_token("pos").unwrap(), "t1");
        assert_eq!(c.get_token("pos").unwrap(), "t2");
        assert_eq!(c.transport().requests().len(), 2);
    }

    #[test]
    fn create_invoice_posts_signed_body_and_returns_data() {
        let mut c = client(
            FakeTransport::default()
                .reply(200, r#"{"data":[{"pos":"pos-token"}]}"#)
                .reply(200, r#"{"data":{"id":"inv1"}}"#),
        );
        let invoice = c.create_invoice(10.00, "USD").unwrap();
        assert_eq!(invoice.id, "inv1");

        let requests = c.transport().requests();
        assert_eq!(requests.len(), 2);
        let post = &requests[1];
        assert_eq!(post.method, HttpMethod::Post);
        assert_eq!(post.url, "https://test.bitpay.com/invoices");
        assert!(post.header("X-Signature").is_some());
        assert!(post.header("X-Identity").is_some());

        let body = body_of(post);
        assert_eq!(body["price"], 10.0);
        assert_eq!(body["currency"], "USD");
        assert_eq!(body["token"], "pos-token");
        assert_eq!(body["id"], c.client_id());
        assert!(body["guid"].is_string());
    }

    #[test]
    fn create_invoice_keeps_extra_params() {
        let mut c = client(
            FakeTransport::default()
                .reply(200, r#"{"data":[{"merchant":"m-token"}]}"#)
                .reply(200, r#"{"data":{"id":"inv2","orderId":"A1"}}"#),
        );
        let mut params = Map::new();
        params.insert("orderId".into(), json!("A1"));
        let invoice = c
            .create_invoice_for("merchant", "0.000123", "BTC", params)
            .unwrap();
        assert_eq!(invoice.extra["orderId"], "A1");

        let body = body_of(&c.transport().requests()[1]);
        assert_eq!(body["orderId"], "A1");
        assert_eq!(body["price"], "0.000123");
        assert_eq!(body["token"], "m-token");
    }

    #[test]
    fn invalid_price_makes_no_request() {
        let mut c = client(FakeTransport::default());
        let err = c.create_invoice("abc", "USD").unwrap_err();
        assert!(matches!(err, BitPayError::InvalidArgument(_)));
        assert!(c.transport().requests().is_empty());
    }

    #[test]
    fn invalid_currency_makes_no_request() {
        let mut c = client(FakeTransport::default());
        let err = c.create_invoice(10.0, "usd").unwrap_err();
        assert!(matches!(err, BitPayError::InvalidArgument(msg) if msg.contains("Currency")));
        assert!(c.transport().requests().is_empty());
    }

    #[test]
    fn create_invoice_without_facade_token_is_not_authorized() {
        let mut c = client(FakeTransport::default().reply(200, r#"{"data":[{"merchant":"m"}]}"#));
        let err = c.create_invoice(10.0, "USD").unwrap_err();
        assert!(matches!(err, BitPayError::NotAuthorized { facade } if facade == "pos"));
        assert_eq!(c.transport().requests().len(), 1);
    }

    #[test]
    fn get_invoice_appends_token_and_filters() {
        let mut c = client(
            FakeTransport::default()
                .reply(200, r#"{"data":[{"merchant":"m-token"}]}"#)
                .reply(200, r#"{"data":{"id":"inv1","status":"paid"}}"#),
        );
        let invoice = c
            .get_invoice_for("inv1", "merchant", &[("status", "paid"), ("limit", "5")])
            .unwrap();
        assert_eq!(invoice.status.as_deref(), Some("paid"));

        let get = &c.transport().requests()[1];
        assert!(get
            .url
            .starts_with("https://test.bitpay.com/invoices/inv1?token=m-token&status=paid&limit=5&guid="));
        assert!(get.header("X-Signature").is_some());
    }

    #[test]
    fn get_public_invoice_is_unsigned() {
        let c = client(FakeTransport::default().reply(200, r#"{"data":{"id":"inv1"}}"#));
        let invoice = c.get_public_invoice("inv1").unwrap();
        assert_eq!(invoice.id, "inv1");

        let requests = c.transport().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://test.bitpay.com/invoices/inv1");
        assert!(requests[0].header("X-Signature").is_none());
        assert!(requests[0].header("X-Identity").is_none());
        assert!(requests[0].body.is_none());
    }

    #[test]
    fn connection_failure_leaves_tokens_untouched() {
        let tokens = HashMap::from([("pos".to_string(), "t1".to_string())]);
        let mut c = Client::with_transport(
            ClientOptions::new(BASE_URI).with_tokens(tokens),
            FakeTransport::default().fail("timed out"),
        )
        .unwrap();

        let err = c.create_invoice(10.0, "USD").unwrap_err();
        assert!(matches!(err, BitPayError::Connection(msg) if msg == "timed out"));
        assert_eq!(c.tokens().get("pos"), Some("t1"));
    }

    #[test]
    fn malformed_refresh_leaves_tokens_untouched() {
        let tokens = HashMap::from([("pos".to_string(), "t1".to_string())]);
        let mut c = Client::with_transport(
            ClientOptions::new(BASE_URI).with_tokens(tokens),
            FakeTransport::default().reply(200, r#"{"data":{"pos":"t2"}}"#),
        )
        .unwrap();

        assert!(matches!(c.refresh_tokens().unwrap_err(), BitPayError::Parse(_)));
        assert_eq!(c.tokens().get("pos"), Some("t1"));
    }

    #[test]
    fn error_field_becomes_api_error() {
        let c = client(FakeTransport::default().reply(404, r#"{"error":"Object not found"}"#));
        let err = c.get_public_invoice("missing").unwrap_err();
        match err {
            BitPayError::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Object not found");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn structured_error_field_is_rendered_as_json() {
        let c = client(FakeTransport::default().reply(400, r#"{"error":{"code":"E1"}}"#));
        let err = c.get_public_invoice("inv1").unwrap_err();
        assert!(
            matches!(err, BitPayError::Api { status: 400, message } if message == r#"{"code":"E1"}"#)
        );
    }

    #[test]
    fn non_json_failure_keeps_raw_body() {
        let c = client(FakeTransport::default().reply(502, "Bad Gateway"));
        let err = c.get_public_invoice("inv1").unwrap_err();
        assert!(matches!(err, BitPayError::Api { status: 502, message } if message == "Bad Gateway"));
    }

    #[test]
    fn json_failure_without_error_field_keeps_raw_body() {
        let c = client(FakeTransport::default().reply(500, r#"{"status":"down"}"#));
        let err = c.get_public_invoice("inv1").unwrap_err();
        assert!(
            matches!(err, BitPayError::Api { status: 500, message } if message == r#"{"status":"down"}"#)
        );
    }

    #[test]
    fn malformed_success_body_is_parse_error() {
        let c = client(FakeTransport::default().reply(200, "<html>"));
        let err = c.get_public_invoice("inv1").unwrap_err();
        assert!(matches!(err, BitPayError::Parse(_)));
    }

    #[test]
    fn query_filter_joins_with_leading_ampersand() {
        assert_eq!(query_filter::<&str, &str>(&[]), None);
        assert_eq!(
            query_filter(&[("dateStart", "2024-01-01"), ("limit", "10")]).as_deref(),
            Some("&dateStart=2024-01-01&limit=10")
        );
        assert_eq!(
            query_filter(&[("orderId", "a b")]).as_deref(),
            Some("&orderId=a b")
        );
    }
}
