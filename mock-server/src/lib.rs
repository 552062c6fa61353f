//! In-memory stand-in for the BitPay REST API.
//!
//! Implements pairing, token listing and invoice create/fetch. Signed
//! endpoints verify `X-Signature` against `X-Identity` over
//! `http://{host}{path_and_query}{body}`, and tokens are bound to the SIN
//! derived from the identity that paired them. Every signed request must
//! carry a `guid` (query for GET, body for POST) that has not been seen
//! before.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use k256::ecdsa::{signature::Verifier, Signature, VerifyingKey};
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    pub url: String,
    pub status: String,
    pub price: f64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip)]
    pub owner: String,
}

impl Invoice {
    fn public_view(&self) -> Value {
        json!({
            "id": self.id,
            "url": self.url,
            "status": self.status,
            "price": self.price,
            "currency": self.currency,
        })
    }
}

#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub token: String,
    pub facade: String,
    pub sin: String,
}

#[derive(Debug, Default)]
pub struct MockState {
    /// In issue order.
    pub tokens: Vec<IssuedToken>,
    pub invoices: HashMap<String, Invoice>,
    pub nonces: HashSet<String>,
}

impl MockState {
    fn token(&self, token: &str) -> Option<&IssuedToken> {
        self.tokens.iter().find(|issued| issued.token == token)
    }

    /// Record `guid` as used; a repeat is a replay.
    fn claim_nonce(&mut self, guid: &str) -> Result<(), ApiFailure> {
        if self.nonces.insert(guid.to_string()) {
            Ok(())
        } else {
            Err(ApiFailure::unauthorized("Nonce already used"))
        }
    }
}

pub type Db = Arc<RwLock<MockState>>;

/// Error answer in the API's `{"error": "..."}` shape.
#[derive(Debug)]
pub struct ApiFailure {
    status: StatusCode,
    message: String,
}

impl ApiFailure {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiFailure>;

pub fn app() -> Router {
    app_with_state(Db::default())
}

pub fn app_with_state(db: Db) -> Router {
    Router::new()
        .route("/tokens", get(list_tokens).post(create_token))
        .route("/invoices", post(create_invoice))
        .route("/invoices/{id}", get(get_invoice))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "mock BitPay API listening");
    }
    axum::serve(listener, app()).await
}

/// SIN of a compressed public key:
/// `base58(0x0F 0x02 || RIPEMD160(SHA256(key)) || checksum[..4])`.
pub fn sin_from_public_key(compressed: &[u8]) -> String {
    let hash = Ripemd160::digest(Sha256::digest(compressed));
    let mut payload = vec![0x0F, 0x02];
    payload.extend_from_slice(&hash);
    let checksum = Sha256::digest(Sha256::digest(&payload));
    payload.extend_from_slice(&checksum[..4]);
    bs58::encode(payload).into_string()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ApiFailure> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiFailure::unauthorized(format!("Missing header {name}")))
}

/// Verify the request signature and return the signer's SIN.
fn authenticate(headers: &HeaderMap, uri: &Uri, body: &str) -> Result<String, ApiFailure> {
    let identity = header(headers, "x-identity")?;
    let signature = header(headers, "x-signature")?;
    let host = header(headers, "host")?;
    let target = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    let key_bytes =
        hex::decode(identity).map_err(|_| ApiFailure::unauthorized("Invalid identity"))?;
    let key = VerifyingKey::from_sec1_bytes(&key_bytes)
        .map_err(|_| ApiFailure::unauthorized("Invalid identity"))?;
    let signature = hex::decode(signature)
        .ok()
        .and_then(|der| Signature::from_der(&der).ok())
        .ok_or_else(|| ApiFailure::unauthorized("Invalid signature"))?;

    let message = format!("http://{host}{target}{body}");
    key.verify(message.as_bytes(), &signature)
        .map_err(|_| ApiFailure::unauthorized("Invalid signature"))?;

    Ok(sin_from_public_key(&key_bytes))
}

fn query_guid(query: &HashMap<String, String>) -> Result<&str, ApiFailure> {
    query
        .get("guid")
        .map(String::as_str)
        .ok_or_else(|| ApiFailure::unauthorized("Missing guid"))
}

fn parse_body(body: &str) -> Result<Map<String, Value>, ApiFailure> {
    match serde_json::from_str(body) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ApiFailure::bad_request("Body must be a JSON object")),
    }
}

fn str_field<'a>(body: &'a Map<String, Value>, name: &str) -> Result<&'a str, ApiFailure> {
    body.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ApiFailure::bad_request(format!("Missing field {name}")))
}

fn valid_pairing_code(code: &str) -> bool {
    code.len() == 7 && code.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Pairing. A `pairingCode` grants a `pos` token; without one the requested
/// `facade` is granted immediately.
async fn create_token(State(db): State<Db>, body: String) -> ApiResult {
    let body = parse_body(&body)?;
    let sin = str_field(&body, "id")?.to_string();
    str_field(&body, "guid")?;

    let mut entry = Map::new();
    let facade = match body.get("pairingCode").and_then(Value::as_str) {
        Some(code) if valid_pairing_code(code) => {
            entry.insert("pairingCode".into(), json!(code));
            "pos".to_string()
        }
        Some(_) => return Err(ApiFailure::bad_request("Pairing code is invalid")),
        None => body
            .get("facade")
            .and_then(Value::as_str)
            .unwrap_or("pos")
            .to_string(),
    };

    let token = Uuid::new_v4().simple().to_string();
    db.write().await.tokens.push(IssuedToken {
        token: token.clone(),
        facade: facade.clone(),
        sin,
    });

    entry.insert("token".into(), json!(token));
    entry.insert("facade".into(), json!(facade));
    Ok(Json(json!({ "data": [entry] })))
}

async fn list_tokens(
    State(db): State<Db>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    uri: Uri,
) -> ApiResult {
    let sin = authenticate(&headers, &uri, "")?;
    let guid = query_guid(&query)?;
    let mut state = db.write().await;
    state.claim_nonce(guid)?;
    let data: Vec<Value> = state
        .tokens
        .iter()
        .filter(|issued| issued.sin == sin)
        .map(|issued| {
            let mut entry = Map::new();
            entry.insert(issued.facade.clone(), json!(issued.token));
            Value::Object(entry)
        })
        .collect();
    Ok(Json(json!({ "data": data })))
}

/// Check that `token` exists and was issued to `sin`.
fn check_token(state: &MockState, token: &str, sin: &str) -> Result<(), ApiFailure> {
    match state.token(token) {
        Some(issued) if issued.sin == sin => Ok(()),
        _ => Err(ApiFailure::unauthorized("Invalid token")),
    }
}

async fn create_invoice(
    State(db): State<Db>,
    headers: HeaderMap,
    uri: Uri,
    body: String,
) -> ApiResult {
    let sin = authenticate(&headers, &uri, &body)?;
    let fields = parse_body(&body)?;
    if str_field(&fields, "id")? != sin {
        return Err(ApiFailure::unauthorized("Identity does not match client id"));
    }
    let guid = str_field(&fields, "guid")?;
    let token = str_field(&fields, "token")?;
    let currency = str_field(&fields, "currency")?.to_string();
    let price = match fields.get("price") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ApiFailure::bad_request("Missing or invalid price"))?;

    let mut state = db.write().await;
    check_token(&state, token, &sin)?;
    state.claim_nonce(guid)?;

    let id = Uuid::new_v4().simple().to_string();
    let host = header(&headers, "host")?;
    let invoice = Invoice {
        url: format!("http://{host}/invoice?id={id}"),
        id: id.clone(),
        status: "new".to_string(),
        price,
        currency,
        order_id: fields
            .get("orderId")
            .and_then(Value::as_str)
            .map(str::to_string),
        owner: sin,
    };
    state.invoices.insert(id, invoice.clone());

    Ok(Json(json!({ "data": invoice })))
}

/// With `?token=` the request must be signed and the full invoice is
/// returned; without it only the public view is.
async fn get_invoice(
    State(db): State<Db>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    uri: Uri,
) -> ApiResult {
    let mut state = db.write().await;
    let invoice = state
        .invoices
        .get(&id)
        .cloned()
        .ok_or_else(|| ApiFailure::new(StatusCode::NOT_FOUND, "Object not found"))?;

    match query.get("token") {
        Some(token) => {
            let sin = authenticate(&headers, &uri, "")?;
            let guid = query_guid(&query)?;
            check_token(&state, token, &sin)?;
            if invoice.owner != sin {
                return Err(ApiFailure::unauthorized("Invoice belongs to another client"));
            }
            state.claim_nonce(guid)?;
            Ok(Json(json!({ "data": invoice })))
        }
        None => Ok(Json(json!({ "data": invoice.public_view() }))),
    }
}
