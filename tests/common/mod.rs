#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::FromRequest,
    http::{Request, Response},
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use xmrpos_core::adapters::InMemoryLedgerStore;
use xmrpos_core::domain::SettlementReport;
use xmrpos_core::ports::{Gateway, GatewayError};
use xmrpos_core::services::CallbackTokens;
use xmrpos_core::AppState;

pub const CALLBACK_SECRET: &str = "integration-callback-secret";
pub const CALLBACK_BASE: &str = "http://pos.test/callback";

/// Gateway double: hands out sequential addresses, records the callback URLs
/// it was given and serves scripted status reports.
#[derive(Default)]
pub struct FakeGateway {
    pub down: AtomicBool,
    opened: AtomicUsize,
    pub callback_urls: Mutex<Vec<String>>,
    pub reports: Mutex<HashMap<String, SettlementReport>>,
}

impl FakeGateway {
    pub fn last_callback_path(&self) -> String {
        let urls = self.callback_urls.lock().unwrap();
        let url = urls.last().expect("no receive request was opened");
        url.strip_prefix("http://pos.test").unwrap().to_string()
    }

    pub fn set_report(&self, address: &str, report: SettlementReport) {
        self.reports
            .lock()
            .unwrap()
            .insert(address.to_string(), report);
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn open_receive(
        &self,
        _amount: i64,
        _description: &str,
        callback_url: &str,
    ) -> Result<String, GatewayError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(GatewayError::Status(502));
        }
        let n = self.opened.fetch_add(1, Ordering::SeqCst);
        self.callback_urls
            .lock()
            .unwrap()
            .push(callback_url.to_string());
        Ok(format!("84subaddress{}", n))
    }

    async fn receive_status(&self, address: &str) -> Result<SettlementReport, GatewayError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(GatewayError::Timeout);
        }
        self.reports
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or(GatewayError::Status(404))
    }
}

pub struct TestEngine {
    pub store: Arc<InMemoryLedgerStore>,
    pub gateway: Arc<FakeGateway>,
    pub state: AppState,
}

pub fn engine() -> TestEngine {
    let store = Arc::new(InMemoryLedgerStore::new());
    let gateway = Arc::new(FakeGateway::default());
    let state = AppState::new(
        store.clone(),
        gateway.clone(),
        CallbackTokens::new(CALLBACK_SECRET, CALLBACK_BASE),
    );
    TestEngine {
        store,
        gateway,
        state,
    }
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn device_request(method: &str, uri: &str, vendor_id: i64, pos_id: i64, body: Option<&Value>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-vendor-id", vendor_id.to_string())
        .header("x-pos-id", pos_id.to_string())
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap()
}

pub async fn body_json<B>(response: Response<B>) -> Value
where
    B: axum::body::HttpBody + Send + 'static,
    B::Data: Send,
    B::Error: Into<axum::BoxError>,
{
    let (_, body) = response.into_parts();
    let bytes = Bytes::from_request(Request::new(body), &()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// MoneroPay callback body carrying a single transfer.
pub fn callback_body(expected: i64, hash: &str, amount: i64, confirmations: i64, unlocked: i64) -> Value {
    serde_json::json!({
        "amount": {
            "expected": expected,
            "covered": { "total": amount, "unlocked": unlocked }
        },
        "complete": amount >= expected,
        "description": "espresso",
        "created_at": "2026-10-01T10:00:00Z",
        "transaction": {
            "amount": amount,
            "confirmations": confirmations,
            "double_spend_seen": false,
            "fee": 30000000,
            "height": 3200000,
            "timestamp": "2026-10-01T10:01:00Z",
            "tx_hash": hash,
            "unlock_time": 0,
            "locked": confirmations < 10
        }
    })
}
