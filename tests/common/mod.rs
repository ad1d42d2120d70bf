#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use chroma3d_store::{
    app_router,
    config::AppConfig,
    db::{establish_connection_with_config, run_migrations, DbConfig},
    handlers::AppServices,
    rate_limiter::{default_policies, RateLimitConfig, RateLimitLayer},
    services::{
        notifications::{NotificationQueue, Notifier, NotifyError},
        orders::OrderWithItems,
        payments::{GatewayError, PaymentGateway, PaymentInfo, Preference},
        products::{CreateProductRequest, ProductView},
    },
    signing::TokenSigner,
    AppState,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

pub const ADMIN_EMAIL: &str = "owner@chroma3d.com";
pub const ADMIN_KEY: &str = "test-admin-key";
const SIGNING_SECRET: &str = "test-signing-secret-0123456789abcdef";
const ADMIN_TOKEN_SECRET: &str = "test-admin-token-secret-0123456789ab";

/// Gateway double: preferences always succeed, payment lookups answer from a script.
#[derive(Default)]
pub struct ScriptedGateway {
    payments: Mutex<HashMap<String, PaymentInfo>>,
    lookups: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn script(&self, payment_id: &str, status: &str, external_reference: &str) {
        self.payments.lock().unwrap().insert(
            payment_id.to_string(),
            PaymentInfo {
                status: status.to_string(),
                external_reference: external_reference.to_string(),
            },
        );
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_preference(&self, order: &OrderWithItems) -> Result<Preference, GatewayError> {
        let id = format!("pref-{}", order.order.short_id());
        Ok(Preference {
            redirect_url: format!("https://mp.test/checkout?pref_id={}", id),
            id,
        })
    }

    async fn payment_info(&self, payment_id: &str) -> Result<PaymentInfo, GatewayError> {
        self.lookups.lock().unwrap().push(payment_id.to_string());
        self.payments
            .lock()
            .unwrap()
            .get(payment_id)
            .cloned()
            .ok_or_else(|| GatewayError::Status {
                status: 404,
                body: "payment not found".into(),
            })
    }
}

/// Notifier that keeps every delivered message.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// `name=value` pair from the first `Set-Cookie` for `name`
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .find(|pair| pair.starts_with(&format!("{}=", name)))
            .map(str::to_string)
    }
}

pub struct TestAppBuilder {
    with_gateway: bool,
    requests_per_window: u32,
}

impl TestAppBuilder {
    /// Payments go through [`ScriptedGateway`] instead of being simulated.
    pub fn with_gateway(mut self) -> Self {
        self.with_gateway = true;
        self
    }

    pub fn requests_per_window(mut self, limit: u32) -> Self {
        self.requests_per_window = limit;
        self
    }

    pub async fn build(self) -> TestApp {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("store.db").display()
        );

        let mut cfg = AppConfig::new(url.clone(), "test");
        cfg.signing_secret = Some(SIGNING_SECRET.into());
        cfg.admin_token_secret = Some(ADMIN_TOKEN_SECRET.into());
        cfg.admin_api_key = Some(ADMIN_KEY.into());
        cfg.admin_allowed_emails = ADMIN_EMAIL.into();
        cfg.rate_limit_requests_per_window = self.requests_per_window;

        let pool = establish_connection_with_config(&DbConfig {
            url,
            max_connections: 4,
            ..Default::default()
        })
        .await
        .expect("failed to open test database");
        run_migrations(&pool).await.expect("migrations");
        let db = Arc::new(pool);

        let gateway = Arc::new(ScriptedGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let (notifications, worker) =
            NotificationQueue::new(notifier.clone(), 1, Duration::from_millis(1));
        tokio::spawn(worker.run());

        let services = AppServices::new(
            db.clone(),
            &cfg,
            self.with_gateway
                .then(|| gateway.clone() as Arc<dyn PaymentGateway>),
            notifications,
        )
        .expect("services");

        let state = AppState {
            db,
            config: Arc::new(cfg),
            services,
        };

        let rl_config = RateLimitConfig::from_app_config(&state.config);
        let window = rl_config.window_duration;
        let rate_limit = RateLimitLayer::new(rl_config).with_policies(default_policies(window));
        let router = app_router(state.clone(), rate_limit);

        TestApp {
            router,
            state,
            gateway,
            notifier,
            signer: TokenSigner::new(SIGNING_SECRET.as_bytes()).expect("signer"),
            _dir: dir,
        }
    }
}

/// Full application over a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<ScriptedGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub signer: TokenSigner,
    _dir: TempDir,
}

impl TestApp {
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder {
            with_gateway: false,
            requests_per_window: 1_000,
        }
    }

    /// Simulated payments, generous rate limits
    pub async fn new() -> Self {
        Self::builder().build().await
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body")
            .to_vec();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(Method::GET, uri, None, &[]).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.request(Method::POST, uri, Some(body), &[]).await
    }

    pub fn admin_token(&self) -> String {
        self.state
            .services
            .admin_tokens
            .issue(ADMIN_EMAIL)
            .expect("admin token")
    }

    pub async fn admin(&self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        let bearer = format!("Bearer {}", self.admin_token());
        self.request(method, uri, body, &[("authorization", bearer.as_str())])
            .await
    }

    pub async fn create_product(&self, name: &str, price: Decimal) -> ProductView {
        self.state
            .services
            .products
            .create(CreateProductRequest {
                name: name.to_string(),
                base_price: price,
                category: "decoracion".into(),
                short_desc: String::new(),
                ready_to_ship: true,
                width_mm: Decimal::ZERO,
                height_mm: Decimal::ZERO,
                depth_mm: Decimal::ZERO,
                images: Vec::new(),
                variants: Vec::new(),
            })
            .await
            .expect("create product")
    }

    pub fn external_reference(&self, order_id: Uuid) -> String {
        self.signer.external_reference(order_id)
    }

    /// Waits for the notification worker to drain.
    pub async fn notifications(&self, expected: usize) -> Vec<String> {
        for _ in 0..50 {
            let messages = self.notifier.messages();
            if messages.len() >= expected {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.notifier.messages()
    }
}

pub fn data(response: &TestResponse) -> Value {
    response.json()["data"].clone()
}

/// Decimal fields serialize as strings; compares them numerically.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}
