#![allow(dead_code)]

use std::sync::Arc;

use apothecary_api::{
    build_router,
    config::{AppConfig, EmailConfig, LineConfig, StripeConfig},
    db,
    entities::{checkout_token, herb, herb_price, patient, recommendation, recommendation_item},
    events,
    stripe::StripeClient,
    AppState,
};
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use sha2::Sha256;
use tower::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// External service endpoints the test app should talk to. Point them
/// at wiremock servers to observe outbound traffic.
#[derive(Default)]
pub struct TestAppOptions {
    pub stripe_base: Option<String>,
    pub email_base: Option<String>,
    pub line_base: Option<String>,
    pub cors_allowed_origins: Option<String>,
}

/// Helper harness for spinning up an application backed by a throwaway
/// SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub staff_id: Uuid,
    _event_task: tokio::task::JoinHandle<()>,
    _tmp: tempfile::TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_options(TestAppOptions::default()).await
    }

    pub async fn with_options(options: TestAppOptions) -> Self {
        let tmp = tempfile::TempDir::new().expect("create temp dir");
        let db_path = tmp.path().join("apothecary_test.db");

        let cfg = AppConfig {
            database_url: format!("sqlite://{}?mode=rwc", db_path.display()),
            site_url: "http://test.local".into(),
            host: "127.0.0.1".into(),
            port: 18_080,
            environment: "test".into(),
            log_level: "info".into(),
            log_json: false,
            auto_migrate: true,
            checkout_token_ttl_days: 7,
            default_currency: "THB".into(),
            event_channel_capacity: 256,
            reconciliation_poll_secs: 1,
            cors_allowed_origins: options.cors_allowed_origins,
            db_max_connections: 1,
            db_min_connections: 1,
            db_connect_timeout_secs: 5,
            db_idle_timeout_secs: 60,
            db_acquire_timeout_secs: 5,
            stripe: StripeConfig {
                secret_key: "sk_test_key".into(),
                webhook_secret: WEBHOOK_SECRET.into(),
                webhook_tolerance_secs: 300,
                api_base: options
                    .stripe_base
                    .unwrap_or_else(|| "http://stripe.invalid".into()),
            },
            email: EmailConfig {
                api_key: "re_test_key".into(),
                from_email: "orders@test.local".into(),
                api_base: options
                    .email_base
                    .unwrap_or_else(|| "http://resend.invalid".into()),
            },
            line: LineConfig {
                channel_access_token: "line_test_token".into(),
                api_base: options
                    .line_base
                    .unwrap_or_else(|| "http://line.invalid".into()),
            },
        };

        let pool = db::establish_connection(&cfg)
            .await
            .expect("failed to create test database");
        db::ensure_schema(&pool)
            .await
            .expect("failed to bootstrap schema in tests");

        let db_arc = Arc::new(pool);
        let cfg = Arc::new(cfg);
        let (event_tx, event_rx) = events::event_channel(cfg.event_channel_capacity);

        let stripe = StripeClient::new(cfg.stripe.secret_key.clone(), cfg.stripe.api_base.clone());
        let state = AppState::new(db_arc, cfg, event_tx, stripe);

        // The event loop is wired without the notifier so tests drive
        // notifications explicitly and assertions stay deterministic.
        let event_task = tokio::spawn(events::process_events(event_rx, None));

        let router = build_router(state.clone());

        Self {
            router,
            state,
            staff_id: Uuid::new_v4(),
            _event_task: event_task,
            _tmp: tmp,
        }
    }

    /// Send a request against the router with optional JSON body and
    /// extra headers.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Staff request carrying the gateway identity headers.
    pub async fn staff_request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let staff_id = self.staff_id.to_string();
        self.request(
            method,
            uri,
            body,
            &[("x-staff-id", staff_id.as_str()), ("x-staff-role", "admin")],
        )
        .await
    }

    /// Delivers a processor event with a valid Stripe-style signature.
    pub async fn deliver_webhook(&self, event: &Value) -> axum::response::Response {
        let payload = serde_json::to_vec(event).expect("serialize event");
        let header = sign_payload(&payload, WEBHOOK_SECRET, Utc::now().timestamp());
        self.deliver_raw_webhook(payload, &header).await
    }

    pub async fn deliver_raw_webhook(
        &self,
        payload: Vec<u8>,
        signature_header: &str,
    ) -> axum::response::Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json")
            .header("Stripe-Signature", signature_header)
            .body(Body::from(payload))
            .expect("build webhook request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook delivery")
    }

    pub async fn seed_patient(&self, email: Option<&str>, line_user_id: Option<&str>) -> patient::Model {
        patient::ActiveModel {
            id: Set(Uuid::new_v4()),
            full_name: Set("Test Patient".into()),
            email: Set(email.map(str::to_string)),
            line_user_id: Set(line_user_id.map(str::to_string)),
            default_shipping_address: Set(None),
            default_shipping_city: Set(None),
            default_shipping_postal_code: Set(None),
            default_shipping_phone: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed patient")
    }

    pub async fn seed_herb(&self, name: &str, stock: i32, default_price: Decimal) -> herb::Model {
        herb::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.into()),
            thai_name: Set(None),
            description: Set(None),
            stock_quantity: Set(stock),
            default_price: Set(default_price),
            default_currency: Set("THB".into()),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed herb")
    }

    pub async fn seed_herb_price(
        &self,
        herb_id: Uuid,
        currency: &str,
        unit_price: Decimal,
    ) -> herb_price::Model {
        herb_price::ActiveModel {
            id: Set(Uuid::new_v4()),
            herb_id: Set(herb_id),
            currency: Set(currency.into()),
            unit_price: Set(unit_price),
            cost_per_unit: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed herb price")
    }

    /// Seeds a recommendation with the given (herb, quantity, price)
    /// lines, owned by `self.staff_id`.
    pub async fn seed_recommendation(
        &self,
        patient_id: Uuid,
        lines: &[(Uuid, i32, Decimal)],
    ) -> recommendation::Model {
        let total: Decimal = lines
            .iter()
            .map(|(_, qty, price)| *price * Decimal::from(*qty))
            .sum();

        let rec = recommendation::ActiveModel {
            id: Set(Uuid::new_v4()),
            practitioner_id: Set(self.staff_id),
            patient_id: Set(patient_id),
            diagnosis: Set(Some("cold pattern".into())),
            notes: Set(None),
            total_cost: Set(total),
            status: Set("draft".into()),
            notification_channels: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed recommendation");

        for (herb_id, quantity, unit_price) in lines {
            recommendation_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                recommendation_id: Set(rec.id),
                herb_id: Set(*herb_id),
                quantity: Set(*quantity),
                unit_price: Set(*unit_price),
                currency: Set("THB".into()),
                dosage_note: Set(None),
                created_at: Set(Utc::now()),
            }
            .insert(self.state.db.as_ref())
            .await
            .expect("seed recommendation item");
        }

        rec
    }

    /// Inserts a checkout token directly, bypassing the issuer.
    pub async fn seed_token(
        &self,
        recommendation_id: Uuid,
        expires_at: DateTime<Utc>,
        used_at: Option<DateTime<Utc>>,
    ) -> checkout_token::Model {
        checkout_token::ActiveModel {
            token: Set(format!("tok{}", Uuid::new_v4().simple())),
            recommendation_id: Set(recommendation_id),
            created_at: Set(Utc::now() - Duration::minutes(1)),
            expires_at: Set(expires_at),
            used_at: Set(used_at),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed checkout token")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Computes a `Stripe-Signature` header value over the payload.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

/// Reads a response body as JSON, asserting the expected status first.
pub async fn body_json(response: axum::response::Response, expected: StatusCode) -> Value {
    assert_eq!(response.status(), expected, "unexpected response status");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}
