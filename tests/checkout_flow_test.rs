mod common;

use apothecary_api::entities::{checkout_token, recommendation, recommendation_item};
use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{body_json, TestApp, TestAppOptions};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn issuing_a_link_mints_a_token_and_advances_the_recommendation() {
    let app = TestApp::new().await;
    let patient = app.seed_patient(None, None).await;
    let herb = app.seed_herb("Ginger", 10, dec!(100)).await;
    let rec = app
        .seed_recommendation(patient.id, &[(herb.id, 2, dec!(100))])
        .await;

    let response = app
        .staff_request(
            Method::POST,
            &format!("/api/v1/recommendations/{}/checkout-link", rec.id),
            None,
        )
        .await;
    let body = body_json(response, StatusCode::OK).await;

    let data = &body["data"];
    let token = data["token"].as_str().expect("token in response");
    assert_eq!(
        data["checkout_url"].as_str().unwrap(),
        format!("http://test.local/checkout/{}", token)
    );

    let row = checkout_token::Entity::find_by_id(token.to_string())
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .expect("token persisted");
    let ttl = row.expires_at - row.created_at;
    assert_eq!(ttl.num_days(), 7);
    assert!(row.used_at.is_none());

    let rec = recommendation::Entity::find_by_id(rec.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.status, "payment_pending");
}

#[tokio::test]
async fn reissuing_keeps_earlier_tokens_alive() {
    let app = TestApp::new().await;
    let patient = app.seed_patient(None, None).await;
    let herb = app.seed_herb("Ginger", 10, dec!(100)).await;
    let rec = app
        .seed_recommendation(patient.id, &[(herb.id, 1, dec!(100))])
        .await;

    let uri = format!("/api/v1/recommendations/{}/checkout-link", rec.id);
    let first = body_json(
        app.staff_request(Method::POST, &uri, None).await,
        StatusCode::OK,
    )
    .await;
    let second = body_json(
        app.staff_request(Method::POST, &uri, None).await,
        StatusCode::OK,
    )
    .await;
    assert_ne!(first["data"]["token"], second["data"]["token"]);

    let live = checkout_token::Entity::find()
        .filter(checkout_token::Column::RecommendationId.eq(rec.id))
        .filter(checkout_token::Column::UsedAt.is_null())
        .all(app.state.db.as_ref())
        .await
        .unwrap();
    assert_eq!(live.len(), 2);
}

#[tokio::test]
async fn zero_total_recommendations_are_not_payable() {
    let app = TestApp::new().await;
    let patient = app.seed_patient(None, None).await;
    let herb = app.seed_herb("Ginger", 10, dec!(100)).await;
    let rec = app
        .seed_recommendation(patient.id, &[(herb.id, 1, dec!(0))])
        .await;

    let response = app
        .staff_request(
            Method::POST,
            &format!("/api/v1/recommendations/{}/checkout-link", rec.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn itemless_recommendations_are_not_payable() {
    let app = TestApp::new().await;
    let patient = app.seed_patient(None, None).await;
    let rec = recommendation::ActiveModel {
        id: Set(Uuid::new_v4()),
        practitioner_id: Set(app.staff_id),
        patient_id: Set(patient.id),
        diagnosis: Set(None),
        notes: Set(None),
        total_cost: Set(dec!(100)),
        status: Set("draft".into()),
        notification_channels: Set(None),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(app.state.db.as_ref())
    .await
    .unwrap();

    let response = app
        .staff_request(
            Method::POST,
            &format!("/api/v1/recommendations/{}/checkout-link", rec.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn other_practitioners_may_not_issue_links() {
    let app = TestApp::new().await;
    let patient = app.seed_patient(None, None).await;
    let herb = app.seed_herb("Ginger", 10, dec!(100)).await;
    let rec = app
        .seed_recommendation(patient.id, &[(herb.id, 1, dec!(100))])
        .await;

    let other = Uuid::new_v4().to_string();
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/recommendations/{}/checkout-link", rec.id),
            None,
            &[("x-staff-id", other.as_str()), ("x-staff-role", "practitioner")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let anonymous = app
        .request(
            Method::POST,
            &format!("/api/v1/recommendations/{}/checkout-link", rec.id),
            None,
            &[],
        )
        .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_links_answer_gone() {
    let app = TestApp::new().await;
    let patient = app.seed_patient(None, None).await;
    let herb = app.seed_herb("Ginger", 10, dec!(100)).await;
    let rec = app
        .seed_recommendation(patient.id, &[(herb.id, 1, dec!(100))])
        .await;
    let token = app
        .seed_token(rec.id, Utc::now() - Duration::seconds(1), None)
        .await;

    let summary = app
        .request(Method::GET, &format!("/api/v1/checkout/{}", token.token), None, &[])
        .await;
    assert_eq!(summary.status(), StatusCode::GONE);

    let session = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/{}/session", token.token),
            Some(json!({})),
            &[],
        )
        .await;
    assert_eq!(session.status(), StatusCode::GONE);
}

#[tokio::test]
async fn checkout_summary_lists_priced_lines() {
    let app = TestApp::new().await;
    let patient = app.seed_patient(None, None).await;
    let ginger = app.seed_herb("Ginger", 10, dec!(100)).await;
    let ginseng = app.seed_herb("Ginseng", 5, dec!(50)).await;
    let rec = app
        .seed_recommendation(patient.id, &[(ginger.id, 3, dec!(100)), (ginseng.id, 1, dec!(50))])
        .await;
    let token = app
        .seed_token(rec.id, Utc::now() + Duration::days(7), None)
        .await;

    let body = body_json(
        app.request(Method::GET, &format!("/api/v1/checkout/{}", token.token), None, &[])
            .await,
        StatusCode::OK,
    )
    .await;

    let data = &body["data"];
    assert_eq!(data["total"], json!("350"));
    assert_eq!(data["currency"], "THB");
    assert_eq!(data["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn items_without_a_snapshot_currency_use_the_configured_default() {
    let app = TestApp::new().await;
    let patient = app.seed_patient(None, None).await;
    let herb = app.seed_herb("Ginger", 10, dec!(100)).await;
    let rec = app
        .seed_recommendation(patient.id, &[(herb.id, 2, dec!(100))])
        .await;

    let item = recommendation_item::Entity::find()
        .filter(recommendation_item::Column::RecommendationId.eq(rec.id))
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    let mut active: recommendation_item::ActiveModel = item.into();
    active.currency = Set(String::new());
    active.update(app.state.db.as_ref()).await.unwrap();

    let token = app
        .seed_token(rec.id, Utc::now() + Duration::days(7), None)
        .await;
    let body = body_json(
        app.request(Method::GET, &format!("/api/v1/checkout/{}", token.token), None, &[])
            .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["data"]["currency"], "THB");
}

#[tokio::test]
async fn configured_origins_restrict_cross_origin_access() {
    let app = TestApp::with_options(TestAppOptions {
        cors_allowed_origins: Some("https://clinic.example.com".into()),
        ..Default::default()
    })
    .await;

    let allowed = app
        .request(
            Method::GET,
            "/api/v1/status",
            None,
            &[("origin", "https://clinic.example.com")],
        )
        .await;
    assert_eq!(
        allowed
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("https://clinic.example.com")
    );

    let denied = app
        .request(
            Method::GET,
            "/api/v1/status",
            None,
            &[("origin", "https://evil.example.com")],
        )
        .await;
    assert!(denied
        .headers()
        .get("access-control-allow-origin")
        .is_none());
}

#[tokio::test]
async fn cors_stays_permissive_when_no_origins_are_configured() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::GET,
            "/api/v1/status",
            None,
            &[("origin", "https://anywhere.example.com")],
        )
        .await;
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn price_resolution_falls_back_to_the_default_currency() {
    let app = TestApp::new().await;
    let herb = app.seed_herb("Ginger", 10, dec!(100)).await;
    app.seed_herb_price(herb.id, "USD", dec!(3)).await;

    let explicit = app
        .state
        .services
        .pricing
        .resolve(herb.id, "USD")
        .await
        .unwrap();
    assert_eq!(explicit.unit_price, dec!(3));
    assert_eq!(explicit.resolved_currency, "USD");

    // No EUR row: the default price applies and the resolved currency
    // is the herb's default, never the requested one.
    let fallback = app
        .state
        .services
        .pricing
        .resolve(herb.id, "EUR")
        .await
        .unwrap();
    assert_eq!(fallback.unit_price, dec!(100));
    assert_eq!(fallback.resolved_currency, "THB");
}

#[tokio::test]
async fn hosted_session_carries_metadata_and_returns_redirect() {
    let stripe = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .and(body_string_contains("mode=payment"))
        .and(body_string_contains("metadata%5Btoken%5D="))
        .and(body_string_contains("metadata%5Brecommendation_id%5D="))
        .and(body_string_contains("metadata%5Bpatient_id%5D="))
        .and(body_string_contains("metadata%5Bshipping_address%5D="))
        .and(body_string_contains("line_items%5B0%5D%5Bquantity%5D=3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_123",
            "url": "https://checkout.stripe.example/pay/cs_test_123"
        })))
        .expect(1)
        .mount(&stripe)
        .await;

    let app = TestApp::with_options(TestAppOptions {
        stripe_base: Some(stripe.uri()),
        ..Default::default()
    })
    .await;
    let patient = app.seed_patient(None, None).await;
    let herb = app.seed_herb("Ginger", 10, dec!(100)).await;
    let rec = app
        .seed_recommendation(patient.id, &[(herb.id, 3, dec!(100))])
        .await;
    let token = app
        .seed_token(rec.id, Utc::now() + Duration::days(7), None)
        .await;

    let body = body_json(
        app.request(
            Method::POST,
            &format!("/api/v1/checkout/{}/session", token.token),
            Some(json!({
                "shipping_address": "1 Herb Lane",
                "shipping_city": "Bangkok",
                "shipping_postal_code": "10110",
                "shipping_phone": "+66800000000"
            })),
            &[],
        )
        .await,
        StatusCode::OK,
    )
    .await;

    assert_eq!(body["data"]["session_id"], "cs_test_123");
    assert_eq!(
        body["data"]["redirect_url"],
        "https://checkout.stripe.example/pay/cs_test_123"
    );
}

#[tokio::test]
async fn promptpay_retries_confirmation_once_then_succeeds() {
    let stripe = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_qr_1",
            "status": "requires_confirmation"
        })))
        .expect(1)
        .mount(&stripe)
        .await;
    // First confirmation comes back without a QR asset.
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents/pi_qr_1/confirm"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_qr_1",
            "status": "requires_action"
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&stripe)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents/pi_qr_1/confirm"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_qr_1",
            "status": "requires_action",
            "next_action": {
                "promptpay_display_qr_code": { "image_url_png": "https://qr.example/pi_qr_1.png" }
            }
        })))
        .expect(1)
        .mount(&stripe)
        .await;

    let app = TestApp::with_options(TestAppOptions {
        stripe_base: Some(stripe.uri()),
        ..Default::default()
    })
    .await;
    let patient = app.seed_patient(None, None).await;
    let herb = app.seed_herb("Ginger", 10, dec!(100)).await;
    let rec = app
        .seed_recommendation(patient.id, &[(herb.id, 3, dec!(100)), ])
        .await;
    let token = app
        .seed_token(rec.id, Utc::now() + Duration::days(7), None)
        .await;

    let body = body_json(
        app.request(
            Method::POST,
            &format!("/api/v1/checkout/{}/promptpay", token.token),
            Some(json!({})),
            &[],
        )
        .await,
        StatusCode::OK,
    )
    .await;

    assert_eq!(body["data"]["payment_intent_id"], "pi_qr_1");
    assert_eq!(body["data"]["qr_image_url"], "https://qr.example/pi_qr_1.png");
}

#[tokio::test]
async fn promptpay_fails_cleanly_when_no_qr_after_retry() {
    let stripe = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_qr_2",
            "status": "requires_confirmation"
        })))
        .expect(1)
        .mount(&stripe)
        .await;
    // Exactly two confirmation attempts: the original and one retry.
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents/pi_qr_2/confirm"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_qr_2",
            "status": "requires_action"
        })))
        .expect(2)
        .mount(&stripe)
        .await;

    let app = TestApp::with_options(TestAppOptions {
        stripe_base: Some(stripe.uri()),
        ..Default::default()
    })
    .await;
    let patient = app.seed_patient(None, None).await;
    let herb = app.seed_herb("Ginger", 10, dec!(100)).await;
    let rec = app
        .seed_recommendation(patient.id, &[(herb.id, 1, dec!(100))])
        .await;
    let token = app
        .seed_token(rec.id, Utc::now() + Duration::days(7), None)
        .await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/{}/promptpay", token.token),
            Some(json!({})),
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    // No local side effects: the token is still live.
    let row = checkout_token::Entity::find_by_id(token.token.clone())
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert!(row.used_at.is_none());
}
