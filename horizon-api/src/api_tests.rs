use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::{NaiveDate, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use tower::ServiceExt;

use horizon_booking::{
    BookedItem, BookingConfig, BookingCoordinator, BookingDetails, BookingDraft, CustomerContact,
    PaymentInfo, RecoveryQueue,
};
use horizon_core::{DocumentStore, FixedIdentity};
use horizon_shared::{BookingType, Masked, PaymentStatus};
use horizon_store::MemoryStore;

use crate::app;
use crate::middleware::auth::{AdminClaims, CustomerClaims, ROLE_ADMIN, ROLE_CUSTOMER};
use crate::state::{AppState, AuthSettings};

fn test_state() -> AppState {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let coordinator = BookingCoordinator::new(
        store,
        Arc::new(FixedIdentity::anonymous()),
        BookingConfig::default(),
    );
    AppState {
        coordinator,
        recovery: Arc::new(RecoveryQueue::new(3)),
        auth: AuthSettings {
            secret: "test-secret".to_string(),
            expiration_seconds: 3600,
        },
    }
}

fn customer_token(state: &AppState, user: &str) -> String {
    let claims = CustomerClaims {
        sub: user.to_string(),
        email: format!("{}@example.com", user),
        role: ROLE_CUSTOMER.to_string(),
        exp: (Utc::now().timestamp() + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.auth.secret.as_bytes()),
    )
    .unwrap()
}

fn admin_token(state: &AppState, permissions: &[&str]) -> String {
    let claims = AdminClaims {
        sub: "admin-1".to_string(),
        email: "ops@example.com".to_string(),
        role: ROLE_ADMIN.to_string(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
        exp: (Utc::now().timestamp() + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.auth.secret.as_bytes()),
    )
    .unwrap()
}

fn draft_body(booking_type: BookingType, amount: i64) -> String {
    let draft = BookingDraft {
        user_id: None,
        booking_type,
        item: BookedItem {
            id: "item-7".to_string(),
            title: "Old Manali Ride".to_string(),
            cover_image: None,
        },
        contact: CustomerContact {
            name: "Dev Kapoor".to_string(),
            email: Masked("dev@example.com".to_string()),
            phone: Masked("+91-97-2222-2222".to_string()),
        },
        details: BookingDetails {
            start_date: NaiveDate::from_ymd_opt(2026, 10, 2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 10, 4).unwrap(),
            participant_count: 1,
            participants: Vec::new(),
            emergency_contact: None,
            special_requests: Some("helmet size M".to_string()),
        },
        payment: PaymentInfo {
            token: "pay_T3stT0k3n".to_string(),
            amount,
            currency: "INR".to_string(),
            status: PaymentStatus::Paid,
        },
    };
    serde_json::to_string(&draft).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_is_open() {
    let state = test_state();
    let response = app(state)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_create_booking_requires_auth() {
    let state = test_state();
    let request = Request::post("/v1/bookings")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(draft_body(BookingType::Tour, 25_000)))
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_then_list_roundtrip() {
    let state = test_state();
    let token = customer_token(&state, "user-dev");

    let request = Request::post("/v1/bookings")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::from(draft_body(BookingType::Tour, 25_000)))
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let booking_id = created["booking_id"].as_str().unwrap().to_string();
    assert!(booking_id.starts_with("HR-BT-"), "got {}", booking_id);
    assert_eq!(created["status"], "confirmed");

    let request = Request::get("/v1/bookings")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], booking_id.as_str());
}

#[tokio::test]
async fn test_draft_claiming_other_owner_is_forbidden() {
    let state = test_state();
    let token = customer_token(&state, "me");

    let mut draft: serde_json::Value =
        serde_json::from_str(&draft_body(BookingType::Tour, 25_000)).unwrap();
    draft["user_id"] = serde_json::Value::String("other-user".to_string());

    let request = Request::post("/v1/bookings")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::from(draft.to_string()))
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_status_update_roundtrip() {
    let state = test_state();
    let token = customer_token(&state, "user-dev");

    let request = Request::post("/v1/bookings")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::from(draft_body(BookingType::Vehicle, 8_000)))
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    let booking_id = body_json(response).await["booking_id"]
        .as_str()
        .unwrap()
        .to_string();

    let request = Request::post(format!("/v1/bookings/{}/status", booking_id))
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::from(r#"{"status":"cancelled"}"#))
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::get(format!("/v1/bookings/{}", booking_id))
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "cancelled");
}

#[tokio::test]
async fn test_analytics_needs_admin_role() {
    let state = test_state();

    let customer = customer_token(&state, "user-dev");
    let request = Request::get("/v1/analytics/summary")
        .header(header::AUTHORIZATION, format!("Bearer {}", customer))
        .body(Body::empty())
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Commit one booking, then read the totals as an admin.
    let token = customer_token(&state, "user-dev");
    let request = Request::post("/v1/bookings")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::from(draft_body(BookingType::Vehicle, 10_000)))
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let admin = admin_token(&state, &["analytics.read"]);
    let request = Request::get("/v1/analytics/summary")
        .header(header::AUTHORIZATION, format!("Bearer {}", admin))
        .body(Body::empty())
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total_bookings"], 1);
    assert_eq!(body["total_revenue"], 10_000);
    assert_eq!(body["bookings_by_type"]["vehicle"], 1);
}

#[tokio::test]
async fn test_analytics_needs_read_permission() {
    let state = test_state();
    let admin = admin_token(&state, &[]);
    let request = Request::get("/v1/analytics/summary")
        .header(header::AUTHORIZATION, format!("Bearer {}", admin))
        .body(Body::empty())
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_missing_booking_is_404() {
    let state = test_state();
    let token = customer_token(&state, "user-dev");
    let request = Request::get("/v1/bookings/HR-BT-NOPE-000000")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
