//! End-to-end tests for the HTTP API channel
//!
//! A local axum server stands in for both the identity provider's token
//! endpoint and the mail API's `sendMail` endpoint.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
};
use domain_notifications::*;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Stub Server
// ============================================================================

#[derive(Clone)]
struct Stub {
    token_status: StatusCode,
    send_status: StatusCode,
    token_calls: Arc<AtomicUsize>,
    send_calls: Arc<AtomicUsize>,
    last_send: Arc<Mutex<Option<RecordedSend>>>,
}

#[derive(Debug, Clone)]
struct RecordedSend {
    mailbox: String,
    authorization: Option<String>,
    body: Value,
}

impl Stub {
    fn new(token_status: StatusCode, send_status: StatusCode) -> Self {
        Self {
            token_status,
            send_status,
            token_calls: Arc::new(AtomicUsize::new(0)),
            send_calls: Arc::new(AtomicUsize::new(0)),
            last_send: Arc::new(Mutex::new(None)),
        }
    }

    fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    fn last_send(&self) -> Option<RecordedSend> {
        self.last_send.lock().unwrap().clone()
    }
}

async fn issue_token(State(stub): State<Stub>) -> (StatusCode, Json<Value>) {
    stub.token_calls.fetch_add(1, Ordering::SeqCst);
    if stub.token_status.is_success() {
        (
            StatusCode::OK,
            Json(json!({
                "access_token": "stub-access-token",
                "token_type": "Bearer",
                "expires_in": 3600
            })),
        )
    } else {
        (
            stub.token_status,
            Json(json!({
                "error": "invalid_client",
                "error_description": "client secret is invalid"
            })),
        )
    }
}

async fn send_mail(
    State(stub): State<Stub>,
    Path(mailbox): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, String) {
    stub.send_calls.fetch_add(1, Ordering::SeqCst);
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    *stub.last_send.lock().unwrap() = Some(RecordedSend {
        mailbox,
        authorization,
        body,
    });

    let body = if stub.send_status.is_success() {
        String::new()
    } else {
        r#"{"error":{"code":"ErrorAccessDenied"}}"#.to_string()
    };
    (stub.send_status, body)
}

/// Start the stub and return delivery config pointing at it.
async fn start_stub(stub: Stub) -> DeliveryConfig {
    let app = Router::new()
        .route("/{tenant}/oauth2/v2.0/token", post(issue_token))
        .route("/v1.0/users/{mailbox}/sendMail", post(send_mail))
        .with_state(stub);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    DeliveryConfig {
        authority_url: format!("http://{addr}"),
        graph_url: format!("http://{addr}/v1.0"),
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(2),
        send_deadline: Duration::from_secs(5),
        ..Default::default()
    }
}

fn api_credentials() -> CredentialSet {
    CredentialSet {
        client_id: Some("client".to_string()),
        client_secret: Some("secret".to_string()),
        tenant_id: Some("tenant-1".to_string()),
        mailbox: Some("noreply@example.com".to_string()),
        ..Default::default()
    }
}

async fn service_against(stub: &Stub) -> NotificationService {
    let delivery = start_stub(stub.clone()).await;
    NotificationService::new(api_credentials(), delivery, NotificationServiceConfig::default())
        .unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_welcome_email_over_http_api() {
    let stub = Stub::new(StatusCode::OK, StatusCode::ACCEPTED);
    let service = service_against(&stub).await;

    let result = service.send_welcome_email("a@b.com", "Jo").await.unwrap();

    assert!(result.success);
    assert!(
        result
            .message_id
            .as_deref()
            .is_some_and(|id| id.starts_with("graph-welcome-"))
    );
    assert_eq!(stub.token_calls(), 1);
    assert_eq!(stub.send_calls(), 1);
    assert_eq!(
        service.initialization_state(),
        InitializationState::Ready(ChannelKind::HttpApi)
    );

    let sent = stub.last_send().unwrap();
    assert_eq!(sent.mailbox, "noreply@example.com");
    assert_eq!(sent.authorization.as_deref(), Some("Bearer stub-access-token"));
    assert_eq!(sent.body["message"]["subject"], "Welcome to Courier, Jo!");
    assert_eq!(
        sent.body["message"]["toRecipients"][0]["emailAddress"]["address"],
        "a@b.com"
    );
    assert_eq!(sent.body["saveToSentItems"], false);
}

#[tokio::test]
async fn test_cached_token_serves_later_sends() {
    let stub = Stub::new(StatusCode::OK, StatusCode::ACCEPTED);
    let service = service_against(&stub).await;

    for _ in 0..3 {
        let result = service.send_email("a@b.com", "Hi", "<p>Hi</p>", None).await;
        assert!(result.success);
    }

    assert_eq!(stub.token_calls(), 1);
    assert_eq!(stub.send_calls(), 3);
}

#[tokio::test]
async fn test_rejected_credentials_degrade_to_dev_mode() {
    let stub = Stub::new(StatusCode::UNAUTHORIZED, StatusCode::ACCEPTED);
    let service = service_against(&stub).await;

    let result = service.send_verification_code("a@b.com", "123456").await.unwrap();

    assert!(result.is_dev_mode());
    assert_eq!(service.initialization_state(), InitializationState::Degraded);
    assert_eq!(stub.send_calls(), 0);

    // Degradation is terminal; the token endpoint is not retried.
    service.send_email("a@b.com", "Hi", "<p>Hi</p>", None).await;
    assert_eq!(service.provisioner().attempts(), 1);
}

#[tokio::test]
async fn test_mail_api_rejection_follows_error_policy() {
    let stub = Stub::new(StatusCode::OK, StatusCode::FORBIDDEN);
    let service = service_against(&stub).await;

    let result = service
        .send_payment_failed(
            "a@b.com",
            &PaymentFailedData {
                amount: "$9.99".to_string(),
                ..Default::default()
            },
        )
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("403"));

    let err = service.send_welcome_email("a@b.com", "Jo").await.unwrap_err();
    assert_eq!(err.to_string(), "failed to send welcome email");
    assert_eq!(stub.send_calls(), 2);
}
