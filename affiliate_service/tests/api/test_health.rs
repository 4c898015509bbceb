use affiliate_service::api::health::{HealthResponse, router};
use axum::Router;
use axum_test::TestServer;
use referral_ledger::paths::{self, HEALTH};

fn create_health_app() -> Router {
    Router::new().nest(HEALTH, router())
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_health_app();
    let server = TestServer::new(app).unwrap();

    let response = server.get(HEALTH).await;
    response.assert_status_ok();

    let body: HealthResponse = response.json();
    assert_eq!(body.status, "healthy");
    assert_eq!(body.service, "affiliate");
    assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
    assert!(body.timestamp.timestamp() > 0);
}

#[tokio::test]
async fn test_health_is_served_by_the_full_app() {
    let server = crate::common::in_memory_server();

    let response = server.get(HEALTH).await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert!(body["status"].is_string());
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_openapi_document_lists_ledger_routes() {
    let server = crate::common::in_memory_server();

    let response = server.get("/api-doc/openapi.json").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert!(body["paths"].get(HEALTH).is_some());
    assert!(body["paths"].get(paths::PAYOUTS).is_some());
    assert!(body["paths"].get(paths::EARNINGS).is_some());
    assert!(body["paths"].get("/internal/referrals/{id}/complete").is_some());
}
