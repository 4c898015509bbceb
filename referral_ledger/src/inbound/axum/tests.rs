use super::{
    api_types::{
        ApiAffiliate, ApiCompletedReferral, ApiDashboard, ApiEarningsReport, ApiPayout,
        ApiPayoutReceipt, ApiReferral, ApiReferralPage, ErrorResponse,
    },
    *,
};
use crate::{
    domain::{
        models::{AffiliateStatus, PayoutStatus, ReferralStatus},
        service::LedgerServiceImpl,
    },
    outbound::memory::InMemoryLedger,
};
use axum::{
    Router,
    http::{HeaderName, HeaderValue, StatusCode},
};
use axum_test::TestServer;
use serde_json::json;
use uuid::Uuid;

fn server() -> TestServer {
    let service = LedgerServiceImpl::new_with_defaults(InMemoryLedger::new());
    let app: Router = router(LedgerState::new(service));
    TestServer::new(app).unwrap()
}

fn user_header(user_id: Uuid) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static(USER_ID_HEADER),
        HeaderValue::from_str(&user_id.to_string()).unwrap(),
    )
}

async fn enroll(server: &TestServer, user_id: Uuid) -> ApiAffiliate {
    let (name, value) = user_header(user_id);
    let response = server
        .post("/affiliates")
        .add_header(name, value)
        .json(&json!({}))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

async fn refer(server: &TestServer, affiliate: &ApiAffiliate) -> ApiReferral {
    let response = server
        .post("/internal/referrals")
        .json(&json!({
            "referralCode": affiliate.referral_code.to_lowercase(),
            "referredUserId": Uuid::now_v7(),
            "metadata": { "source": "instagram" }
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

async fn complete(
    server: &TestServer,
    referral: &ApiReferral,
    cents: i64,
) -> axum_test::TestResponse {
    server
        .post(&format!("/internal/referrals/{}/complete", referral.id))
        .json(&json!({
            "orderId": Uuid::now_v7(),
            "discountEligibleAmount": cents
        }))
        .await
}

#[tokio::test]
async fn it_requires_the_user_header() {
    let server = server();

    let response = server.get("/affiliates/me").await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let response = server
        .get("/affiliates/me")
        .add_header(
            HeaderName::from_static(USER_ID_HEADER),
            HeaderValue::from_static("not-a-uuid"),
        )
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: ErrorResponse = response.json();
    assert!(body.message.contains(USER_ID_HEADER));
}

#[tokio::test]
async fn it_enrolls_affiliates_once() {
    let server = server();
    let user_id = Uuid::now_v7();

    let affiliate = enroll(&server, user_id).await;
    assert_eq!(affiliate.user_id, user_id);
    assert_eq!(affiliate.default_allocation.customer_discount, 10);
    assert_eq!(affiliate.default_allocation.affiliate_reward, 5);
    assert_eq!(affiliate.minimum_payout, 2_500);
    assert_eq!(affiliate.status, AffiliateStatus::Active);

    let (name, value) = user_header(user_id);
    let response = server
        .post("/affiliates")
        .add_header(name, value)
        .json(&json!({ "customerDiscount": 12 }))
        .await;
    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn it_rejects_invalid_allocations() {
    let server = server();
    let user_id = Uuid::now_v7();

    let (name, value) = user_header(user_id);
    let response = server
        .post("/affiliates")
        .add_header(name, value)
        .json(&json!({ "customerDiscount": 16 }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    enroll(&server, user_id).await;
    let (name, value) = user_header(user_id);
    let response = server
        .put("/affiliates/me/allocation")
        .add_header(name, value)
        .json(&json!({ "customerDiscount": 20 }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let (name, value) = user_header(user_id);
    let response = server
        .put("/affiliates/me/allocation")
        .add_header(name, value)
        .json(&json!({ "customerDiscount": 15 }))
        .await;
    response.assert_status_ok();
    let affiliate: ApiAffiliate = response.json();
    assert_eq!(affiliate.default_allocation.affiliate_reward, 0);
}

#[tokio::test]
async fn it_runs_the_referral_lifecycle() {
    let server = server();
    let user_id = Uuid::now_v7();
    let affiliate = enroll(&server, user_id).await;

    let referral = refer(&server, &affiliate).await;
    assert_eq!(referral.affiliate_id, affiliate.id);
    assert_eq!(referral.status, ReferralStatus::Pending);
    assert_eq!(referral.metadata.source.as_deref(), Some("instagram"));

    let response = complete(&server, &referral, 10_000).await;
    response.assert_status_ok();
    let completed: ApiCompletedReferral = response.json();
    assert_eq!(completed.reward, 500);
    assert_eq!(completed.customer_discount, 1_000);
    assert!(completed.referral.reward_paid);

    complete(&server, &referral, 10_000)
        .await
        .assert_status(StatusCode::CONFLICT);

    let (name, value) = user_header(user_id);
    let response = server.get("/affiliates/me").add_header(name, value).await;
    response.assert_status_ok();
    let dashboard: ApiDashboard = response.json();
    assert_eq!(dashboard.affiliate.available_balance, 500);
    assert_eq!(dashboard.recent_earnings, 500);
    assert_eq!(dashboard.recent_referrals.len(), 1);
    assert_eq!(dashboard.conversion_rate, 100.0);
    assert_eq!(dashboard.average_order_value, 10_000);
}

#[tokio::test]
async fn it_reports_monthly_earnings() {
    let server = server();
    let user_id = Uuid::now_v7();

    let (name, value) = user_header(user_id);
    server
        .get("/affiliates/me/earnings")
        .add_header(name, value)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let affiliate = enroll(&server, user_id).await;
    let (name, value) = user_header(user_id);
    let response = server
        .get("/affiliates/me/earnings")
        .add_header(name, value)
        .await;
    response.assert_status_ok();
    let report: ApiEarningsReport = response.json();
    assert_eq!(report.total_earnings, 0);
    assert!(report.months.is_empty());

    for cents in [10_000, 4_000] {
        let referral = refer(&server, &affiliate).await;
        complete(&server, &referral, cents).await.assert_status_ok();
    }

    let (name, value) = user_header(user_id);
    let report: ApiEarningsReport = server
        .get("/affiliates/me/earnings")
        .add_header(name, value)
        .await
        .json();
    assert_eq!(report.total_earnings, 700);
    assert_eq!(report.months.len(), 1);
    assert_eq!(report.months[0].total_earnings, 700);
    assert_eq!(report.months[0].order_count, 2);

    let (name, value) = user_header(user_id);
    let dashboard: ApiDashboard = server
        .get("/affiliates/me")
        .add_header(name, value)
        .await
        .json();
    assert_eq!(dashboard.average_order_value, 7_000);
}

#[tokio::test]
async fn it_maps_referral_errors() {
    let server = server();
    let affiliate = enroll(&server, Uuid::now_v7()).await;

    let response = server
        .post("/internal/referrals")
        .json(&json!({
            "referralCode": "WHITECOAT-00000000",
            "referredUserId": Uuid::now_v7()
        }))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);

    let response = server
        .post("/internal/referrals")
        .json(&json!({
            "referralCode": affiliate.referral_code,
            "referredUserId": affiliate.user_id
        }))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let referral = refer(&server, &affiliate).await;
    let response = server
        .post("/internal/referrals")
        .json(&json!({
            "referralCode": affiliate.referral_code,
            "referredUserId": referral.referred_user_id
        }))
        .await;
    response.assert_status(StatusCode::CONFLICT);

    let response = server
        .post(&format!("/internal/referrals/{}/cancel", referral.id))
        .json(&json!({ "reason": "refunded" }))
        .await;
    response.assert_status_ok();
    let cancelled: ApiReferral = response.json();
    assert_eq!(cancelled.status, ReferralStatus::Cancelled);

    complete(&server, &referral, 5_000)
        .await
        .assert_status(StatusCode::CONFLICT);

    let response = server
        .post(&format!("/internal/referrals/{}/retry-reward", Uuid::now_v7()))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: ErrorResponse = response.json();
    assert_eq!(body.message, "referral not found");
}

#[tokio::test]
async fn it_pages_referrals() {
    let server = server();
    let user_id = Uuid::now_v7();
    let affiliate = enroll(&server, user_id).await;
    for _ in 0..21 {
        refer(&server, &affiliate).await;
    }

    let (name, value) = user_header(user_id);
    let response = server
        .get("/affiliates/me/referrals")
        .add_header(name, value)
        .add_query_param("page", 2)
        .await;
    response.assert_status_ok();
    let page: ApiReferralPage = response.json();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.current_page, 2);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.total, 21);
}

#[tokio::test]
async fn it_gates_and_settles_payouts() {
    let server = server();
    let user_id = Uuid::now_v7();
    let affiliate = enroll(&server, user_id).await;

    let (name, value) = user_header(user_id);
    let response = server
        .post("/affiliates/me/payouts")
        .add_header(name, value)
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    // 5% of $600 clears the $25 minimum
    let referral = refer(&server, &affiliate).await;
    complete(&server, &referral, 60_000).await.assert_status_ok();

    let (name, value) = user_header(user_id);
    let response = server
        .put("/affiliates/me/payout-method")
        .add_header(name, value)
        .json(&json!({ "type": "bank_transfer", "details": { "iban": "DE00" } }))
        .await;
    response.assert_status_ok();

    let (name, value) = user_header(user_id);
    let response = server
        .post("/affiliates/me/payouts")
        .add_header(name, value)
        .await;
    response.assert_status(StatusCode::CREATED);
    let receipt: ApiPayoutReceipt = response.json();
    assert_eq!(receipt.new_balance, 0);
    assert_eq!(receipt.payout.amount, 3_000);
    assert_eq!(receipt.payout.status, PayoutStatus::Pending);

    let payout_id = receipt.payout.id;
    let response = server
        .post(&format!("/internal/payouts/{payout_id}/processing"))
        .json(&json!({ "paymentGateway": "wise" }))
        .await;
    response.assert_status_ok();

    let response = server
        .post(&format!("/internal/payouts/{payout_id}/fail"))
        .json(&json!({ "reason": "iban rejected" }))
        .await;
    response.assert_status_ok();
    let failed: ApiPayout = response.json();
    assert_eq!(failed.status, PayoutStatus::Failed);
    assert_eq!(failed.payment_details.payment_gateway.as_deref(), Some("wise"));

    let response = server
        .post(&format!("/internal/payouts/{payout_id}/complete"))
        .json(&json!({}))
        .await;
    response.assert_status(StatusCode::CONFLICT);

    let (name, value) = user_header(user_id);
    let response = server
        .get("/affiliates/me/payouts")
        .add_header(name, value)
        .await;
    response.assert_status_ok();
    let payouts: Vec<ApiPayout> = response.json();
    assert_eq!(payouts.len(), 1);

    let (name, value) = user_header(user_id);
    let dashboard: ApiDashboard = server
        .get("/affiliates/me")
        .add_header(name, value)
        .await
        .json();
    assert_eq!(dashboard.affiliate.available_balance, 3_000);
    assert_eq!(dashboard.affiliate.pending_balance, 0);
}

#[tokio::test]
async fn it_blocks_suspended_affiliates() {
    let server = server();
    let user_id = Uuid::now_v7();
    let affiliate = enroll(&server, user_id).await;

    let response = server
        .put(&format!("/internal/affiliates/{}/status", affiliate.id))
        .json(&json!({ "status": "suspended" }))
        .await;
    response.assert_status_ok();
    let suspended: ApiAffiliate = response.json();
    assert_eq!(suspended.status, AffiliateStatus::Suspended);

    let response = server
        .post("/internal/referrals")
        .json(&json!({
            "referralCode": affiliate.referral_code,
            "referredUserId": Uuid::now_v7()
        }))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: ErrorResponse = response.json();
    assert_eq!(body.message, "affiliate is suspended");
}
