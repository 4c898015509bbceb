use crate::common::{in_memory_server, user_header};
use affiliate_service::api;
use axum::http::StatusCode;
use axum_test::TestServer;
use referral_ledger::{
    domain::service::LedgerServiceImpl, outbound::postgres::LedgerPgStorage,
};
use serde_json::{Value, json};
use sqlx::PgPool;
use uuid::Uuid;

async fn run_referral_workflow(server: &TestServer) {
    let affiliate_user = Uuid::now_v7();

    // 1. Enroll with a 12/3 split
    let (name, value) = user_header(affiliate_user);
    let response = server
        .post("/affiliates")
        .add_header(name, value)
        .json(&json!({ "customerDiscount": 12 }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let affiliate: Value = response.json();
    assert_eq!(affiliate["defaultAllocation"]["affiliateReward"], 3);
    let code = affiliate["referralCode"].as_str().unwrap().to_string();

    // 2. A new user signs up with the code
    let response = server
        .post("/internal/referrals")
        .json(&json!({ "referralCode": code, "referredUserId": Uuid::now_v7() }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let referral: Value = response.json();
    assert_eq!(referral["status"], "pending");

    // 3. Changing the split later does not touch the attributed referral
    let (name, value) = user_header(affiliate_user);
    server
        .put("/affiliates/me/allocation")
        .add_header(name, value)
        .json(&json!({ "customerDiscount": 5 }))
        .await
        .assert_status_ok();

    // 4. The first order of $100 completes the referral
    let referral_id = referral["id"].as_str().unwrap();
    let response = server
        .post(&format!("/internal/referrals/{referral_id}/complete"))
        .json(&json!({ "orderId": Uuid::now_v7(), "discountEligibleAmount": 10_000 }))
        .await;
    response.assert_status_ok();
    let completed: Value = response.json();
    assert_eq!(completed["reward"], 300);
    assert_eq!(completed["customerDiscount"], 1_200);
    assert_eq!(completed["referral"]["status"], "completed");

    // 5. The dashboard reflects the credit
    let (name, value) = user_header(affiliate_user);
    let response = server.get("/affiliates/me").add_header(name, value).await;
    response.assert_status_ok();
    let dashboard: Value = response.json();
    assert_eq!(dashboard["affiliate"]["totalEarnings"], 300);
    assert_eq!(dashboard["affiliate"]["availableBalance"], 300);
    assert_eq!(dashboard["affiliate"]["successfulReferrals"], 1);
    assert_eq!(dashboard["recentEarnings"], 300);
    assert_eq!(dashboard["averageOrderValue"], 10_000);

    // 6. The credit lands in the current month
    let (name, value) = user_header(affiliate_user);
    let response = server
        .get("/affiliates/me/earnings")
        .add_header(name, value)
        .await;
    response.assert_status_ok();
    let report: Value = response.json();
    assert_eq!(report["totalEarnings"], 300);
    assert_eq!(report["months"][0]["totalEarnings"], 300);
    assert_eq!(report["months"][0]["orderCount"], 1);

    // 7. $3 is below the $25 minimum
    let (name, value) = user_header(affiliate_user);
    let response = server
        .post("/affiliates/me/payouts")
        .add_header(name, value)
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_referral_workflow_in_memory() {
    let server = in_memory_server();
    run_referral_workflow(&server).await;
}

#[tokio::test]
async fn test_unknown_user_has_no_dashboard() {
    let server = in_memory_server();

    let (name, value) = user_header(Uuid::now_v7());
    let response = server.get("/affiliates/me").add_header(name, value).await;
    response.assert_status(StatusCode::NOT_FOUND);

    let body: Value = response.json();
    assert_eq!(body, json!({ "message": "affiliate not found" }));
}

#[sqlx::test(migrator = "referral_ledger::outbound::postgres::LEDGER_MIGRATIONS")]
#[ignore = "requires DATABASE_URL"]
async fn test_referral_workflow_postgres(pool: PgPool) -> sqlx::Result<()> {
    let service = LedgerServiceImpl::new_with_defaults(LedgerPgStorage::new(pool));
    let server = TestServer::new(api::app(service)).unwrap();
    run_referral_workflow(&server).await;
    Ok(())
}
