use affiliate_service::api;
use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;
use referral_ledger::{
    domain::service::LedgerServiceImpl, inbound::axum::USER_ID_HEADER,
    outbound::memory::InMemoryLedger,
};
use uuid::Uuid;

pub fn in_memory_server() -> TestServer {
    let service = LedgerServiceImpl::new_with_defaults(InMemoryLedger::new());
    TestServer::new(api::app(service)).unwrap()
}

pub fn user_header(user_id: Uuid) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static(USER_ID_HEADER),
        HeaderValue::from_str(&user_id.to_string()).unwrap(),
    )
}
