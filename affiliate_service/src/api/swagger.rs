use crate::api::health::HealthResponse;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(crate::api::health::health),
    components(schemas(HealthResponse)),
    tags(
        (name = "health", description = "Health check endpoints"),
    ),
    info(
        title = "Affiliate Service API",
        description = "Referral attribution, affiliate earnings and payouts",
        version = "0.1.0"
    )
)]
#[derive(Debug)]
pub struct ApiDoc;

/// the service document merged with the ledger routes
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.merge(referral_ledger::inbound::axum::LedgerApiDoc::openapi());
    doc
}
