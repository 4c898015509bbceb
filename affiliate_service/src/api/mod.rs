use anyhow::Context;
use axum::{
    Router,
    http::{HeaderName, Method, header::CONTENT_TYPE},
};
use referral_ledger::{
    domain::ports::AffiliateProgram,
    inbound::axum::{LedgerState, USER_ID_HEADER, router},
    paths,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa_swagger_ui::SwaggerUi;

pub mod health;
pub mod swagger;

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_headers(vec![CONTENT_TYPE, HeaderName::from_static(USER_ID_HEADER)])
        .allow_methods(vec![Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_origin(Any)
}

/// the complete application router over any implementation of the ledger services
pub fn app<T: AffiliateProgram>(service: T) -> Router {
    let cors = cors_layer();

    router(LedgerState::new(service))
        .layer(cors.clone())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        // attached after the trace layer so health checks are not logged
        .nest(paths::HEALTH, health::router().layer(cors))
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", swagger::openapi()))
}

pub async fn setup_and_serve<T: AffiliateProgram>(port: u16, service: T) -> anyhow::Result<()> {
    let app = app(service);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .with_context(|| format!("could not bind port {port}"))?;

    tracing::info!("affiliate service is up and running on port {}", port);

    axum::serve(listener, app.into_make_service())
        .await
        .context("error starting service")
}
