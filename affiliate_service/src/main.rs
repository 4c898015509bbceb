use affiliate_service::{
    api,
    config::{Config, Environment},
    entrypoint,
};
use anyhow::Context;
use referral_ledger::{
    domain::service::LedgerServiceImpl,
    inbound::maintenance_worker::MaintenanceWorkerHandle,
    outbound::postgres::{LEDGER_MIGRATIONS, LedgerPgStorage},
};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = Environment::new_or_prod();
    entrypoint::init(env);

    let config = Config::from_env(env).context("expected to be able to generate config")?;

    tracing::trace!("initialized config");

    let db = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .context("could not connect to db")?;

    tracing::trace!(
        max_connections = config.db_max_connections,
        "initialized db connection"
    );

    LEDGER_MIGRATIONS
        .run(&db)
        .await
        .context("could not run ledger migrations")?;

    let service = LedgerServiceImpl::new_with_defaults(LedgerPgStorage::new(db));

    // aborted when dropped at the end of main
    let _worker = MaintenanceWorkerHandle::new_worker(service.clone(), config.maintenance_interval);
    tracing::info!(
        interval_secs = config.maintenance_interval.as_secs(),
        "started referral maintenance worker"
    );

    api::setup_and_serve(config.port, service).await
}
