//! The adapters that drive the ledger services

#[cfg(feature = "axum")]
pub mod axum;
pub mod maintenance_worker;
