//! The http interface of the ledger

pub mod api_types;
mod axum_impls;
mod router;

pub use axum_impls::{USER_ID_HEADER, UserIdentity};
pub use router::{LedgerApiDoc, LedgerState, router};

#[cfg(test)]
mod tests;
