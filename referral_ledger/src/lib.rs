//! This crate defines the referral and affiliate ledger following the
//! hexagonal architecture pattern.
//!
//! The [domain] holds the allocation policy, the affiliate balances, the referral lifecycle and the payout gate.
//! [outbound] provides postgres and in memory storage, [inbound] the http router and the maintenance worker

pub mod domain;
pub mod inbound;
pub mod outbound;

/// Paths of the routes without path parameters
pub mod paths {
    pub const HEALTH: &str = "/health";
    pub const AFFILIATES: &str = "/affiliates";
    pub const DASHBOARD: &str = "/affiliates/me";
    pub const REFERRALS: &str = "/affiliates/me/referrals";
    pub const EARNINGS: &str = "/affiliates/me/earnings";
    pub const ALLOCATION: &str = "/affiliates/me/allocation";
    pub const PAYOUT_METHOD: &str = "/affiliates/me/payout-method";
    pub const PAYOUTS: &str = "/affiliates/me/payouts";
    pub const INTERNAL_REFERRALS: &str = "/internal/referrals";
}
