/*!
Affiliate Service

Serves the referral ledger over http and runs the referral maintenance worker.
*/

#![warn(
    unreachable_pub,
    redundant_lifetimes,
    unsafe_code,
    non_local_definitions,
    clippy::needless_pass_by_value,
    clippy::needless_pass_by_ref_mut
)]

pub mod api;
pub mod config;
pub mod entrypoint;
