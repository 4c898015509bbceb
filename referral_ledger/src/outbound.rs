//! This module defines concrete implementations of the required outbound ports
//! Outbounds ports are things in the outside world that we reach out to

#[cfg(feature = "postgres")]
pub mod postgres;

pub mod ids;
pub mod memory;
pub mod time;
