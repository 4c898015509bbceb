//! This module defines all members of the domain: the records of the ledger,
//! the ports it depends on and the services that implement its operations

pub mod allocation;
pub mod models;
pub mod ports;
pub mod service;
