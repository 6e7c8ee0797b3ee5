//! Spot rebalancer daemon
//!
//! Wires the library's loops to a cluster provider and serves health,
//! metrics and status over HTTP.

pub mod api;
pub mod backends;
pub mod config;
