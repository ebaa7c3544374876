//! Ethereum → NEAR event relayer - Library interface
//!
//! Re-exports internal modules for use by the binary and integration tests.

pub mod api;
pub mod config;
pub mod connectors;
pub mod db;
pub mod event_relayer;
pub mod incentivizer;
pub mod metrics;
pub mod near;
pub mod orchestrator;
pub mod proof;
pub mod rpc;
pub mod session;
pub mod source;
pub mod types;

#[cfg(test)]
mod testing;
