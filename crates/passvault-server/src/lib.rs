//! `PassVault` HTTP server.
//!
//! Wires the core services and a storage backend into an Axum router. Every
//! route except `/v1/sys/health` sits behind the throttled admin guard.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
