//! Design extraction API server library.
//!
//! Exposes configuration, state, error mapping and routes so the binary
//! and the integration tests build the same application.

pub mod app;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
