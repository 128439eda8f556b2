//! HTTP server for the tutoring marketplace.
//!
//! The binary in `main.rs` wires configuration, storage and providers, then
//! serves [`api::create_router`] and runs the periodic [`jobs`].

pub mod api;
pub mod config;
pub mod jobs;
pub mod logging;
pub mod metrics;
