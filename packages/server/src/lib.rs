//! HTTP front end for the trust engine.
//!
//! # Modules
//!
//! - [`config`] - Environment configuration
//! - [`server`] - Axum router, shared state and handlers

pub mod config;
pub mod server;

pub use config::ServerConfig;
