//! Domain types for the trust engine.

pub mod config;
pub mod content;
pub mod job;
pub mod result;
pub mod score;
