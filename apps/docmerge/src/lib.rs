//! # docmerge
//!
//! CLI and HTTP surfaces over `docmerge-core`. The binary in `main.rs` is a
//! thin wrapper; everything here is public so integration tests can drive
//! the router and the configuration loader directly.

pub mod api;
pub mod cli;
pub mod config;
