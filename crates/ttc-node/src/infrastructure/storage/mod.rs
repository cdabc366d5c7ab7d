//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration from the
//! platform-appropriate directory (or an explicit path), falls back to
//! defaults when the file does not exist, and writes it back on request.

pub mod config;
