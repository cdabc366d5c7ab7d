//! Infrastructure layer of the node.
//!
//! Contains the OS-facing adapters: TCP sockets and service discovery
//! (`network`) and the TOML configuration file (`storage`).
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `ttc_core`, but MUST NOT be imported by `application`, except through the
//! test-only mock role.

pub mod network;
pub mod storage;
