//! Domain logic for TTC nodes.
//!
//! Pure types and functions with no network or OS dependencies:
//!
//! - **`state`** – the network manager's states, triggers, and the
//!   transition table that maps one to the other.
//! - **`descriptor`** – what a server advertises on the network.
//! - **`timeout`** – the jittered discovery timeout that keeps nodes booted
//!   together from all becoming servers at the same instant.

pub mod descriptor;
pub mod state;
pub mod timeout;
