//! # Configuration
//!
//! Server configuration structures and loading rules.

pub mod server;
