//! Daily usage quotas for applications
//!
//! Tracks which application is in the foreground, counts minutes and entries
//! per day, and blocks applications whose quota is spent until midnight.

pub mod config;
pub mod platform;
pub mod quota;
