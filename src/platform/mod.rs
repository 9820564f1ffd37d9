//! Platform helpers: durable file writes and desktop notifications

pub mod common;
pub mod notify;
