//! Utility modules for abtgs-server

pub mod retry;

pub use retry::{retry_transient, RetryPolicy};
