//! # ABTGS Common Library
//!
//! Shared code for the ABTGS transcript service crates:
//! - Error and result types
//! - Configuration loading and root folder resolution
//! - Event types (AbtgsEvent enum) and the EventBus
//! - SMPTE timecode arithmetic
//! - SSE helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;
pub mod timecode;

pub use error::{Error, Result};
pub use timecode::Timecode;
