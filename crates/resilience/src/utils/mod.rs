//! Shared helpers
//!
//! - **[`serde`]**: serde adapters for durations expressed in milliseconds

pub mod serde;

pub use self::serde::{duration_millis, option_duration_millis};
