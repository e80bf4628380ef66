//! Shared types used across all kindle crates.

pub mod types;

pub use types::{Reply, Segment};
