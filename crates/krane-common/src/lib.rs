//! # krane-common
//!
//! Shared utilities and types for the Krane lifecycle core.
//!
//! This crate provides common functionality used across all Krane crates:
//! - Container ID generation and validation
//! - Standard filesystem paths
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;

pub use error::{KraneError, KraneResult};
pub use id::ContainerId;
pub use paths::KranePaths;
