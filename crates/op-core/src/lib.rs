//! Core types and utilities for op-catalog
//!
//! # Modules
//!
//! - `config`: Environment configuration loading
//! - `error`: Error taxonomy and Result alias
//! - `types`: Catalog data model shared by every source
//! - `validation`: Path and spec content validation

pub mod config;
pub mod error;
pub mod types;
pub mod validation;

// Re-exports
pub use error::{Error, ErrorKind, Result};
pub use types::*;
pub use validation::{ContentLimits, SpecFormat, ValidatedSpec};
