//! Drydock Core - foundation types for the release planner
//!
//! This crate provides the Kubernetes-free building blocks:
//! - `Values`: configuration values with deep merge and canonical digests
//! - `ChartMetadata`: the chart identity stored in release records
//! - `CoreError`: shared error type

pub mod chart;
pub mod error;
pub mod values;

pub use chart::ChartMetadata;
pub use error::{CoreError, Result};
pub use values::{parse_set_values, SetValueKind, Values};
