//! Shared configuration, error types, IDs, scalar values and observability primitives
//! for the shq crates.
//!
//! Architecture role:
//! - defines engine configuration passed from the client facade down to the
//!   compiler and dispatcher
//! - provides the common [`ShqError`] / [`Result`] contracts
//! - hosts the row value model ([`ScalarValue`], [`Row`])
//! - hosts the prometheus metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]
//! - [`value`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod value;

pub use config::EngineConfig;
pub use error::{Result, ShqError};
pub use ids::*;
pub use metrics::{global_metrics, MetricsRegistry};
pub use value::{Row, ScalarValue};
