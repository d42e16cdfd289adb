//! sf-core: stable foundation for spinflow.
//!
//! Contains:
//! - ids (compact ids for sensors, fans and dependency-graph nodes)
//! - numeric (Real + tolerances + float helpers)
//! - values (labelled temperatures, duty percentages)
//! - error (shared error types)

pub mod error;
pub mod ids;
pub mod numeric;
pub mod values;

// Re-exports: nice ergonomics for downstream crates
pub use error::{SfError, SfResult};
pub use ids::*;
pub use numeric::*;
pub use values::*;
