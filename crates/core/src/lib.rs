//! Domain types and image algorithms shared by the diffserver crates.
//!
//! Everything in here is synchronous and I/O-free apart from the
//! convenience loaders in [`region`] and [`patch`]:
//!
//! - [`region`]: region config parsing and coordinate normalization.
//! - [`patch`]: axis-aligned patch extraction and PNG encoding.
//! - [`feather`]: distance-transform alpha feathering.
//! - [`morphology`]: binary erosion and Euclidean distance transform.
//! - [`naming`]: output path conventions.

pub mod error;
pub mod feather;
pub mod morphology;
pub mod naming;
pub mod patch;
pub mod region;
pub mod types;
