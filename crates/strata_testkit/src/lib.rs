//! # Strata Testkit
//!
//! Test utilities for Strata packed pages.
//!
//! This crate provides:
//! - Page fixtures and reference models for sequence queries
//! - Property-based test generators using proptest
//! - An event recorder for data-event snapshots
//!
//! ## Usage
//!
//! ```rust
//! use strata_testkit::prelude::*;
//!
//! let page = fixed_page(&SCENARIO_A_VALUES, small_geometry());
//! let seq = open_fixed(&page, small_geometry());
//! assert_eq!(seq.sum_all(0).unwrap(), 31);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod recorder;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::recorder::*;
}

pub use fixtures::*;
pub use generators::*;
pub use recorder::*;
