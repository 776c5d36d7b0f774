//! # kvwrap Testkit
//!
//! Test utilities for kvwrap.
//!
//! This crate provides:
//! - Fixtures that open any engine, hand out extra handles and reopen
//! - A conformance suite every engine must pass under every capability mask
//! - Property-based operation generators and a reference model
//! - Concurrency stress helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kvwrap_testkit::prelude::*;
//!
//! #[test]
//! fn log_engine_conforms() {
//!     conformance::run_all(EngineKind::Log);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod conformance;
pub mod fixtures;
pub mod generators;
pub mod model;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::conformance;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::model::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use model::*;
pub use stress::*;
