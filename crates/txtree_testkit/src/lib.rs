//! # txtree Testkit
//!
//! Test utilities for txtree.
//!
//! This crate provides:
//! - Ready-made hierarchies and seeded object stores
//! - Recording and vetoing event handlers
//! - Property-based generators for hierarchy operation sequences
//! - Tracing setup for test output
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txtree_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_hierarchy() {
//!     with_tree(2, |tree| {
//!         let created = tree.new_object(tree.leaf()).unwrap();
//!         assert!(tree.is_invalid(tree.root(), created).unwrap());
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
