//! # kvsync Testkit
//!
//! Test utilities for kvsync.
//!
//! This crate provides:
//! - Simulated devices sharing one in-memory remote store
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kvsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn edit_reaches_other_device() {
//!     let (phone, laptop) = two_devices();
//!     phone.track(&["theme"]);
//!     laptop.track(&["theme"]);
//!     phone.write_local("theme", Some("dark".into()));
//!     settle(&[&phone, &laptop]).await;
//!     assert_eq!(laptop.read_local("theme"), Some("dark".into()));
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
