//! Dependency resolution runtime.
//!
//! # Examples
//!
//! ```rust,no_run
//! # #[cfg(feature = "di")]
//! use wirebox::di::{Registry, ServiceLocator};
//! ```

#[cfg(feature = "di")]
pub use wirebox_di::*;
