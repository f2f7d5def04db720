//! # Wirebox
//!
//! A run-time service locator: named, typed component declarations are turned
//! into lazily created, lifecycle-managed instances, with circular dependency
//! detection, single-flight construction and per-request isolation layered on
//! top of process-wide singletons.
//!
//! ## Feature Flags
//!
//! - `di` (default) - The resolution runtime ([`wirebox-di`](wirebox_di))
//! - `full` - All features enabled
//!
//! ## Quick Example
//!
//! ```rust
//! use wirebox::prelude::*;
//!
//! struct Mailer {
//!     sender: String,
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> DiResult<()> {
//! let mailer: Token<Mailer> = Token::new("Mailer");
//!
//! let registry = Registry::new();
//! registry.register_fn(&mailer, Scope::Singleton, |_ctx, ()| async {
//!     Ok(Mailer { sender: "noreply@example.com".into() })
//! });
//!
//! let locator = ServiceLocator::new(registry);
//! let request = locator.begin_request("req-1")?;
//! assert_eq!(request.get(&mailer).await?.sender, "noreply@example.com");
//! request.end_request().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "di")]
pub mod di;

/// Commonly used types.
pub mod prelude {
	#[cfg(feature = "di")]
	pub use crate::di::{
		DiError, DiResult, Factory, FactoryContext, Injectable, LocatorConfig, Recipe, Registry,
		RequestMetadata, Scope, ScopedContainer, ServiceLocator, Token, async_trait,
	};
}
