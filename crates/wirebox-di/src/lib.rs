//! # Wirebox Dependency Resolution
//!
//! Run-time service locator for wirebox.
//!
//! ## Features
//!
//! - **Lazy**: instances are built on first request and cached per scope
//! - **Single-flight**: concurrent requests for the same key share one construction
//! - **Scoped**: singleton, request-scoped and transient lifetimes
//! - **Cycle-safe**: circular dependencies fail fast instead of deadlocking
//! - **Lifecycle-aware**: destroy listeners, TTL expiry and explicit invalidation
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use wirebox_di::{DiResult, FactoryContext, Injectable, Registry, Scope, ServiceLocator, Token};
//!
//! struct Config {
//!     url: String,
//! }
//!
//! struct Database {
//!     config: Arc<Config>,
//! }
//!
//! fn config_token() -> Token<Config> {
//!     static TOKEN: std::sync::OnceLock<Token<Config>> = std::sync::OnceLock::new();
//!     TOKEN.get_or_init(|| Token::new("Config")).clone()
//! }
//!
//! #[wirebox_di::async_trait]
//! impl Injectable for Database {
//!     async fn inject(ctx: &FactoryContext, _args: ()) -> DiResult<Self> {
//!         let config = ctx.inject(&config_token()).await?;
//!         Ok(Database { config })
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> DiResult<()> {
//! let registry = Registry::new();
//! registry.register_fn(&config_token(), Scope::Singleton, |_ctx, ()| async {
//!     Ok(Config { url: "postgres://localhost".into() })
//! });
//! let database: Token<Database> = Token::new("Database");
//! registry.register_class(&database, Scope::Request);
//!
//! let locator = ServiceLocator::new(registry);
//! let request = locator.begin_request("req-1")?;
//! let db = request.get(&database).await?;
//! assert_eq!(db.config.url, "postgres://localhost");
//! request.end_request().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Scopes
//!
//! Resolution always starts from a [`ServiceLocator`] or a [`ScopedContainer`]
//! obtained from [`ServiceLocator::begin_request`]. Singleton tokens resolve
//! through the locator's root cache no matter where the request starts, so
//! every scope shares them. Request-scoped tokens resolve inside the scope
//! and are destroyed by [`ScopedContainer::end_request`].

pub mod config;
pub mod deferred;
pub mod error;
pub mod factory;
pub mod holder;
pub mod injectable;
pub mod locator;
pub mod registry;
pub mod resolution;
pub mod scope;
pub mod token;

pub use config::LocatorConfig;
pub use deferred::Deferred;
pub use error::{DiError, DiResult};
pub use factory::FactoryContext;
pub use holder::{HolderStatus, Instance};
pub use injectable::{Factory, FnFactory, Injectable, Recipe, RecipeKind};
pub use locator::ServiceLocator;
pub use registry::{OverrideGuard, RecipeId, Registry, RegistryEntry};
pub use resolution::current_waiter;
pub use scope::{RequestMetadata, Scope, ScopedContainer};
pub use token::{ArgSchema, Token, TokenId, TokenInfo};

/// Re-exported for implementing [`Injectable`] and [`Factory`].
pub use async_trait::async_trait;
