//! The handle recipes receive while they run.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::holder::InstanceHolder;
use crate::locator::{self, LocatorInner};
use crate::scope::ScopeInner;
use crate::{DiResult, Token};

/// Construction-time access to the locator on behalf of one holder.
///
/// Every dependency resolved through [`inject`](Self::inject) is attributed to
/// the holder under construction, which is what makes cycle detection work.
/// The context is `Clone + Send`, so it may be moved into spawned tasks;
/// resolution stays attributed to the same holder.
#[derive(Clone)]
pub struct FactoryContext {
	inner: Arc<ContextInner>,
}

struct ContextInner {
	locator: Arc<LocatorInner>,
	scope: Option<Arc<ScopeInner>>,
	holder: Arc<InstanceHolder>,
}

impl FactoryContext {
	pub(crate) fn new(
		locator: Arc<LocatorInner>,
		scope: Option<Arc<ScopeInner>>,
		holder: Arc<InstanceHolder>,
	) -> Self {
		Self {
			inner: Arc::new(ContextInner {
				locator,
				scope,
				holder,
			}),
		}
	}

	/// Name of the token being constructed.
	pub fn token_name(&self) -> &str {
		self.inner.holder.label()
	}

	/// Resolves an argument-less dependency.
	pub async fn inject<T>(&self, token: &Token<T>) -> DiResult<Arc<T>>
	where
		T: Send + Sync + 'static,
	{
		self.inject_with(token, ()).await
	}

	/// Resolves a dependency with arguments and records it on this holder.
	pub async fn inject_with<T, A>(&self, token: &Token<T, A>, args: A) -> DiResult<Arc<T>>
	where
		T: Send + Sync + 'static,
		A: Serialize,
	{
		let encoded = token.info().encode_args(&args)?;
		self.inner.holder.record_dependency(token.info().shared_name());
		locator::resolve_typed(
			&self.inner.locator,
			self.inner.scope.as_ref(),
			token.info(),
			encoded,
			Some(Arc::clone(&self.inner.holder)),
		)
		.await
	}

	/// Registers cleanup to run when this instance is destroyed.
	///
	/// Listeners run sequentially in registration order.
	pub fn add_destroy_listener<F, Fut>(&self, listener: F)
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = DiResult<()>> + Send + 'static,
	{
		self.inner.holder.add_destroy_listener(listener);
	}

	/// Expires the instance `ttl` after it is created. `Duration::ZERO` means
	/// it never expires.
	pub fn set_ttl(&self, ttl: Duration) {
		self.inner.holder.set_ttl((!ttl.is_zero()).then_some(ttl));
	}

	/// Forces the next access to tear down and rebuild this instance.
	pub fn invalidate(&self) {
		self.inner.holder.invalidate();
	}

	/// Id of the scope the instance belongs to, `None` for root-owned holders.
	pub fn scope_id(&self) -> Option<&str> {
		self.inner.scope.as_deref().map(|scope| &*scope.id)
	}

	/// Reads a typed value from the request metadata of the current scope.
	pub fn metadata<V: Any + Send + Sync>(&self, key: &str) -> Option<Arc<V>> {
		self.inner.scope.as_ref()?.metadata.get(key)
	}

	/// Names of the dependencies resolved so far.
	pub fn dependencies(&self) -> Vec<Arc<str>> {
		self.inner.holder.dependencies()
	}
}

impl fmt::Debug for FactoryContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FactoryContext")
			.field("token", &self.token_name())
			.field("scope", &self.scope_id())
			.finish()
	}
}
