//! Lifetime policies and per-request scoped containers.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use crate::holder::{HolderStatus, HolderStorage};
use crate::locator::{self, LocatorInner};
use crate::resolution::current_context;
use crate::{DiError, DiResult, Token};

/// Lifetime policy of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scope {
	/// One instance per locator, shared by every scope.
	#[default]
	Singleton,
	/// One instance per scoped container.
	Request,
	/// A fresh instance on every resolution.
	Transient,
}

impl fmt::Display for Scope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Singleton => write!(f, "singleton"),
			Self::Request => write!(f, "request"),
			Self::Transient => write!(f, "transient"),
		}
	}
}

/// Caller-supplied values attached to one request.
///
/// # Examples
///
/// ```
/// use wirebox_di::RequestMetadata;
///
/// let metadata = RequestMetadata::new().with("user_id", 42u64);
/// assert_eq!(metadata.get::<u64>("user_id").as_deref(), Some(&42));
/// assert!(metadata.get::<String>("user_id").is_none());
/// ```
#[derive(Clone, Default)]
pub struct RequestMetadata {
	values: Arc<RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>>,
}

impl RequestMetadata {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builder-style [`insert`](Self::insert).
	pub fn with<V: Any + Send + Sync>(self, key: impl Into<String>, value: V) -> Self {
		self.insert(key, value);
		self
	}

	pub fn insert<V: Any + Send + Sync>(&self, key: impl Into<String>, value: V) {
		self.values.write().insert(key.into(), Arc::new(value));
	}

	/// Returns the value under `key` if it exists and has type `V`.
	pub fn get<V: Any + Send + Sync>(&self, key: &str) -> Option<Arc<V>> {
		let value = self.values.read().get(key).cloned()?;
		value.downcast::<V>().ok()
	}

	pub fn contains(&self, key: &str) -> bool {
		self.values.read().contains_key(key)
	}

	pub fn len(&self) -> usize {
		self.values.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.values.read().is_empty()
	}
}

impl fmt::Debug for RequestMetadata {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut keys: Vec<String> = self.values.read().keys().cloned().collect();
		keys.sort();
		f.debug_struct("RequestMetadata").field("keys", &keys).finish()
	}
}

pub(crate) struct ScopeInner {
	pub(crate) id: Arc<str>,
	pub(crate) metadata: RequestMetadata,
	pub(crate) storage: HolderStorage,
	ended: AtomicBool,
}

impl ScopeInner {
	pub(crate) fn new(id: Arc<str>, metadata: RequestMetadata) -> Self {
		Self {
			id,
			metadata,
			storage: HolderStorage::new(),
			ended: AtomicBool::new(false),
		}
	}

	pub(crate) fn is_ended(&self) -> bool {
		self.ended.load(Ordering::SeqCst)
	}

	/// Marks the scope ended. Returns `false` if it already was.
	fn end(&self) -> bool {
		!self.ended.swap(true, Ordering::SeqCst)
	}

	pub(crate) fn ensure_active(&self) -> DiResult<()> {
		if self.is_ended() {
			return Err(DiError::ScopeNotFound(self.id.to_string()));
		}
		Ok(())
	}
}

/// Resolution surface bound to one logical request.
///
/// Singleton tokens resolve through the root locator and are shared with
/// every other scope. Request-scoped and transient tokens are cached in the
/// container itself and destroyed by [`end_request`](Self::end_request).
///
/// Handles are cheap to clone; all clones refer to the same scope.
#[derive(Clone)]
pub struct ScopedContainer {
	scope: Arc<ScopeInner>,
	locator: Arc<LocatorInner>,
}

impl ScopedContainer {
	pub(crate) fn new(scope: Arc<ScopeInner>, locator: Arc<LocatorInner>) -> Self {
		Self { scope, locator }
	}

	pub fn id(&self) -> &str {
		&self.scope.id
	}

	pub fn metadata(&self) -> &RequestMetadata {
		&self.scope.metadata
	}

	pub fn is_active(&self) -> bool {
		!self.scope.is_ended()
	}

	/// Resolves an argument-less token inside this scope.
	pub async fn get<T>(&self, token: &Token<T>) -> DiResult<Arc<T>>
	where
		T: Send + Sync + 'static,
	{
		self.get_with(token, ()).await
	}

	/// Resolves `token` with `args` inside this scope.
	pub async fn get_with<T, A>(&self, token: &Token<T, A>, args: A) -> DiResult<Arc<T>>
	where
		T: Send + Sync + 'static,
		A: Serialize,
	{
		self.scope.ensure_active()?;
		let encoded = token.info().encode_args(&args)?;
		let waiter = current_context().map(|ctx| ctx.waiter);
		locator::resolve_typed(&self.locator, Some(&self.scope), token.info(), encoded, waiter).await
	}

	/// Destroys this scope's cached holder for `token` now.
	///
	/// Returns `Ok(false)` when nothing was cached. Singleton tokens are
	/// invalidated on the root locator.
	pub async fn invalidate<T>(&self, token: &Token<T>) -> DiResult<bool> {
		self.invalidate_with(token, ()).await
	}

	pub async fn invalidate_with<T, A>(&self, token: &Token<T, A>, args: A) -> DiResult<bool>
	where
		A: Serialize,
	{
		self.scope.ensure_active()?;
		let (_, arg_key) = token.info().encode_args(&args)?;
		locator::invalidate_erased(&self.locator, Some(&self.scope), token.info(), arg_key).await
	}

	/// Status of the holder this scope would hand out for `token`, if cached.
	pub fn holder_status<T>(&self, token: &Token<T>) -> Option<HolderStatus> {
		locator::holder_status_typed(&self.locator, Some(&self.scope), token)
	}

	/// Number of holders owned by this scope (inherited singletons excluded).
	pub fn len(&self) -> usize {
		self.scope.storage.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Ends the request: destroys every holder the scope owns, most recently
	/// created first, then discards the scope.
	///
	/// Every destroy listener runs even when earlier ones fail; failures are
	/// reported together as [`DiError::TeardownFailed`]. Ending a scope twice
	/// is [`DiError::ScopeNotFound`].
	pub async fn end_request(&self) -> DiResult<()> {
		if !self.scope.end() {
			return Err(DiError::ScopeNotFound(self.scope.id.to_string()));
		}
		self.locator.detach_scope(&self.scope);

		let failures = self.scope.storage.teardown().await;
		tracing::info!(
			scope_id = %self.scope.id,
			failures = failures.len(),
			"request scope ended"
		);
		if failures.is_empty() {
			Ok(())
		} else {
			Err(DiError::TeardownFailed {
				scope: self.scope.id.to_string(),
				failures,
			})
		}
	}
}

impl fmt::Debug for ScopedContainer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ScopedContainer")
			.field("id", &self.scope.id)
			.field("active", &self.is_active())
			.field("holders", &self.scope.storage.len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_scope_display() {
		assert_eq!(Scope::Singleton.to_string(), "singleton");
		assert_eq!(Scope::Request.to_string(), "request");
		assert_eq!(Scope::Transient.to_string(), "transient");
		assert_eq!(Scope::default(), Scope::Singleton);
	}

	#[rstest]
	fn test_metadata_typed_access() {
		// Arrange
		let metadata = RequestMetadata::new();
		metadata.insert("tenant", "acme".to_string());
		metadata.insert("attempt", 3u8);

		// Act
		let tenant = metadata.get::<String>("tenant");
		let wrong_type = metadata.get::<u64>("attempt");

		// Assert
		assert_eq!(tenant.as_deref().map(String::as_str), Some("acme"));
		assert!(wrong_type.is_none());
		assert!(metadata.contains("attempt"));
		assert!(metadata.get::<u8>("missing").is_none());
		assert_eq!(metadata.len(), 2);
	}

	#[rstest]
	fn test_metadata_clones_share_values() {
		let metadata = RequestMetadata::new();
		let clone = metadata.clone();

		clone.insert("k", 1i32);

		assert_eq!(metadata.get::<i32>("k").as_deref(), Some(&1));
	}

	#[rstest]
	fn test_scope_inner_ends_once() {
		let inner = ScopeInner::new(Arc::from("req-1"), RequestMetadata::new());
		assert!(inner.ensure_active().is_ok());

		assert!(inner.end());
		assert!(!inner.end());
		assert_eq!(
			inner.ensure_active(),
			Err(DiError::ScopeNotFound("req-1".into()))
		);
	}
}
