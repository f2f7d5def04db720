//! The service locator: lookup, single-flight construction and teardown.
//!
//! Resolution of `(token, args)` goes through these steps:
//!
//! 1. Arguments are serialized and checked against the token's schema.
//! 2. The registry entry decides which holder cache owns the instance:
//!    singletons live in the root cache, request-scoped instances in the
//!    active scope, transients are never cached.
//! 3. The cache is consulted under its lock. A hit on a `Created` holder
//!    returns at once; a hit on a `Creating` holder joins its deferred after
//!    cycle checks; a miss allocates a `Creating` holder owned by the caller.
//! 4. The owner runs the recipe inside a resolution context naming the new
//!    holder as the waiter, then settles the holder and its deferred.

use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::holder::{Claim, CreationGuard, HolderKey, HolderStatus, HolderStorage, Instance, InstanceHolder};
use crate::registry::{OverrideGuard, RegistryEntry};
use crate::resolution::{
	ResolutionContext, WaitGuard, check_depth, current_context, find_ancestor_cycle,
	with_resolution_context,
};
use crate::scope::ScopeInner;
use crate::{
	DiError, DiResult, Factory, FactoryContext, LocatorConfig, Recipe, Registry, RequestMetadata,
	Scope, ScopedContainer, Token, TokenInfo,
};

static GLOBAL_LOCATOR: Lazy<ServiceLocator> =
	Lazy::new(|| ServiceLocator::new(Registry::global().clone()));

pub(crate) struct LocatorInner {
	registry: Registry,
	config: LocatorConfig,
	root: HolderStorage,
	scopes: Mutex<HashMap<Arc<str>, Arc<ScopeInner>>>,
	sequence: AtomicU64,
}

impl LocatorInner {
	/// Forgets `scope` if it is still the active scope under its id.
	pub(crate) fn detach_scope(&self, scope: &Arc<ScopeInner>) {
		let mut scopes = self.scopes.lock();
		if scopes.get(&scope.id).is_some_and(|s| Arc::ptr_eq(s, scope)) {
			scopes.remove(&scope.id);
		}
	}

	fn next_sequence(&self) -> u64 {
		self.sequence.fetch_add(1, Ordering::SeqCst) + 1
	}

	/// Holder cache that owns instances of `entry`, or `None` for transients
	/// that have no owning scope.
	fn owner_scope<'a>(
		&self,
		entry: &RegistryEntry,
		scope: Option<&'a Arc<ScopeInner>>,
	) -> DiResult<Option<&'a Arc<ScopeInner>>> {
		match entry.scope() {
			Scope::Singleton => Ok(None),
			Scope::Request => scope.map(Some).ok_or_else(|| DiError::NoActiveScope {
				token: entry.token().name().to_string(),
			}),
			Scope::Transient => Ok(scope),
		}
	}

	fn storage<'a>(&'a self, owner: Option<&'a Arc<ScopeInner>>) -> &'a HolderStorage {
		owner.map_or(&self.root, |scope| &scope.storage)
	}
}

fn holder_label(info: &TokenInfo, args: Option<&str>) -> Arc<str> {
	match args {
		Some(args) => Arc::from(format!("{}({args})", info.name())),
		None => info.shared_name(),
	}
}

fn downcast<T>(instance: Instance, info: &TokenInfo) -> DiResult<Arc<T>>
where
	T: Send + Sync + 'static,
{
	instance
		.downcast::<T>()
		.map_err(|_| DiError::FactoryTokenNotResolved {
			token: info.name().to_string(),
			expected: type_name::<T>().to_string(),
		})
}

/// Resolves already-encoded arguments and downcasts the result.
pub(crate) async fn resolve_typed<T>(
	locator: &Arc<LocatorInner>,
	scope: Option<&Arc<ScopeInner>>,
	info: &Arc<TokenInfo>,
	encoded: (Value, Option<String>),
	waiter: Option<Arc<InstanceHolder>>,
) -> DiResult<Arc<T>>
where
	T: Send + Sync + 'static,
{
	let (args, arg_key) = encoded;
	let instance = resolve_erased(locator, scope, info, args, arg_key, waiter).await?;
	downcast(instance, info)
}

/// Core resolution algorithm. Boxed because recipes recurse into it.
pub(crate) fn resolve_erased<'a>(
	locator: &'a Arc<LocatorInner>,
	scope: Option<&'a Arc<ScopeInner>>,
	info: &'a Arc<TokenInfo>,
	args: Value,
	arg_key: Option<String>,
	waiter: Option<Arc<InstanceHolder>>,
) -> BoxFuture<'a, DiResult<Instance>> {
	Box::pin(async move {
		let entry = locator
			.registry
			.lookup(info.id())
			.ok_or_else(|| DiError::InstanceNotFound {
				token: info.name().to_string(),
			})?;
		let owner = locator.owner_scope(&entry, scope)?;
		if let Some(owner) = owner {
			owner.ensure_active()?;
		}

		let key = HolderKey {
			token: info.id(),
			recipe: entry.recipe_id(),
			args: arg_key,
		};
		let label = holder_label(info, key.args.as_deref());
		let new_holder = || {
			InstanceHolder::new(
				key.clone(),
				Arc::clone(&label),
				entry.scope(),
				waiter.as_ref(),
				locator.config.default_ttl(),
			)
		};

		if entry.scope() == Scope::Transient {
			let holder = new_holder();
			let instance = construct(locator, owner, &entry, Arc::clone(&holder), waiter.as_ref(), args).await?;
			// Root transients belong to the caller; only scopes destroy theirs.
			if let Some(owner) = owner {
				if holder.has_destroy_listeners() {
					owner.storage.track_transient(Arc::clone(&holder));
					if owner.is_ended() {
						return Err(release_orphan(&holder, owner).await);
					}
				}
			}
			return Ok(instance);
		}

		let storage = locator.storage(owner);
		loop {
			match storage.claim(&key, new_holder) {
				Claim::Ready(instance) => {
					tracing::trace!(token = %label, "cache hit");
					return Ok(instance);
				}
				Claim::Pending(holder, deferred) => {
					if let Some(waiter) = &waiter {
						if let Some(path) = find_ancestor_cycle(waiter, &key, holder.label()) {
							return Err(DiError::CircularDependency { path });
						}
					}
					let _waiting = WaitGuard::enter(waiter.as_ref(), &holder)?;
					tracing::trace!(token = %label, "joining in-flight construction");
					return deferred.wait().await;
				}
				Claim::Stale(holder) => {
					tracing::debug!(token = %label, "instance expired, rebuilding");
					for failure in holder.run_destroy_listeners().await {
						tracing::warn!(
							token = %label,
							error = %failure,
							"destroy listener failed during expiry"
						);
					}
					storage.remove_if_same(&key, &holder);
				}
				Claim::Destroying(holder) => {
					return Err(DiError::InstanceDestroying {
						token: holder.label().to_string(),
					});
				}
				Claim::Owner(holder) => {
					return construct(locator, owner, &entry, holder, waiter.as_ref(), args).await;
				}
			}
		}
	})
}

/// Runs the recipe for a freshly claimed holder and settles it.
async fn construct(
	locator: &Arc<LocatorInner>,
	owner: Option<&Arc<ScopeInner>>,
	entry: &RegistryEntry,
	holder: Arc<InstanceHolder>,
	waiter: Option<&Arc<InstanceHolder>>,
	args: Value,
) -> DiResult<Instance> {
	let guard = CreationGuard::new(Arc::clone(&holder));
	if let Some(waiter) = waiter {
		if let Some(path) = find_ancestor_cycle(waiter, holder.key(), holder.label()) {
			return guard.finish(Err(DiError::CircularDependency { path }), 0);
		}
	}
	if let Err(err) = check_depth(waiter, locator.config.max_resolution_depth) {
		return guard.finish(Err(err), 0);
	}
	// Inline construction blocks the waiter too.
	let _waiting = match WaitGuard::enter(waiter, &holder) {
		Ok(waiting) => waiting,
		Err(err) => return guard.finish(Err(err), 0),
	};

	tracing::debug!(
		token = %holder.label(),
		scope = %holder.scope(),
		kind = %entry.kind(),
		depth = holder.depth(),
		"constructing instance"
	);
	let ctx = FactoryContext::new(Arc::clone(locator), owner.cloned(), Arc::clone(&holder));
	let ambient = ResolutionContext {
		waiter: Arc::clone(&holder),
		scope: owner.cloned(),
	};
	let outcome = with_resolution_context(ambient, entry.recipe().produce(&ctx, args)).await;
	match &outcome {
		Ok(_) => tracing::debug!(token = %holder.label(), "instance created"),
		Err(err) => tracing::debug!(token = %holder.label(), error = %err, "construction failed"),
	}
	let outcome = match (outcome, owner) {
		(Ok(_), Some(scope)) if scope.is_ended() => Err(release_orphan(&holder, scope).await),
		(outcome, _) => outcome,
	};
	let result = guard.finish(outcome, locator.next_sequence());
	// The scope may have ended between the check above and settlement.
	match (result, owner) {
		(Ok(_), Some(scope)) if scope.is_ended() => Err(release_orphan(&holder, scope).await),
		(result, _) => result,
	}
}

/// Destroys an instance whose scope ended while it was being built.
///
/// Listeners are taken out of the holder before they run, so a teardown
/// racing with this call cannot fire them a second time.
async fn release_orphan(holder: &Arc<InstanceHolder>, scope: &ScopeInner) -> DiError {
	holder.begin_destroy();
	for failure in holder.run_destroy_listeners().await {
		tracing::warn!(
			token = %holder.label(),
			scope_id = %scope.id,
			error = %failure,
			"destroy listener failed after scope end"
		);
	}
	scope.storage.remove_if_same(holder.key(), holder);
	tracing::debug!(token = %holder.label(), scope_id = %scope.id, "discarded instance of ended scope");
	DiError::ScopeNotFound(scope.id.to_string())
}

/// Destroys the cached holder for `(info, arg_key)` if it is `Created`.
pub(crate) async fn invalidate_erased(
	locator: &LocatorInner,
	scope: Option<&Arc<ScopeInner>>,
	info: &TokenInfo,
	arg_key: Option<String>,
) -> DiResult<bool> {
	let Some(entry) = locator.registry.lookup(info.id()) else {
		return Ok(false);
	};
	if entry.scope() == Scope::Transient {
		return Ok(false);
	}
	let owner = locator.owner_scope(&entry, scope)?;
	let key = HolderKey {
		token: info.id(),
		recipe: entry.recipe_id(),
		args: arg_key,
	};
	match locator.storage(owner).destroy_key(&key).await {
		None => Ok(false),
		Some(failures) if failures.is_empty() => {
			tracing::debug!(token = %info.name(), "instance invalidated");
			Ok(true)
		}
		Some(failures) => Err(DiError::TeardownFailed {
			scope: owner.map_or_else(|| "root".to_string(), |s| s.id.to_string()),
			failures,
		}),
	}
}

pub(crate) fn holder_status_typed<T>(
	locator: &LocatorInner,
	scope: Option<&Arc<ScopeInner>>,
	token: &Token<T>,
) -> Option<HolderStatus> {
	let entry = locator.registry.lookup(token.id())?;
	let owner = locator.owner_scope(&entry, scope).ok()?;
	let key = HolderKey {
		token: token.id(),
		recipe: entry.recipe_id(),
		args: None,
	};
	locator.storage(owner).get(&key).map(|holder| holder.status())
}

/// Entry point for resolving tokens.
///
/// A locator owns the root holder cache (singletons) and
/// the set of active request scopes. Handles are cheap to clone.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use wirebox_di::{Registry, Scope, ServiceLocator, Token};
///
/// struct Clock;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> wirebox_di::DiResult<()> {
/// let token: Token<Clock> = Token::new("Clock");
/// let registry = Registry::new();
/// registry.register_fn(&token, Scope::Singleton, |_ctx, ()| async { Ok(Clock) });
///
/// let locator = ServiceLocator::new(registry);
/// let a = locator.get(&token).await?;
/// let b = locator.get(&token).await?;
/// assert!(Arc::ptr_eq(&a, &b));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ServiceLocator {
	inner: Arc<LocatorInner>,
}

impl ServiceLocator {
	/// Creates a locator over `registry` with the default [`LocatorConfig`].
	///
	/// The registry is shared, not copied: recipes registered after the
	/// locator was built are visible to it.
	///
	/// # Examples
	///
	/// ```
	/// use wirebox_di::{Registry, ServiceLocator};
	///
	/// let registry = Registry::new();
	/// let locator = ServiceLocator::new(registry.clone());
	///
	/// assert!(locator.is_empty());
	/// assert_eq!(locator.config().max_resolution_depth, 100);
	/// ```
	pub fn new(registry: Registry) -> Self {
		Self::with_config(registry, LocatorConfig::default())
	}

	/// Creates a locator over `registry` with explicit tunables.
	///
	/// # Examples
	///
	/// ```
	/// use std::time::Duration;
	/// use wirebox_di::{LocatorConfig, Registry, ServiceLocator};
	///
	/// let config = LocatorConfig::default()
	///     .with_max_resolution_depth(16)
	///     .with_default_ttl(Duration::from_secs(60));
	/// let locator = ServiceLocator::with_config(Registry::new(), config);
	///
	/// assert_eq!(locator.config().max_resolution_depth, 16);
	/// assert_eq!(locator.config().default_ttl(), Some(Duration::from_secs(60)));
	/// ```
	pub fn with_config(registry: Registry, config: LocatorConfig) -> Self {
		Self {
			inner: Arc::new(LocatorInner {
				registry,
				config,
				root: HolderStorage::new(),
				scopes: Mutex::new(HashMap::new()),
				sequence: AtomicU64::new(0),
			}),
		}
	}

	/// The process-wide locator over [`Registry::global`].
	pub fn global() -> &'static ServiceLocator {
		&GLOBAL_LOCATOR
	}

	/// The registry this locator resolves through.
	pub fn registry(&self) -> &Registry {
		&self.inner.registry
	}

	/// The tunables this locator was built with.
	pub fn config(&self) -> &LocatorConfig {
		&self.inner.config
	}

	/// Resolves an argument-less token.
	///
	/// Called from inside a recipe, the dependency is attributed to the
	/// holder under construction and resolved in that holder's scope.
	pub async fn get<T>(&self, token: &Token<T>) -> DiResult<Arc<T>>
	where
		T: Send + Sync + 'static,
	{
		self.get_with(token, ()).await
	}

	/// Resolves `token` with construction arguments.
	///
	/// Arguments are part of the cache key: different arguments produce
	/// different instances of the same token.
	pub async fn get_with<T, A>(&self, token: &Token<T, A>, args: A) -> DiResult<Arc<T>>
	where
		T: Send + Sync + 'static,
		A: Serialize,
	{
		let encoded = token.info().encode_args(&args)?;
		let ambient = current_context();
		let (waiter, scope) = match ambient {
			Some(ctx) => (Some(ctx.waiter), ctx.scope),
			None => (None, None),
		};
		resolve_typed(&self.inner, scope.as_ref(), token.info(), encoded, waiter).await
	}

	/// Replaces the recipe for `token` until the guard is restored.
	///
	/// Instances already created from the previous recipe are untouched and
	/// are never handed out while the override is active.
	pub fn override_recipe<T, A>(&self, token: &Token<T, A>, recipe: Recipe<T, A>) -> OverrideGuard {
		self.inner.registry.override_recipe(token, recipe)
	}

	/// Overrides `token` with a [`Factory`] object.
	pub fn override_factory<T, A, F>(&self, token: &Token<T, A>, factory: F) -> OverrideGuard
	where
		T: Send + Sync + 'static,
		A: DeserializeOwned + Send + 'static,
		F: Factory<T, A>,
	{
		self.override_recipe(token, Recipe::factory(factory))
	}

	/// Overrides `token` with an async closure.
	///
	/// ```
	/// use wirebox_di::{Registry, Scope, ServiceLocator, Token};
	///
	/// # #[tokio::main(flavor = "current_thread")]
	/// # async fn main() -> wirebox_di::DiResult<()> {
	/// let token: Token<&'static str> = Token::new("Env");
	/// let registry = Registry::new();
	/// registry.register_value(&token, Scope::Transient, "production");
	/// let locator = ServiceLocator::new(registry);
	///
	/// let guard = locator.override_fn(&token, |_ctx, ()| async { Ok("test") });
	/// assert_eq!(*locator.get(&token).await?, "test");
	///
	/// guard.restore();
	/// assert_eq!(*locator.get(&token).await?, "production");
	/// # Ok(())
	/// # }
	/// ```
	pub fn override_fn<T, A, F, Fut>(&self, token: &Token<T, A>, f: F) -> OverrideGuard
	where
		T: Send + Sync + 'static,
		A: DeserializeOwned + Send + 'static,
		F: Fn(FactoryContext, A) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = DiResult<T>> + Send + 'static,
	{
		self.override_recipe(token, Recipe::from_fn(f))
	}

	/// Starts a request scope with empty metadata.
	pub fn begin_request(&self, id: impl Into<Arc<str>>) -> DiResult<ScopedContainer> {
		self.begin_request_with(id, RequestMetadata::new())
	}

	/// Starts a request scope.
	///
	/// # Errors
	///
	/// [`DiError::DuplicateScope`] if a scope with the same id is still active.
	pub fn begin_request_with(
		&self,
		id: impl Into<Arc<str>>,
		metadata: RequestMetadata,
	) -> DiResult<ScopedContainer> {
		let id = id.into();
		let scope = {
			let mut scopes = self.inner.scopes.lock();
			if scopes.contains_key(&id) {
				return Err(DiError::DuplicateScope(id.to_string()));
			}
			let scope = Arc::new(ScopeInner::new(Arc::clone(&id), metadata));
			scopes.insert(id, Arc::clone(&scope));
			scope
		};
		tracing::info!(scope_id = %scope.id, "request scope started");
		Ok(ScopedContainer::new(scope, Arc::clone(&self.inner)))
	}

	/// Handle to the active scope `id`.
	pub fn scope(&self, id: &str) -> DiResult<ScopedContainer> {
		let scope = self
			.inner
			.scopes
			.lock()
			.get(id)
			.cloned()
			.ok_or_else(|| DiError::ScopeNotFound(id.to_string()))?;
		Ok(ScopedContainer::new(scope, Arc::clone(&self.inner)))
	}

	/// Ids of every active scope, sorted.
	pub fn active_scopes(&self) -> Vec<String> {
		let mut ids: Vec<String> = self
			.inner
			.scopes
			.lock()
			.keys()
			.map(ToString::to_string)
			.collect();
		ids.sort();
		ids
	}

	/// Destroys the cached root instance of `token` now, running its destroy
	/// listeners. Returns `Ok(false)` when nothing was cached.
	pub async fn invalidate<T>(&self, token: &Token<T>) -> DiResult<bool> {
		self.invalidate_with(token, ()).await
	}

	/// [`invalidate`](Self::invalidate) for the holder built from `args`.
	pub async fn invalidate_with<T, A>(&self, token: &Token<T, A>, args: A) -> DiResult<bool>
	where
		A: Serialize,
	{
		let (_, arg_key) = token.info().encode_args(&args)?;
		invalidate_erased(&self.inner, None, token.info(), arg_key).await
	}

	/// Status of the cached root holder for `token`, if any.
	pub fn holder_status<T>(&self, token: &Token<T>) -> Option<HolderStatus> {
		holder_status_typed(&self.inner, None, token)
	}

	/// Number of holders in the root cache.
	///
	/// Transients resolved outside a scope are owned by the caller and never
	/// counted.
	pub fn len(&self) -> usize {
		self.inner.root.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Destroys every root-owned instance, most recently created first.
	///
	/// Active request scopes are not ended. The locator stays usable; later
	/// resolutions construct fresh instances.
	pub async fn dispose(&self) -> DiResult<()> {
		let failures = self.inner.root.teardown().await;
		tracing::info!(failures = failures.len(), "root instances disposed");
		if failures.is_empty() {
			Ok(())
		} else {
			Err(DiError::TeardownFailed {
				scope: "root".to_string(),
				failures,
			})
		}
	}
}

impl fmt::Debug for ServiceLocator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ServiceLocator")
			.field("registry", &self.inner.registry)
			.field("config", &self.inner.config)
			.field("holders", &self.inner.root.len())
			.field("scopes", &self.inner.scopes.lock().len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::{fixture, rstest};
	use std::sync::atomic::AtomicUsize;

	#[derive(Debug)]
	struct Widget(usize);

	#[fixture]
	fn registry() -> Registry {
		Registry::new()
	}

	#[rstest]
	#[tokio::test]
	async fn test_unregistered_token_is_not_found(registry: Registry) {
		let locator = ServiceLocator::new(registry);
		let token: Token<Widget> = Token::new("Widget");

		let err = locator.get(&token).await.unwrap_err();

		assert_eq!(
			err,
			DiError::InstanceNotFound {
				token: "Widget".into()
			}
		);
	}

	#[rstest]
	#[tokio::test]
	async fn test_args_select_distinct_holders(registry: Registry) {
		// Arrange
		let token: Token<Widget, usize> = Token::new("Widget");
		registry.register_fn(&token, Scope::Singleton, |_ctx, n: usize| async move {
			Ok(Widget(n))
		});
		let locator = ServiceLocator::new(registry);

		// Act
		let one = locator.get_with(&token, 1).await.unwrap();
		let two = locator.get_with(&token, 2).await.unwrap();
		let one_again = locator.get_with(&token, 1).await.unwrap();

		// Assert
		assert_eq!(one.0, 1);
		assert_eq!(two.0, 2);
		assert!(Arc::ptr_eq(&one, &one_again));
		assert_eq!(locator.len(), 2);
	}

	#[rstest]
	#[tokio::test]
	async fn test_failed_construction_is_retried(registry: Registry) {
		// Arrange
		let attempts = Arc::new(AtomicUsize::new(0));
		let token: Token<Widget> = Token::new("Flaky");
		let counter = Arc::clone(&attempts);
		registry.register_fn(&token, Scope::Singleton, move |_ctx, ()| {
			let counter = Arc::clone(&counter);
			async move {
				match counter.fetch_add(1, Ordering::SeqCst) {
					0 => Err(DiError::custom("not yet")),
					n => Ok(Widget(n)),
				}
			}
		});
		let locator = ServiceLocator::new(registry);

		// Act
		let first = locator.get(&token).await;
		let status_after_failure = locator.holder_status(&token);
		let second = locator.get(&token).await;

		// Assert
		assert_eq!(first.unwrap_err(), DiError::custom("not yet"));
		assert_eq!(status_after_failure, Some(HolderStatus::Error));
		assert_eq!(second.unwrap().0, 1);
		assert_eq!(locator.holder_status(&token), Some(HolderStatus::Created));
	}

	#[rstest]
	#[tokio::test]
	async fn test_depth_limit_is_enforced(registry: Registry) {
		// Arrange: a chain of five nested transients against a limit of three
		let tokens: Vec<Token<Widget>> = (0..5).map(|i| Token::new(format!("Level{i}"))).collect();
		for (i, token) in tokens.iter().enumerate() {
			let next = tokens.get(i + 1).cloned();
			registry.register_fn(token, Scope::Transient, move |ctx, ()| {
				let next = next.clone();
				async move {
					if let Some(next) = next {
						ctx.inject(&next).await?;
					}
					Ok(Widget(i))
				}
			});
		}
		let config = LocatorConfig::default().with_max_resolution_depth(3);
		let locator = ServiceLocator::with_config(registry, config);

		// Act
		let err = locator.get(&tokens[0]).await.unwrap_err();

		// Assert
		assert_eq!(err, DiError::MaxDepthExceeded(4));
	}

	#[rstest]
	#[tokio::test]
	async fn test_ambient_waiter_is_visible_to_recipe(registry: Registry) {
		let token: Token<Option<String>> = Token::new("WhoAmI");
		registry.register_fn(&token, Scope::Transient, |_ctx, ()| async {
			Ok(crate::current_waiter().map(|w| w.to_string()))
		});
		let locator = ServiceLocator::new(registry);

		let seen = locator.get(&token).await.unwrap();

		assert_eq!(seen.as_deref(), Some("WhoAmI"));
	}

	#[rstest]
	#[tokio::test]
	async fn test_request_token_outside_scope(registry: Registry) {
		let token: Token<Widget> = Token::new("PerRequest");
		registry.register_fn(&token, Scope::Request, |_ctx, ()| async { Ok(Widget(0)) });
		let locator = ServiceLocator::new(registry);

		let err = locator.get(&token).await.unwrap_err();

		assert_eq!(
			err,
			DiError::NoActiveScope {
				token: "PerRequest".into()
			}
		);
		assert!(locator.is_empty());
	}

	#[rstest]
	fn test_duplicate_scope_rejected(registry: Registry) {
		let locator = ServiceLocator::new(registry);
		let _scope = locator.begin_request("req-1").unwrap();

		let err = locator.begin_request("req-1").unwrap_err();

		assert_eq!(err, DiError::DuplicateScope("req-1".into()));
		assert_eq!(locator.active_scopes(), vec!["req-1".to_string()]);
	}

	#[rstest]
	fn test_scope_lookup(registry: Registry) {
		let locator = ServiceLocator::new(registry);
		let scope = locator.begin_request("req-7").unwrap();

		assert_eq!(locator.scope("req-7").unwrap().id(), scope.id());
		assert_eq!(
			locator.scope("req-8").unwrap_err(),
			DiError::ScopeNotFound("req-8".into())
		);
	}
}
