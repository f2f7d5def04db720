//! Token registry: token identity to construction recipe.
//!
//! The registry is pure data. Registration stores or overwrites an entry;
//! lookups of unknown tokens return `None` and only become errors when the
//! locator tries to use them. Overwriting never touches holders that were
//! already created from the previous entry.

use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use crate::injectable::ErasedRecipe;
use crate::{
	DiResult, Factory, FactoryContext, Injectable, Recipe, RecipeKind, Scope, Token, TokenId,
	TokenInfo,
};

static NEXT_RECIPE_ID: AtomicU64 = AtomicU64::new(1);

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Identity of one registration. Holders built from different registrations
/// of the same token never share a cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecipeId(u64);

impl RecipeId {
	pub(crate) fn next() -> Self {
		Self(NEXT_RECIPE_ID.fetch_add(1, Ordering::Relaxed))
	}
}

/// A stored registration.
pub struct RegistryEntry {
	token: Arc<TokenInfo>,
	scope: Scope,
	kind: RecipeKind,
	recipe: Arc<dyn ErasedRecipe>,
	recipe_id: RecipeId,
	produces: &'static str,
}

impl RegistryEntry {
	pub fn token(&self) -> &Arc<TokenInfo> {
		&self.token
	}

	pub fn scope(&self) -> Scope {
		self.scope
	}

	pub fn kind(&self) -> RecipeKind {
		self.kind
	}

	pub fn recipe_id(&self) -> RecipeId {
		self.recipe_id
	}

	/// Type name of the produced instance.
	pub fn produces(&self) -> &'static str {
		self.produces
	}

	pub(crate) fn recipe(&self) -> &Arc<dyn ErasedRecipe> {
		&self.recipe
	}
}

impl fmt::Debug for RegistryEntry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RegistryEntry")
			.field("token", &self.token.name())
			.field("scope", &self.scope)
			.field("kind", &self.kind)
			.field("recipe_id", &self.recipe_id)
			.field("produces", &self.produces)
			.finish()
	}
}

/// Mapping from token to registry entry.
///
/// `Registry` is a cheap handle: clones share the same entries. A process-wide
/// instance is available through [`Registry::global`]; tests should build
/// their own with [`Registry::new`].
///
/// # Examples
///
/// ```
/// use wirebox_di::{Registry, Scope, Token};
///
/// #[derive(Clone)]
/// struct Greeting(&'static str);
///
/// let token: Token<Greeting> = Token::new("Greeting");
/// let registry = Registry::new();
/// registry.register_value(&token, Scope::Singleton, Greeting("hello"));
///
/// let entry = registry.lookup(token.id()).unwrap();
/// assert_eq!(entry.scope(), Scope::Singleton);
/// ```
#[derive(Clone, Default)]
pub struct Registry {
	entries: Arc<RwLock<HashMap<TokenId, Arc<RegistryEntry>>>>,
}

impl Registry {
	/// Creates an empty registry, independent of [`Registry::global`].
	pub fn new() -> Self {
		Self::default()
	}

	/// The process-wide default registry.
	pub fn global() -> &'static Registry {
		&GLOBAL_REGISTRY
	}

	/// Stores `recipe` under `token`, returning the entry it replaced.
	pub fn register<T, A>(
		&self,
		token: &Token<T, A>,
		scope: Scope,
		recipe: Recipe<T, A>,
	) -> Option<Arc<RegistryEntry>> {
		let entry = Arc::new(Self::entry(token, scope, recipe));
		tracing::debug!(
			token = %token.name(),
			scope = %scope,
			kind = %entry.kind,
			"registering recipe"
		);
		self.entries.write().insert(token.id(), entry)
	}

	fn entry<T, A>(token: &Token<T, A>, scope: Scope, recipe: Recipe<T, A>) -> RegistryEntry {
		let (kind, erased) = recipe.into_erased();
		RegistryEntry {
			token: Arc::clone(token.info()),
			scope,
			kind,
			recipe: erased,
			recipe_id: RecipeId::next(),
			produces: type_name::<T>(),
		}
	}

	/// Registers `T` as a class recipe.
	pub fn register_class<T, A>(&self, token: &Token<T, A>, scope: Scope)
	where
		T: Injectable<A>,
		A: DeserializeOwned + Send + 'static,
	{
		self.register(token, scope, Recipe::class());
	}

	/// Registers a [`Factory`] object as the recipe for `token`.
	pub fn register_factory<T, A, F>(&self, token: &Token<T, A>, scope: Scope, factory: F)
	where
		T: Send + Sync + 'static,
		A: DeserializeOwned + Send + 'static,
		F: Factory<T, A>,
	{
		self.register(token, scope, Recipe::factory(factory));
	}

	/// Registers an async closure as a factory recipe.
	///
	/// # Examples
	///
	/// ```
	/// use wirebox_di::{Registry, Scope, Token};
	///
	/// struct Counter(u32);
	///
	/// let token: Token<Counter, u32> = Token::new("Counter");
	/// let registry = Registry::new();
	/// registry.register_fn(&token, Scope::Transient, |_ctx, start: u32| async move {
	///     Ok(Counter(start))
	/// });
	/// assert!(registry.contains(token.id()));
	/// ```
	pub fn register_fn<T, A, F, Fut>(&self, token: &Token<T, A>, scope: Scope, f: F)
	where
		T: Send + Sync + 'static,
		A: DeserializeOwned + Send + 'static,
		F: Fn(FactoryContext, A) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = DiResult<T>> + Send + 'static,
	{
		self.register(token, scope, Recipe::from_fn(f));
	}

	/// Registers a ready-made value; every construction hands out a clone.
	pub fn register_value<T, A>(&self, token: &Token<T, A>, scope: Scope, value: T)
	where
		T: Clone + Send + Sync + 'static,
		A: DeserializeOwned + Send + 'static,
	{
		self.register(token, scope, Recipe::value(value));
	}

	/// Returns the entry registered under `id`.
	///
	/// The entry is a snapshot: registering or overriding the token afterwards
	/// does not change it.
	pub fn lookup(&self, id: TokenId) -> Option<Arc<RegistryEntry>> {
		self.entries.read().get(&id).cloned()
	}

	/// Returns `true` if a recipe is registered under `id`.
	pub fn contains(&self, id: TokenId) -> bool {
		self.entries.read().contains_key(&id)
	}

	/// Removes the entry for `id` and returns it.
	///
	/// Instances already built from it stay cached in their containers, but
	/// later resolutions fail with [`DiError::InstanceNotFound`].
	///
	/// # Examples
	///
	/// ```
	/// use wirebox_di::{Registry, Scope, Token};
	///
	/// let token: Token<u32> = Token::new("Port");
	/// let registry = Registry::new();
	/// registry.register_value(&token, Scope::Singleton, 8080);
	///
	/// assert!(registry.unregister(token.id()).is_some());
	/// assert!(!registry.contains(token.id()));
	/// assert!(registry.unregister(token.id()).is_none());
	/// ```
	///
	/// [`DiError::InstanceNotFound`]: crate::DiError::InstanceNotFound
	pub fn unregister(&self, id: TokenId) -> Option<Arc<RegistryEntry>> {
		self.entries.write().remove(&id)
	}

	/// Number of registered tokens.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	/// Removes every entry.
	///
	/// Clones of this registry share its entries, so they are cleared too.
	///
	/// # Examples
	///
	/// ```
	/// use wirebox_di::{Registry, Scope, Token};
	///
	/// let token: Token<&'static str> = Token::new("Env");
	/// let registry = Registry::new();
	/// let shared = registry.clone();
	/// registry.register_value(&token, Scope::Singleton, "dev");
	///
	/// shared.clear();
	///
	/// assert!(registry.is_empty());
	/// ```
	pub fn clear(&self) {
		self.entries.write().clear();
	}

	/// Swaps in `recipe` for `token` until the returned guard is restored.
	///
	/// The replacement keeps the scope of the entry it displaces (singleton if
	/// the token was never registered).
	pub fn override_recipe<T, A>(&self, token: &Token<T, A>, recipe: Recipe<T, A>) -> OverrideGuard {
		let previous = self.lookup(token.id());
		let scope = previous.as_ref().map_or(Scope::Singleton, |e| e.scope);
		let entry = Arc::new(Self::entry(token, scope, recipe));
		let installed = entry.recipe_id;
		tracing::debug!(token = %token.name(), "overriding recipe");
		self.entries.write().insert(token.id(), entry);
		OverrideGuard {
			registry: self.clone(),
			token: token.id(),
			installed,
			previous,
		}
	}
}

impl fmt::Debug for Registry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Registry")
			.field("entries", &self.entries.read().len())
			.finish()
	}
}

/// Undo handle returned by [`Registry::override_recipe`].
#[must_use = "an override stays active until `restore` is called"]
#[derive(Debug)]
pub struct OverrideGuard {
	registry: Registry,
	token: TokenId,
	installed: RecipeId,
	previous: Option<Arc<RegistryEntry>>,
}

impl OverrideGuard {
	/// Recipe id of the override, distinct from every other registration.
	pub fn installed(&self) -> RecipeId {
		self.installed
	}

	/// Reinstates the displaced entry, or removes the token if there was none.
	pub fn restore(self) {
		let mut entries = self.registry.entries.write();
		match self.previous {
			Some(previous) => {
				entries.insert(self.token, previous);
			}
			None => {
				entries.remove(&self.token);
			}
		}
		tracing::debug!(token = %self.token, "override restored");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[derive(Clone, Debug, PartialEq)]
	struct Settings(&'static str);

	#[rstest]
	fn test_registry_new_empty() {
		let registry = Registry::new();
		assert!(registry.is_empty());
		assert_eq!(registry.len(), 0);
	}

	#[rstest]
	fn test_lookup_unregistered_is_none() {
		let registry = Registry::new();
		let token: Token<Settings> = Token::new("Settings");
		assert!(registry.lookup(token.id()).is_none());
	}

	#[rstest]
	fn test_register_overwrites_and_returns_previous() {
		// Arrange
		let registry = Registry::new();
		let token: Token<Settings> = Token::new("Settings");
		registry.register_value(&token, Scope::Singleton, Settings("a"));
		let first_id = registry.lookup(token.id()).unwrap().recipe_id();

		// Act
		let previous = registry.register(&token, Scope::Transient, Recipe::value(Settings("b")));

		// Assert
		assert_eq!(previous.unwrap().recipe_id(), first_id);
		let current = registry.lookup(token.id()).unwrap();
		assert_ne!(current.recipe_id(), first_id);
		assert_eq!(current.scope(), Scope::Transient);
		assert_eq!(current.kind(), RecipeKind::Factory);
		assert_eq!(registry.len(), 1);
	}

	#[rstest]
	fn test_same_name_tokens_do_not_collide() {
		let registry = Registry::new();
		let a: Token<Settings> = Token::new("Settings");
		let b: Token<Settings> = Token::new("Settings");

		registry.register_value(&a, Scope::Singleton, Settings("a"));

		assert!(registry.contains(a.id()));
		assert!(!registry.contains(b.id()));
	}

	#[rstest]
	fn test_clones_share_entries() {
		let registry = Registry::new();
		let clone = registry.clone();
		let token: Token<Settings> = Token::new("Settings");

		clone.register_value(&token, Scope::Singleton, Settings("a"));

		assert!(registry.contains(token.id()));
	}

	#[rstest]
	fn test_override_keeps_scope_and_restores_previous() {
		// Arrange
		let registry = Registry::new();
		let token: Token<Settings> = Token::new("Settings");
		registry.register_value(&token, Scope::Request, Settings("prod"));
		let original = registry.lookup(token.id()).unwrap().recipe_id();

		// Act
		let guard = registry.override_recipe(&token, Recipe::value(Settings("stub")));

		// Assert
		let overridden = registry.lookup(token.id()).unwrap();
		assert_eq!(overridden.scope(), Scope::Request);
		assert_eq!(overridden.recipe_id(), guard.installed());

		guard.restore();
		assert_eq!(registry.lookup(token.id()).unwrap().recipe_id(), original);
	}

	#[rstest]
	fn test_override_of_unregistered_token_is_removed_on_restore() {
		let registry = Registry::new();
		let token: Token<Settings> = Token::new("Settings");

		let guard = registry.override_recipe(&token, Recipe::value(Settings("stub")));
		assert_eq!(registry.lookup(token.id()).unwrap().scope(), Scope::Singleton);

		guard.restore();
		assert!(registry.is_empty());
	}

	#[rstest]
	fn test_clear_removes_all_entries() {
		let registry = Registry::new();
		let a: Token<Settings> = Token::new("A");
		let b: Token<Settings> = Token::new("B");
		registry.register_value(&a, Scope::Singleton, Settings("a"));
		registry.register_value(&b, Scope::Singleton, Settings("b"));

		registry.clear();

		assert!(registry.is_empty());
		assert!(!registry.contains(a.id()));
	}
}
