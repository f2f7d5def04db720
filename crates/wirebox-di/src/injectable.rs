//! Recipes: how a registry entry produces an instance.
//!
//! There are two recipe kinds. A *class* recipe is a type that knows how to
//! build itself ([`Injectable`]); a *factory* recipe is a separate object that
//! builds something else ([`Factory`], or a plain async closure). Both receive
//! a [`FactoryContext`] for resolving their own dependencies and registering
//! cleanup.

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::holder::Instance;
use crate::{DiError, DiResult, FactoryContext};

/// A type that constructs itself from a [`FactoryContext`] and arguments.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use wirebox_di::{DiResult, FactoryContext, Injectable, Token};
///
/// struct Config {
///     url: String,
/// }
///
/// struct Database {
///     config: Arc<Config>,
/// }
///
/// # fn config_token() -> Token<Config> { Token::new("Config") }
/// #[wirebox_di::async_trait]
/// impl Injectable for Database {
///     async fn inject(ctx: &FactoryContext, _args: ()) -> DiResult<Self> {
///         let config = ctx.inject(&config_token()).await?;
///         Ok(Database { config })
///     }
/// }
/// ```
#[async_trait]
pub trait Injectable<A = ()>: Sized + Send + Sync + 'static
where
	A: Send + 'static,
{
	async fn inject(ctx: &FactoryContext, args: A) -> DiResult<Self>;
}

/// An object that produces `T` from arguments of type `A`.
#[async_trait]
pub trait Factory<T, A = ()>: Send + Sync + 'static
where
	T: Send + Sync + 'static,
	A: Send + 'static,
{
	async fn create(&self, ctx: &FactoryContext, args: A) -> DiResult<T>;
}

/// Adapts an async closure into a [`Factory`].
///
/// The closure receives an owned clone of the context so its future can be
/// `'static`.
pub struct FnFactory<F>(F);

impl<F> FnFactory<F> {
	pub fn new(f: F) -> Self {
		Self(f)
	}
}

#[async_trait]
impl<F, Fut, T, A> Factory<T, A> for FnFactory<F>
where
	F: Fn(FactoryContext, A) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = DiResult<T>> + Send + 'static,
	T: Send + Sync + 'static,
	A: Send + 'static,
{
	async fn create(&self, ctx: &FactoryContext, args: A) -> DiResult<T> {
		(self.0)(ctx.clone(), args).await
	}
}

/// Which kind of recipe a registry entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecipeKind {
	Class,
	Factory,
}

impl fmt::Display for RecipeKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Class => write!(f, "class"),
			Self::Factory => write!(f, "factory"),
		}
	}
}

/// Type-erased recipe invoked by the locator.
#[async_trait]
pub(crate) trait ErasedRecipe: Send + Sync {
	async fn produce(&self, ctx: &FactoryContext, args: Value) -> DiResult<Instance>;
}

fn decode_args<A: DeserializeOwned>(ctx: &FactoryContext, args: Value) -> DiResult<A> {
	serde_json::from_value(args).map_err(|e| DiError::Validation {
		token: ctx.token_name().to_string(),
		message: format!("cannot decode {}: {e}", type_name::<A>()),
	})
}

struct ClassRecipe<T, A>(PhantomData<fn(A) -> T>);

#[async_trait]
impl<T, A> ErasedRecipe for ClassRecipe<T, A>
where
	T: Injectable<A>,
	A: DeserializeOwned + Send + 'static,
{
	async fn produce(&self, ctx: &FactoryContext, args: Value) -> DiResult<Instance> {
		let args = decode_args::<A>(ctx, args)?;
		let instance: Instance = Arc::new(T::inject(ctx, args).await?);
		Ok(instance)
	}
}

struct FactoryRecipe<F, T, A> {
	factory: F,
	_marker: PhantomData<fn(A) -> T>,
}

#[async_trait]
impl<F, T, A> ErasedRecipe for FactoryRecipe<F, T, A>
where
	F: Factory<T, A>,
	T: Send + Sync + 'static,
	A: DeserializeOwned + Send + 'static,
{
	async fn produce(&self, ctx: &FactoryContext, args: Value) -> DiResult<Instance> {
		let args = decode_args::<A>(ctx, args)?;
		let instance: Instance = Arc::new(self.factory.create(ctx, args).await?);
		Ok(instance)
	}
}

/// A typed recipe for tokens producing `T` from `A`.
///
/// The type parameters tie a recipe to matching tokens at compile time; the
/// registry stores it type-erased.
pub struct Recipe<T, A = ()> {
	kind: RecipeKind,
	erased: Arc<dyn ErasedRecipe>,
	_marker: PhantomData<fn(A) -> T>,
}

impl<T, A> Recipe<T, A>
where
	T: Send + Sync + 'static,
	A: DeserializeOwned + Send + 'static,
{
	/// Class recipe: `T` builds itself.
	pub fn class() -> Self
	where
		T: Injectable<A>,
	{
		Self {
			kind: RecipeKind::Class,
			erased: Arc::new(ClassRecipe::<T, A>(PhantomData)),
			_marker: PhantomData,
		}
	}

	/// Factory recipe backed by a [`Factory`] object.
	pub fn factory<F>(factory: F) -> Self
	where
		F: Factory<T, A>,
	{
		Self {
			kind: RecipeKind::Factory,
			erased: Arc::new(FactoryRecipe {
				factory,
				_marker: PhantomData,
			}),
			_marker: PhantomData,
		}
	}

	/// Factory recipe backed by an async closure.
	pub fn from_fn<F, Fut>(f: F) -> Self
	where
		F: Fn(FactoryContext, A) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = DiResult<T>> + Send + 'static,
	{
		Self::factory(FnFactory::new(f))
	}

	/// A recipe that hands out clones of a ready-made value.
	pub fn value(value: T) -> Self
	where
		T: Clone,
	{
		Self::from_fn(move |_ctx, _args: A| {
			let value = value.clone();
			async move { Ok(value) }
		})
	}
}

impl<T, A> Recipe<T, A> {
	pub fn kind(&self) -> RecipeKind {
		self.kind
	}

	pub(crate) fn into_erased(self) -> (RecipeKind, Arc<dyn ErasedRecipe>) {
		(self.kind, self.erased)
	}
}

impl<T, A> fmt::Debug for Recipe<T, A> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Recipe")
			.field("kind", &self.kind)
			.field("produces", &type_name::<T>())
			.finish()
	}
}
