//! Tokens: the identity under which recipes are registered and holders cached.
//!
//! A token is a name, an optional argument schema and a compile-time marker for
//! the produced type and argument type. Identity is by allocation, not by name:
//! every call to [`Token::new`] mints a fresh [`TokenId`], and clones share it.
//!
//! ```
//! use wirebox_di::Token;
//!
//! struct Mailer;
//!
//! let a: Token<Mailer> = Token::new("Mailer");
//! let b: Token<Mailer> = Token::new("Mailer");
//!
//! assert_eq!(a.id(), a.clone().id());
//! assert_ne!(a.id(), b.id());
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;

use crate::{DiError, DiResult};

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique token identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(u64);

impl TokenId {
	fn next() -> Self {
		Self(NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed))
	}
}

impl fmt::Display for TokenId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Validator for construction arguments, applied before any holder lookup.
pub trait ArgSchema: Send + Sync {
	/// Returns `Err(message)` when `args` is not acceptable.
	fn validate(&self, args: &Value) -> Result<(), String>;
}

impl<F> ArgSchema for F
where
	F: Fn(&Value) -> Result<(), String> + Send + Sync,
{
	fn validate(&self, args: &Value) -> Result<(), String> {
		self(args)
	}
}

/// Type-erased token data shared by every clone of a [`Token`].
pub struct TokenInfo {
	id: TokenId,
	name: Arc<str>,
	schema: Option<Arc<dyn ArgSchema>>,
}

impl TokenInfo {
	pub fn id(&self) -> TokenId {
		self.id
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub(crate) fn shared_name(&self) -> Arc<str> {
		Arc::clone(&self.name)
	}

	pub fn has_schema(&self) -> bool {
		self.schema.is_some()
	}

	/// Encodes arguments, validates them and returns the cache key fragment.
	///
	/// Unit arguments (`null`) produce no key fragment so argument-less tokens
	/// share a single holder.
	pub(crate) fn encode_args<A: Serialize>(&self, args: &A) -> DiResult<(Value, Option<String>)> {
		let value = serde_json::to_value(args).map_err(|e| DiError::Validation {
			token: self.name.to_string(),
			message: e.to_string(),
		})?;
		if let Some(schema) = &self.schema {
			schema
				.validate(&value)
				.map_err(|message| DiError::Validation {
					token: self.name.to_string(),
					message,
				})?;
		}
		let key = if value.is_null() {
			None
		} else {
			Some(value.to_string())
		};
		Ok((value, key))
	}
}

impl fmt::Debug for TokenInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TokenInfo")
			.field("id", &self.id)
			.field("name", &self.name)
			.field("has_schema", &self.schema.is_some())
			.finish()
	}
}

/// Typed token producing `T` from arguments of type `A`.
pub struct Token<T, A = ()> {
	info: Arc<TokenInfo>,
	_marker: PhantomData<fn(A) -> T>,
}

impl<T, A> Token<T, A> {
	/// Creates a token without an argument schema.
	pub fn new(name: impl Into<Arc<str>>) -> Self {
		Self::build(name.into(), None)
	}

	/// Creates a token whose arguments are checked by `schema` before resolution.
	///
	/// # Examples
	///
	/// ```
	/// use wirebox_di::Token;
	///
	/// struct Pool;
	///
	/// let token: Token<Pool, u32> = Token::with_schema("Pool", |args: &serde_json::Value| {
	///     match args.as_u64() {
	///         Some(n) if n > 0 => Ok(()),
	///         _ => Err("pool size must be positive".to_string()),
	///     }
	/// });
	/// assert!(token.info().has_schema());
	/// ```
	pub fn with_schema(name: impl Into<Arc<str>>, schema: impl ArgSchema + 'static) -> Self {
		Self::build(name.into(), Some(Arc::new(schema)))
	}

	fn build(name: Arc<str>, schema: Option<Arc<dyn ArgSchema>>) -> Self {
		Self {
			info: Arc::new(TokenInfo {
				id: TokenId::next(),
				name,
				schema,
			}),
			_marker: PhantomData,
		}
	}

	pub fn id(&self) -> TokenId {
		self.info.id
	}

	pub fn name(&self) -> &str {
		&self.info.name
	}

	pub fn info(&self) -> &Arc<TokenInfo> {
		&self.info
	}
}

impl<T, A> Clone for Token<T, A> {
	fn clone(&self) -> Self {
		Self {
			info: Arc::clone(&self.info),
			_marker: PhantomData,
		}
	}
}

impl<T, A> PartialEq for Token<T, A> {
	fn eq(&self, other: &Self) -> bool {
		self.info.id == other.info.id
	}
}

impl<T, A> Eq for Token<T, A> {}

impl<T, A> std::hash::Hash for Token<T, A> {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.info.id.hash(state);
	}
}

impl<T, A> fmt::Debug for Token<T, A> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Token")
			.field("id", &self.info.id)
			.field("name", &self.info.name)
			.finish()
	}
}

impl<T, A> fmt::Display for Token<T, A> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.info.name)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	struct Service;

	#[rstest]
	fn test_same_name_distinct_identity() {
		let a: Token<Service> = Token::new("Service");
		let b: Token<Service> = Token::new("Service");
		assert_ne!(a, b);
		assert_eq!(a, a.clone());
	}

	#[rstest]
	fn test_unit_args_have_no_key() {
		let token: Token<Service> = Token::new("Service");
		let (value, key) = token.info().encode_args(&()).unwrap();
		assert!(value.is_null());
		assert!(key.is_none());
	}

	#[rstest]
	fn test_args_key_is_serialized_json() {
		let token: Token<Service, (String, u8)> = Token::new("Service");
		let (_, key) = token.info().encode_args(&("eu".to_string(), 3u8)).unwrap();
		assert_eq!(key.as_deref(), Some(r#"["eu",3]"#));
	}

	#[rstest]
	fn test_schema_rejects_invalid_args() {
		let token: Token<Service, i64> = Token::with_schema("Service", |v: &Value| {
			if v.as_i64().is_some_and(|n| n >= 0) {
				Ok(())
			} else {
				Err("must be non-negative".to_string())
			}
		});

		assert!(token.info().encode_args(&5i64).is_ok());
		let err = token.info().encode_args(&-1i64).unwrap_err();
		assert_eq!(
			err,
			DiError::Validation {
				token: "Service".into(),
				message: "must be non-negative".into(),
			}
		);
	}
}
