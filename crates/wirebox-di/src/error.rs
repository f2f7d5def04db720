//! Resolution runtime error types.
//!
//! Every failure the locator can produce is a distinct [`DiError`] variant so
//! callers can match on the kind instead of parsing messages. `DiError` is
//! `Clone`: a single construction failure is delivered to every task that was
//! waiting on the same in-flight holder.

use thiserror::Error;

/// Result type for resolution operations.
pub type DiResult<T> = Result<T, DiError>;

/// Resolution runtime errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DiError {
	/// Construction arguments were rejected by the token's argument schema.
	#[error("invalid arguments for '{token}': {message}")]
	Validation {
		/// Token name.
		token: String,
		/// Message produced by the schema.
		message: String,
	},

	/// No registry entry exists for the requested token.
	#[error("no recipe registered for '{token}'")]
	InstanceNotFound {
		/// Token name.
		token: String,
	},

	/// A recipe ran but its result could not be resolved as the token's produced type.
	#[error("recipe for '{token}' did not resolve to the expected {expected}")]
	FactoryTokenNotResolved {
		/// Token name.
		token: String,
		/// What the runtime expected to receive.
		expected: String,
	},

	/// A holder transitively waits on itself.
	#[error("circular dependency detected: {}", .path.join(" -> "))]
	CircularDependency {
		/// Token names along the cycle, first and last entries are equal.
		path: Vec<String>,
	},

	/// The instance is being torn down.
	#[error("instance '{token}' is being destroyed")]
	InstanceDestroying {
		/// Token name.
		token: String,
	},

	/// A scope with this id is already active.
	#[error("scope '{0}' is already active")]
	DuplicateScope(String),

	/// A deferred value was settled more than once.
	#[error("deferred value settled twice")]
	DoubleSettlement,

	/// The scope was never started or has already ended.
	#[error("scope '{0}' does not exist")]
	ScopeNotFound(String),

	/// A request-scoped token was resolved outside of a scoped container.
	#[error("'{token}' is request-scoped and can only be resolved inside a scope")]
	NoActiveScope {
		/// Token name.
		token: String,
	},

	/// The construction chain exceeded the configured depth limit.
	#[error(
		"maximum resolution depth exceeded: {0}\nThis likely indicates an extremely deep dependency chain."
	)]
	MaxDepthExceeded(usize),

	/// One or more destroy listeners failed during teardown.
	#[error("teardown of '{scope}' failed with {} error(s): {}", .failures.len(), join_failures(.failures))]
	TeardownFailed {
		/// Scope id, or `root` for the locator itself.
		scope: String,
		/// Every listener failure, in the order the listeners ran.
		failures: Vec<DiError>,
	},

	/// Configuration error.
	#[error("configuration error: {0}")]
	Config(String),

	/// Error raised by a recipe or destroy listener.
	#[error("{0}")]
	Custom(String),
}

impl DiError {
	/// Convenience constructor for recipe-level failures.
	pub fn custom(message: impl Into<String>) -> Self {
		Self::Custom(message.into())
	}
}

fn join_failures(failures: &[DiError]) -> String {
	failures
		.iter()
		.map(ToString::to_string)
		.collect::<Vec<_>>()
		.join("; ")
}

impl From<toml::de::Error> for DiError {
	fn from(err: toml::de::Error) -> Self {
		Self::Config(err.to_string())
	}
}
