//! Locator configuration.
//!
//! Supports TOML configuration files and builder-style overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DiError, DiResult};

/// Default limit on nested construction, matching the depth guard of the
/// cycle detector.
pub const DEFAULT_MAX_RESOLUTION_DEPTH: usize = 100;

/// Tunables of a [`ServiceLocator`](crate::ServiceLocator).
///
/// ```toml
/// max_resolution_depth = 32
/// default_ttl_secs = 300
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
	/// Longest allowed chain of nested constructions.
	pub max_resolution_depth: usize,

	/// TTL applied to every new holder unless its recipe sets one. 0 = never expires.
	pub default_ttl_secs: u64,
}

impl Default for LocatorConfig {
	fn default() -> Self {
		Self {
			max_resolution_depth: DEFAULT_MAX_RESOLUTION_DEPTH,
			default_ttl_secs: 0,
		}
	}
}

impl LocatorConfig {
	pub fn with_max_resolution_depth(mut self, depth: usize) -> Self {
		self.max_resolution_depth = depth;
		self
	}

	pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
		self.default_ttl_secs = ttl.as_secs();
		self
	}

	/// The default TTL, or `None` when holders never expire.
	pub fn default_ttl(&self) -> Option<Duration> {
		(self.default_ttl_secs > 0).then(|| Duration::from_secs(self.default_ttl_secs))
	}

	/// Load configuration from a TOML file.
	///
	/// # Errors
	///
	/// Returns [`DiError::Config`] if the file cannot be read or parsed.
	pub fn from_file(path: impl AsRef<Path>) -> DiResult<Self> {
		let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
			DiError::Config(format!("cannot read {}: {e}", path.as_ref().display()))
		})?;
		Self::from_toml_str(&content)
	}

	/// Parse configuration from a TOML string.
	pub fn from_toml_str(content: &str) -> DiResult<Self> {
		let config: Self = toml::from_str(content)?;
		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> DiResult<()> {
		if self.max_resolution_depth == 0 {
			return Err(DiError::Config(
				"max_resolution_depth must be at least 1".to_string(),
			));
		}
		Ok(())
	}
}
