//! Instance holders and the per-container holder cache.
//!
//! A holder is the lifecycle record of one instantiation: one token, one
//! argument tuple, one container. Its state machine is
//!
//! ```text
//! Creating ──► Created ──► Destroying ──► (removed)
//!     └──────► Error (terminal, replaced on the next attempt)
//! ```
//!
//! Exactly one of the in-flight [`Deferred`], the instance or the error is
//! present, depending on the state.

use std::any::Any;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::registry::RecipeId;
use crate::{Deferred, DiError, DiResult, Scope, TokenId};

/// A constructed, type-erased instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

pub(crate) type DestroyListener = Box<dyn FnOnce() -> BoxFuture<'static, DiResult<()>> + Send>;

/// Cache key of a holder inside one container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct HolderKey {
	pub(crate) token: TokenId,
	pub(crate) recipe: RecipeId,
	pub(crate) args: Option<String>,
}

/// Observable holder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HolderStatus {
	/// The recipe is running.
	Creating,
	/// The instance is available.
	Created,
	/// The recipe failed.
	Error,
	/// Destroy listeners are running.
	Destroying,
}

impl fmt::Display for HolderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Creating => write!(f, "creating"),
			Self::Created => write!(f, "created"),
			Self::Error => write!(f, "error"),
			Self::Destroying => write!(f, "destroying"),
		}
	}
}

enum HolderState {
	Creating(Deferred<Instance>),
	Created(Instance),
	Error(DiError),
	Destroying,
}

impl HolderState {
	fn status(&self) -> HolderStatus {
		match self {
			Self::Creating(_) => HolderStatus::Creating,
			Self::Created(_) => HolderStatus::Created,
			Self::Error(_) => HolderStatus::Error,
			Self::Destroying => HolderStatus::Destroying,
		}
	}
}

pub(crate) struct InstanceHolder {
	key: HolderKey,
	label: Arc<str>,
	scope: Scope,
	depth: usize,
	/// Holder that was constructing when this one was requested.
	requested_by: Option<Weak<InstanceHolder>>,
	state: Mutex<HolderState>,
	created_at: Mutex<Option<Instant>>,
	ttl: Mutex<Option<Duration>>,
	invalidated: AtomicBool,
	completed_seq: AtomicU64,
	dependencies: Mutex<Vec<Arc<str>>>,
	destroy_listeners: Mutex<Vec<DestroyListener>>,
	/// Holder whose deferred this holder's construction is currently awaiting.
	waiting_on: Mutex<Option<Arc<InstanceHolder>>>,
}

impl InstanceHolder {
	pub(crate) fn new(
		key: HolderKey,
		label: Arc<str>,
		scope: Scope,
		requested_by: Option<&Arc<InstanceHolder>>,
		ttl: Option<Duration>,
	) -> Arc<Self> {
		Arc::new(Self {
			depth: requested_by.map_or(1, |parent| parent.depth + 1),
			requested_by: requested_by.map(Arc::downgrade),
			key,
			label,
			scope,
			state: Mutex::new(HolderState::Creating(Deferred::new())),
			created_at: Mutex::new(None),
			ttl: Mutex::new(ttl),
			invalidated: AtomicBool::new(false),
			completed_seq: AtomicU64::new(0),
			dependencies: Mutex::new(Vec::new()),
			destroy_listeners: Mutex::new(Vec::new()),
			waiting_on: Mutex::new(None),
		})
	}

	pub(crate) fn key(&self) -> &HolderKey {
		&self.key
	}

	pub(crate) fn label(&self) -> &Arc<str> {
		&self.label
	}

	pub(crate) fn scope(&self) -> Scope {
		self.scope
	}

	pub(crate) fn depth(&self) -> usize {
		self.depth
	}

	pub(crate) fn requested_by(&self) -> Option<Arc<InstanceHolder>> {
		self.requested_by.as_ref().and_then(Weak::upgrade)
	}

	pub(crate) fn status(&self) -> HolderStatus {
		self.state.lock().status()
	}

	#[cfg(test)]
	pub(crate) fn deferred(&self) -> Option<Deferred<Instance>> {
		match &*self.state.lock() {
			HolderState::Creating(deferred) => Some(deferred.clone()),
			_ => None,
		}
	}

	#[cfg(test)]
	pub(crate) fn instance(&self) -> DiResult<Instance> {
		match &*self.state.lock() {
			HolderState::Created(instance) => Ok(Arc::clone(instance)),
			HolderState::Error(err) => Err(err.clone()),
			HolderState::Destroying => Err(DiError::InstanceDestroying {
				token: self.label.to_string(),
			}),
			HolderState::Creating(_) => Err(DiError::custom(format!(
				"instance '{}' is still being created",
				self.label
			))),
		}
	}

	/// Settles the construction episode. Calls after the first are ignored.
	pub(crate) fn complete(&self, outcome: DiResult<Instance>, seq: u64) -> DiResult<Instance> {
		let deferred = {
			let mut state = self.state.lock();
			let HolderState::Creating(deferred) = &*state else {
				return outcome;
			};
			let deferred = deferred.clone();
			*state = match &outcome {
				Ok(instance) => HolderState::Created(Arc::clone(instance)),
				Err(err) => HolderState::Error(err.clone()),
			};
			deferred
		};

		if outcome.is_ok() {
			self.completed_seq.store(seq, Ordering::SeqCst);
			*self.created_at.lock() = Some(Instant::now());
		}

		let settled = match &outcome {
			Ok(instance) => deferred.resolve(Arc::clone(instance)),
			Err(err) => deferred.reject(err.clone()),
		};
		if let Err(err) = settled {
			tracing::warn!(holder = %self.label, error = %err, "holder settled twice");
		}
		outcome
	}

	/// `Created -> Destroying`. Returns `false` from any other state.
	pub(crate) fn begin_destroy(&self) -> bool {
		let mut state = self.state.lock();
		if matches!(&*state, HolderState::Created(_)) {
			*state = HolderState::Destroying;
			true
		} else {
			false
		}
	}

	/// Runs every destroy listener in registration order and collects failures.
	pub(crate) async fn run_destroy_listeners(&self) -> Vec<DiError> {
		let listeners = std::mem::take(&mut *self.destroy_listeners.lock());
		let mut failures = Vec::new();
		for listener in listeners {
			if let Err(err) = listener().await {
				failures.push(err);
			}
		}
		failures
	}

	pub(crate) fn add_destroy_listener<F, Fut>(&self, listener: F)
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = DiResult<()>> + Send + 'static,
	{
		self.destroy_listeners
			.lock()
			.push(Box::new(move || Box::pin(listener())));
	}

	pub(crate) fn has_destroy_listeners(&self) -> bool {
		!self.destroy_listeners.lock().is_empty()
	}

	pub(crate) fn set_ttl(&self, ttl: Option<Duration>) {
		*self.ttl.lock() = ttl;
	}

	pub(crate) fn invalidate(&self) {
		self.invalidated.store(true, Ordering::SeqCst);
	}

	/// Expired by TTL or explicitly invalidated.
	pub(crate) fn is_stale(&self) -> bool {
		if self.invalidated.load(Ordering::SeqCst) {
			return true;
		}
		match (*self.ttl.lock(), *self.created_at.lock()) {
			(Some(ttl), Some(created_at)) => created_at.elapsed() >= ttl,
			_ => false,
		}
	}

	pub(crate) fn completed_seq(&self) -> u64 {
		self.completed_seq.load(Ordering::SeqCst)
	}

	pub(crate) fn record_dependency(&self, label: Arc<str>) {
		let mut deps = self.dependencies.lock();
		if !deps.contains(&label) {
			deps.push(label);
		}
	}

	pub(crate) fn dependencies(&self) -> Vec<Arc<str>> {
		self.dependencies.lock().clone()
	}

	pub(crate) fn waiting_on(&self) -> Option<Arc<InstanceHolder>> {
		self.waiting_on.lock().clone()
	}

	pub(crate) fn set_waiting_on(&self, target: Option<Arc<InstanceHolder>>) {
		*self.waiting_on.lock() = target;
	}
}

impl fmt::Debug for InstanceHolder {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("InstanceHolder")
			.field("label", &self.label)
			.field("scope", &self.scope)
			.field("status", &self.status())
			.field("depth", &self.depth)
			.finish()
	}
}

/// Rejects the deferred if construction never reached `complete`, so waiters
/// cannot hang on a recipe that panicked or whose future was dropped.
pub(crate) struct CreationGuard {
	holder: Arc<InstanceHolder>,
	armed: bool,
}

impl CreationGuard {
	pub(crate) fn new(holder: Arc<InstanceHolder>) -> Self {
		Self {
			holder,
			armed: true,
		}
	}

	pub(crate) fn finish(mut self, outcome: DiResult<Instance>, seq: u64) -> DiResult<Instance> {
		self.armed = false;
		self.holder.complete(outcome, seq)
	}
}

impl Drop for CreationGuard {
	fn drop(&mut self) {
		if self.armed {
			let label = self.holder.label().to_string();
			let _ = self.holder.complete(
				Err(DiError::custom(format!(
					"construction of '{label}' was aborted before completion"
				))),
				0,
			);
		}
	}
}

/// Outcome of looking a key up under the storage lock.
pub(crate) enum Claim {
	/// A live instance.
	Ready(Instance),
	/// Someone else is constructing; join their deferred.
	Pending(Arc<InstanceHolder>, Deferred<Instance>),
	/// The cached holder expired and has been moved to `Destroying` for us.
	Stale(Arc<InstanceHolder>),
	/// The holder is being torn down by someone else.
	Destroying(Arc<InstanceHolder>),
	/// A fresh `Creating` holder owned by the caller.
	Owner(Arc<InstanceHolder>),
}

enum Snapshot {
	Created(Instance),
	Creating(Deferred<Instance>),
	Destroying,
	Failed(DiError),
}

/// Holder cache of one container (the root locator or a scope).
#[derive(Default)]
pub(crate) struct HolderStorage {
	holders: Mutex<HashMap<HolderKey, Arc<InstanceHolder>>>,
	transients: Mutex<Vec<Arc<InstanceHolder>>>,
}

impl HolderStorage {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Looks up `key`, allocating a `Creating` holder via `create` on a miss or
	/// after a previous failure.
	pub(crate) fn claim(
		&self,
		key: &HolderKey,
		create: impl FnOnce() -> Arc<InstanceHolder>,
	) -> Claim {
		let mut holders = self.holders.lock();
		if let Some(holder) = holders.get(key).cloned() {
			let snapshot = match &*holder.state.lock() {
				HolderState::Created(instance) => Snapshot::Created(Arc::clone(instance)),
				HolderState::Creating(deferred) => Snapshot::Creating(deferred.clone()),
				HolderState::Destroying => Snapshot::Destroying,
				HolderState::Error(err) => Snapshot::Failed(err.clone()),
			};
			match snapshot {
				Snapshot::Created(instance) if !holder.is_stale() => return Claim::Ready(instance),
				Snapshot::Created(_) => {
					holder.begin_destroy();
					return Claim::Stale(holder);
				}
				Snapshot::Creating(deferred) => return Claim::Pending(holder, deferred),
				Snapshot::Destroying => return Claim::Destroying(holder),
				Snapshot::Failed(err) => {
					tracing::debug!(holder = %holder.label(), error = %err, "replacing failed holder");
					holders.remove(key);
				}
			}
		}
		let holder = create();
		holders.insert(key.clone(), Arc::clone(&holder));
		Claim::Owner(holder)
	}

	pub(crate) fn get(&self, key: &HolderKey) -> Option<Arc<InstanceHolder>> {
		self.holders.lock().get(key).cloned()
	}

	/// Removes `key` only if it still maps to `holder`.
	pub(crate) fn remove_if_same(&self, key: &HolderKey, holder: &Arc<InstanceHolder>) -> bool {
		let mut holders = self.holders.lock();
		match holders.get(key) {
			Some(current) if Arc::ptr_eq(current, holder) => {
				holders.remove(key);
				true
			}
			_ => false,
		}
	}

	pub(crate) fn track_transient(&self, holder: Arc<InstanceHolder>) {
		self.transients.lock().push(holder);
	}

	pub(crate) fn len(&self) -> usize {
		self.holders.lock().len() + self.transients.lock().len()
	}

	/// Destroys one cached holder now. Returns `None` if nothing was destroyed.
	pub(crate) async fn destroy_key(&self, key: &HolderKey) -> Option<Vec<DiError>> {
		let holder = self.get(key)?;
		if !holder.begin_destroy() {
			return None;
		}
		let failures = holder.run_destroy_listeners().await;
		self.remove_if_same(key, &holder);
		Some(failures)
	}

	/// Destroys every `Created` holder, most recently completed first, and
	/// returns all listener failures. Holders still `Creating` are left alone.
	pub(crate) async fn teardown(&self) -> Vec<DiError> {
		let mut victims = Vec::new();
		{
			let mut holders = self.holders.lock();
			holders.retain(|_, holder| match holder.status() {
				HolderStatus::Error => false,
				HolderStatus::Created if holder.begin_destroy() => {
					victims.push(Arc::clone(holder));
					true
				}
				_ => true,
			});
		}
		victims.extend(
			self.transients
				.lock()
				.drain(..)
				.filter(|holder| holder.begin_destroy()),
		);
		victims.sort_by_key(|holder| Reverse(holder.completed_seq()));

		let mut failures = Vec::new();
		for holder in &victims {
			tracing::debug!(holder = %holder.label(), "destroying instance");
			failures.extend(holder.run_destroy_listeners().await);
		}

		let mut holders = self.holders.lock();
		for holder in &victims {
			if let Some(current) = holders.get(holder.key()) {
				if Arc::ptr_eq(current, holder) {
					holders.remove(holder.key());
				}
			}
		}
		failures
	}
}
