//! Task-local resolution context and cycle detection.
//!
//! While a recipe runs, the holder it is building is the ambient *waiter*.
//! The context lives in a `tokio::task_local!`, so it follows the recipe across
//! `.await` points and thread migrations of a work-stealing runtime. Recipes
//! that spawn new tasks lose the task-local; [`FactoryContext`] threads the
//! waiter explicitly for exactly that reason.
//!
//! Two relationships are tracked on holders:
//!
//! - `requested_by`: the waiter that was ambient when a holder was allocated
//!   (the ancestor chain of one call chain).
//! - `waiting_on`: the holder whose deferred a construction is awaiting right
//!   now (the waits-for graph across call chains).
//!
//! A request is a cycle if the requested key already appears on the waiter's
//! ancestor chain, or if following `waiting_on` from the requested holder leads
//! back to the waiter. Both checks run before any deferred is awaited, so a
//! cycle fails fast instead of deadlocking.
//!
//! [`FactoryContext`]: crate::FactoryContext

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use crate::holder::{HolderKey, InstanceHolder};
use crate::scope::ScopeInner;
use crate::{DiError, DiResult};

/// Ambient record of which holder is currently under construction.
#[derive(Clone)]
pub(crate) struct ResolutionContext {
	pub(crate) waiter: Arc<InstanceHolder>,
	/// Holder cache the waiter resolves its own dependencies through.
	pub(crate) scope: Option<Arc<ScopeInner>>,
}

tokio::task_local! {
	static RESOLUTION_CONTEXT: ResolutionContext;
}

/// Runs `f` with `ctx` as the ambient resolution context.
///
/// Nested calls shadow the outer context for the duration of `f`.
pub(crate) async fn with_resolution_context<F, T>(ctx: ResolutionContext, f: F) -> T
where
	F: Future<Output = T>,
{
	RESOLUTION_CONTEXT.scope(ctx, f).await
}

pub(crate) fn current_context() -> Option<ResolutionContext> {
	RESOLUTION_CONTEXT.try_with(Clone::clone).ok()
}

/// Label of the holder currently being constructed on this task, if any.
///
/// # Examples
///
/// ```
/// assert!(wirebox_di::current_waiter().is_none());
/// ```
pub fn current_waiter() -> Option<Arc<str>> {
	RESOLUTION_CONTEXT
		.try_with(|ctx| Arc::clone(ctx.waiter.label()))
		.ok()
}

/// Fails when a fresh holder for `key` would be `depth` levels deep.
pub(crate) fn check_depth(waiter: Option<&Arc<InstanceHolder>>, max_depth: usize) -> DiResult<()> {
	let depth = waiter.map_or(1, |w| w.depth() + 1);
	if depth > max_depth {
		return Err(DiError::MaxDepthExceeded(depth));
	}
	Ok(())
}

/// Ancestor check for a key about to be constructed on behalf of `waiter`.
///
/// Returns the cycle path, outermost ancestor first, ending with `label`.
pub(crate) fn find_ancestor_cycle(
	waiter: &Arc<InstanceHolder>,
	key: &HolderKey,
	label: &Arc<str>,
) -> Option<Vec<String>> {
	let mut chain = Vec::new();
	let mut current = Some(Arc::clone(waiter));
	while let Some(holder) = current {
		chain.push(holder.label().to_string());
		if holder.key().token == key.token && holder.key().args == key.args {
			chain.reverse();
			chain.push(label.to_string());
			return Some(chain);
		}
		current = holder.requested_by();
	}
	None
}

/// Waits-for check before `waiter` awaits `target`'s deferred.
///
/// Returns the cycle path starting and ending at the waiter.
pub(crate) fn find_wait_cycle(
	waiter: &Arc<InstanceHolder>,
	target: &Arc<InstanceHolder>,
) -> Option<Vec<String>> {
	let mut path = vec![waiter.label().to_string()];
	let mut seen = HashSet::new();
	let mut current = Arc::clone(target);
	loop {
		path.push(current.label().to_string());
		if Arc::ptr_eq(&current, waiter) {
			return Some(path);
		}
		// A loop that does not pass through the waiter is someone else's cycle.
		if !seen.insert(Arc::as_ptr(&current)) {
			return None;
		}
		current = current.waiting_on()?;
	}
}

/// RAII marker: `waiter` is blocked on `target` until dropped.
pub(crate) struct WaitGuard {
	waiter: Option<Arc<InstanceHolder>>,
}

impl WaitGuard {
	/// Records the edge and then checks it for a cycle.
	///
	/// The edge is published before the check so that two call chains closing
	/// a cycle concurrently cannot both miss it.
	pub(crate) fn enter(
		waiter: Option<&Arc<InstanceHolder>>,
		target: &Arc<InstanceHolder>,
	) -> DiResult<Self> {
		let Some(waiter) = waiter else {
			return Ok(Self { waiter: None });
		};
		waiter.set_waiting_on(Some(Arc::clone(target)));
		let guard = Self {
			waiter: Some(Arc::clone(waiter)),
		};
		if let Some(path) = find_wait_cycle(waiter, target) {
			return Err(DiError::CircularDependency { path });
		}
		Ok(guard)
	}
}

impl Drop for WaitGuard {
	fn drop(&mut self) {
		if let Some(waiter) = self.waiter.take() {
			waiter.set_waiting_on(None);
		}
	}
}
