//! Externally settable future used to publish in-flight construction results.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::DiError;

/// A value that is settled once, by whoever holds it, and awaited by anyone.
///
/// Clones share the same slot. Settling a second time is a programming error
/// and returns [`DiError::DoubleSettlement`] without touching the stored value.
///
/// # Examples
///
/// ```
/// use wirebox_di::{Deferred, DiError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let deferred: Deferred<u32> = Deferred::new();
/// let waiter = deferred.clone();
///
/// deferred.resolve(7).unwrap();
/// assert_eq!(waiter.wait().await, Ok(7));
/// assert_eq!(deferred.resolve(8), Err(DiError::DoubleSettlement));
/// # }
/// ```
pub struct Deferred<T, E = DiError> {
	slot: Arc<watch::Sender<Option<Result<T, E>>>>,
}

impl<T, E> Deferred<T, E>
where
	T: Clone,
	E: Clone + From<DiError>,
{
	pub fn new() -> Self {
		let (tx, _rx) = watch::channel(None);
		Self { slot: Arc::new(tx) }
	}

	pub fn resolve(&self, value: T) -> Result<(), DiError> {
		self.settle(Ok(value))
	}

	pub fn reject(&self, error: E) -> Result<(), DiError> {
		self.settle(Err(error))
	}

	fn settle(&self, outcome: Result<T, E>) -> Result<(), DiError> {
		let mut already_settled = false;
		self.slot.send_if_modified(|slot| {
			if slot.is_some() {
				already_settled = true;
				false
			} else {
				*slot = Some(outcome);
				true
			}
		});
		if already_settled {
			Err(DiError::DoubleSettlement)
		} else {
			Ok(())
		}
	}

	pub fn is_settled(&self) -> bool {
		self.slot.borrow().is_some()
	}

	/// Returns the outcome if already settled, without waiting.
	pub fn peek(&self) -> Option<Result<T, E>> {
		self.slot.borrow().clone()
	}

	/// Waits for settlement and returns a clone of the outcome.
	pub async fn wait(&self) -> Result<T, E> {
		let mut rx = self.slot.subscribe();
		match rx.wait_for(Option::is_some).await {
			Ok(slot) => match slot.clone() {
				Some(outcome) => outcome,
				None => Err(E::from(DiError::custom("deferred observed without a value"))),
			},
			// The sender lives in `self`, so the channel cannot close while we wait.
			Err(_) => Err(E::from(DiError::custom("deferred dropped before settlement"))),
		}
	}
}

impl<T, E> Clone for Deferred<T, E> {
	fn clone(&self) -> Self {
		Self {
			slot: Arc::clone(&self.slot),
		}
	}
}

impl<T, E> Default for Deferred<T, E>
where
	T: Clone,
	E: Clone + From<DiError>,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<T, E> fmt::Debug for Deferred<T, E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Deferred")
			.field("settled", &self.slot.borrow().is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use std::time::Duration;

	#[rstest]
	#[tokio::test]
	async fn test_waiters_registered_before_settlement_are_woken() {
		// Arrange
		let deferred: Deferred<String> = Deferred::new();
		let waiters: Vec<_> = (0..4)
			.map(|_| {
				let d = deferred.clone();
				tokio::spawn(async move { d.wait().await })
			})
			.collect();
		tokio::task::yield_now().await;

		// Act
		deferred.resolve("ready".to_string()).unwrap();

		// Assert
		for waiter in waiters {
			assert_eq!(waiter.await.unwrap(), Ok("ready".to_string()));
		}
	}

	#[rstest]
	#[tokio::test]
	async fn test_rejection_is_shared() {
		let deferred: Deferred<u8> = Deferred::new();
		deferred.reject(DiError::custom("boom")).unwrap();

		assert_eq!(deferred.wait().await, Err(DiError::custom("boom")));
		assert_eq!(deferred.clone().wait().await, Err(DiError::custom("boom")));
	}

	#[rstest]
	fn test_double_settlement_fails_and_keeps_first_value() {
		let deferred: Deferred<u8> = Deferred::new();
		assert!(!deferred.is_settled());

		deferred.resolve(1).unwrap();
		assert_eq!(deferred.reject(DiError::custom("late")), Err(DiError::DoubleSettlement));
		assert_eq!(deferred.resolve(2), Err(DiError::DoubleSettlement));

		assert!(deferred.is_settled());
		assert_eq!(deferred.peek(), Some(Ok(1)));
	}

	#[rstest]
	#[tokio::test(start_paused = true)]
	async fn test_wait_does_not_complete_before_settlement() {
		let deferred: Deferred<u8> = Deferred::new();
		let pending = tokio::time::timeout(Duration::from_secs(5), deferred.wait()).await;
		assert!(pending.is_err());
	}
}
