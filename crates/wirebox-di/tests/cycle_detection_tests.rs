//! Circular dependency detection tests
//!
//! Cycles must fail fast with the full path instead of deadlocking on an
//! in-flight construction, whether the cycle closes within one call chain or
//! across concurrently running ones.

use rstest::*;
use std::sync::Arc;
use std::time::Duration;
use wirebox_di::{DiError, FactoryContext, Registry, Scope, ServiceLocator, Token};

const DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Node;

#[fixture]
fn registry() -> Registry {
	Registry::new()
}

/// Registers each token as depending on the next one, wrapping around.
fn register_ring(registry: &Registry, names: &[&str], scope: Scope, delay: Duration) -> Vec<Token<Node>> {
	let tokens: Vec<Token<Node>> = names.iter().map(|name| Token::new(*name)).collect();
	for (i, token) in tokens.iter().enumerate() {
		let next = tokens[(i + 1) % tokens.len()].clone();
		registry.register_fn(token, scope, move |ctx: FactoryContext, ()| {
			let next = next.clone();
			async move {
				if !delay.is_zero() {
					tokio::time::sleep(delay).await;
				}
				ctx.inject(&next).await?;
				Ok(Node)
			}
		});
	}
	tokens
}

fn cycle_path(result: Result<Result<Arc<Node>, DiError>, tokio::time::error::Elapsed>) -> Vec<String> {
	match result {
		Ok(Err(DiError::CircularDependency { path })) => path,
		Ok(other) => panic!("expected CircularDependency, got {other:?}"),
		Err(_) => panic!("resolution hung instead of detecting the cycle"),
	}
}

#[rstest]
#[case::singleton(Scope::Singleton)]
#[case::transient(Scope::Transient)]
#[tokio::test]
async fn test_two_node_cycle_fails_fast(registry: Registry, #[case] scope: Scope) {
	// Arrange
	let tokens = register_ring(&registry, &["A", "B"], scope, Duration::ZERO);
	let locator = ServiceLocator::new(registry);

	// Act
	let result = tokio::time::timeout(DEADLINE, locator.get(&tokens[0])).await;

	// Assert
	let path = cycle_path(result);
	assert_eq!(path, vec!["A", "B", "A"]);
}

#[rstest]
#[tokio::test]
async fn test_request_scoped_cycle_fails_fast(registry: Registry) {
	let tokens = register_ring(&registry, &["A", "B", "C"], Scope::Request, Duration::ZERO);
	let locator = ServiceLocator::new(registry);
	let scope = locator.begin_request("req-1").unwrap();

	let result = tokio::time::timeout(DEADLINE, scope.get(&tokens[1])).await;

	assert_eq!(cycle_path(result), vec!["B", "C", "A", "B"]);
}

#[rstest]
#[tokio::test]
async fn test_self_dependency_is_a_cycle(registry: Registry) {
	let tokens = register_ring(&registry, &["Loop"], Scope::Singleton, Duration::ZERO);
	let locator = ServiceLocator::new(registry);

	let result = tokio::time::timeout(DEADLINE, locator.get(&tokens[0])).await;

	assert_eq!(cycle_path(result), vec!["Loop", "Loop"]);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cycle_closed_across_concurrent_chains(registry: Registry) {
	// Arrange: both constructions start before either requests the other
	let tokens = register_ring(&registry, &["A", "B"], Scope::Singleton, Duration::from_millis(50));
	let locator = ServiceLocator::new(registry);

	// Act
	let a = {
		let locator = locator.clone();
		let token = tokens[0].clone();
		tokio::spawn(async move { tokio::time::timeout(DEADLINE, locator.get(&token)).await })
	};
	let b = {
		let locator = locator.clone();
		let token = tokens[1].clone();
		tokio::spawn(async move { tokio::time::timeout(DEADLINE, locator.get(&token)).await })
	};

	// Assert
	for path in [cycle_path(a.await.unwrap()), cycle_path(b.await.unwrap())] {
		assert!(path.contains(&"A".to_string()), "path {path:?} misses A");
		assert!(path.contains(&"B".to_string()), "path {path:?} misses B");
		assert_eq!(path.first(), path.last());
	}
}

#[rstest]
#[tokio::test]
async fn test_failed_cycle_can_be_retried_after_fix(registry: Registry) {
	// Arrange
	let tokens = register_ring(&registry, &["A", "B"], Scope::Singleton, Duration::ZERO);
	let locator = ServiceLocator::new(registry);
	assert!(locator.get(&tokens[0]).await.is_err());

	// Act: break the ring by overriding B
	let guard = locator.override_fn(&tokens[1], |_ctx, ()| async { Ok(Node) });
	let result = locator.get(&tokens[0]).await;

	// Assert
	assert!(result.is_ok());
	guard.restore();
}

#[rstest]
#[tokio::test]
async fn test_shared_dependency_is_not_a_cycle(registry: Registry) {
	// Arrange: diamond Top -> (Left, Right) -> Bottom
	let bottom: Token<Node> = Token::new("Bottom");
	registry.register_fn(&bottom, Scope::Singleton, |_ctx, ()| async { Ok(Node) });
	let mut sides = Vec::new();
	for name in ["Left", "Right"] {
		let side: Token<Node> = Token::new(name);
		let bottom = bottom.clone();
		registry.register_fn(&side, Scope::Transient, move |ctx: FactoryContext, ()| {
			let bottom = bottom.clone();
			async move {
				ctx.inject(&bottom).await?;
				Ok(Node)
			}
		});
		sides.push(side);
	}
	let top: Token<Node> = Token::new("Top");
	registry.register_fn(&top, Scope::Singleton, move |ctx: FactoryContext, ()| {
		let sides = sides.clone();
		async move {
			for side in &sides {
				ctx.inject(side).await?;
			}
			assert_eq!(ctx.dependencies().len(), 2);
			Ok(Node)
		}
	});
	let locator = ServiceLocator::new(registry);

	// Act
	let result = tokio::time::timeout(DEADLINE, locator.get(&top)).await;

	// Assert
	assert!(matches!(result, Ok(Ok(_))));
}
