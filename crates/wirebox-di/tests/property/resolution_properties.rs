use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use wirebox_di::{DiError, FactoryContext, Registry, Scope, ServiceLocator, Token};

#[derive(Debug)]
struct Counted {
	serial: usize,
}

fn runtime() -> tokio::runtime::Runtime {
	tokio::runtime::Builder::new_multi_thread()
		.worker_threads(2)
		.enable_all()
		.build()
		.unwrap()
}

fn counted_token(registry: &Registry, scope: Scope) -> (Token<Counted>, Arc<AtomicUsize>) {
	let token: Token<Counted> = Token::new("Counted");
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&calls);
	registry.register_fn(&token, scope, move |_ctx, ()| {
		let counter = Arc::clone(&counter);
		async move {
			tokio::task::yield_now().await;
			Ok(Counted {
				serial: counter.fetch_add(1, Ordering::SeqCst),
			})
		}
	});
	(token, calls)
}

// Property 1: Resolution idempotency
// Any number of sequential gets yields one construction and one instance
proptest! {
	#[test]
	fn prop_singleton_idempotency(get_count in 1usize..20) {
		let rt = runtime();
		rt.block_on(async {
			let registry = Registry::new();
			let (token, calls) = counted_token(&registry, Scope::Singleton);
			let locator = ServiceLocator::new(registry);

			let first = locator.get(&token).await.unwrap();
			for _ in 1..get_count {
				let again = locator.get(&token).await.unwrap();
				assert!(Arc::ptr_eq(&first, &again));
			}

			assert_eq!(calls.load(Ordering::SeqCst), 1);
			assert_eq!(first.serial, 0);
		});
	}
}

// Property 2: Scope isolation
// N scopes produce N distinct request-scoped instances
proptest! {
	#[test]
	fn prop_scope_isolation(scope_count in 1usize..8, gets_per_scope in 1usize..4) {
		let rt = runtime();
		rt.block_on(async {
			let registry = Registry::new();
			let (token, calls) = counted_token(&registry, Scope::Request);
			let locator = ServiceLocator::new(registry);

			let mut serials = Vec::new();
			for i in 0..scope_count {
				let scope = locator.begin_request(format!("req-{i}")).unwrap();
				let first = scope.get(&token).await.unwrap();
				for _ in 1..gets_per_scope {
					assert!(Arc::ptr_eq(&first, &scope.get(&token).await.unwrap()));
				}
				serials.push(first.serial);
				scope.end_request().await.unwrap();
			}

			serials.sort_unstable();
			serials.dedup();
			assert_eq!(serials.len(), scope_count);
			assert_eq!(calls.load(Ordering::SeqCst), scope_count);
			assert!(locator.active_scopes().is_empty());
		});
	}
}

// Property 3: Single flight
// Concurrent gets for one uncached key share a single construction
proptest! {
	#![proptest_config(ProptestConfig::with_cases(32))]
	#[test]
	fn prop_single_flight(task_count in 2usize..40) {
		let rt = runtime();
		rt.block_on(async {
			let registry = Registry::new();
			let (token, calls) = counted_token(&registry, Scope::Singleton);
			let locator = ServiceLocator::new(registry);

			let handles: Vec<_> = (0..task_count)
				.map(|_| {
					let locator = locator.clone();
					let token = token.clone();
					tokio::spawn(async move { locator.get(&token).await })
				})
				.collect();
			let mut instances = Vec::new();
			for handle in handles {
				instances.push(handle.await.unwrap().unwrap());
			}

			assert_eq!(calls.load(Ordering::SeqCst), 1);
			assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
		});
	}
}

// Property 4: Cycle detection
// A ring of any length fails with a path that starts and ends at the requested token
proptest! {
	#[test]
	fn prop_ring_is_detected(ring_len in 1usize..6, start in 0usize..6) {
		let start = start % ring_len;
		let rt = runtime();
		rt.block_on(async {
			let registry = Registry::new();
			let tokens: Vec<Token<Counted>> =
				(0..ring_len).map(|i| Token::new(format!("N{i}"))).collect();
			for (i, token) in tokens.iter().enumerate() {
				let next = tokens[(i + 1) % ring_len].clone();
				registry.register_fn(token, Scope::Singleton, move |ctx: FactoryContext, ()| {
					let next = next.clone();
					async move {
						ctx.inject(&next).await?;
						Ok(Counted { serial: 0 })
					}
				});
			}
			let locator = ServiceLocator::new(registry);

			let err = locator.get(&tokens[start]).await.unwrap_err();

			match err {
				DiError::CircularDependency { path } => {
					assert_eq!(path.len(), ring_len + 1);
					assert_eq!(path.first(), Some(&format!("N{start}")));
					assert_eq!(path.first(), path.last());
				}
				other => panic!("expected CircularDependency, got {other:?}"),
			}
		});
	}
}
