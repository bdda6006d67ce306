//! Invalidation scheduler and notification registry tests.
//!
//! These verify that:
//! 1. `invalidate`/`set`/`update` are deferred intents that coalesce within
//!    one turn
//! 2. Cleanups always run fully before the replacement value installs
//! 3. A `*` listener sees exactly `[resolving, resolved]` per cycle, with
//!    failures reaching the catch-all only
//! 4. Re-entrant invalidation beyond the bound fails fast

use axle_core::{Atom, AtomEvent, AtomState, CoreError, EventKind, Scope};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn record_events(log: &Arc<Mutex<Vec<String>>>) -> impl Fn(&AtomEvent) + Send + Sync + 'static {
	let log = Arc::clone(log);
	move |event| {
		let label = match event {
			AtomEvent::Resolving { .. } => "resolving",
			AtomEvent::Resolved { .. } => "resolved",
			AtomEvent::Failed { .. } => "failed",
		};
		log.lock().unwrap().push(label.to_string());
	}
}

#[tokio::test]
async fn invalidate_reruns_the_factory_on_the_deferred_pass() {
	let scope = Scope::new();
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = {
		let calls = Arc::clone(&calls);
		Atom::new("counter", move |_cx| {
			let calls = Arc::clone(&calls);
			async move { Ok(calls.fetch_add(1, Ordering::SeqCst)) }
		})
	};
	let ctl = scope.controller(&counter);

	assert_eq!(*ctl.resolve().await.unwrap(), 0);
	ctl.invalidate();
	// The call returns immediately; nothing has happened yet.
	assert_eq!(*ctl.get().unwrap(), 0);
	scope.settle().await;
	assert_eq!(*ctl.get().unwrap(), 1);
	assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cleanups_run_fully_before_the_factory_reruns() {
	let scope = Scope::new();
	let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
	let atom = {
		let order = Arc::clone(&order);
		Atom::new("with-cleanup", move |cx| {
			let order = Arc::clone(&order);
			async move {
				order.lock().unwrap().push("factory");
				let order = Arc::clone(&order);
				cx.cleanup(move || async move {
					// Suspend mid-cleanup; the factory must still wait.
					tokio::time::sleep(Duration::from_millis(20)).await;
					order.lock().unwrap().push("cleanup");
				});
				Ok(0u32)
			}
		})
	};
	let ctl = scope.controller(&atom);

	ctl.resolve().await.unwrap();
	ctl.invalidate();
	scope.settle().await;

	assert_eq!(*order.lock().unwrap(), vec!["factory", "cleanup", "factory"]);
}

#[tokio::test]
async fn wildcard_listener_sees_exactly_one_pair_per_cycle() {
	let scope = Scope::new();
	let atom: Atom<u32> = Atom::new("observed", |_cx| async { Ok(1) });
	let ctl = scope.controller(&atom);
	ctl.resolve().await.unwrap();

	let log = Arc::new(Mutex::new(Vec::new()));
	let _sub = ctl.on(EventKind::Wildcard, record_events(&log));

	ctl.invalidate();
	scope.settle().await;
	assert_eq!(*log.lock().unwrap(), vec!["resolving", "resolved"]);

	ctl.invalidate();
	scope.settle().await;
	assert_eq!(
		*log.lock().unwrap(),
		vec!["resolving", "resolved", "resolving", "resolved"]
	);
}

#[tokio::test]
async fn failure_notifies_the_catch_all_only() {
	let scope = Scope::new();
	let fail_next = Arc::new(AtomicUsize::new(0));
	let atom = {
		let fail_next = Arc::clone(&fail_next);
		Atom::new("flaky", move |_cx| {
			let attempt = fail_next.fetch_add(1, Ordering::SeqCst);
			async move {
				if attempt == 0 {
					Ok(1u32)
				} else {
					Err("downstream gone".into())
				}
			}
		})
	};
	let ctl = scope.controller(&atom);
	ctl.resolve().await.unwrap();

	let wildcard_log = Arc::new(Mutex::new(Vec::new()));
	let resolved_log = Arc::new(Mutex::new(Vec::new()));
	let _wild = ctl.on(EventKind::Wildcard, record_events(&wildcard_log));
	let _resolved = ctl.on(EventKind::Resolved, record_events(&resolved_log));

	ctl.invalidate();
	scope.settle().await;

	assert_eq!(*wildcard_log.lock().unwrap(), vec!["resolving", "failed"]);
	// The resolved channel never observes the failure.
	assert!(resolved_log.lock().unwrap().is_empty());
	assert_eq!(ctl.state(), AtomState::Failed);
}

#[tokio::test]
async fn set_then_get_round_trips_without_invoking_the_factory() {
	let scope = Scope::new();
	let calls = Arc::new(AtomicUsize::new(0));
	let atom = {
		let calls = Arc::clone(&calls);
		Atom::new("pushed", move |_cx| {
			let calls = Arc::clone(&calls);
			async move {
				calls.fetch_add(1, Ordering::SeqCst);
				Ok(0u32)
			}
		})
	};
	let ctl = scope.controller(&atom);

	ctl.set(9);
	scope.settle().await;
	assert_eq!(*ctl.get().unwrap(), 9);
	assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalidate_then_set_in_one_frame_installs_the_pushed_value() {
	let scope = Scope::new();
	let calls = Arc::new(AtomicUsize::new(0));
	let atom = {
		let calls = Arc::clone(&calls);
		Atom::new("coalesced", move |_cx| {
			let calls = Arc::clone(&calls);
			async move {
				calls.fetch_add(1, Ordering::SeqCst);
				Ok(0u32)
			}
		})
	};
	let ctl = scope.controller(&atom);
	ctl.resolve().await.unwrap();
	assert_eq!(calls.load(Ordering::SeqCst), 1);

	ctl.invalidate();
	ctl.set(42);
	scope.settle().await;

	assert_eq!(*ctl.get().unwrap(), 42);
	// The set cancelled the factory re-run.
	assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn later_sets_win_within_one_frame() {
	let scope = Scope::new();
	let atom: Atom<u32> = Atom::new("last-wins", |_cx| async { Ok(0) });
	let ctl = scope.controller(&atom);

	ctl.set(1);
	ctl.set(2);
	ctl.update(|n| n + 10);
	scope.settle().await;
	// One deferred pass, one installed value: the final update intent.
	assert_eq!(*ctl.get().unwrap(), 12);
}

#[tokio::test]
async fn update_applies_to_the_current_value() {
	let scope = Scope::new();
	let atom: Atom<u32> = Atom::new("updated", |_cx| async { Ok(5) });
	let ctl = scope.controller(&atom);
	ctl.resolve().await.unwrap();

	ctl.update(|n| n * 3);
	scope.settle().await;
	assert_eq!(*ctl.get().unwrap(), 15);
}

#[tokio::test]
async fn update_on_an_idle_atom_fails_the_pass() {
	let scope = Scope::new();
	let atom: Atom<u32> = Atom::new("never-resolved", |_cx| async { Ok(0) });
	let ctl = scope.controller(&atom);

	ctl.update(|n| n + 1);
	scope.settle().await;
	assert_eq!(ctl.state(), AtomState::Failed);
	assert!(matches!(ctl.get(), Err(CoreError::NotResolved { .. })));
}

#[tokio::test]
async fn stale_reads_are_served_during_the_resolving_window() {
	let scope = Scope::new();
	let gate = Arc::new(tokio::sync::Semaphore::new(0));
	let attempts = Arc::new(AtomicUsize::new(0));
	let atom = {
		let gate = Arc::clone(&gate);
		let attempts = Arc::clone(&attempts);
		Atom::new("stale", move |_cx| {
			let gate = Arc::clone(&gate);
			let attempt = attempts.fetch_add(1, Ordering::SeqCst);
			async move {
				if attempt == 0 {
					Ok(0u32)
				} else {
					// Hold the re-resolution open until the test releases it.
					let permit = gate.acquire().await.map_err(|e| Box::new(e) as axle_core::BoxError)?;
					permit.forget();
					Ok(1u32)
				}
			}
		})
	};
	let ctl = scope.controller(&atom);
	assert_eq!(*ctl.resolve().await.unwrap(), 0);

	ctl.invalidate();
	let mut spins = 0;
	while ctl.state() != AtomState::Resolving {
		tokio::time::sleep(Duration::from_millis(1)).await;
		spins += 1;
		assert!(spins < 1000, "atom never entered the resolving window");
	}

	// Inside the window the previous value keeps being served.
	assert_eq!(ctl.state(), AtomState::Resolving);
	assert_eq!(*ctl.get().unwrap(), 0);

	gate.add_permits(1);
	scope.settle().await;
	assert_eq!(*ctl.get().unwrap(), 1);
	assert_eq!(ctl.state(), AtomState::Resolved);
}

#[tokio::test]
async fn set_supersedes_a_stale_in_flight_resolution() {
	let scope = Scope::new();
	let gate = Arc::new(tokio::sync::Semaphore::new(0));
	let atom = {
		let gate = Arc::clone(&gate);
		Atom::new("superseded", move |_cx| {
			let gate = Arc::clone(&gate);
			async move {
				let permit = gate.acquire().await.map_err(|e| Box::new(e) as axle_core::BoxError)?;
				permit.forget();
				// Stale result; must never overwrite the pushed value.
				Ok(99u32)
			}
		})
	};
	let ctl = scope.controller(&atom);

	// Park the initial resolution inside its factory.
	let resolver = {
		let scope = scope.clone();
		let atom = atom.clone();
		tokio::spawn(async move { scope.resolve(&atom).await })
	};
	let mut spins = 0;
	while ctl.state() != AtomState::Resolving {
		tokio::time::sleep(Duration::from_millis(1)).await;
		spins += 1;
		assert!(spins < 1000, "resolution never started");
	}

	// The pushed value lands first; the in-flight run becomes stale.
	ctl.set(55);
	scope.settle().await;
	assert_eq!(*ctl.get().unwrap(), 55);

	// Release the stale factory; its result is discarded, and the parked
	// resolver observes the superseding value instead.
	gate.add_permits(1);
	let observed = resolver.await.unwrap().unwrap();
	assert_eq!(*observed, 55);
	assert_eq!(*ctl.get().unwrap(), 55);
}

#[tokio::test]
async fn runaway_invalidation_loops_fail_fast() {
	let scope = Scope::builder().max_invalidation_passes(5).build();
	let atom: Atom<u32> = Atom::new("looping", |_cx| async { Ok(0) });
	let ctl = scope.controller(&atom);
	ctl.resolve().await.unwrap();

	// A listener that re-invalidates on every successful resolution.
	let rearm = ctl.clone();
	let _sub = ctl.on(EventKind::Resolved, move |_event| {
		rearm.invalidate();
	});

	ctl.invalidate();
	scope.settle().await;

	assert_eq!(ctl.state(), AtomState::Failed);
	assert!(matches!(ctl.get(), Err(CoreError::LoopDetected { .. })));
}
