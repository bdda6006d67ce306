//! Execution-context tree and flow tests.
//!
//! These verify that:
//! 1. Every invocation gets its own child context, auto-closed on success
//!    and failure alike
//! 2. `seek` walks the parent chain only; `get`/`set` stay local
//! 3. Tag dependencies resolve hierarchically with the documented fallback
//!    order, and `collect-all` gathers nearest-first
//! 4. Parse slots reject values with a structured phase error

use axle_core::{
	Atom, CoreError, EventKind, ExecContext, Flow, ParsePhase, Scope, Tag, TagMode,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn flows_run_with_their_input_and_dependencies() {
	let scope = Scope::new();
	let base: Atom<u32> = Atom::new("base", |_cx| async { Ok(100) });
	let add: Flow<u32, u32> = Flow::builder("add", |cx, n| async move {
		Ok(*cx.dep::<u32>("base")? + *n)
	})
	.dep("base", &base)
	.build();

	assert_eq!(*scope.exec(&add, 7).await.unwrap(), 107);
}

#[tokio::test]
async fn seek_from_a_grandchild_finds_the_nearest_ancestor_value() {
	let scope = Scope::new();
	let key: Tag<u32> = Tag::new("k");

	let inner: Flow<(), (u32, bool)> = {
		let key = key.clone();
		Flow::new("inner", move |cx, _input| {
			let key = key.clone();
			async move {
				let seeked = cx.seek(&key).map(|v| *v).unwrap_or(0);
				// Local-only read misses: the value lives on an ancestor.
				let local_miss = cx.get(&key).is_none();
				Ok((seeked, local_miss))
			}
		})
	};
	let outer: Flow<(), (u32, bool)> = {
		let key = key.clone();
		let inner = inner.clone();
		Flow::new("outer", move |cx, _input| {
			let key = key.clone();
			let inner = inner.clone();
			async move {
				cx.set(&key, 1);
				let result = cx.exec(&inner, ()).await?;
				Ok(*result)
			}
		})
	};

	let (seeked, local_miss) = *scope.exec(&outer, ()).await.unwrap();
	assert_eq!(seeked, 1);
	assert!(local_miss);
}

#[tokio::test]
async fn seek_prefers_the_nearest_ancestor_when_several_set_the_key() {
	let scope = Scope::new();
	let key: Tag<u32> = Tag::new("k");

	let leaf: Flow<(), u32> = {
		let key = key.clone();
		Flow::new("leaf", move |cx, _input| {
			let key = key.clone();
			async move { Ok(cx.seek(&key).map(|v| *v).unwrap_or(0)) }
		})
	};
	let mid: Flow<(), u32> = {
		let key = key.clone();
		let leaf = leaf.clone();
		Flow::new("mid", move |cx, _input| {
			let key = key.clone();
			let leaf = leaf.clone();
			async move {
				cx.set(&key, 2);
				Ok(*cx.exec(&leaf, ()).await?)
			}
		})
	};
	let top: Flow<(), u32> = {
		let key = key.clone();
		let mid = mid.clone();
		Flow::new("top", move |cx, _input| {
			let key = key.clone();
			let mid = mid.clone();
			async move {
				cx.set(&key, 1);
				Ok(*cx.exec(&mid, ()).await?)
			}
		})
	};

	assert_eq!(*scope.exec(&top, ()).await.unwrap(), 2);
}

#[tokio::test]
async fn child_contexts_auto_close_on_success_and_failure() {
	let scope = Scope::new();
	let closed = Arc::new(AtomicUsize::new(0));

	let ok_flow: Flow<(), u32> = {
		let closed = Arc::clone(&closed);
		Flow::new("ok", move |cx, _input| {
			let closed = Arc::clone(&closed);
			async move {
				cx.defer(move || async move {
					closed.fetch_add(1, Ordering::SeqCst);
				});
				Ok(1)
			}
		})
	};
	let failing: Flow<(), u32> = {
		let closed = Arc::clone(&closed);
		Flow::new("failing", move |cx, _input| {
			let closed = Arc::clone(&closed);
			async move {
				cx.defer(move || async move {
					closed.fetch_add(1, Ordering::SeqCst);
				});
				Err("exploded".into())
			}
		})
	};

	scope.exec(&ok_flow, ()).await.unwrap();
	assert_eq!(closed.load(Ordering::SeqCst), 1);

	let err = scope.exec(&failing, ()).await.unwrap_err();
	assert!(matches!(err, CoreError::Factory { .. }));
	// The cleanup ran even though the body failed.
	assert_eq!(closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn exec_on_a_closed_context_fails() {
	let scope = Scope::new();
	let noop: Flow<(), u32> = Flow::new("noop", |_cx, _input| async { Ok(0) });

	let smuggled: Arc<Mutex<Option<axle_core::FlowCtx>>> = Arc::new(Mutex::new(None));
	let keeper: Flow<(), u32> = {
		let smuggled = Arc::clone(&smuggled);
		Flow::new("keeper", move |cx, _input| {
			let smuggled = Arc::clone(&smuggled);
			async move {
				*smuggled.lock().unwrap() = Some(cx.clone());
				Ok(0)
			}
		})
	};

	scope.exec(&keeper, ()).await.unwrap();
	// The keeper's context auto-closed when its invocation finished.
	let stale = smuggled.lock().unwrap().take().unwrap();
	assert!(stale.context().is_closed());
	let err = stale.exec(&noop, ()).await.unwrap_err();
	assert!(matches!(err, CoreError::ClosedContext { .. }));
}

#[tokio::test]
async fn required_tags_fall_back_through_the_documented_order() {
	let trace: Tag<String> = Tag::new("trace");

	// Definition-time tag beats scope-level tag.
	let flow: Flow<(), String> = {
		let trace = trace.clone();
		Flow::builder("tagged", move |cx, _input| async move {
			Ok((*cx.tag::<String>("trace")?.unwrap()).clone())
		})
		.tag_dep("trace", &trace, TagMode::Required)
		.tag(trace.with("definition".to_string()).unwrap())
		.build()
	};
	let scope = Scope::builder()
		.tag(trace.with("scope".to_string()).unwrap())
		.build();
	assert_eq!(&*scope.exec(&flow, ()).await.unwrap(), "definition");

	// Execution-time tags beat definition-time tags.
	let tagged_exec = scope
		.exec_tagged(
			&flow,
			(),
			vec![trace.with("execution".to_string()).unwrap()],
		)
		.await
		.unwrap();
	assert_eq!(&*tagged_exec, "execution");

	// Context private data beats every flat list.
	let seeker: Flow<(), String> = {
		let trace = trace.clone();
		let inner = flow.clone();
		Flow::new("seeker", move |cx, _input| {
			let trace = trace.clone();
			let inner = inner.clone();
			async move {
				cx.set(&trace, "context".to_string());
				Ok((*cx.exec(&inner, ()).await?).clone())
			}
		})
	};
	assert_eq!(&*scope.exec(&seeker, ()).await.unwrap(), "context");
}

#[tokio::test]
async fn tag_defaults_apply_last_and_only_for_dependencies() {
	let limit: Tag<u32> = Tag::new("limit").default_value(10);

	let flow: Flow<(), u32> = Flow::builder("limited", |cx, _input| async move {
		Ok(*cx.tag::<u32>("limit")?.unwrap())
	})
	.tag_dep("limit", &limit, TagMode::Required)
	.build();

	let scope = Scope::new();
	assert_eq!(*scope.exec(&flow, ()).await.unwrap(), 10);

	// seek() never substitutes the default.
	let root = ExecContext::root("probe");
	assert!(root.seek(&limit).is_none());
	root.close().await;
}

#[tokio::test]
async fn missing_required_tag_is_a_structured_error() {
	let auth: Tag<String> = Tag::new("auth");
	let flow: Flow<(), String> = Flow::builder("guarded", |cx, _input| async move {
		Ok((*cx.tag::<String>("auth")?.unwrap()).clone())
	})
	.tag_dep("auth", &auth, TagMode::Required)
	.build();

	let scope = Scope::new();
	let err = scope.exec(&flow, ()).await.unwrap_err();
	assert!(matches!(err, CoreError::MissingDependency { .. }));
}

#[tokio::test]
async fn optional_tags_resolve_to_none_when_absent() {
	let auth: Tag<String> = Tag::new("auth");
	let flow: Flow<(), bool> = Flow::builder("relaxed", |cx, _input| async move {
		Ok(cx.tag::<String>("auth")?.is_none())
	})
	.tag_dep("auth", &auth, TagMode::Optional)
	.build();

	let scope = Scope::new();
	assert!(*scope.exec(&flow, ()).await.unwrap());
}

#[tokio::test]
async fn collect_all_gathers_context_levels_nearest_first_then_flat_lists() {
	let label: Tag<String> = Tag::new("label");

	let leaf: Flow<(), Vec<String>> = {
		let label = label.clone();
		Flow::builder("collector", move |cx, _input| async move {
			Ok(cx
				.tags::<String>("labels")?
				.into_iter()
				.map(|s| (*s).clone())
				.collect())
		})
		.tag_dep("labels", &label, TagMode::CollectAll)
		.tag(label.with("definition".to_string()).unwrap())
		.build()
	};
	let outer: Flow<(), Vec<String>> = {
		let label = label.clone();
		let leaf = leaf.clone();
		Flow::new("outer", move |cx, _input| {
			let label = label.clone();
			let leaf = leaf.clone();
			async move {
				cx.set(&label, "outer-ctx".to_string());
				let nested = cx
					.exec_tagged(
						&leaf,
						(),
						vec![label.with("execution".to_string()).unwrap()],
					)
					.await?;
				Ok((*nested).clone())
			}
		})
	};

	let scope = Scope::builder()
		.tag(label.with("scope".to_string()).unwrap())
		.build();
	let inner_ctx_first = scope.exec(&outer, ()).await.unwrap();
	assert_eq!(
		*inner_ctx_first,
		vec![
			"outer-ctx".to_string(),
			"execution".to_string(),
			"definition".to_string(),
			"scope".to_string(),
		]
	);
}

#[tokio::test]
async fn parse_slots_reject_with_phase_and_target() {
	let scope = Scope::new();
	let flow: Flow<u32, u32> = Flow::builder("validated", |_cx, n| async move { Ok(*n) })
		.parse_input(|n: &u32| {
			if *n == 0 {
				Err("input must be nonzero".to_string())
			} else {
				Ok(())
			}
		})
		.parse_output(|n: &u32| {
			if *n > 100 {
				Err("output out of range".to_string())
			} else {
				Ok(())
			}
		})
		.build();

	match scope.exec(&flow, 0).await.unwrap_err() {
		CoreError::Parse { phase, target, .. } => {
			assert_eq!(phase, ParsePhase::Input);
			assert_eq!(target, "validated");
		}
		other => panic!("unexpected error: {other:?}"),
	}

	match scope.exec(&flow, 500).await.unwrap_err() {
		CoreError::Parse { phase, .. } => assert_eq!(phase, ParsePhase::Output),
		other => panic!("unexpected error: {other:?}"),
	}

	assert_eq!(*scope.exec(&flow, 50).await.unwrap(), 50);
}

#[tokio::test]
async fn flows_can_observe_and_drive_atom_controllers() {
	let scope = Scope::new();
	let counter: Atom<u32> = Atom::new("counter", |_cx| async { Ok(0) });
	let bump: Flow<u32, u32> = Flow::builder("bump", |cx, by| async move {
		let ctl = cx.controller::<u32>("counter")?;
		let before = *ctl.resolve().await?;
		ctl.set(before + *by);
		Ok(before)
	})
	.controller_dep("counter", &counter)
	.build();

	assert_eq!(*scope.exec(&bump, 5).await.unwrap(), 0);
	scope.settle().await;
	assert_eq!(*scope.controller(&counter).get().unwrap(), 5);

	// A wildcard subscriber placed by a binding layer sees the push.
	let events = Arc::new(Mutex::new(Vec::new()));
	let ctl = scope.controller(&counter);
	let _sub = ctl.on(EventKind::Wildcard, {
		let events = Arc::clone(&events);
		move |event| events.lock().unwrap().push(event.atom().to_string())
	});
	ctl.set(9);
	scope.settle().await;
	// One transition pair: resolving, then resolved with the pushed value.
	assert_eq!(events.lock().unwrap().len(), 2);
}
