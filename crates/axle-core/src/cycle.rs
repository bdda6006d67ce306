//! Task-local dependency-cycle detection.
//!
//! Resolution recurses through declared dependencies on the same task, so the
//! chain of in-flight atoms is tracked in task-local state: it follows the
//! task across thread migrations under a work-stealing runtime, and an RAII
//! guard keeps the bookkeeping correct on every exit path. A cycle is
//! reported before recursion can overflow, with the full chain in the error.

use crate::atom::AtomId;
use crate::error::{CoreError, CoreResult};
use std::cell::RefCell;
use std::collections::HashSet;
use std::future::Future;

/// Depth bound for pathological (non-cyclic but absurdly deep) chains.
const MAX_RESOLUTION_DEPTH: usize = 100;

struct ResolutionState {
	active: HashSet<AtomId>,
	depth: usize,
	path: Vec<(AtomId, String)>,
}

impl ResolutionState {
	fn new() -> Self {
		Self {
			active: HashSet::new(),
			depth: 0,
			path: Vec::new(),
		}
	}
}

tokio::task_local! {
	static RESOLUTION: RefCell<ResolutionState>;
}

/// Run `f` inside a resolution scope, reusing the current one when nested.
pub(crate) async fn with_resolution_scope<F, T>(f: F) -> T
where
	F: Future<Output = T>,
{
	let already_scoped = RESOLUTION.try_with(|_| ()).is_ok();
	if already_scoped {
		f.await
	} else {
		RESOLUTION.scope(RefCell::new(ResolutionState::new()), f).await
	}
}

fn with_state<R>(f: impl FnOnce(&RefCell<ResolutionState>) -> R) -> CoreResult<R> {
	RESOLUTION.try_with(f).map_err(|_| CoreError::NoResolutionScope)
}

/// Record the start of one atom's resolution; the returned guard pops it.
pub(crate) fn begin(atom: AtomId, name: &str) -> CoreResult<ResolutionGuard> {
	let depth = with_state(|state| {
		let mut s = state.borrow_mut();
		s.depth += 1;
		s.depth
	})?;

	if depth > MAX_RESOLUTION_DEPTH {
		let _ = with_state(|state| {
			state.borrow_mut().depth -= 1;
		});
		return Err(CoreError::MaxDepthExceeded(depth));
	}

	let cycle = with_state(|state| {
		let s = state.borrow();
		if s.active.contains(&atom) {
			Some(chain_display(&s, atom, name))
		} else {
			None
		}
	})?;
	if let Some(chain) = cycle {
		let _ = with_state(|state| {
			state.borrow_mut().depth -= 1;
		});
		return Err(CoreError::DependencyCycle {
			atom: name.to_string(),
			chain,
		});
	}

	with_state(|state| {
		let mut s = state.borrow_mut();
		s.active.insert(atom);
		s.path.push((atom, name.to_string()));
	})?;

	Ok(ResolutionGuard { atom })
}

/// If `atom` is already in this task's in-flight chain, the cycle it closes.
///
/// This catches re-entry through a lazy controller handle: the entry is
/// mid-resolution, so the waiter path would otherwise deadlock on itself.
pub(crate) fn active_chain(atom: AtomId, name: &str) -> Option<String> {
	RESOLUTION
		.try_with(|state| {
			let s = state.borrow();
			if s.active.contains(&atom) {
				Some(chain_display(&s, atom, name))
			} else {
				None
			}
		})
		.ok()
		.flatten()
}

fn chain_display(state: &ResolutionState, atom: AtomId, name: &str) -> String {
	if let Some(start) = state.path.iter().position(|(id, _)| *id == atom) {
		let mut parts: Vec<&str> = state.path[start..].iter().map(|(_, n)| n.as_str()).collect();
		parts.push(name);
		parts.join(" -> ")
	} else {
		format!("cycle involving {name}")
	}
}

/// RAII guard removing one atom from the in-flight chain.
#[derive(Debug)]
pub(crate) struct ResolutionGuard {
	atom: AtomId,
}

impl Drop for ResolutionGuard {
	fn drop(&mut self) {
		let _ = RESOLUTION.try_with(|state| {
			let mut s = state.borrow_mut();
			s.active.remove(&self.atom);
			if let Some(pos) = s.path.iter().rposition(|(id, _)| *id == self.atom) {
				s.path.remove(pos);
			}
			s.depth = s.depth.saturating_sub(1);
		});
	}
}
