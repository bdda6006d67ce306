//! Per-atom event channels and subscriptions.

use crate::atom::AtomId;
use crate::error::CoreError;
use crate::scope::ScopeInner;
use crate::ErasedValue;
use std::fmt;
use std::sync::{Arc, Weak};

/// Event channels exposed by [`crate::Controller::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
	/// Fired when an atom enters the `resolving` state.
	Resolving,
	/// Fired when an atom successfully resolves.
	Resolved,
	/// Catch-all channel; the only channel that observes failures.
	Wildcard,
}

/// A notification emitted for one observable state transition.
#[derive(Clone)]
pub enum AtomEvent {
	Resolving {
		atom: String,
	},
	Resolved {
		atom: String,
		value: ErasedValue,
	},
	Failed {
		atom: String,
		error: CoreError,
	},
}

impl AtomEvent {
	/// Name of the atom the event concerns.
	pub fn atom(&self) -> &str {
		match self {
			AtomEvent::Resolving { atom }
			| AtomEvent::Resolved { atom, .. }
			| AtomEvent::Failed { atom, .. } => atom,
		}
	}
}

impl fmt::Debug for AtomEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AtomEvent::Resolving { atom } => write!(f, "Resolving({atom})"),
			AtomEvent::Resolved { atom, .. } => write!(f, "Resolved({atom})"),
			AtomEvent::Failed { atom, error } => write!(f, "Failed({atom}: {error})"),
		}
	}
}

pub(crate) type Listener = Arc<dyn Fn(&AtomEvent) + Send + Sync>;

struct ListenerEntry {
	id: u64,
	kind: EventKind,
	listener: Listener,
}

/// Registration-ordered listener list for one cache entry.
#[derive(Default)]
pub(crate) struct ListenerSet {
	next_id: u64,
	entries: Vec<ListenerEntry>,
}

impl ListenerSet {
	pub(crate) fn add(&mut self, kind: EventKind, listener: Listener) -> u64 {
		self.next_id += 1;
		let id = self.next_id;
		self.entries.push(ListenerEntry { id, kind, listener });
		id
	}

	pub(crate) fn remove(&mut self, id: u64) -> bool {
		let before = self.entries.len();
		self.entries.retain(|e| e.id != id);
		self.entries.len() != before
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub(crate) fn len(&self) -> usize {
		self.entries.len()
	}

	/// Snapshot the listeners that observe `event`, in registration order.
	///
	/// Failures reach the catch-all channel only.
	pub(crate) fn matching(&self, event: &AtomEvent) -> Vec<Listener> {
		self.entries
			.iter()
			.filter(|e| match event {
				AtomEvent::Resolving { .. } => {
					matches!(e.kind, EventKind::Resolving | EventKind::Wildcard)
				}
				AtomEvent::Resolved { .. } => {
					matches!(e.kind, EventKind::Resolved | EventKind::Wildcard)
				}
				AtomEvent::Failed { .. } => matches!(e.kind, EventKind::Wildcard),
			})
			.map(|e| Arc::clone(&e.listener))
			.collect()
	}
}

/// RAII subscription guard returned by [`crate::Controller::on`].
///
/// Dropping the guard unsubscribes the listener; [`Subscription::detach`]
/// keeps the listener registered for the life of the scope.
pub struct Subscription {
	inner: Option<SubscriptionInner>,
}

struct SubscriptionInner {
	scope: Weak<ScopeInner>,
	atom: AtomId,
	id: u64,
}

impl Subscription {
	pub(crate) fn new(scope: Weak<ScopeInner>, atom: AtomId, id: u64) -> Self {
		Self {
			inner: Some(SubscriptionInner { scope, atom, id }),
		}
	}

	/// Remove the listener now instead of at drop time.
	pub fn unsubscribe(mut self) {
		self.release();
	}

	/// Keep the listener registered; the guard becomes inert.
	pub fn detach(mut self) {
		self.inner = None;
	}

	fn release(&mut self) {
		if let Some(sub) = self.inner.take()
			&& let Some(scope) = sub.scope.upgrade()
		{
			scope.remove_listener(sub.atom, sub.id);
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.release();
	}
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription")
			.field("active", &self.inner.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn event_resolved() -> AtomEvent {
		AtomEvent::Resolved {
			atom: "a".into(),
			value: Arc::new(1u32),
		}
	}

	fn event_failed() -> AtomEvent {
		AtomEvent::Failed {
			atom: "a".into(),
			error: CoreError::ScopeDisposed,
		}
	}

	#[test]
	fn matching_respects_channels() {
		let mut set = ListenerSet::default();
		let noop: Listener = Arc::new(|_| {});
		set.add(EventKind::Resolving, Arc::clone(&noop));
		set.add(EventKind::Resolved, Arc::clone(&noop));
		set.add(EventKind::Wildcard, noop);

		assert_eq!(set.matching(&AtomEvent::Resolving { atom: "a".into() }).len(), 2);
		assert_eq!(set.matching(&event_resolved()).len(), 2);
		// Failures fire the catch-all only.
		assert_eq!(set.matching(&event_failed()).len(), 1);
	}

	#[test]
	fn remove_keeps_registration_order() {
		let mut set = ListenerSet::default();
		let noop: Listener = Arc::new(|_| {});
		let first = set.add(EventKind::Wildcard, Arc::clone(&noop));
		set.add(EventKind::Wildcard, Arc::clone(&noop));
		assert_eq!(set.len(), 2);
		assert!(set.remove(first));
		assert!(!set.remove(first));
		assert_eq!(set.len(), 1);
	}
}
