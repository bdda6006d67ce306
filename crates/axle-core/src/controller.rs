//! Controller handles.
//!
//! A [`Controller`] is a thin, cloneable handle bound to one atom within one
//! scope. It never carries state of its own: every handle for the same
//! (scope, atom) pair views the same cache entry, so reads and subscriptions
//! are referentially stable across handles.

use crate::atom::{Atom, AtomId, ErasedAtom};
use crate::error::{BoxError, CoreError, CoreResult};
use crate::cycle;
use crate::listener::{AtomEvent, EventKind, Subscription};
use crate::scope::{AtomState, Scope};
use crate::ErasedValue;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Untyped controller, used inside dependency slots.
#[derive(Clone)]
pub(crate) struct ErasedController {
	scope: Scope,
	atom: ErasedAtom,
	/// When the handle was injected into a factory, the depending atom:
	/// resolving through the handle registers the dependency edge.
	on_behalf: Option<AtomId>,
}

impl ErasedController {
	pub(crate) fn new(scope: Scope, atom: ErasedAtom, on_behalf: Option<AtomId>) -> Self {
		Self {
			scope,
			atom,
			on_behalf,
		}
	}
}

/// Per-(scope, atom) accessor: state inspection, resolution, invalidation
/// and event subscription.
///
/// # Examples
///
/// ```
/// use axle_core::{Atom, AtomState, Scope};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> axle_core::CoreResult<()> {
/// let scope = Scope::new();
/// let count: Atom<u32> = Atom::new("count", |_cx| async { Ok(0) });
/// let ctl = scope.controller(&count);
///
/// assert_eq!(ctl.state(), AtomState::Idle);
/// ctl.resolve().await?;
/// assert_eq!(*ctl.get()?, 0);
/// # Ok(())
/// # }
/// ```
pub struct Controller<T> {
	erased: ErasedController,
	_marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Controller<T> {
	fn clone(&self) -> Self {
		Self {
			erased: self.erased.clone(),
			_marker: PhantomData,
		}
	}
}

impl<T> fmt::Debug for Controller<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Controller")
			.field("atom", &self.erased.atom.name())
			.finish()
	}
}

impl<T: Send + Sync + 'static> Controller<T> {
	pub(crate) fn new(erased: ErasedController) -> Self {
		Self {
			erased,
			_marker: PhantomData,
		}
	}

	/// The atom this controller is bound to.
	pub fn atom(&self) -> &ErasedAtom {
		&self.erased.atom
	}

	/// Current entry state.
	pub fn state(&self) -> AtomState {
		self.erased.scope.state_of(&self.erased.atom)
	}

	/// Synchronous read.
	///
	/// Returns the resolved value; while a re-resolution is in flight the
	/// previous value keeps being served (stale-while-revalidate). Fails
	/// with the stored error when failed and with a not-resolved error when
	/// idle or resolving with no previous value.
	pub fn get(&self) -> CoreResult<Arc<T>> {
		let value = self.erased.scope.get_erased(&self.erased.atom)?;
		self.downcast(value)
	}

	/// Resolve the atom, sharing any in-flight resolution.
	pub async fn resolve(&self) -> CoreResult<Arc<T>> {
		self.erased.scope.ensure_ready().await?;
		let value = cycle::with_resolution_scope(
			self.erased
				.scope
				.resolve_entry(&self.erased.atom, self.erased.on_behalf),
		)
		.await?;
		self.downcast(value)
	}

	/// Schedule a factory re-run. Returns immediately; the transition
	/// happens on the next deferred pass.
	pub fn invalidate(&self) {
		self.erased.scope.schedule_invalidate(&self.erased.atom);
	}

	/// Schedule a direct value install, skipping the factory.
	pub fn set(&self, value: T) {
		self.erased
			.scope
			.schedule_set(&self.erased.atom, Arc::new(value) as ErasedValue);
	}

	/// Schedule a functional update of the current value.
	pub fn update(&self, f: impl Fn(&T) -> T + Send + Sync + 'static) {
		let name = self.erased.atom.name().to_string();
		let update = Arc::new(move |current: ErasedValue| -> Result<ErasedValue, BoxError> {
			let current = current.downcast::<T>().map_err(|_| -> BoxError {
				Box::new(CoreError::Factory {
					target: name.clone(),
					message: "current value has an unexpected type".to_string(),
				})
			})?;
			Ok(Arc::new(f(&current)) as ErasedValue)
		});
		self.erased.scope.schedule_update(&self.erased.atom, update);
	}

	/// Release the entry now: cleanups run, the cached value and private
	/// data are cleared, and the entry returns to idle. Refused while
	/// dependents are alive.
	pub async fn release(&self) -> CoreResult<()> {
		if self.erased.scope.is_disposed() {
			return Err(CoreError::ScopeDisposed);
		}
		let Some(entry) = self.erased.scope.inner.get_entry(self.erased.atom.id()) else {
			return Ok(());
		};
		self.erased.scope.release_entry(&entry, true).await
	}

	/// Subscribe to an event channel. The listener fires in registration
	/// order; dropping the returned guard unsubscribes. Subscribing cancels
	/// any release already scheduled for this atom.
	pub fn on(
		&self,
		kind: EventKind,
		listener: impl Fn(&AtomEvent) + Send + Sync + 'static,
	) -> Subscription {
		if self.erased.scope.is_disposed() {
			return Subscription::new(std::sync::Weak::new(), self.erased.atom.id(), 0);
		}
		let entry = self.erased.scope.inner.entry(&self.erased.atom);
		let id = {
			let mut st = entry.state.lock();
			st.cancel_gc();
			st.listeners.add(kind, Arc::new(listener))
		};
		Subscription::new(
			Arc::downgrade(&self.erased.scope.inner),
			self.erased.atom.id(),
			id,
		)
	}

	fn downcast(&self, value: ErasedValue) -> CoreResult<Arc<T>> {
		value.downcast::<T>().map_err(|_| CoreError::Factory {
			target: self.erased.atom.name().to_string(),
			message: "resolved value has an unexpected type".to_string(),
		})
	}
}

impl<T: Send + Sync + 'static> Atom<T> {
	/// Shorthand for [`Scope::controller`].
	pub fn controller(&self, scope: &Scope) -> Controller<T> {
		scope.controller(self)
	}
}
