//! Deferred invalidation scheduling.
//!
//! `invalidate`, `set` and `update` only enqueue intents; the transitions
//! they request happen on a deferred drain pass spawned onto the host
//! runtime. Intents scheduled for the same atom within one turn coalesce:
//! the last `set`/`update` wins, and any pushed value cancels the factory
//! re-run an `invalidate` would have caused.
//!
//! Processing one entry follows a fixed order: transition to `resolving`
//! (and notify, unless the entry was already resolving), run the previous
//! run's cleanups in reverse order, install the pushed value or re-run the
//! factory, then make the terminal transition with exactly one notification.

use crate::atom::{AtomId, ErasedAtom};
use crate::cycle;
use crate::error::{BoxError, CoreError};
use crate::listener::AtomEvent;
use crate::scope::{
	notify, run_cleanups, AtomState, Entry, InstallOutcome, Pending, Push, Scope,
};
use crate::ErasedValue;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub(crate) struct SchedState {
	queue: Mutex<VecDeque<AtomId>>,
	draining: AtomicBool,
	idle: Notify,
}

impl SchedState {
	pub(crate) fn new() -> Self {
		Self {
			queue: Mutex::new(VecDeque::new()),
			draining: AtomicBool::new(false),
			idle: Notify::new(),
		}
	}
}

impl Scope {
	/// Schedule a factory re-run for the atom, discarding any value pushed
	/// earlier in the same frame.
	pub(crate) fn schedule_invalidate(&self, atom: &ErasedAtom) {
		self.schedule(atom, |pending| pending.pushes.clear());
	}

	/// Schedule a direct value install, skipping the factory. Discards any
	/// earlier push scheduled in the same frame.
	pub(crate) fn schedule_set(&self, atom: &ErasedAtom, value: ErasedValue) {
		self.schedule(atom, |pending| {
			pending.pushes.clear();
			pending.pushes.push(Push::Set(value));
		});
	}

	/// Schedule a functional update, folding over the pending push or the
	/// current value.
	pub(crate) fn schedule_update(
		&self,
		atom: &ErasedAtom,
		update: Arc<dyn Fn(ErasedValue) -> Result<ErasedValue, BoxError> + Send + Sync>,
	) {
		self.schedule(atom, |pending| pending.pushes.push(Push::Update(update)));
	}

	fn schedule(&self, atom: &ErasedAtom, apply: impl FnOnce(&mut Pending)) {
		if self.is_disposed() {
			tracing::warn!(atom = atom.name(), "intent dropped: scope is disposed");
			return;
		}
		let entry = self.inner.entry(atom);
		let newly_queued = {
			let mut st = entry.state.lock();
			let mut pending = st.pending.take().unwrap_or_default();
			apply(&mut pending);
			st.pending = Some(pending);
			if st.queued {
				false
			} else {
				st.queued = true;
				true
			}
		};
		if newly_queued {
			self.inner.sched.queue.lock().push_back(atom.id());
		}
		self.kick();
	}

	fn kick(&self) {
		if self.inner.sched.draining.swap(true, Ordering::AcqRel) {
			return;
		}
		match tokio::runtime::Handle::try_current() {
			Ok(handle) => {
				let scope = self.clone();
				handle.spawn(async move { scope.drain().await });
			}
			Err(_) => {
				self.inner.sched.draining.store(false, Ordering::Release);
				tracing::warn!("no async runtime available; deferred pass not scheduled");
			}
		}
	}

	/// Await the deferred queue going quiet.
	///
	/// After `settle` returns, every intent enqueued before the call has been
	/// fully processed, including the intents those passes re-triggered.
	pub async fn settle(&self) {
		loop {
			let notified = self.inner.sched.idle.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();
			let settled = {
				self.inner.sched.queue.lock().is_empty()
					&& !self.inner.sched.draining.load(Ordering::Acquire)
			};
			if settled {
				return;
			}
			notified.await;
		}
	}

	async fn drain(self) {
		// Per-frame pass counts back the re-entrancy bound.
		let mut frame_counts: HashMap<AtomId, usize> = HashMap::new();
		loop {
			let next = self.inner.sched.queue.lock().pop_front();
			let Some(id) = next else {
				self.inner.sched.draining.store(false, Ordering::Release);
				// An intent may have been enqueued between the pop and the
				// store; reclaim the drain if so.
				if !self.inner.sched.queue.lock().is_empty()
					&& !self.inner.sched.draining.swap(true, Ordering::AcqRel)
				{
					continue;
				}
				self.inner.sched.idle.notify_waiters();
				return;
			};
			let Some(entry) = self.inner.get_entry(id) else {
				continue;
			};
			if self.is_disposed() {
				entry.state.lock().queued = false;
				continue;
			}
			let count = {
				let slot = frame_counts.entry(id).or_insert(0);
				*slot += 1;
				*slot
			};
			if count > self.inner.options.max_invalidation_passes {
				self.fail_looping_entry(&entry, count);
				continue;
			}
			cycle::with_resolution_scope(self.process_entry(&entry)).await;
		}
	}

	/// Fail fast on an invalidation that keeps re-triggering itself.
	fn fail_looping_entry(&self, entry: &Arc<Entry>, iterations: usize) {
		let atom = entry.atom.clone();
		let already_looping = {
			let mut st = entry.state.lock();
			st.pending = None;
			st.queued = false;
			matches!(st.error, Some(CoreError::LoopDetected { .. }))
		};
		if already_looping {
			// Re-announcing the same failure would hand a misbehaving
			// listener another turn; drop the intent silently instead.
			return;
		}
		tracing::warn!(atom = atom.name(), iterations, "invalidation loop detected");
		let error = CoreError::LoopDetected {
			atom: atom.name().to_string(),
			iterations,
		};
		let epoch = {
			let mut st = entry.state.lock();
			st.epoch += 1;
			st.epoch
		};
		let _ = self.install(&atom, entry, epoch, Err(error));
	}

	async fn process_entry(&self, entry: &Arc<Entry>) {
		let atom = entry.atom.clone();
		let (pending, prior_cleanups, epoch, was_resolving, resolving_listeners, current_value) = {
			let mut st = entry.state.lock();
			st.queued = false;
			let Some(pending) = st.pending.take() else {
				return;
			};
			let was_resolving = st.state == AtomState::Resolving;
			// Any in-flight resolution is superseded from here on.
			st.epoch += 1;
			let listeners = if was_resolving {
				Vec::new()
			} else {
				st.state = AtomState::Resolving;
				st.listeners.matching(&AtomEvent::Resolving {
					atom: atom.name().to_string(),
				})
			};
			(
				pending,
				std::mem::take(&mut st.cleanups),
				st.epoch,
				was_resolving,
				listeners,
				st.value.clone(),
			)
		};

		if !was_resolving {
			notify(
				&resolving_listeners,
				&AtomEvent::Resolving {
					atom: atom.name().to_string(),
				},
			);
		}

		// Cleanups run fully before any replacement value is produced.
		run_cleanups(prior_cleanups).await;

		let outcome = if pending.pushes.is_empty() {
			tracing::debug!(atom = atom.name(), "re-running factory");
			self.run_factory(&atom, entry, true).await
		} else {
			tracing::debug!(atom = atom.name(), "installing pushed value");
			self.fold_pushes(&atom, current_value, pending.pushes)
				.map(|value| (value, Vec::new()))
		};

		match self.install(&atom, entry, epoch, outcome) {
			InstallOutcome::Installed(_) => {}
			InstallOutcome::Discarded(cleanups) => {
				tracing::debug!(atom = atom.name(), "pass superseded mid-flight");
				run_cleanups(cleanups).await;
			}
		}
	}

	/// Apply the frame's coalesced pushes: start from the last `set` (or the
	/// current value) and fold the updates over it in order.
	fn fold_pushes(
		&self,
		atom: &ErasedAtom,
		current: Option<ErasedValue>,
		pushes: Vec<Push>,
	) -> Result<ErasedValue, CoreError> {
		let mut value = current;
		for push in pushes {
			value = Some(match push {
				Push::Set(next) => next,
				Push::Update(update) => {
					let base = value.ok_or_else(|| CoreError::NotResolved {
						atom: atom.name().to_string(),
					})?;
					update(base).map_err(|e| CoreError::factory(atom.name(), e))?
				}
			});
		}
		value.ok_or_else(|| CoreError::NotResolved {
			atom: atom.name().to_string(),
		})
	}
}
