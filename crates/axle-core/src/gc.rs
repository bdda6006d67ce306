//! Subscription-driven garbage collection.
//!
//! An atom with no subscribers, no live dependents and no keep-alive flag is
//! released after a grace window. The window absorbs rapid
//! unsubscribe/resubscribe churn from transient consumers: any new
//! subscription or dependent registration before the timer fires cancels the
//! pending release. Releasing an atom removes its dependency edges and
//! re-checks each former dependency, cascading collection down the chain.

use crate::atom::AtomId;
use crate::error::{CoreError, CoreResult};
use crate::scope::{run_cleanups, AtomState, Entry, EntryState, Scope};
use std::sync::Arc;

fn eligible(st: &EntryState) -> bool {
	st.listeners.is_empty()
		&& st.dependents.is_empty()
		&& matches!(st.state, AtomState::Resolved | AtomState::Failed)
		&& st.pending.is_none()
		&& st.waiters.is_empty()
		&& st.gc.is_none()
}

impl Scope {
	/// Schedule a release for the entry if it is collection-eligible.
	pub(crate) fn maybe_schedule_gc(&self, entry: &Arc<Entry>) {
		let atom = entry.atom.clone();
		if atom.keep_alive() || self.is_disposed() {
			return;
		}
		let grace = self.inner.options.gc_grace;
		let Ok(handle) = tokio::runtime::Handle::try_current() else {
			return;
		};
		let mut st = entry.state.lock();
		if !eligible(&st) {
			return;
		}
		tracing::debug!(atom = atom.name(), ?grace, "release scheduled");
		let scope = self.clone();
		let target = Arc::clone(entry);
		let task = handle.spawn(async move {
			tokio::time::sleep(grace).await;
			scope.try_release(&target).await;
		});
		st.gc = Some(task.abort_handle());
	}

	/// Grace timer fired: eligibility may have changed, so re-check before
	/// releasing.
	async fn try_release(&self, entry: &Arc<Entry>) {
		let still_eligible = {
			let mut st = entry.state.lock();
			st.gc = None;
			eligible(&st)
		};
		if !still_eligible || self.is_disposed() {
			return;
		}
		// Dependents were part of the eligibility check; a new one appearing
		// between the check and the release is caught again here.
		if let Err(error) = self.release_entry(entry, true).await {
			tracing::debug!(atom = entry.atom.name(), %error, "release skipped");
		}
	}

	/// Release one entry: run cleanups, clear the cached value and private
	/// data, return to idle, then drop dependency edges and re-check each
	/// former dependency for collection.
	pub(crate) async fn release_entry(
		&self,
		entry: &Arc<Entry>,
		check_dependents: bool,
	) -> CoreResult<()> {
		let atom = entry.atom.clone();

		// Name lookups for the error path must not run under the entry lock.
		let blocking: Vec<AtomId> = {
			let st = entry.state.lock();
			if check_dependents {
				st.dependents.iter().copied().collect()
			} else {
				Vec::new()
			}
		};
		if !blocking.is_empty() {
			let dependents = blocking
				.iter()
				.map(|id| match self.inner.get_entry(*id) {
					Some(dep) => dep.atom.name().to_string(),
					None => id.to_string(),
				})
				.collect();
			return Err(CoreError::DependentsAlive {
				atom: atom.name().to_string(),
				dependents,
			});
		}

		let (cleanups, waiters, former_deps) = {
			let mut st = entry.state.lock();
			if check_dependents && !st.dependents.is_empty() {
				// A dependent raced in since the check above; refuse.
				return Err(CoreError::DependentsAlive {
					atom: atom.name().to_string(),
					dependents: st.dependents.iter().map(AtomId::to_string).collect(),
				});
			}
			st.cancel_gc();
			st.epoch += 1;
			st.state = AtomState::Idle;
			st.value = None;
			st.error = None;
			st.pending = None;
			st.store.clear();
			(
				std::mem::take(&mut st.cleanups),
				std::mem::take(&mut st.waiters),
				std::mem::take(&mut st.depends_on),
			)
		};
		for waiter in waiters {
			let _ = waiter.send(Err(CoreError::NotResolved {
				atom: atom.name().to_string(),
			}));
		}
		run_cleanups(cleanups).await;
		tracing::debug!(atom = atom.name(), "released");

		// Cascade: this atom no longer keeps its dependencies alive.
		for dep_id in former_deps {
			if let Some(dep_entry) = self.inner.get_entry(dep_id) {
				dep_entry.state.lock().dependents.remove(&atom.id());
				self.maybe_schedule_gc(&dep_entry);
			}
		}
		Ok(())
	}
}
