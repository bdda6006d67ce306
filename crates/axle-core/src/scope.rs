//! The resolution cache.
//!
//! A [`Scope`] owns every cache entry and all atom lifecycles. Controllers
//! and execution contexts are thin handles over it; the scope is the single
//! source of truth for entry state, values, errors, cleanups, listeners and
//! dependency edges.
//!
//! Locking discipline: entry state sits behind a short-lived `parking_lot`
//! mutex that is never held across an await point. Factories, cleanups and
//! listener callbacks always run with all locks released.

use crate::atom::{Atom, AtomId, DepSpec, ErasedAtom, TagMode};
use crate::controller::{Controller, ErasedController};
use crate::cycle;
use crate::error::{BoxError, CoreError, CoreResult};
use crate::extension::{run_resolve_chain, Extension, ResolveInfo};
use crate::listener::{AtomEvent, Listener, ListenerSet};
use crate::scheduler::SchedState;
use crate::tag::{self, ErasedTag, PrivateStore, Tag, Tagged};
use crate::ErasedValue;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

/// Observable state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomState {
	Idle,
	Resolving,
	Resolved,
	Failed,
}

/// Deferred cleanup registered by a factory run.
pub(crate) type Cleanup = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Intent pushed by `set`/`update`, coalesced per entry.
pub(crate) enum Push {
	Set(ErasedValue),
	Update(Arc<dyn Fn(ErasedValue) -> Result<ErasedValue, BoxError> + Send + Sync>),
}

/// Coalesced pending work for one entry; drained by the scheduler.
///
/// Latest intent wins: a `set` discards everything pushed before it, an
/// `update` appends and folds over the set (or current) value at processing
/// time, and an `invalidate` discards pending pushes in favor of a factory
/// re-run. Empty `pushes` means the factory runs.
#[derive(Default)]
pub(crate) struct Pending {
	pub(crate) pushes: Vec<Push>,
}

pub(crate) struct EntryState {
	pub(crate) state: AtomState,
	/// Last resolved value. Kept while resolving so stale reads stay served.
	pub(crate) value: Option<ErasedValue>,
	pub(crate) error: Option<CoreError>,
	pub(crate) cleanups: Vec<Cleanup>,
	pub(crate) listeners: ListenerSet,
	pub(crate) dependents: HashSet<AtomId>,
	pub(crate) depends_on: HashSet<AtomId>,
	pub(crate) store: PrivateStore,
	pub(crate) pending: Option<Pending>,
	pub(crate) queued: bool,
	/// Bumped on every transition that supersedes in-flight work; a factory
	/// result only installs when its captured epoch still matches.
	pub(crate) epoch: u64,
	pub(crate) gc: Option<tokio::task::AbortHandle>,
	pub(crate) waiters: Vec<oneshot::Sender<CoreResult<ErasedValue>>>,
}

impl EntryState {
	fn new() -> Self {
		Self {
			state: AtomState::Idle,
			value: None,
			error: None,
			cleanups: Vec::new(),
			listeners: ListenerSet::default(),
			dependents: HashSet::new(),
			depends_on: HashSet::new(),
			store: PrivateStore::new(),
			pending: None,
			queued: false,
			epoch: 0,
			gc: None,
			waiters: Vec::new(),
		}
	}

	pub(crate) fn cancel_gc(&mut self) {
		if let Some(handle) = self.gc.take() {
			handle.abort();
		}
	}
}

pub(crate) struct Entry {
	pub(crate) atom: ErasedAtom,
	pub(crate) state: Mutex<EntryState>,
}

/// Tunables for a scope.
#[derive(Debug, Clone)]
pub struct ScopeOptions {
	/// Grace window between an atom becoming collection-eligible and its
	/// release. Absorbs rapid unsubscribe/resubscribe churn.
	pub gc_grace: Duration,
	/// Bound on how many times one atom's invalidation may re-trigger within
	/// a single processing frame before failing with a loop error.
	pub max_invalidation_passes: usize,
}

impl Default for ScopeOptions {
	fn default() -> Self {
		Self {
			gc_grace: Duration::from_secs(2),
			max_invalidation_passes: 100,
		}
	}
}

pub(crate) struct ScopeInner {
	pub(crate) entries: RwLock<HashMap<AtomId, Arc<Entry>>>,
	pub(crate) extensions: Vec<Arc<dyn Extension>>,
	pub(crate) tags: Vec<Tagged>,
	pub(crate) options: ScopeOptions,
	pub(crate) sched: SchedState,
	pub(crate) disposed: AtomicBool,
	init: tokio::sync::OnceCell<CoreResult<()>>,
}

impl ScopeInner {
	pub(crate) fn entry(&self, atom: &ErasedAtom) -> Arc<Entry> {
		if let Some(entry) = self.entries.read().get(&atom.id()) {
			return Arc::clone(entry);
		}
		let mut entries = self.entries.write();
		Arc::clone(entries.entry(atom.id()).or_insert_with(|| {
			Arc::new(Entry {
				atom: atom.clone(),
				state: Mutex::new(EntryState::new()),
			})
		}))
	}

	pub(crate) fn get_entry(&self, id: AtomId) -> Option<Arc<Entry>> {
		self.entries.read().get(&id).map(Arc::clone)
	}

	pub(crate) fn remove_listener(self: &Arc<Self>, atom: AtomId, id: u64) {
		let Some(entry) = self.get_entry(atom) else {
			return;
		};
		let removed = {
			let mut st = entry.state.lock();
			st.listeners.remove(id)
		};
		if removed {
			let scope = Scope {
				inner: Arc::clone(self),
			};
			scope.maybe_schedule_gc(&entry);
		}
	}
}

/// The resolution cache: owns all atom cache entries and their lifecycles.
///
/// # Examples
///
/// ```
/// use axle_core::{Atom, Scope};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> axle_core::CoreResult<()> {
/// let scope = Scope::new();
/// let count: Atom<u32> = Atom::new("count", |_cx| async { Ok(0) });
///
/// let value = scope.resolve(&count).await?;
/// assert_eq!(*value, 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Scope {
	pub(crate) inner: Arc<ScopeInner>,
}

/// Builder for [`Scope`], mirroring the options a scope owns explicitly:
/// extensions, scope-level tags and GC/scheduler tunables.
pub struct ScopeBuilder {
	options: ScopeOptions,
	tags: Vec<Tagged>,
	extensions: Vec<Arc<dyn Extension>>,
}

impl ScopeBuilder {
	fn new() -> Self {
		Self {
			options: ScopeOptions::default(),
			tags: Vec::new(),
			extensions: Vec::new(),
		}
	}

	/// Override the GC grace window.
	pub fn gc_grace(mut self, grace: Duration) -> Self {
		self.options.gc_grace = grace;
		self
	}

	/// Override the invalidation re-entrancy bound.
	pub fn max_invalidation_passes(mut self, passes: usize) -> Self {
		self.options.max_invalidation_passes = passes;
		self
	}

	/// Attach a scope-level tagged value.
	pub fn tag(mut self, tagged: Tagged) -> Self {
		self.tags.push(tagged);
		self
	}

	/// Register an extension. Registration order is pipeline order: the
	/// last-registered extension wraps closest to the actual work.
	pub fn extension(mut self, extension: impl Extension + 'static) -> Self {
		self.extensions.push(Arc::new(extension));
		self
	}

	pub fn build(self) -> Scope {
		Scope {
			inner: Arc::new(ScopeInner {
				entries: RwLock::new(HashMap::new()),
				extensions: self.extensions,
				tags: self.tags,
				options: self.options,
				sched: SchedState::new(),
				disposed: AtomicBool::new(false),
				init: tokio::sync::OnceCell::new(),
			}),
		}
	}
}

impl Default for Scope {
	fn default() -> Self {
		Self::new()
	}
}

impl Scope {
	/// Create a scope with default options and no extensions.
	pub fn new() -> Self {
		Self::builder().build()
	}

	pub fn builder() -> ScopeBuilder {
		ScopeBuilder::new()
	}

	/// Scope-level tags, consulted last in flat tag lookups.
	pub fn tags(&self) -> &[Tagged] {
		&self.inner.tags
	}

	pub(crate) fn is_disposed(&self) -> bool {
		self.inner.disposed.load(Ordering::Acquire)
	}

	/// Run extension `init` hooks exactly once, before first use.
	pub(crate) async fn ensure_ready(&self) -> CoreResult<()> {
		if self.is_disposed() {
			return Err(CoreError::ScopeDisposed);
		}
		if self.inner.extensions.is_empty() {
			return Ok(());
		}
		let scope = self.clone();
		self.inner
			.init
			.get_or_init(|| async move {
				for ext in &scope.inner.extensions {
					tracing::debug!(extension = ext.name(), "initializing extension");
					ext.init(&scope).await?;
				}
				Ok(())
			})
			.await
			.clone()
	}

	/// Resolve a typed atom, sharing any in-flight resolution.
	pub async fn resolve<T: Send + Sync + 'static>(&self, atom: &Atom<T>) -> CoreResult<Arc<T>> {
		let erased = atom.erased();
		let value = self.resolve_erased(&erased).await?;
		value.downcast::<T>().map_err(|_| CoreError::Factory {
			target: erased.name().to_string(),
			message: "resolved value has an unexpected type".to_string(),
		})
	}

	/// Resolve an untyped atom handle.
	pub async fn resolve_erased(&self, atom: &ErasedAtom) -> CoreResult<ErasedValue> {
		self.ensure_ready().await?;
		cycle::with_resolution_scope(self.resolve_entry(atom, None)).await
	}

	/// Obtain the controller handle for an atom.
	pub fn controller<T: Send + Sync + 'static>(&self, atom: &Atom<T>) -> Controller<T> {
		Controller::new(ErasedController::new(self.clone(), atom.erased(), None))
	}

	pub(crate) async fn resolve_entry(
		&self,
		atom: &ErasedAtom,
		dependent: Option<AtomId>,
	) -> CoreResult<ErasedValue> {
		let entry = self.inner.entry(atom);
		if let Some(from) = dependent {
			self.register_edge(&entry, from);
		}
		loop {
			enum Action {
				Wait(oneshot::Receiver<CoreResult<ErasedValue>>),
				Run {
					epoch: u64,
					resolving: Vec<Listener>,
				},
			}

			let action = {
				let mut st = entry.state.lock();
				match st.state {
					AtomState::Resolved => {
						return st.value.clone().ok_or_else(|| CoreError::NotResolved {
							atom: atom.name().to_string(),
						});
					}
					AtomState::Failed => {
						return Err(st.error.clone().unwrap_or_else(|| CoreError::NotResolved {
							atom: atom.name().to_string(),
						}));
					}
					AtomState::Resolving => {
						// Re-entering an atom this task is already resolving
						// is a dependency cycle; waiting would deadlock.
						if let Some(chain) = cycle::active_chain(atom.id(), atom.name()) {
							return Err(CoreError::DependencyCycle {
								atom: atom.name().to_string(),
								chain,
							});
						}
						let (tx, rx) = oneshot::channel();
						st.waiters.push(tx);
						Action::Wait(rx)
					}
					AtomState::Idle => {
						st.state = AtomState::Resolving;
						st.epoch += 1;
						let event = AtomEvent::Resolving {
							atom: atom.name().to_string(),
						};
						Action::Run {
							epoch: st.epoch,
							resolving: st.listeners.matching(&event),
						}
					}
				}
			};

			match action {
				Action::Wait(rx) => match rx.await {
					Ok(result) => return result,
					// The producing pass was superseded; observe the new state.
					Err(_) => continue,
				},
				Action::Run { epoch, resolving } => {
					tracing::debug!(atom = atom.name(), "resolving");
					notify(
						&resolving,
						&AtomEvent::Resolving {
							atom: atom.name().to_string(),
						},
					);
					let outcome = self.run_factory(atom, &entry, false).await;
					match self.install(atom, &entry, epoch, outcome) {
						InstallOutcome::Installed(result) => return result,
						InstallOutcome::Discarded(cleanups) => {
							tracing::debug!(atom = atom.name(), "discarding superseded result");
							run_cleanups(cleanups).await;
							continue;
						}
					}
				}
			}
		}
	}

	/// Register the dependent edge `from -> entry` in both directions and
	/// keep the target alive (a live dependent cancels any pending GC).
	fn register_edge(&self, entry: &Arc<Entry>, from: AtomId) {
		{
			let mut st = entry.state.lock();
			st.dependents.insert(from);
			st.cancel_gc();
		}
		if let Some(from_entry) = self.inner.get_entry(from) {
			from_entry.state.lock().depends_on.insert(entry.atom.id());
		}
	}

	/// Resolve declared dependencies and run the factory through the
	/// extension pipeline. Cleanups registered by a failed or superseded run
	/// are the caller's to execute.
	pub(crate) async fn run_factory(
		&self,
		atom: &ErasedAtom,
		entry: &Arc<Entry>,
		from_invalidation: bool,
	) -> CoreResult<(ErasedValue, Vec<Cleanup>)> {
		let _guard = cycle::begin(atom.id(), atom.name())?;

		let mut deps = HashMap::new();
		for (name, spec) in atom.dependencies() {
			let value = match spec {
				DepSpec::Atom(dep) => DepValue::Value(
					Box::pin(self.resolve_entry(dep, Some(atom.id()))).await?,
				),
				DepSpec::Controller { atom: dep, eager } => {
					if *eager {
						Box::pin(self.resolve_entry(dep, Some(atom.id()))).await?;
					}
					DepValue::Controller(ErasedController::new(
						self.clone(),
						dep.clone(),
						Some(atom.id()),
					))
				}
				DepSpec::Tag { tag, mode } => {
					DepValue::Tag(self.lookup_tag(atom.name(), name, atom.tags(), tag, *mode)?)
				}
			};
			deps.insert(name.clone(), value);
		}

		let store = entry.state.lock().store.clone();
		let cleanups: Arc<Mutex<Vec<Cleanup>>> = Arc::new(Mutex::new(Vec::new()));
		let cx = ResolveCtx {
			deps: DepMap::new(deps, atom.name().to_string()),
			store: store.clone(),
			cleanups: Arc::clone(&cleanups),
			from_invalidation,
		};
		let info = ResolveInfo::new(atom.clone(), from_invalidation, store);
		let factory = Arc::clone(&atom.inner.factory);
		let target = atom.name().to_string();
		let work = move || -> BoxFuture<'static, CoreResult<ErasedValue>> {
			let factory = Arc::clone(&factory);
			let cx = cx.clone();
			let target = target.clone();
			Box::pin(async move { factory(cx).await.map_err(|e| CoreError::factory(&target, e)) })
		};

		let result = run_resolve_chain(&self.inner.extensions, info, work).await;
		let registered = std::mem::take(&mut *cleanups.lock());
		match result {
			Ok(value) => Ok((value, registered)),
			Err(error) => {
				// A failed run never installs; whatever it set up is torn
				// down immediately.
				run_cleanups(registered).await;
				Err(error)
			}
		}
	}

	/// Flat tag lookup for atom dependencies: definition-time tags, then
	/// scope-level tags, then the tag's own default.
	fn lookup_tag(
		&self,
		target: &str,
		dependency: &str,
		definition_tags: &[Tagged],
		tag: &ErasedTag,
		mode: TagMode,
	) -> CoreResult<TagValue> {
		match mode {
			TagMode::CollectAll => {
				let mut values = tag::collect(definition_tags, tag.key());
				values.extend(tag::collect(&self.inner.tags, tag.key()));
				Ok(TagValue::Many(values))
			}
			TagMode::Required | TagMode::Optional => {
				let found = tag::find_first(definition_tags, tag.key())
					.or_else(|| tag::find_first(&self.inner.tags, tag.key()))
					.or_else(|| tag.default());
				match (found, mode) {
					(Some(value), _) => Ok(TagValue::One(value)),
					(None, TagMode::Optional) => Ok(TagValue::Missing),
					(None, _) => Err(CoreError::MissingDependency {
						target: target.to_string(),
						dependency: dependency.to_string(),
					}),
				}
			}
		}
	}

	/// Install a factory outcome, unless a newer transition superseded it.
	pub(crate) fn install(
		&self,
		atom: &ErasedAtom,
		entry: &Arc<Entry>,
		epoch: u64,
		outcome: CoreResult<(ErasedValue, Vec<Cleanup>)>,
	) -> InstallOutcome {
		let (event, waiters, listeners, result) = {
			let mut st = entry.state.lock();
			if st.epoch != epoch {
				return InstallOutcome::Discarded(match outcome {
					Ok((_, cleanups)) => cleanups,
					Err(_) => Vec::new(),
				});
			}
			match outcome {
				Ok((value, cleanups)) => {
					st.state = AtomState::Resolved;
					st.value = Some(Arc::clone(&value));
					st.error = None;
					st.cleanups.extend(cleanups);
					let event = AtomEvent::Resolved {
						atom: atom.name().to_string(),
						value: Arc::clone(&value),
					};
					let listeners = st.listeners.matching(&event);
					let waiters = std::mem::take(&mut st.waiters);
					(event, waiters, listeners, Ok(value))
				}
				Err(error) => {
					st.state = AtomState::Failed;
					st.value = None;
					st.error = Some(error.clone());
					let event = AtomEvent::Failed {
						atom: atom.name().to_string(),
						error: error.clone(),
					};
					let listeners = st.listeners.matching(&event);
					let waiters = std::mem::take(&mut st.waiters);
					(event, waiters, listeners, Err(error))
				}
			}
		};
		for waiter in waiters {
			let _ = waiter.send(result.clone());
		}
		notify(&listeners, &event);
		self.maybe_schedule_gc(entry);
		InstallOutcome::Installed(result)
	}

	/// Synchronous, non-suspending read of an entry's current value.
	pub(crate) fn get_erased(&self, atom: &ErasedAtom) -> CoreResult<ErasedValue> {
		if self.is_disposed() {
			return Err(CoreError::ScopeDisposed);
		}
		let Some(entry) = self.inner.get_entry(atom.id()) else {
			return Err(CoreError::NotResolved {
				atom: atom.name().to_string(),
			});
		};
		let st = entry.state.lock();
		match st.state {
			// While re-resolving, the previous value keeps being served.
			AtomState::Resolved | AtomState::Resolving => {
				st.value.clone().ok_or_else(|| CoreError::NotResolved {
					atom: atom.name().to_string(),
				})
			}
			AtomState::Failed => Err(st.error.clone().unwrap_or_else(|| CoreError::NotResolved {
				atom: atom.name().to_string(),
			})),
			AtomState::Idle => Err(CoreError::NotResolved {
				atom: atom.name().to_string(),
			}),
		}
	}

	pub(crate) fn state_of(&self, atom: &ErasedAtom) -> AtomState {
		match self.inner.get_entry(atom.id()) {
			Some(entry) => entry.state.lock().state,
			None => AtomState::Idle,
		}
	}

	/// Tear the scope down: release every entry, then run extension
	/// `dispose` hooks in reverse registration order. A failing hook never
	/// prevents the remaining hooks from running; failures are aggregated.
	pub async fn dispose(&self) -> CoreResult<()> {
		if self.inner.disposed.swap(true, Ordering::AcqRel) {
			return Ok(());
		}
		self.settle().await;

		let entries: Vec<Arc<Entry>> = {
			let mut map = self.inner.entries.write();
			map.drain().map(|(_, entry)| entry).collect()
		};
		for entry in entries {
			let (cleanups, waiters) = {
				let mut st = entry.state.lock();
				st.cancel_gc();
				st.epoch += 1;
				st.state = AtomState::Idle;
				st.value = None;
				st.error = None;
				st.pending = None;
				st.store.clear();
				(std::mem::take(&mut st.cleanups), std::mem::take(&mut st.waiters))
			};
			for waiter in waiters {
				let _ = waiter.send(Err(CoreError::ScopeDisposed));
			}
			run_cleanups(cleanups).await;
		}

		let mut failures = Vec::new();
		if self.inner.init.get().is_some() {
			for ext in self.inner.extensions.iter().rev() {
				if let Err(error) = ext.dispose(self).await {
					tracing::warn!(extension = ext.name(), %error, "extension dispose failed");
					failures.push(error);
				}
			}
		}
		if failures.is_empty() {
			Ok(())
		} else {
			Err(CoreError::Dispose { failures })
		}
	}
}

pub(crate) enum InstallOutcome {
	Installed(CoreResult<ErasedValue>),
	Discarded(Vec<Cleanup>),
}

/// Run cleanups in reverse registration order, to completion, one at a time.
pub(crate) async fn run_cleanups(mut cleanups: Vec<Cleanup>) {
	while let Some(cleanup) = cleanups.pop() {
		cleanup().await;
	}
}

pub(crate) fn notify(listeners: &[Listener], event: &AtomEvent) {
	for listener in listeners {
		listener(event);
	}
}

/// Resolved value of one tag-dependency slot.
pub(crate) enum TagValue {
	Missing,
	One(ErasedValue),
	Many(Vec<ErasedValue>),
}

/// One resolved dependency slot, as handed to a factory.
pub(crate) enum DepValue {
	Value(ErasedValue),
	Controller(ErasedController),
	Tag(TagValue),
}

/// Named, typed access to a set of resolved dependency slots. Shared by
/// atom factories and flow bodies.
#[derive(Clone)]
pub(crate) struct DepMap {
	deps: Arc<HashMap<String, DepValue>>,
	target: String,
}

impl DepMap {
	pub(crate) fn new(deps: HashMap<String, DepValue>, target: String) -> Self {
		Self {
			deps: Arc::new(deps),
			target,
		}
	}

	fn missing(&self, name: &str) -> CoreError {
		CoreError::MissingDependency {
			target: self.target.clone(),
			dependency: name.to_string(),
		}
	}

	fn mistyped(&self, name: &str) -> CoreError {
		CoreError::Factory {
			target: self.target.clone(),
			message: format!("dependency `{name}` has an unexpected type"),
		}
	}

	pub(crate) fn value<T: Send + Sync + 'static>(&self, name: &str) -> CoreResult<Arc<T>> {
		match self.deps.get(name) {
			Some(DepValue::Value(value)) => Arc::clone(value)
				.downcast::<T>()
				.map_err(|_| self.mistyped(name)),
			_ => Err(self.missing(name)),
		}
	}

	pub(crate) fn controller<T: Send + Sync + 'static>(
		&self,
		name: &str,
	) -> CoreResult<Controller<T>> {
		match self.deps.get(name) {
			Some(DepValue::Controller(erased)) => Ok(Controller::new(erased.clone())),
			_ => Err(self.missing(name)),
		}
	}

	pub(crate) fn tag_one<T: Send + Sync + 'static>(
		&self,
		name: &str,
	) -> CoreResult<Option<Arc<T>>> {
		let value = match self.deps.get(name) {
			Some(DepValue::Tag(TagValue::One(value))) => Some(Arc::clone(value)),
			Some(DepValue::Tag(TagValue::Many(values))) => values.first().map(Arc::clone),
			Some(DepValue::Tag(TagValue::Missing)) => None,
			_ => return Err(self.missing(name)),
		};
		match value {
			Some(value) => Ok(Some(
				value.downcast::<T>().map_err(|_| self.mistyped(name))?,
			)),
			None => Ok(None),
		}
	}

	pub(crate) fn tag_many<T: Send + Sync + 'static>(
		&self,
		name: &str,
	) -> CoreResult<Vec<Arc<T>>> {
		let values = match self.deps.get(name) {
			Some(DepValue::Tag(TagValue::Many(values))) => values.clone(),
			Some(DepValue::Tag(TagValue::One(value))) => vec![Arc::clone(value)],
			Some(DepValue::Tag(TagValue::Missing)) => Vec::new(),
			_ => return Err(self.missing(name)),
		};
		values
			.into_iter()
			.map(|value| value.downcast::<T>().map_err(|_| self.mistyped(name)))
			.collect()
	}
}

/// What a factory sees while it runs: its resolved dependencies, the atom's
/// private store, cleanup registration, and whether this run came from an
/// invalidation.
#[derive(Clone)]
pub struct ResolveCtx {
	deps: DepMap,
	store: PrivateStore,
	cleanups: Arc<Mutex<Vec<Cleanup>>>,
	from_invalidation: bool,
}

impl ResolveCtx {
	/// A resolve-by-value dependency, downcast to its declared type.
	pub fn dep<T: Send + Sync + 'static>(&self, name: &str) -> CoreResult<Arc<T>> {
		self.deps.value(name)
	}

	/// A controller dependency.
	pub fn controller<T: Send + Sync + 'static>(&self, name: &str) -> CoreResult<Controller<T>> {
		self.deps.controller(name)
	}

	/// A required/optional tag dependency. `None` only for optional slots.
	pub fn tag<T: Send + Sync + 'static>(&self, name: &str) -> CoreResult<Option<Arc<T>>> {
		self.deps.tag_one(name)
	}

	/// A collect-all tag dependency, nearest-first.
	pub fn tags<T: Send + Sync + 'static>(&self, name: &str) -> CoreResult<Vec<Arc<T>>> {
		self.deps.tag_many(name)
	}

	/// Register a cleanup that runs before the next factory run installs a
	/// replacement value, and on release. Reverse registration order.
	pub fn cleanup<F, Fut>(&self, f: F)
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		self.cleanups.lock().push(Box::new(move || Box::pin(f())));
	}

	/// The atom's private store. Survives invalidation, cleared on release.
	pub fn store(&self) -> &PrivateStore {
		&self.store
	}

	/// Whether this run was triggered by an invalidation rather than a
	/// first resolution.
	pub fn from_invalidation(&self) -> bool {
		self.from_invalidation
	}

	/// Convenience typed read of the private store.
	pub fn remembered<T: Send + Sync + 'static>(&self, tag: &Tag<T>) -> Option<Arc<T>> {
		self.store.get(tag)
	}
}
