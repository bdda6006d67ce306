//! Atom definitions.
//!
//! An atom is an immutable unit-of-work descriptor: a factory plus declared
//! dependencies, tags, and a keep-alive flag. Identity is a generated id, so
//! two atoms built from identical parts are still distinct cache entries.

use crate::error::BoxError;
use crate::scope::ResolveCtx;
use crate::tag::{ErasedTag, Tag, Tagged};
use crate::ErasedValue;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ATOM_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of an atom within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtomId(u64);

impl AtomId {
	fn next() -> Self {
		AtomId(NEXT_ATOM_ID.fetch_add(1, Ordering::Relaxed))
	}
}

impl fmt::Display for AtomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// How a tag dependency treats missing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagMode {
	/// Resolution fails when no value is found anywhere (including default).
	Required,
	/// Missing values resolve to `None`.
	Optional,
	/// Every match is gathered, nearest-first.
	CollectAll,
}

/// A declared dependency slot.
///
/// This is the explicit sum the engine resolves before a factory runs:
/// resolve-by-value, resolve-to-accessor, or tag lookup.
#[derive(Clone)]
pub enum DepSpec {
	/// Resolve the atom and hand its value to the factory.
	Atom(ErasedAtom),
	/// Hand the factory a controller for the atom; `eager` resolves it first.
	Controller {
		atom: ErasedAtom,
		eager: bool,
	},
	/// Look the tag up per [`TagMode`].
	Tag {
		tag: ErasedTag,
		mode: TagMode,
	},
}

impl fmt::Debug for DepSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DepSpec::Atom(a) => write!(f, "Atom({})", a.name()),
			DepSpec::Controller { atom, eager } => {
				write!(f, "Controller({}, eager={eager})", atom.name())
			}
			DepSpec::Tag { tag, mode } => write!(f, "Tag({}, {mode:?})", tag.name()),
		}
	}
}

pub(crate) type ErasedFactory =
	Arc<dyn Fn(ResolveCtx) -> BoxFuture<'static, Result<ErasedValue, BoxError>> + Send + Sync>;

pub(crate) struct AtomInner {
	pub(crate) id: AtomId,
	pub(crate) name: String,
	pub(crate) factory: ErasedFactory,
	pub(crate) deps: Vec<(String, DepSpec)>,
	pub(crate) tags: Vec<Tagged>,
	pub(crate) keep_alive: bool,
}

/// Untyped atom handle; identity by id, cheap to clone.
#[derive(Clone)]
pub struct ErasedAtom {
	pub(crate) inner: Arc<AtomInner>,
}

impl ErasedAtom {
	pub fn id(&self) -> AtomId {
		self.inner.id
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	/// The declared dependency shape, inspectable at definition time.
	pub fn dependencies(&self) -> &[(String, DepSpec)] {
		&self.inner.deps
	}

	/// Definition-time tags, in declaration order.
	pub fn tags(&self) -> &[Tagged] {
		&self.inner.tags
	}

	pub fn keep_alive(&self) -> bool {
		self.inner.keep_alive
	}
}

impl fmt::Debug for ErasedAtom {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Atom")
			.field("id", &self.id())
			.field("name", &self.name())
			.finish()
	}
}

/// A typed atom definition.
///
/// # Examples
///
/// ```
/// use axle_core::Atom;
///
/// let count: Atom<u32> = Atom::new("count", |_cx| async { Ok(0) });
/// assert_eq!(count.name(), "count");
/// ```
pub struct Atom<T> {
	erased: ErasedAtom,
	_marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Atom<T> {
	fn clone(&self) -> Self {
		Self {
			erased: self.erased.clone(),
			_marker: PhantomData,
		}
	}
}

impl<T> fmt::Debug for Atom<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.erased.fmt(f)
	}
}

impl<T: Send + Sync + 'static> Atom<T> {
	/// Define an atom with no declared dependencies.
	pub fn new<F, Fut>(name: impl Into<String>, factory: F) -> Self
	where
		F: Fn(ResolveCtx) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
	{
		Self::builder(name, factory).build()
	}

	/// Start building an atom definition.
	pub fn builder<F, Fut>(name: impl Into<String>, factory: F) -> AtomBuilder<T>
	where
		F: Fn(ResolveCtx) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
	{
		let erased: ErasedFactory = Arc::new(move |cx| {
			let fut = factory(cx);
			Box::pin(async move { fut.await.map(|v| Arc::new(v) as ErasedValue) })
		});
		AtomBuilder {
			name: name.into(),
			factory: erased,
			deps: Vec::new(),
			tags: Vec::new(),
			keep_alive: false,
			_marker: PhantomData,
		}
	}

	pub fn id(&self) -> AtomId {
		self.erased.id()
	}

	pub fn name(&self) -> &str {
		self.erased.name()
	}

	/// The untyped handle used in dependency descriptors.
	pub fn erased(&self) -> ErasedAtom {
		self.erased.clone()
	}
}

/// Builder for [`Atom`] definitions.
pub struct AtomBuilder<T> {
	name: String,
	factory: ErasedFactory,
	deps: Vec<(String, DepSpec)>,
	tags: Vec<Tagged>,
	keep_alive: bool,
	_marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> AtomBuilder<T> {
	/// Declare a resolve-by-value dependency on another atom.
	pub fn dep<U: Send + Sync + 'static>(mut self, name: impl Into<String>, atom: &Atom<U>) -> Self {
		self.deps.push((name.into(), DepSpec::Atom(atom.erased())));
		self
	}

	/// Declare a lazy controller dependency.
	pub fn controller_dep<U: Send + Sync + 'static>(
		mut self,
		name: impl Into<String>,
		atom: &Atom<U>,
	) -> Self {
		self.deps.push((
			name.into(),
			DepSpec::Controller {
				atom: atom.erased(),
				eager: false,
			},
		));
		self
	}

	/// Declare a controller dependency whose target resolves before the factory runs.
	pub fn eager_controller_dep<U: Send + Sync + 'static>(
		mut self,
		name: impl Into<String>,
		atom: &Atom<U>,
	) -> Self {
		self.deps.push((
			name.into(),
			DepSpec::Controller {
				atom: atom.erased(),
				eager: true,
			},
		));
		self
	}

	/// Declare a tag dependency with an explicit mode.
	pub fn tag_dep<U: Send + Sync + 'static>(
		mut self,
		name: impl Into<String>,
		tag: &Tag<U>,
		mode: TagMode,
	) -> Self {
		self.deps.push((
			name.into(),
			DepSpec::Tag {
				tag: tag.erased(),
				mode,
			},
		));
		self
	}

	/// Attach a definition-time tagged value.
	pub fn tag(mut self, tagged: Tagged) -> Self {
		self.tags.push(tagged);
		self
	}

	/// Exempt this atom from subscription garbage collection.
	pub fn keep_alive(mut self) -> Self {
		self.keep_alive = true;
		self
	}

	pub fn build(self) -> Atom<T> {
		Atom {
			erased: ErasedAtom {
				inner: Arc::new(AtomInner {
					id: AtomId::next(),
					name: self.name,
					factory: self.factory,
					deps: self.deps,
					tags: self.tags,
					keep_alive: self.keep_alive,
				}),
			},
			_marker: PhantomData,
		}
	}
}
