//! Hierarchical execution contexts.
//!
//! Every flow invocation runs inside its own context. A context owns its
//! private data and deferred cleanups; its parent link is the only strong
//! reference in the tree (children are tracked weakly), so ownership flows
//! strictly downward while lookups flow upward.

use crate::scope::Cleanup;
use crate::tag::{Store, Tag, TagKey, Tagged};
use crate::ErasedValue;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

pub(crate) struct CtxInner {
	name: String,
	parent: Option<ExecContext>,
	input: Option<ErasedValue>,
	data: Mutex<Store>,
	cleanups: Mutex<Vec<Cleanup>>,
	closed: AtomicBool,
	children: Mutex<Vec<Weak<CtxInner>>>,
	/// Execution-time tags supplied for this invocation level.
	tags: Vec<Tagged>,
}

/// A per-invocation execution context.
///
/// # Examples
///
/// ```
/// use axle_core::{ExecContext, Tag};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let key: Tag<u32> = Tag::new("key");
/// let root = ExecContext::root("root");
/// root.set(&key, 1);
///
/// let child = root.child("child", None, Vec::new());
/// assert!(child.get(&key).is_none());        // local read misses
/// assert_eq!(*child.seek(&key).unwrap(), 1); // seek walks up
/// # root.close().await;
/// # }
/// ```
#[derive(Clone)]
pub struct ExecContext {
	inner: Arc<CtxInner>,
}

impl ExecContext {
	/// Create a root context. Roots have no input and are closed only by
	/// their owner.
	pub fn root(name: impl Into<String>) -> Self {
		Self {
			inner: Arc::new(CtxInner {
				name: name.into(),
				parent: None,
				input: None,
				data: Mutex::new(Store::default()),
				cleanups: Mutex::new(Vec::new()),
				closed: AtomicBool::new(false),
				children: Mutex::new(Vec::new()),
				tags: Vec::new(),
			}),
		}
	}

	/// Create a child of this context.
	pub fn child(
		&self,
		name: impl Into<String>,
		input: Option<ErasedValue>,
		tags: Vec<Tagged>,
	) -> Self {
		let child = Self {
			inner: Arc::new(CtxInner {
				name: name.into(),
				parent: Some(self.clone()),
				input,
				data: Mutex::new(Store::default()),
				cleanups: Mutex::new(Vec::new()),
				closed: AtomicBool::new(false),
				children: Mutex::new(Vec::new()),
				tags,
			}),
		};
		self.inner.children.lock().push(Arc::downgrade(&child.inner));
		child
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	pub fn parent(&self) -> Option<&ExecContext> {
		self.inner.parent.as_ref()
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::Acquire)
	}

	/// The invocation input, if any.
	pub fn input<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
		self.inner
			.input
			.clone()
			.and_then(|value| value.downcast::<T>().ok())
	}

	pub(crate) fn tags(&self) -> &[Tagged] {
		&self.inner.tags
	}

	/// Local read; never consults the parent chain.
	pub fn get<T: Send + Sync + 'static>(&self, tag: &Tag<T>) -> Option<Arc<T>> {
		let value = self.inner.data.lock().get(tag.key())?;
		value.downcast::<T>().ok()
	}

	/// Local write. The hierarchy is read-only upward; writes never touch
	/// an ancestor's store.
	pub fn set<T: Send + Sync + 'static>(&self, tag: &Tag<T>, value: T) {
		self.inner
			.data
			.lock()
			.set(tag.key(), Arc::new(value) as ErasedValue);
	}

	/// Hierarchical read: the local store first, then each ancestor's local
	/// store up to the root. Sibling contexts are never consulted, and the
	/// tag's default value never substitutes for a miss.
	pub fn seek<T: Send + Sync + 'static>(&self, tag: &Tag<T>) -> Option<Arc<T>> {
		self.seek_erased(tag.key())
			.and_then(|value| value.downcast::<T>().ok())
	}

	pub(crate) fn seek_erased(&self, key: TagKey) -> Option<ErasedValue> {
		let mut current = Some(self.clone());
		while let Some(ctx) = current {
			if let Some(value) = ctx.inner.data.lock().get(key) {
				return Some(value);
			}
			current = ctx.inner.parent.clone();
		}
		None
	}

	/// One value per context level that holds `key`, nearest level first.
	pub(crate) fn seek_all(&self, key: TagKey) -> Vec<ErasedValue> {
		let mut found = Vec::new();
		let mut current = Some(self.clone());
		while let Some(ctx) = current {
			if let Some(value) = ctx.inner.data.lock().get(key) {
				found.push(value);
			}
			current = ctx.inner.parent.clone();
		}
		found
	}

	/// Execution-time tags of this level and every ancestor, nearest first.
	pub(crate) fn chain_tags(&self) -> Vec<Tagged> {
		let mut tags = Vec::new();
		let mut current = Some(self.clone());
		while let Some(ctx) = current {
			tags.extend(ctx.inner.tags.iter().cloned());
			current = ctx.inner.parent.clone();
		}
		tags
	}

	/// Register a deferred cleanup, run when this context closes. Cleanups
	/// run in reverse registration order.
	pub fn defer<F, Fut>(&self, f: F)
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		self.inner.cleanups.lock().push(Box::new(move || Box::pin(f())));
	}

	/// Close this context: any still-open children close first, then the
	/// deferred cleanups run. Idempotent.
	pub fn close(&self) -> BoxFuture<'static, ()> {
		let ctx = self.clone();
		Box::pin(async move {
			if ctx.inner.closed.swap(true, Ordering::AcqRel) {
				return;
			}
			let children: Vec<ExecContext> = {
				let mut slots = ctx.inner.children.lock();
				slots
					.drain(..)
					.filter_map(|weak| weak.upgrade().map(|inner| ExecContext { inner }))
					.collect()
			};
			for child in children {
				if !child.is_closed() {
					child.close().await;
				}
			}
			let mut cleanups = std::mem::take(&mut *ctx.inner.cleanups.lock());
			while let Some(cleanup) = cleanups.pop() {
				cleanup().await;
			}
		})
	}
}

impl fmt::Debug for ExecContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ExecContext")
			.field("name", &self.inner.name)
			.field("closed", &self.is_closed())
			.field("has_parent", &self.inner.parent.is_some())
			.finish()
	}
}
