//! Typed, uniquely-keyed metadata tags.
//!
//! A [`Tag<T>`] is an opaque identity token with a compile-time value type,
//! usable both as a dependency-injection key and as a key into the
//! identity-keyed stores carried by atoms and execution contexts. Uniqueness
//! comes from a process-wide counter, not from the tag's name, so two tags
//! that happen to share a name never collide.

use crate::error::{CoreError, CoreResult, ParsePhase};
use crate::ErasedValue;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TAG_KEY: AtomicU64 = AtomicU64::new(1);

/// Opaque identity token for a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagKey(u64);

impl TagKey {
	fn next() -> Self {
		TagKey(NEXT_TAG_KEY.fetch_add(1, Ordering::Relaxed))
	}
}

type ValidateFn = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Result<(), String> + Send + Sync>;

struct TagInner {
	key: TagKey,
	name: String,
	default: Option<ErasedValue>,
	validate: Option<ValidateFn>,
}

/// A typed metadata tag.
///
/// # Examples
///
/// ```
/// use axle_core::Tag;
///
/// let trace_id: Tag<String> = Tag::new("trace_id");
/// let tagged = trace_id.with("abc-123".to_string()).unwrap();
/// assert_eq!(tagged.name(), "trace_id");
/// ```
pub struct Tag<T> {
	inner: Arc<TagInner>,
	_marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Tag<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
			_marker: PhantomData,
		}
	}
}

impl<T> fmt::Debug for Tag<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Tag")
			.field("key", &self.inner.key)
			.field("name", &self.inner.name)
			.finish()
	}
}

impl<T: Send + Sync + 'static> Tag<T> {
	/// Create a new tag with a fresh identity.
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			inner: Arc::new(TagInner {
				key: TagKey::next(),
				name: name.into(),
				default: None,
				validate: None,
			}),
			_marker: PhantomData,
		}
	}

	/// Attach a fallback value used when no tagged value is found.
	///
	/// The default participates only in tag-dependency resolution; `seek`
	/// over context private data never substitutes it.
	pub fn default_value(self, value: T) -> Self {
		let inner = Arc::new(TagInner {
			key: self.inner.key,
			name: self.inner.name.clone(),
			default: Some(Arc::new(value) as ErasedValue),
			validate: self.inner.validate.clone(),
		});
		Self {
			inner,
			_marker: PhantomData,
		}
	}

	/// Attach a validation function run by [`Tag::with`].
	pub fn validator<F>(self, f: F) -> Self
	where
		F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
	{
		let erased: ValidateFn = Arc::new(move |any| match any.downcast_ref::<T>() {
			Some(v) => f(v),
			None => Err("tagged value has an unexpected type".to_string()),
		});
		let inner = Arc::new(TagInner {
			key: self.inner.key,
			name: self.inner.name.clone(),
			default: self.inner.default.clone(),
			validate: Some(erased),
		});
		Self {
			inner,
			_marker: PhantomData,
		}
	}

	/// Validate `value` and wrap it into a [`Tagged`] carrier.
	pub fn with(&self, value: T) -> CoreResult<Tagged> {
		if let Some(validate) = &self.inner.validate {
			validate(&value)
				.map_err(|m| CoreError::parse(ParsePhase::Tag, &self.inner.name, m))?;
		}
		Ok(Tagged {
			key: self.inner.key,
			tag_name: self.inner.name.clone(),
			value: Arc::new(value) as ErasedValue,
		})
	}

	/// The tag's identity token.
	pub fn key(&self) -> TagKey {
		self.inner.key
	}

	/// The tag's display name.
	pub fn name(&self) -> &str {
		&self.inner.name
	}

	/// Type-erase this tag for storage in dependency descriptors.
	pub fn erased(&self) -> ErasedTag {
		ErasedTag {
			inner: Arc::clone(&self.inner),
		}
	}

	/// Downcast a stored value back to the tag's value type.
	pub(crate) fn downcast(&self, value: ErasedValue) -> Option<Arc<T>> {
		value.downcast::<T>().ok()
	}
}

/// An untyped handle to a tag, used inside dependency descriptors.
#[derive(Clone)]
pub struct ErasedTag {
	inner: Arc<TagInner>,
}

impl ErasedTag {
	pub fn key(&self) -> TagKey {
		self.inner.key
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	pub(crate) fn default(&self) -> Option<ErasedValue> {
		self.inner.default.clone()
	}
}

impl fmt::Debug for ErasedTag {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ErasedTag")
			.field("key", &self.inner.key)
			.field("name", &self.inner.name)
			.finish()
	}
}

/// A validated (key, value, owning-tag) triple.
#[derive(Clone)]
pub struct Tagged {
	key: TagKey,
	tag_name: String,
	value: ErasedValue,
}

impl Tagged {
	pub fn key(&self) -> TagKey {
		self.key
	}

	/// Name of the tag that produced this value.
	pub fn name(&self) -> &str {
		&self.tag_name
	}

	pub(crate) fn value(&self) -> ErasedValue {
		Arc::clone(&self.value)
	}
}

impl fmt::Debug for Tagged {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Tagged").field("tag", &self.tag_name).finish()
	}
}

/// First match for `key` in a flat tagged list.
pub(crate) fn find_first(tags: &[Tagged], key: TagKey) -> Option<ErasedValue> {
	tags.iter().find(|t| t.key == key).map(Tagged::value)
}

/// All matches for `key` in a flat tagged list, in list order.
pub(crate) fn collect(tags: &[Tagged], key: TagKey) -> Vec<ErasedValue> {
	tags.iter()
		.filter(|t| t.key == key)
		.map(Tagged::value)
		.collect()
}

/// Identity-keyed key/value store.
///
/// Backs both atom private data and execution-context private data.
#[derive(Default)]
pub(crate) struct Store {
	map: HashMap<TagKey, ErasedValue>,
}

impl Store {
	pub(crate) fn get(&self, key: TagKey) -> Option<ErasedValue> {
		self.map.get(&key).cloned()
	}

	pub(crate) fn set(&mut self, key: TagKey, value: ErasedValue) {
		self.map.insert(key, value);
	}

	pub(crate) fn remove(&mut self, key: TagKey) -> Option<ErasedValue> {
		self.map.remove(&key)
	}

	pub(crate) fn clear(&mut self) {
		self.map.clear();
	}
}

/// Shared handle to an atom's private-data store.
///
/// The store survives invalidation and is cleared on release, which is what
/// makes it the right home for "previous value" style state that a factory
/// wants to carry across re-runs.
#[derive(Clone, Default)]
pub struct PrivateStore {
	inner: Arc<Mutex<Store>>,
}

impl PrivateStore {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Read a value previously stored under `tag`.
	pub fn get<T: Send + Sync + 'static>(&self, tag: &Tag<T>) -> Option<Arc<T>> {
		let value = self.inner.lock().get(tag.key())?;
		tag.downcast(value)
	}

	/// Store a value under `tag`, replacing any previous one.
	pub fn set<T: Send + Sync + 'static>(&self, tag: &Tag<T>, value: T) {
		self.inner.lock().set(tag.key(), Arc::new(value) as ErasedValue);
	}

	/// Remove the value stored under `tag`.
	pub fn remove<T: Send + Sync + 'static>(&self, tag: &Tag<T>) -> Option<Arc<T>> {
		let value = self.inner.lock().remove(tag.key())?;
		tag.downcast(value)
	}

	pub(crate) fn clear(&self) {
		self.inner.lock().clear();
	}
}
