//! # axle-core
//!
//! The resolution-and-reactivity engine underneath `axle`: a graph of
//! lazily-computed, cached atoms whose values can be invalidated, re-derived
//! and observed, composed with a hierarchical execution-context tree for
//! request-shaped work.
//!
//! ## Pieces
//!
//! - **[`Atom`]**: an immutable descriptor (factory, declared dependencies,
//!   tags, keep-alive flag)
//! - **[`Scope`]**: the resolution cache, sole owner of every cache entry
//!   and atom lifecycle
//! - **[`Controller`]**: a thin per-(scope, atom) handle (`get`, `resolve`,
//!   `invalidate`, `set`, `update`, `release`, `on`)
//! - **[`Flow`]** / **[`ExecContext`]**: per-invocation execution with
//!   isolated private data, deferred cleanups, and upward `seek` lookups
//! - **[`Tag`]**: typed, uniquely-keyed metadata usable as a dependency key
//!   and as a store key
//! - **[`Extension`]**: middleware wrapping both resolution and execution
//!
//! ## Model
//!
//! `invalidate`, `set` and `update` are synchronous intents; the transitions
//! they request happen on a deferred pass ([`Scope::settle`] awaits it).
//! Concurrent resolutions of one atom share a single factory run. Cleanups
//! always run fully before a replacement value installs, and every
//! externally observable transition notifies its listeners exactly once.
//!
//! ```
//! use axle_core::{Atom, Scope};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> axle_core::CoreResult<()> {
//! let scope = Scope::new();
//! let count: Atom<u32> = Atom::new("count", |_cx| async { Ok(0) });
//!
//! let ctl = scope.controller(&count);
//! ctl.resolve().await?;
//! ctl.set(41);
//! ctl.update(|n| n + 1);
//! scope.settle().await;
//! assert_eq!(*ctl.get()?, 42);
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::sync::Arc;

/// Type-erased value as stored in cache entries, tag carriers and stores.
pub type ErasedValue = Arc<dyn Any + Send + Sync>;

mod atom;
mod context;
mod controller;
mod cycle;
mod error;
mod extension;
mod flow;
mod gc;
mod graph;
mod listener;
mod scheduler;
mod scope;
mod tag;

pub use atom::{Atom, AtomBuilder, AtomId, DepSpec, ErasedAtom, TagMode};
pub use context::ExecContext;
pub use controller::Controller;
pub use error::{BoxError, CoreError, CoreResult, ParsePhase};
pub use extension::{ExecInfo, ExecNext, Extension, ResolveInfo, ResolveNext};
pub use flow::{Flow, FlowBuilder, FlowCtx};
pub use graph::{DependencyGraph, GraphNode};
pub use listener::{AtomEvent, EventKind, Subscription};
pub use scope::{AtomState, ResolveCtx, Scope, ScopeBuilder, ScopeOptions};
pub use tag::{ErasedTag, PrivateStore, Tag, TagKey, Tagged};
