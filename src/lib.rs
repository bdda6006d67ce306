//! # Axle
//!
//! A reactive dependency-injection runtime for Rust.
//!
//! Axle wires an application out of **atoms**: lazily-computed, cached units
//! of work whose values can be invalidated, re-derived and observed by
//! subscribers. Request-shaped work runs as **flows** inside a hierarchical
//! execution-context tree that nests and propagates metadata.
//!
//! ## Core Principles
//!
//! - **Lazy and cached**: an atom's factory runs at most once per scope
//!   until it is invalidated; concurrent resolvers share one run.
//! - **Deferred reactivity**: `invalidate`/`set`/`update` are intents,
//!   coalesced and applied on the next deferred pass.
//! - **Owned lifecycles**: the scope owns every cache entry; release
//!   cascades through the dependency graph once nothing subscribes.
//! - **Async-First**: built on tokio and async/await from the ground up.
//!
//! ## Quick Example
//!
//! ```
//! use axle::{Atom, Scope};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> axle::CoreResult<()> {
//! let scope = Scope::new();
//!
//! let config: Atom<String> = Atom::new("config", |_cx| async {
//!     Ok("postgres://localhost".to_string())
//! });
//! let pool: Atom<String> = Atom::builder("pool", |cx| async move {
//!     Ok(format!("pool({})", cx.dep::<String>("config")?))
//! })
//! .dep("config", &config)
//! .build();
//!
//! assert_eq!(&*scope.resolve(&pool).await?, "pool(postgres://localhost)");
//! # Ok(())
//! # }
//! ```

pub use axle_core::{
	Atom, AtomBuilder, AtomEvent, AtomId, AtomState, BoxError, Controller, CoreError, CoreResult,
	DepSpec, DependencyGraph, ErasedAtom, ErasedTag, ErasedValue, EventKind, ExecContext,
	ExecInfo, ExecNext, Extension, Flow, FlowBuilder, FlowCtx, GraphNode, ParsePhase,
	PrivateStore, ResolveCtx, ResolveInfo, ResolveNext, Scope, ScopeBuilder, ScopeOptions,
	Subscription, Tag, TagKey, TagMode, Tagged,
};

/// Commonly used items.
pub mod prelude {
	pub use axle_core::{
		Atom, AtomState, Controller, CoreResult, EventKind, Flow, FlowCtx, ResolveCtx, Scope,
		Tag, TagMode,
	};
}
