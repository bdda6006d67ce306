//! The extension pipeline.
//!
//! Extensions wrap atom resolution and flow execution as nested function
//! wrappers. Hooks are optional; an extension that implements neither wrap
//! hook is invisible to the pipeline. Registration order is pipeline order:
//! the first-registered extension is outermost, the last-registered one sits
//! closest to the actual work.

use crate::atom::ErasedAtom;
use crate::context::ExecContext;
use crate::error::CoreResult;
use crate::scope::Scope;
use crate::tag::PrivateStore;
use crate::ErasedValue;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Information handed to [`Extension::wrap_resolve`].
pub struct ResolveInfo {
	atom: ErasedAtom,
	from_invalidation: bool,
	store: PrivateStore,
}

impl ResolveInfo {
	pub(crate) fn new(atom: ErasedAtom, from_invalidation: bool, store: PrivateStore) -> Self {
		Self {
			atom,
			from_invalidation,
			store,
		}
	}

	/// The atom being resolved.
	pub fn atom(&self) -> &ErasedAtom {
		&self.atom
	}

	/// Whether this resolution was triggered by an invalidation.
	pub fn from_invalidation(&self) -> bool {
		self.from_invalidation
	}

	/// The atom's private-data store.
	pub fn store(&self) -> &PrivateStore {
		&self.store
	}
}

/// Information handed to [`Extension::wrap_exec`].
pub struct ExecInfo {
	target: String,
	context: ExecContext,
}

impl ExecInfo {
	pub(crate) fn new(target: String, context: ExecContext) -> Self {
		Self { target, context }
	}

	/// Name of the flow being executed.
	pub fn target(&self) -> &str {
		&self.target
	}

	/// The child execution context the flow runs in.
	pub fn context(&self) -> &ExecContext {
		&self.context
	}
}

/// A middleware hook set wrapping resolution and execution.
///
/// All hooks default to passthrough, so an extension implements only what it
/// needs. `init` runs once before the scope is usable; `dispose` runs on
/// scope teardown in reverse registration order, and one hook's failure
/// never prevents the remaining hooks from running.
#[async_trait]
pub trait Extension: Send + Sync {
	/// Name used in logs and teardown reports.
	fn name(&self) -> &str {
		"extension"
	}

	async fn init(&self, scope: &Scope) -> CoreResult<()> {
		let _ = scope;
		Ok(())
	}

	async fn dispose(&self, scope: &Scope) -> CoreResult<()> {
		let _ = scope;
		Ok(())
	}

	/// Wrap one atom resolution. Forward the result (or error) of `next`
	/// unchanged unless deliberately translating it.
	async fn wrap_resolve(&self, next: ResolveNext, info: &ResolveInfo) -> CoreResult<ErasedValue> {
		let _ = info;
		next.run().await
	}

	/// Wrap one flow execution.
	async fn wrap_exec(&self, next: ExecNext, info: &ExecInfo) -> CoreResult<ErasedValue> {
		let _ = info;
		next.run().await
	}
}

pub(crate) type StepFuture = BoxFuture<'static, CoreResult<ErasedValue>>;

#[async_trait]
trait Step: Send + Sync {
	async fn run(&self) -> CoreResult<ErasedValue>;
}

/// The innermost step: the factory or flow body itself. Re-invocable, so an
/// extension may call `next` again (a retry wrapper re-runs the factory).
struct Terminal {
	work: Box<dyn Fn() -> StepFuture + Send + Sync>,
}

#[async_trait]
impl Step for Terminal {
	async fn run(&self) -> CoreResult<ErasedValue> {
		(self.work)().await
	}
}

struct ResolveWrap {
	extension: Arc<dyn Extension>,
	info: Arc<ResolveInfo>,
	next: Arc<dyn Step>,
}

#[async_trait]
impl Step for ResolveWrap {
	async fn run(&self) -> CoreResult<ErasedValue> {
		self.extension
			.wrap_resolve(
				ResolveNext {
					step: Arc::clone(&self.next),
				},
				&self.info,
			)
			.await
	}
}

struct ExecWrap {
	extension: Arc<dyn Extension>,
	info: Arc<ExecInfo>,
	next: Arc<dyn Step>,
}

#[async_trait]
impl Step for ExecWrap {
	async fn run(&self) -> CoreResult<ErasedValue> {
		self.extension
			.wrap_exec(
				ExecNext {
					step: Arc::clone(&self.next),
				},
				&self.info,
			)
			.await
	}
}

/// The next step of a resolution pipeline.
///
/// `run` consumes the handle; clone it first to keep the option of calling
/// the remainder again (retry wrappers re-run the factory this way).
#[derive(Clone)]
pub struct ResolveNext {
	step: Arc<dyn Step>,
}

impl ResolveNext {
	/// Run the remainder of the pipeline down to the factory.
	pub async fn run(self) -> CoreResult<ErasedValue> {
		self.step.run().await
	}
}

/// The next step of an execution pipeline.
#[derive(Clone)]
pub struct ExecNext {
	step: Arc<dyn Step>,
}

impl ExecNext {
	/// Run the remainder of the pipeline down to the flow body.
	pub async fn run(self) -> CoreResult<ErasedValue> {
		self.step.run().await
	}
}

pub(crate) async fn run_resolve_chain(
	extensions: &[Arc<dyn Extension>],
	info: ResolveInfo,
	work: impl Fn() -> StepFuture + Send + Sync + 'static,
) -> CoreResult<ErasedValue> {
	let info = Arc::new(info);
	let mut step: Arc<dyn Step> = Arc::new(Terminal {
		work: Box::new(work),
	});
	for extension in extensions.iter().rev() {
		step = Arc::new(ResolveWrap {
			extension: Arc::clone(extension),
			info: Arc::clone(&info),
			next: step,
		});
	}
	step.run().await
}

pub(crate) async fn run_exec_chain(
	extensions: &[Arc<dyn Extension>],
	info: ExecInfo,
	work: impl Fn() -> StepFuture + Send + Sync + 'static,
) -> CoreResult<ErasedValue> {
	let info = Arc::new(info);
	let mut step: Arc<dyn Step> = Arc::new(Terminal {
		work: Box::new(work),
	});
	for extension in extensions.iter().rev() {
		step = Arc::new(ExecWrap {
			extension: Arc::clone(extension),
			info: Arc::clone(&info),
			next: step,
		});
	}
	step.run().await
}
