//! Flow definitions and execution.
//!
//! A flow is the executed counterpart of an atom: a named body invoked with
//! an input, inside its own child execution context, with the same declared
//! dependency slots atoms have. Tag dependencies resolve hierarchically:
//! context private data (nearest ancestor first), then execution-time tags,
//! then definition-time tags, then scope-level tags, then the tag's default.

use crate::atom::{Atom, DepSpec, TagMode};
use crate::context::ExecContext;
use crate::controller::{Controller, ErasedController};
use crate::cycle;
use crate::error::{BoxError, CoreError, CoreResult, ParsePhase};
use crate::extension::{run_exec_chain, ExecInfo};
use crate::scope::{DepMap, DepValue, Scope, TagValue};
use crate::tag::{self, ErasedTag, Tag, Tagged};
use crate::ErasedValue;
use futures::future::BoxFuture;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

type ErasedBody =
	Arc<dyn Fn(FlowCtx) -> BoxFuture<'static, Result<ErasedValue, BoxError>> + Send + Sync>;
type ParseFn = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Result<(), String> + Send + Sync>;

pub(crate) struct FlowInner {
	name: String,
	deps: Vec<(String, DepSpec)>,
	tags: Vec<Tagged>,
	body: ErasedBody,
	parse_input: Option<ParseFn>,
	parse_output: Option<ParseFn>,
}

/// A typed flow definition.
///
/// # Examples
///
/// ```
/// use axle_core::{Flow, Scope};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> axle_core::CoreResult<()> {
/// let scope = Scope::new();
/// let double: Flow<u32, u32> = Flow::new("double", |_cx, n| async move { Ok(*n * 2) });
///
/// assert_eq!(*scope.exec(&double, 21).await?, 42);
/// # Ok(())
/// # }
/// ```
pub struct Flow<I, O> {
	pub(crate) inner: Arc<FlowInner>,
	_marker: PhantomData<fn(I) -> O>,
}

impl<I, O> Clone for Flow<I, O> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
			_marker: PhantomData,
		}
	}
}

impl<I, O> fmt::Debug for Flow<I, O> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Flow").field("name", &self.inner.name).finish()
	}
}

impl<I, O> Flow<I, O>
where
	I: Send + Sync + 'static,
	O: Send + Sync + 'static,
{
	/// Define a flow with no declared dependencies.
	pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
	where
		F: Fn(FlowCtx, Arc<I>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<O, BoxError>> + Send + 'static,
	{
		Self::builder(name, body).build()
	}

	/// Start building a flow definition.
	pub fn builder<F, Fut>(name: impl Into<String>, body: F) -> FlowBuilder<I, O>
	where
		F: Fn(FlowCtx, Arc<I>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<O, BoxError>> + Send + 'static,
	{
		let name = name.into();
		let target = name.clone();
		let erased: ErasedBody = Arc::new(move |cx: FlowCtx| {
			let target = target.clone();
			let input = cx.context().input::<I>();
			let fut = input.map(|input| body(cx, input));
			Box::pin(async move {
				match fut {
					Some(fut) => fut.await.map(|out| Arc::new(out) as ErasedValue),
					None => Err(Box::new(CoreError::Factory {
						target,
						message: "flow input is missing or has an unexpected type".to_string(),
					}) as BoxError),
				}
			})
		});
		FlowBuilder {
			name,
			deps: Vec::new(),
			tags: Vec::new(),
			body: erased,
			parse_input: None,
			parse_output: None,
			_marker: PhantomData,
		}
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
}

/// Builder for [`Flow`] definitions.
pub struct FlowBuilder<I, O> {
	name: String,
	deps: Vec<(String, DepSpec)>,
	tags: Vec<Tagged>,
	body: ErasedBody,
	parse_input: Option<ParseFn>,
	parse_output: Option<ParseFn>,
	_marker: PhantomData<fn(I) -> O>,
}

impl<I, O> FlowBuilder<I, O>
where
	I: Send + Sync + 'static,
	O: Send + Sync + 'static,
{
	/// Declare a resolve-by-value dependency on an atom.
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

	/// Validate the input before the body runs.
	pub fn parse_input<F>(mut self, parse: F) -> Self
	where
		F: Fn(&I) -> Result<(), String> + Send + Sync + 'static,
	{
		self.parse_input = Some(erase_parse(parse));
		self
	}

	/// Validate the output after the body returns.
	pub fn parse_output<F>(mut self, parse: F) -> Self
	where
		F: Fn(&O) -> Result<(), String> + Send + Sync + 'static,
	{
		self.parse_output = Some(erase_parse(parse));
		self
	}

	pub fn build(self) -> Flow<I, O> {
		Flow {
			inner: Arc::new(FlowInner {
				name: self.name,
				deps: self.deps,
				tags: self.tags,
				body: self.body,
				parse_input: self.parse_input,
				parse_output: self.parse_output,
			}),
			_marker: PhantomData,
		}
	}
}

fn erase_parse<T: Send + Sync + 'static>(
	parse: impl Fn(&T) -> Result<(), String> + Send + Sync + 'static,
) -> ParseFn {
	Arc::new(move |any| match any.downcast_ref::<T>() {
		Some(value) => parse(value),
		None => Err("value has an unexpected type".to_string()),
	})
}

/// What a flow body sees while it runs: its execution context, resolved
/// dependencies, and the ability to execute nested flows.
#[derive(Clone)]
pub struct FlowCtx {
	scope: Scope,
	ctx: ExecContext,
	deps: DepMap,
}

impl FlowCtx {
	/// The child execution context this invocation runs in.
	pub fn context(&self) -> &ExecContext {
		&self.ctx
	}

	pub fn scope(&self) -> &Scope {
		&self.scope
	}

	/// A resolve-by-value dependency.
	pub fn dep<T: Send + Sync + 'static>(&self, name: &str) -> CoreResult<Arc<T>> {
		self.deps.value(name)
	}

	/// A controller dependency.
	pub fn controller<T: Send + Sync + 'static>(&self, name: &str) -> CoreResult<Controller<T>> {
		self.deps.controller(name)
	}

	/// A required/optional tag dependency.
	pub fn tag<T: Send + Sync + 'static>(&self, name: &str) -> CoreResult<Option<Arc<T>>> {
		self.deps.tag_one(name)
	}

	/// A collect-all tag dependency, nearest-first.
	pub fn tags<T: Send + Sync + 'static>(&self, name: &str) -> CoreResult<Vec<Arc<T>>> {
		self.deps.tag_many(name)
	}

	/// Local private-data read on this invocation's context.
	pub fn get<T: Send + Sync + 'static>(&self, tag: &Tag<T>) -> Option<Arc<T>> {
		self.ctx.get(tag)
	}

	/// Local private-data write on this invocation's context.
	pub fn set<T: Send + Sync + 'static>(&self, tag: &Tag<T>, value: T) {
		self.ctx.set(tag, value);
	}

	/// Hierarchical private-data read up the parent chain.
	pub fn seek<T: Send + Sync + 'static>(&self, tag: &Tag<T>) -> Option<Arc<T>> {
		self.ctx.seek(tag)
	}

	/// Register a cleanup on this invocation's context.
	pub fn defer<F, Fut>(&self, f: F)
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		self.ctx.defer(f);
	}

	/// Execute a nested flow in a child of this context.
	pub async fn exec<I, O>(&self, flow: &Flow<I, O>, input: I) -> CoreResult<Arc<O>>
	where
		I: Send + Sync + 'static,
		O: Send + Sync + 'static,
	{
		self.scope.exec_in(&self.ctx, flow, input, Vec::new()).await
	}

	/// Execute a nested flow with execution-time tags.
	pub async fn exec_tagged<I, O>(
		&self,
		flow: &Flow<I, O>,
		input: I,
		tags: Vec<Tagged>,
	) -> CoreResult<Arc<O>>
	where
		I: Send + Sync + 'static,
		O: Send + Sync + 'static,
	{
		self.scope.exec_in(&self.ctx, flow, input, tags).await
	}
}

impl Scope {
	/// Execute a flow as a top-level entry point.
	///
	/// A fresh root context is created for the call and closed when it
	/// returns; the flow itself runs in a child of that root, auto-closed on
	/// success and failure alike.
	pub async fn exec<I, O>(&self, flow: &Flow<I, O>, input: I) -> CoreResult<Arc<O>>
	where
		I: Send + Sync + 'static,
		O: Send + Sync + 'static,
	{
		self.exec_tagged(flow, input, Vec::new()).await
	}

	/// Execute a flow as a top-level entry point, with execution-time tags.
	pub async fn exec_tagged<I, O>(
		&self,
		flow: &Flow<I, O>,
		input: I,
		tags: Vec<Tagged>,
	) -> CoreResult<Arc<O>>
	where
		I: Send + Sync + 'static,
		O: Send + Sync + 'static,
	{
		self.ensure_ready().await?;
		let root = ExecContext::root("root");
		let result = self.exec_in(&root, flow, input, tags).await;
		root.close().await;
		result
	}

	/// Execute a flow as a child of `parent`.
	pub(crate) async fn exec_in<I, O>(
		&self,
		parent: &ExecContext,
		flow: &Flow<I, O>,
		input: I,
		tags: Vec<Tagged>,
	) -> CoreResult<Arc<O>>
	where
		I: Send + Sync + 'static,
		O: Send + Sync + 'static,
	{
		if self.is_disposed() {
			return Err(CoreError::ScopeDisposed);
		}
		if parent.is_closed() {
			return Err(CoreError::ClosedContext {
				context: parent.name().to_string(),
			});
		}
		if let Some(parse) = &flow.inner.parse_input {
			parse(&input)
				.map_err(|m| CoreError::parse(ParsePhase::Input, flow.name(), m))?;
		}

		let input = Arc::new(input);
		let child = parent.child(flow.name(), Some(input as ErasedValue), tags);
		tracing::debug!(flow = flow.name(), context = child.name(), "executing flow");
		let result = self.run_flow(&child, &flow.inner).await;
		// The child closes on every completion path, abnormal ones included.
		child.close().await;

		let value = result?;
		value.downcast::<O>().map_err(|_| CoreError::Factory {
			target: flow.name().to_string(),
			message: "flow output has an unexpected type".to_string(),
		})
	}

	async fn run_flow(
		&self,
		child: &ExecContext,
		flow: &Arc<FlowInner>,
	) -> CoreResult<ErasedValue> {
		let mut deps = std::collections::HashMap::new();
		for (name, spec) in &flow.deps {
			let value = match spec {
				DepSpec::Atom(dep) => DepValue::Value(
					cycle::with_resolution_scope(self.resolve_entry(dep, None)).await?,
				),
				DepSpec::Controller { atom, eager } => {
					if *eager {
						cycle::with_resolution_scope(self.resolve_entry(atom, None)).await?;
					}
					DepValue::Controller(ErasedController::new(self.clone(), atom.clone(), None))
				}
				DepSpec::Tag { tag, mode } => DepValue::Tag(self.lookup_tag_in_context(
					child,
					&flow.name,
					name,
					&flow.tags,
					tag,
					*mode,
				)?),
			};
			deps.insert(name.clone(), value);
		}

		let cx = FlowCtx {
			scope: self.clone(),
			ctx: child.clone(),
			deps: DepMap::new(deps, flow.name.clone()),
		};
		let body = Arc::clone(&flow.body);
		let target = flow.name.clone();
		let work = move || -> BoxFuture<'static, CoreResult<ErasedValue>> {
			let body = Arc::clone(&body);
			let cx = cx.clone();
			let target = target.clone();
			Box::pin(async move { body(cx).await.map_err(|e| CoreError::factory(&target, e)) })
		};
		let info = ExecInfo::new(flow.name.clone(), child.clone());
		let value = run_exec_chain(&self.inner.extensions, info, work).await?;

		if let Some(parse) = &flow.parse_output {
			parse(value.as_ref())
				.map_err(|m| CoreError::parse(ParsePhase::Output, &flow.name, m))?;
		}
		Ok(value)
	}

	/// Hierarchical tag lookup for flow dependencies: context private-data
	/// up the parent chain, then execution-time tags, then definition-time
	/// tags, then scope-level tags, then the tag's own default.
	fn lookup_tag_in_context(
		&self,
		ctx: &ExecContext,
		target: &str,
		dependency: &str,
		definition_tags: &[Tagged],
		tag: &ErasedTag,
		mode: TagMode,
	) -> CoreResult<TagValue> {
		let exec_tags = ctx.chain_tags();
		match mode {
			TagMode::CollectAll => {
				let mut values = ctx.seek_all(tag.key());
				values.extend(tag::collect(&exec_tags, tag.key()));
				values.extend(tag::collect(definition_tags, tag.key()));
				values.extend(tag::collect(self.tags(), tag.key()));
				Ok(TagValue::Many(values))
			}
			TagMode::Required | TagMode::Optional => {
				let found = ctx
					.seek_erased(tag.key())
					.or_else(|| tag::find_first(&exec_tags, tag.key()))
					.or_else(|| tag::find_first(definition_tags, tag.key()))
					.or_else(|| tag::find_first(self.tags(), tag.key()))
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
}
