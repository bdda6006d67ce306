//! Error types for the resolution and execution engine.

use std::fmt;

/// Result alias used across the engine.
pub type CoreResult<T> = Result<T, CoreError>;

/// Boxed error type accepted from user factories, flow bodies and parsers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Phase in which a parse/validation failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePhase {
	/// Flow input validation, before the body runs.
	Input,
	/// Flow output validation, after the body returned.
	Output,
	/// Tag value validation, when a tagged value is constructed.
	Tag,
}

impl fmt::Display for ParsePhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ParsePhase::Input => write!(f, "input"),
			ParsePhase::Output => write!(f, "output"),
			ParsePhase::Tag => write!(f, "tag"),
		}
	}
}

/// Engine error taxonomy.
///
/// Every variant carries enough context (target name, dependency chain or
/// phase) to diagnose without reproduction. The type is `Clone` because a
/// single failure is re-thrown to every pending resolver of the same atom.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
	/// A factory or flow body returned an error.
	#[error("factory for `{target}` failed: {message}")]
	Factory {
		/// Name of the atom or flow whose factory failed.
		target: String,
		/// Display of the underlying failure.
		message: String,
	},

	/// A declared dependency could not be satisfied.
	#[error("missing dependency `{dependency}` of `{target}`")]
	MissingDependency {
		/// Name of the atom or flow that declared the dependency.
		target: String,
		/// The dependency slot that could not be satisfied.
		dependency: String,
	},

	/// A dependency cycle was detected during resolution.
	#[error("dependency cycle detected while resolving `{atom}`\n  path: {chain}")]
	DependencyCycle {
		/// Atom whose re-entry closed the cycle.
		atom: String,
		/// The full chain, `a -> b -> c -> a`.
		chain: String,
	},

	/// The resolution chain exceeded the configured depth bound.
	#[error("maximum resolution depth exceeded: {0}")]
	MaxDepthExceeded(usize),

	/// Resolution bookkeeping was used outside of a resolution scope.
	#[error("resolution attempted outside of an active resolution scope")]
	NoResolutionScope,

	/// An input/output/tag parse slot rejected a value.
	#[error("{phase} validation for `{target}` failed: {message}")]
	Parse {
		/// Which parse slot rejected the value.
		phase: ParsePhase,
		/// The flow or tag that owns the slot.
		target: String,
		/// Display of the underlying failure.
		message: String,
	},

	/// `exec` was called on a context that has already been closed.
	#[error("execution context `{context}` is closed")]
	ClosedContext {
		/// Name of the closed context.
		context: String,
	},

	/// `get` was called on an atom with no resolved value.
	#[error("atom `{atom}` is not resolved")]
	NotResolved {
		/// The atom that has no value.
		atom: String,
	},

	/// Invalidation processing re-triggered itself beyond the configured bound.
	#[error("invalidation loop detected for `{atom}` after {iterations} passes in one frame")]
	LoopDetected {
		/// The atom whose invalidation kept re-triggering.
		atom: String,
		/// Number of passes processed before giving up.
		iterations: usize,
	},

	/// Explicit release was refused because dependents are still alive.
	#[error("cannot release `{atom}`: dependents are still alive ({})", dependents.join(", "))]
	DependentsAlive {
		/// The atom that was asked to release.
		atom: String,
		/// Names of the atoms still depending on it.
		dependents: Vec<String>,
	},

	/// The scope has been disposed; no further operations are accepted.
	#[error("scope has been disposed")]
	ScopeDisposed,

	/// One or more extension `dispose` hooks failed during scope teardown.
	#[error("scope teardown reported {} extension failure(s): {}", failures.len(), display_failures(failures))]
	Dispose {
		/// The collected failures, in the order the hooks ran.
		failures: Vec<CoreError>,
	},
}

fn display_failures(failures: &[CoreError]) -> String {
	failures
		.iter()
		.map(|e| e.to_string())
		.collect::<Vec<_>>()
		.join("; ")
}

impl CoreError {
	/// Wrap an arbitrary factory/body failure for the given target.
	pub(crate) fn factory(target: &str, source: BoxError) -> Self {
		// A factory that fails with an engine error keeps its variant so the
		// original context (cycle chains, missing deps) is not flattened.
		match source.downcast::<CoreError>() {
			Ok(core) => *core,
			Err(other) => CoreError::Factory {
				target: target.to_string(),
				message: other.to_string(),
			},
		}
	}

	/// Wrap a parse-slot failure.
	pub(crate) fn parse(phase: ParsePhase, target: &str, message: impl Into<String>) -> Self {
		CoreError::Parse {
			phase,
			target: target.to_string(),
			message: message.into(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn factory_wrap_preserves_engine_errors() {
		let inner = CoreError::NotResolved {
			atom: "config".into(),
		};
		let wrapped = CoreError::factory("service", Box::new(inner));
		assert!(matches!(wrapped, CoreError::NotResolved { .. }));
	}

	#[test]
	fn factory_wrap_flattens_foreign_errors() {
		let io = std::io::Error::other("boom");
		let wrapped = CoreError::factory("service", Box::new(io));
		match wrapped {
			CoreError::Factory { target, message } => {
				assert_eq!(target, "service");
				assert!(message.contains("boom"));
			}
			other => panic!("unexpected: {other:?}"),
		}
	}

	#[test]
	fn dispose_display_joins_failures() {
		let err = CoreError::Dispose {
			failures: vec![
				CoreError::ScopeDisposed,
				CoreError::NotResolved { atom: "a".into() },
			],
		};
		let text = err.to_string();
		assert!(text.contains("2 extension failure(s)"));
		assert!(text.contains("scope has been disposed"));
	}
}
