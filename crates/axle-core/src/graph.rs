//! Dependency graph snapshots for debugging.
//!
//! Renders the scope's current atom nodes and dependency edges in DOT
//! format, suitable for Graphviz.

use crate::scope::{AtomState, Scope};
use std::collections::HashMap;

/// One atom node in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
	pub name: String,
	pub state: AtomState,
	pub keep_alive: bool,
}

/// A point-in-time view of the scope's dependency graph.
///
/// # Examples
///
/// ```
/// use axle_core::{DependencyGraph, Scope};
///
/// let scope = Scope::new();
/// let graph = DependencyGraph::snapshot(&scope);
/// assert!(graph.to_dot().starts_with("digraph"));
/// ```
#[derive(Debug, Default)]
pub struct DependencyGraph {
	nodes: Vec<GraphNode>,
	/// Edges point from dependent to dependency.
	edges: Vec<(String, String)>,
}

impl DependencyGraph {
	/// Capture the current nodes and edges of a scope.
	pub fn snapshot(scope: &Scope) -> Self {
		let entries = scope.inner.entries.read();
		let names: HashMap<_, _> = entries
			.iter()
			.map(|(id, entry)| (*id, entry.atom.name().to_string()))
			.collect();

		let mut nodes = Vec::new();
		let mut edges = Vec::new();
		for entry in entries.values() {
			let st = entry.state.lock();
			nodes.push(GraphNode {
				name: entry.atom.name().to_string(),
				state: st.state,
				keep_alive: entry.atom.keep_alive(),
			});
			for dep in &st.depends_on {
				if let Some(dep_name) = names.get(dep) {
					edges.push((entry.atom.name().to_string(), dep_name.clone()));
				}
			}
		}
		nodes.sort_by(|a, b| a.name.cmp(&b.name));
		edges.sort();
		Self { nodes, edges }
	}

	pub fn nodes(&self) -> &[GraphNode] {
		&self.nodes
	}

	pub fn edges(&self) -> &[(String, String)] {
		&self.edges
	}

	/// Render in DOT format.
	pub fn to_dot(&self) -> String {
		let mut dot = String::from("digraph dependencies {\n");
		dot.push_str("    rankdir=LR;\n");
		dot.push_str("    node [shape=box, style=rounded];\n\n");

		for node in &self.nodes {
			let color = match node.state {
				AtomState::Resolved => "darkgreen",
				AtomState::Resolving => "goldenrod",
				AtomState::Failed => "firebrick",
				AtomState::Idle => "gray",
			};
			let suffix = if node.keep_alive { ", peripheries=2" } else { "" };
			dot.push_str(&format!(
				"    \"{}\" [color={}{}];\n",
				node.name, color, suffix
			));
		}
		dot.push('\n');
		for (from, to) in &self.edges {
			dot.push_str(&format!("    \"{from}\" -> \"{to}\";\n"));
		}
		dot.push_str("}\n");
		dot
	}
}
