use alloc::vec::Vec;
use core::{
	fmt::{Display, Formatter, Result as FmtResult},
	ops::{Index, IndexMut},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct NodeId(pub usize);

impl Display for NodeId {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str("n")?;
		Display::fmt(&self.0, f)
	}
}

/// A dependency edge to a node that may only run after its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
	pub child: NodeId,
	/// Write-after-read edges are released as soon as the parent is chosen,
	/// so the child may be paired with the parent in the same cycle.
	pub war: bool,
}

#[derive(Debug, Clone)]
pub struct DagNode<T> {
	pub data: T,
	pub delay: u32,
	pub unblocked_time: u32,
	children: Vec<Edge>,
	parent_count: u32,
}

impl<T> DagNode<T> {
	#[must_use]
	pub fn children(&self) -> &[Edge] {
		&self.children
	}

	#[must_use]
	pub const fn parent_count(&self) -> u32 {
		self.parent_count
	}
}

/// A directed acyclic graph peeled from its heads (nodes with no parents).
#[derive(Debug, Clone)]
pub struct Dag<T> {
	nodes: Vec<DagNode<T>>,
	heads: Vec<NodeId>,
}

impl<T> Dag<T> {
	#[must_use]
	pub const fn new() -> Self {
		Self {
			nodes: Vec::new(),
			heads: Vec::new(),
		}
	}

	pub fn add_node(&mut self, data: T) -> NodeId {
		let id = NodeId(self.nodes.len());

		self.nodes.push(DagNode {
			data,
			delay: 0,
			unblocked_time: 0,
			children: Vec::new(),
			parent_count: 0,
		});
		self.heads.push(id);

		id
	}

	/// Makes `child` wait on `parent`. Duplicate edges collapse, and a
	/// true dependency overrides an existing write-after-read one.
	pub fn add_edge(&mut self, parent: NodeId, child: NodeId, war: bool) {
		debug_assert_ne!(parent, child, "self edge on {parent}");

		if let Some(existing) = self[parent]
			.children
			.iter_mut()
			.find(|e| e.child == child)
		{
			existing.war &= war;
			return;
		}

		self[parent].children.push(Edge { child, war });

		let node = &mut self[child];
		node.parent_count += 1;
		if node.parent_count == 1 {
			self.heads.retain(|&h| h != child);
		}
	}

	#[must_use]
	pub fn heads(&self) -> &[NodeId] {
		&self.heads
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.heads.is_empty()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn iter(&self) -> impl Iterator<Item = (NodeId, &DagNode<T>)> {
		self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
	}

	/// Drops the write-after-read edges out of `id`, turning children that
	/// were only waiting on those into heads.
	pub fn remove_war_edges(&mut self, id: NodeId) {
		let (war, kept) = self[id]
			.children
			.iter()
			.copied()
			.partition::<Vec<_>, _>(|e| e.war);

		self[id].children = kept;
		for edge in war {
			self.release(edge.child);
		}
	}

	/// Removes a head from the graph, releasing its children.
	pub fn prune_head(&mut self, id: NodeId) {
		debug_assert_eq!(self[id].parent_count, 0, "{id} is not a head");

		self.heads.retain(|&h| h != id);

		let children = core::mem::take(&mut self[id].children);
		for edge in children {
			self.release(edge.child);
		}
	}

	/// Every node ordered so that children come before their parents.
	#[must_use]
	pub fn bottom_up_order(&self) -> Vec<NodeId> {
		let mut remaining = self.nodes.iter().map(|n| n.parent_count).collect::<Vec<_>>();
		let mut order = self.heads.clone();

		let mut i = 0;
		while let Some(&id) = order.get(i) {
			for edge in &self[id].children {
				let count = &mut remaining[edge.child.0];
				*count -= 1;
				if matches!(*count, 0) {
					order.push(edge.child);
				}
			}

			i += 1;
		}

		debug_assert_eq!(order.len(), self.nodes.len(), "dependency cycle");

		order.reverse();
		order
	}

	fn release(&mut self, child: NodeId) {
		let node = &mut self[child];
		node.parent_count -= 1;
		if matches!(node.parent_count, 0) {
			self.heads.push(child);
		}
	}
}

impl<T> Default for Dag<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> Index<NodeId> for Dag<T> {
	type Output = DagNode<T>;

	fn index(&self, index: NodeId) -> &Self::Output {
		&self.nodes[index.0]
	}
}

impl<T> IndexMut<NodeId> for Dag<T> {
	fn index_mut(&mut self, index: NodeId) -> &mut Self::Output {
		&mut self.nodes[index.0]
	}
}

#[cfg(test)]
mod tests {
	use alloc::vec::Vec;

	use super::{Dag, NodeId};

	#[test]
	fn heads_track_parent_counts() {
		let mut dag = Dag::new();
		let a = dag.add_node('a');
		let b = dag.add_node('b');
		let c = dag.add_node('c');

		dag.add_edge(a, c, false);
		dag.add_edge(b, c, false);
		dag.add_edge(b, c, true);

		assert_eq!(dag.heads(), [a, b]);
		assert_eq!(dag[c].parent_count(), 2);
		assert!(!dag[b].children()[0].war);

		dag.prune_head(a);
		assert_eq!(dag.heads(), [b]);

		dag.prune_head(b);
		assert_eq!(dag.heads(), [c]);
	}

	#[test]
	fn war_edges_release_early() {
		let mut dag = Dag::new();
		let reader = dag.add_node(0);
		let writer = dag.add_node(1);
		dag.add_edge(reader, writer, true);

		assert_eq!(dag.heads(), [reader]);

		dag.remove_war_edges(reader);
		assert_eq!(dag.heads(), [reader, writer]);
		assert!(dag[reader].children().is_empty());
	}

	#[test]
	fn bottom_up_visits_children_first() {
		let mut dag = Dag::new();
		let ids = (0..4).map(|i| dag.add_node(i)).collect::<Vec<_>>();
		dag.add_edge(ids[0], ids[1], false);
		dag.add_edge(ids[1], ids[3], false);
		dag.add_edge(ids[2], ids[3], false);

		let order = dag.bottom_up_order();
		let pos = |id: NodeId| order.iter().position(|&o| o == id).unwrap();

		assert_eq!(order.len(), 4);
		assert!(pos(ids[3]) < pos(ids[1]));
		assert!(pos(ids[1]) < pos(ids[0]));
		assert!(pos(ids[3]) < pos(ids[2]));
	}
}
