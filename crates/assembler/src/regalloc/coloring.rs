use qpuc_qir::LiveInterval;

use super::{PhysReg, RegSet};
use crate::AllocationError;

/// Picks registers so that results land in r4 when possible, then spread over
/// the accumulators and the regfiles, leaving the merger more freedom.
#[derive(Debug, Default)]
pub struct ColorPicker {
	next_acc: u8,
	next_ab: u8,
}

impl ColorPicker {
	const ACC_COUNT: u8 = 5;
	const AB_COUNT: u8 = 64;

	pub fn pick(&mut self, available: RegSet) -> Option<PhysReg> {
		if available.contains(PhysReg::R4) {
			return Some(PhysReg::R4);
		}

		for i in 0..Self::ACC_COUNT {
			let acc = (self.next_acc + i) % Self::ACC_COUNT;
			if available.contains(PhysReg::r(acc)) {
				self.next_acc = acc + 1;
				return Some(PhysReg::r(acc));
			}
		}

		for i in 0..Self::AB_COUNT {
			let ab = (self.next_ab + i) % Self::AB_COUNT;
			let reg = PhysReg(super::AB_INDEX + ab);
			if available.contains(reg) {
				self.next_ab = ab + 1;
				return Some(reg);
			}
		}

		None
	}
}

#[derive(Debug, Clone)]
struct Node {
	temp: u32,
	interval: LiveInterval,
	allowed: RegSet,
	precolored: Option<PhysReg>,
	neighbors: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct InterferenceGraph {
	nodes: Vec<Node>,
}

impl InterferenceGraph {
	pub const fn new() -> Self {
		Self { nodes: Vec::new() }
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn add_node(&mut self, temp: u32, interval: LiveInterval, allowed: RegSet) {
		self.nodes.push(Node {
			temp,
			interval,
			allowed,
			precolored: None,
			neighbors: Vec::new(),
		});
	}

	pub fn add_precolored(&mut self, temp: u32, interval: LiveInterval, reg: PhysReg) {
		self.nodes.push(Node {
			temp,
			interval,
			allowed: RegSet::single(reg),
			precolored: Some(reg),
			neighbors: Vec::new(),
		});
	}

	/// Connects overlapping nodes that compete for at least one register.
	pub fn build_edges(&mut self) {
		for i in 0..self.nodes.len() {
			for j in i + 1..self.nodes.len() {
				let (a, b) = (&self.nodes[i], &self.nodes[j]);
				if a.interval.overlaps(b.interval) && a.allowed.intersects(b.allowed) {
					self.nodes[i].neighbors.push(j);
					self.nodes[j].neighbors.push(i);
				}
			}
		}
	}

	/// Simplifies the graph from the longest interval down, pushing nodes
	/// optimistically when none is trivially colorable, then assigns colors
	/// in reverse.
	pub fn color(
		&self,
		picker: &mut ColorPicker,
	) -> Result<Vec<(u32, PhysReg)>, AllocationError> {
		let mut order = (0..self.nodes.len())
			.filter(|&n| self.nodes[n].precolored.is_none())
			.collect::<Vec<_>>();
		order.sort_by_key(|&n| std::cmp::Reverse(self.nodes[n].interval.len()));

		let mut in_graph = self
			.nodes
			.iter()
			.map(|node| node.precolored.is_none())
			.collect::<Vec<_>>();

		let mut degree = self
			.nodes
			.iter()
			.map(|node| node.neighbors.iter().filter(|&&n| in_graph[n]).count())
			.collect::<Vec<_>>();

		// Registers taken by precolored neighbors are never available.
		let reserved = self
			.nodes
			.iter()
			.map(|node| {
				node.neighbors
					.iter()
					.filter_map(|&n| self.nodes[n].precolored)
					.fold(RegSet::EMPTY, |set, reg| set | RegSet::single(reg))
			})
			.collect::<Vec<_>>();

		let mut stack = Vec::with_capacity(order.len());

		while stack.len() < order.len() {
			let remaining = order.iter().copied().filter(|&n| in_graph[n]);

			let trivial = remaining.clone().find(|&n| {
				degree[n] < self.nodes[n].allowed.without(reserved[n]).len() as usize
			});

			let Some(chosen) = trivial.or_else(|| remaining.min_by_key(|&n| degree[n])) else {
				break;
			};

			in_graph[chosen] = false;
			for &neighbor in &self.nodes[chosen].neighbors {
				degree[neighbor] = degree[neighbor].saturating_sub(1);
			}

			stack.push(chosen);
		}

		let mut colors = self
			.nodes
			.iter()
			.map(|node| node.precolored)
			.collect::<Vec<_>>();

		while let Some(n) = stack.pop() {
			let node = &self.nodes[n];
			let taken = node
				.neighbors
				.iter()
				.filter_map(|&neighbor| colors[neighbor])
				.fold(RegSet::EMPTY, |set, reg| set | RegSet::single(reg));

			let Some(reg) = picker.pick(node.allowed.without(taken)) else {
				return Err(AllocationError::OutOfRegisters {
					temp: node.temp,
					live: node.neighbors.len(),
				});
			};

			colors[n] = Some(reg);
		}

		Ok(self
			.nodes
			.iter()
			.zip(colors)
			.filter_map(|(node, color)| Some((node.temp, color?)))
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use qpuc_qir::LiveInterval;

	use super::{ColorPicker, InterferenceGraph};
	use crate::{
		AllocationError,
		regalloc::{PhysReg, RegSet},
	};

	#[test]
	fn picker_round_robins_accumulators() {
		let mut picker = ColorPicker::default();
		let set = RegSet::accumulators() | RegSet::file_a(false);

		assert_eq!(picker.pick(set), Some(PhysReg::r(0)));
		assert_eq!(picker.pick(set), Some(PhysReg::r(1)));
		assert_eq!(picker.pick(RegSet::file_a(false)), Some(PhysReg::ra(0)));
		assert_eq!(picker.pick(RegSet::file_a(false)), Some(PhysReg::ra(1)));
		assert_eq!(picker.pick(set | RegSet::r4()), Some(PhysReg::R4));
	}

	#[test]
	fn precolored_registers_are_avoided() -> Result<(), AllocationError> {
		let mut graph = InterferenceGraph::new();
		graph.add_precolored(0, LiveInterval::new(0, 4), PhysReg::ra(15));
		graph.add_node(1, LiveInterval::new(1, 3), RegSet::single(PhysReg::ra(15)) | RegSet::single(PhysReg::ra(3)));
		graph.build_edges();

		let colors = graph.color(&mut ColorPicker::default())?;

		assert!(colors.contains(&(0, PhysReg::ra(15))));
		assert!(colors.contains(&(1, PhysReg::ra(3))));

		Ok(())
	}

	#[test]
	fn clique_larger_than_class_fails() {
		let mut graph = InterferenceGraph::new();
		for temp in 0..5 {
			graph.add_node(temp, LiveInterval::new(0, 10), RegSet::accumulators());
		}
		graph.build_edges();

		assert!(matches!(
			graph.color(&mut ColorPicker::default()),
			Err(AllocationError::OutOfRegisters { .. })
		));
	}
}
