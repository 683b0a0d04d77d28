use std::collections::VecDeque;

use qpuc_utils::{BitSet, Dag, NodeId};
use tracing::{debug, trace};

use super::{Instruction, Op, Program, RegFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
	Forward,
	Reverse,
}

/// Texture coordinates queued for one outstanding texture result.
#[derive(Debug, Default, Clone, Copy)]
struct TexFifoEntry {
	coords: usize,
	result: Option<NodeId>,
}

/// Most recent node touching each ordered resource, in the current walk
/// direction.
#[derive(Debug, Default)]
struct LastAccess {
	temp_write: Vec<Option<NodeId>>,
	sf: Option<NodeId>,
	vary_read: Option<NodeId>,
	vpm_read: Option<NodeId>,
	vpm_write: Option<NodeId>,
	tex_coord: Option<NodeId>,
	tex_result: Option<NodeId>,
	tlb: Option<NodeId>,
	uniforms_reset: Option<NodeId>,
}

struct DependencyBuilder<'a> {
	dag: &'a mut Dag<Instruction>,
	dir: Direction,
	last: LastAccess,
}

impl<'a> DependencyBuilder<'a> {
	fn new(dag: &'a mut Dag<Instruction>, dir: Direction, num_temps: usize) -> Self {
		Self {
			dag,
			dir,
			last: LastAccess {
				temp_write: vec![None; num_temps],
				..LastAccess::default()
			},
		}
	}

	/// Orders `after` behind `before` in program order. Edges point from the
	/// later instruction to the earlier one, since scheduling runs bottom-up.
	fn add_dep(&mut self, before: Option<NodeId>, after: NodeId) {
		let Some(before) = before else {
			return;
		};

		if before == after {
			return;
		}

		let (before, after) = match self.dir {
			Direction::Forward => (before, after),
			Direction::Reverse => (after, before),
		};

		self.dag.add_edge(after, before, false);
	}

	/// Orders `n` behind the last access in `slot` and makes it the new last
	/// access.
	fn add_write_dep(&mut self, slot: fn(&mut LastAccess) -> &mut Option<NodeId>, n: NodeId) {
		let before = *slot(&mut self.last);
		self.add_dep(before, n);
		*slot(&mut self.last) = Some(n);
	}

	fn temp_write_dep(&mut self, temp: usize, n: NodeId) {
		let before = self.last.temp_write[temp];
		self.add_dep(before, n);
		self.last.temp_write[temp] = Some(n);
	}

	fn calculate_deps(&mut self, n: NodeId) {
		let inst = self.dag[n].data;

		for src in inst.srcs() {
			match src.file {
				RegFile::Temp => {
					let before = self.last.temp_write[src.index as usize];
					self.add_dep(before, n);
				}
				RegFile::Vary => self.add_write_dep(|l| &mut l.vary_read, n),
				RegFile::Vpm => self.add_write_dep(|l| &mut l.vpm_read, n),
				_ => {}
			}
		}

		match inst.op {
			Op::VaryAddC => {
				let before = self.last.vary_read;
				self.add_dep(before, n);
			}
			Op::TexResult => self.add_write_dep(|l| &mut l.tex_result, n),
			Op::Thrsw => {
				self.add_write_dep(|l| &mut l.tex_coord, n);
				self.add_write_dep(|l| &mut l.tex_result, n);
				self.add_write_dep(|l| &mut l.sf, n);
				self.add_write_dep(|l| &mut l.vary_read, n);
				self.add_write_dep(|l| &mut l.tlb, n);
			}
			Op::TlbColorRead | Op::MsMask => self.add_write_dep(|l| &mut l.tlb, n),
			_ => {}
		}

		match inst.dst.file {
			RegFile::Vpm => self.add_write_dep(|l| &mut l.vpm_write, n),
			RegFile::Temp => self.temp_write_dep(inst.dst.index as usize, n),
			file if file.is_tlb_write() => self.add_write_dep(|l| &mut l.tlb, n),
			file if file.is_tex() => self.add_write_dep(|l| &mut l.tex_coord, n),
			_ => {}
		}

		if inst.depends_on_flags() {
			let before = self.last.sf;
			self.add_dep(before, n);
		}

		if inst.sf {
			self.add_write_dep(|l| &mut l.sf, n);
		}
	}
}

/// The hardware texture FIFOs as seen in program order.
struct TexFifo {
	entries: VecDeque<TexFifoEntry>,
	requests: usize,
	results: usize,
	max_requests: usize,
	max_results: usize,
}

impl TexFifo {
	fn new(threaded: bool) -> Self {
		let mut entries = VecDeque::new();
		entries.push_back(TexFifoEntry::default());

		Self {
			entries,
			requests: 0,
			results: 0,
			max_requests: if threaded { 4 } else { 8 },
			max_results: if threaded { 2 } else { 4 },
		}
	}

	/// Makes `n` wait on the oldest outstanding texture result.
	fn block_until_result(&mut self, deps: &mut DependencyBuilder<'_>, n: NodeId) {
		if self.entries.len() <= 1 {
			return;
		}

		if let Some(oldest) = self.entries.pop_front() {
			deps.add_dep(oldest.result, n);
			self.requests -= oldest.coords;
			self.results -= 1;
		}
	}
}

fn calculate_forward_deps(dag: &mut Dag<Instruction>, num_temps: usize, threaded: bool) {
	let mut deps = DependencyBuilder::new(dag, Direction::Forward, num_temps);
	let mut fifo = TexFifo::new(threaded);

	for i in 0..deps.dag.len() {
		let n = NodeId(i);
		let inst = deps.dag[n].data;

		deps.calculate_deps(n);

		if inst.has_uniform_read() {
			let before = deps.last.uniforms_reset;
			deps.add_dep(before, n);
		}

		if inst.is_tex() {
			if fifo.requests == fifo.max_requests {
				fifo.block_until_result(&mut deps, n);
			}

			if matches!(inst.dst.file, RegFile::TexS | RegFile::TexSDirect) {
				if fifo.results == fifo.max_results {
					fifo.block_until_result(&mut deps, n);
				}

				fifo.results += 1;
			}

			if let Some(current) = fifo.entries.back_mut() {
				current.coords += 1;
			}

			fifo.requests += 1;
		}

		match inst.op {
			Op::TexResult => {
				let before = deps.last.tex_coord;
				deps.add_dep(before, n);

				if let Some(current) = fifo.entries.back_mut() {
					current.result = Some(n);
				}

				fifo.entries.push_back(TexFifoEntry::default());
			}
			Op::UniformsReset => {
				deps.add_write_dep(|l| &mut l.uniforms_reset, n);
			}
			_ => {}
		}
	}
}

fn calculate_reverse_deps(dag: &mut Dag<Instruction>, num_temps: usize) {
	let mut deps = DependencyBuilder::new(dag, Direction::Reverse, num_temps);

	for i in (0..deps.dag.len()).rev() {
		deps.calculate_deps(NodeId(i));
	}
}

/// Cycles between `before` issuing and `after` being able to use its result.
fn latency_between(before: &Instruction, after: &Instruction) -> u32 {
	if matches!(before.dst.file, RegFile::TexS | RegFile::TexSDirect)
		&& matches!(after.op, Op::TexResult)
	{
		return 100;
	}

	// Two QPU delay slots can hold up to four packed QIR instructions.
	if before.op.is_sfu()
		&& after
			.srcs()
			.iter()
			.any(|src| src.file == before.dst.file && src.index == before.dst.index)
	{
		return 4;
	}

	1
}

fn compute_delays(dag: &mut Dag<Instruction>) {
	for n in dag.bottom_up_order() {
		// Color reads lock the scoreboard, so leaf reads are pushed late.
		let is_leaf_color_read =
			dag[n].children().is_empty() && matches!(dag[n].data.op, Op::TlbColorRead);
		let mut delay = if is_leaf_color_read {
			1000
		} else {
			1
		};

		for edge in dag[n].children() {
			let child = &dag[edge.child];
			delay = delay.max(child.delay + latency_between(&child.data, &dag[n].data));
		}

		dag[n].delay = delay;
	}
}

/// Instructions that take the tile buffer scoreboard lock.
const fn locks_scoreboard(inst: &Instruction) -> bool {
	matches!(inst.op, Op::TlbColorRead)
		|| matches!(
			inst.dst.file,
			RegFile::TlbZWrite | RegFile::TlbColorWrite | RegFile::TlbColorWriteMs
		)
}

/// Register pressure tracking shared across blocks, seen bottom-up.
struct Pressure {
	temp_writes: Vec<u32>,
	temp_live: BitSet,
}

impl Pressure {
	/// Change in live temps above the instruction if it is scheduled now.
	fn cost(&self, inst: &Instruction) -> i32 {
		let mut cost = 0;

		if let Some(temp) = inst.dst.as_temp() {
			if self.temp_writes[temp as usize] == 1 {
				cost -= 1;
			}
		}

		let srcs = inst.srcs();
		for (i, src) in srcs.iter().enumerate() {
			let Some(temp) = src.as_temp() else {
				continue;
			};

			if self.temp_live.contains(temp as usize) || srcs[..i].contains(src) {
				continue;
			}

			cost += 1;
		}

		cost
	}

	fn update(&mut self, inst: &Instruction) {
		for src in inst.srcs() {
			if let Some(temp) = src.as_temp() {
				self.temp_live.insert(temp as usize);
			}
		}

		if let Some(temp) = inst.dst.as_temp() {
			let writes = &mut self.temp_writes[temp as usize];
			*writes = writes.saturating_sub(1);
			if matches!(*writes, 0) {
				self.temp_live.remove(temp as usize);
			}
		}
	}
}

fn choose_instruction(dag: &Dag<Instruction>, pressure: &Pressure, time: u32) -> Option<NodeId> {
	let mut chosen: Option<NodeId> = None;

	for &n in dag.heads() {
		let node = &dag[n];

		if matches!(node.data.op, Op::Branch) {
			return Some(n);
		}

		let Some(current) = chosen else {
			chosen = Some(n);
			continue;
		};

		let best = &dag[current];

		match (locks_scoreboard(&node.data), locks_scoreboard(&best.data)) {
			(true, false) => {
				chosen = Some(n);
				continue;
			}
			(false, true) => continue,
			_ => {}
		}

		if best.unblocked_time > time && node.unblocked_time < best.unblocked_time {
			chosen = Some(n);
			continue;
		} else if node.unblocked_time > time && node.unblocked_time > best.unblocked_time {
			continue;
		}

		let cost = pressure.cost(&node.data);
		let best_cost = pressure.cost(&best.data);
		if cost < best_cost {
			chosen = Some(n);
			continue;
		} else if cost > best_cost {
			continue;
		}

		if node.delay > best.delay {
			chosen = Some(n);
		}
	}

	chosen
}

impl Program {
	/// Reorders each block's instructions with a bottom-up list scheduler
	/// that hides texture and SFU latency while keeping register pressure low.
	#[tracing::instrument("schedule qir", skip(self))]
	pub fn schedule_instructions(&mut self) {
		let num_temps = self.num_temps as usize;
		let mut pressure = Pressure {
			temp_writes: vec![0; num_temps],
			temp_live: BitSet::with_capacity(num_temps),
		};

		for (_, inst) in self.instructions() {
			if let Some(temp) = inst.dst.as_temp() {
				pressure.temp_writes[temp as usize] += 1;
			}
		}

		let threaded = self.threaded;
		for block in &mut self.blocks {
			let mut dag = Dag::new();
			for inst in std::mem::take(&mut block.instructions) {
				dag.add_node(inst);
			}

			calculate_forward_deps(&mut dag, num_temps, threaded);
			calculate_reverse_deps(&mut dag, num_temps);
			compute_delays(&mut dag);

			let mut scheduled = Vec::with_capacity(dag.len());
			let mut time = 0u32;

			while !dag.is_empty() {
				let Some(chosen) = choose_instruction(&dag, &pressure, time) else {
					unreachable!("no schedulable instruction in {}", block.id);
				};

				let inst = dag[chosen].data;
				time = time.max(dag[chosen].unblocked_time);

				trace!(%inst, time, delay = dag[chosen].delay, "scheduled");

				let children = dag[chosen].children().to_vec();
				for edge in children {
					let latency = latency_between(&dag[edge.child].data, &inst);
					let child = &mut dag[edge.child];
					child.unblocked_time = child.unblocked_time.max(time + latency);
				}

				dag.prune_head(chosen);
				pressure.update(&inst);
				scheduled.push(inst);
				time += 1;
			}

			debug_assert_eq!(scheduled.len(), dag.len(), "dependency cycle in {}", block.id);

			scheduled.reverse();

			debug!(block = %block.id, instructions = scheduled.len(), cycles = time, "scheduled block");

			block.instructions = scheduled;
		}
	}
}

#[cfg(test)]
mod tests {
	use qpuc_qpu::{BranchCond, Cond};
	use qpuc_utils::Dag;

	use super::{compute_delays, latency_between};
	use crate::{Instruction, Op, Program, Reg, RegFile, Stage};

	fn position(program: &Program, pred: impl Fn(&Instruction) -> bool) -> usize {
		program.blocks[0]
			.instructions
			.iter()
			.position(pred)
			.unwrap()
	}

	#[test]
	fn keeps_data_dependencies_and_ends_with_the_branch() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let exit = program.add_block();
		program.set_successors(entry, [Some(exit), Some(exit)]);

		let x = program.def(entry, Op::FragZ, &[]);
		let a = program.def(entry, Op::Fmul, &[x, x]);
		let b = program.def(entry, Op::Fadd, &[a, x]);
		program.def(entry, Op::Fmul, &[b, x]);
		program.push(entry, Instruction::mov(Reg::NULL, b).with_sf());
		program.push(entry, Instruction::branch(BranchCond::AnyZs));

		program.schedule_instructions();

		let insts = &program.blocks[0].instructions;
		assert_eq!(insts.len(), 6);
		assert_eq!(insts.last().map(|i| i.op), Some(Op::Branch));
		let def_a = position(&program, |i| i.dst == a);
		let def_b = position(&program, |i| i.dst == b);
		let sf = position(&program, |i| i.sf);
		assert!(def_a < def_b);
		assert!(def_b < sf);
	}

	#[test]
	fn conditional_writes_stay_behind_their_flags() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let x = program.def(entry, Op::FragZ, &[]);
		let y = program.def(entry, Op::FragW, &[]);
		let t = program.new_temp();
		program.push(entry, Instruction::mov(Reg::NULL, x).with_sf());
		program.push(entry, Instruction::mov(t, x).with_cond(Cond::Zs));
		program.push(entry, Instruction::mov(Reg::NULL, y).with_sf());
		program.push(entry, Instruction::mov(t, y).with_cond(Cond::Zs));
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbZWrite, 0), t));

		program.schedule_instructions();

		let insts = &program.blocks[0].instructions;
		let order = insts
			.iter()
			.filter(|i| i.sf || i.cond == Cond::Zs)
			.map(|i| (i.sf, i.src[0]))
			.collect::<Vec<_>>();
		assert_eq!(order, [(true, x), (false, x), (true, y), (false, y)]);
		assert_eq!(insts.last().map(|i| i.dst.file), Some(RegFile::TlbZWrite));
	}

	#[test]
	fn texture_fifo_blocks_on_the_oldest_result() {
		let mut program = Program::new(Stage::Fragment);
		program.threaded = true;
		let entry = program.entry_block();
		let coord = program.def(entry, Op::FragZ, &[]);

		let mut results = Vec::new();
		for _ in 0..3 {
			program.push(
				entry,
				Instruction::mov(Reg::new(RegFile::TexSDirect, 0), coord),
			);
			results.push(program.def(entry, Op::TexResult, &[]));
		}

		let mut sum = results[0];
		for &r in &results[1..] {
			sum = program.def(entry, Op::Fadd, &[sum, r]);
		}
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbColorWrite, 0), sum));

		program.schedule_instructions();

		let insts = &program.blocks[0].instructions;
		let coords = insts
			.iter()
			.enumerate()
			.filter(|(_, i)| i.dst.file == RegFile::TexSDirect)
			.map(|(ip, _)| ip)
			.collect::<Vec<_>>();
		let result_positions = results
			.iter()
			.map(|r| position(&program, |i| i.dst == *r))
			.collect::<Vec<_>>();

		assert!(coords.windows(2).all(|w| w[0] < w[1]));
		assert!(result_positions.windows(2).all(|w| w[0] < w[1]));
		assert!(result_positions[0] < coords[2]);
		assert!(coords[2] < result_positions[2]);
	}

	#[test]
	fn uniforms_stay_behind_stream_resets() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let u = program.uniform_ui(5);
		let address = program.uniform(crate::UniformContents::UniformsAddress, 0);
		let offset = program.def(entry, Op::LoadImm, &[Reg::load_imm(4)]);
		program.push(
			entry,
			Instruction::alu2(Op::UniformsReset, Reg::NULL, offset, address),
		);
		let a = program.def(entry, Op::Mov, &[u]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbColorWrite, 0), a));

		program.schedule_instructions();

		let reset = position(&program, |i| i.op == Op::UniformsReset);
		let read = position(&program, |i| i.dst == a);
		assert!(reset < read);
	}

	#[test]
	fn sfu_results_are_late_for_any_unpack_of_the_temp() {
		let rcp = Instruction::alu1(Op::Rcp, Reg::temp(0), Reg::temp(1));
		let unpacked =
			Instruction::alu2(Op::Fadd, Reg::temp(2), Reg::temp(0).with_pack(1), Reg::temp(3));
		let unrelated = Instruction::alu2(Op::Fadd, Reg::temp(2), Reg::temp(3), Reg::temp(3));

		assert_eq!(latency_between(&rcp, &unpacked), 4);
		assert_eq!(latency_between(&rcp, &unrelated), 1);
	}

	#[test]
	fn only_leaf_color_reads_get_the_large_delay() {
		let mut dag = Dag::new();
		let earlier = dag.add_node(Instruction::mov(Reg::temp(0), Reg::temp(1)));
		let dependent = dag.add_node(Instruction::alu0(Op::TlbColorRead, Reg::temp(2)));
		let leaf = dag.add_node(Instruction::alu0(Op::TlbColorRead, Reg::temp(3)));
		dag.add_edge(dependent, earlier, false);

		compute_delays(&mut dag);

		assert_eq!(dag[earlier].delay, 1);
		assert_eq!(dag[dependent].delay, 2);
		assert_eq!(dag[leaf].delay, 1000);
	}
}
