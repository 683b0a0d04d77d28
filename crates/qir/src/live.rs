use qpuc_qpu::Cond;
use qpuc_utils::BitSet;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Block, Instruction, Op, Program, Reg};

/// The instruction pointers a temp is live across, `start..=end` in program
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LiveInterval {
	pub start: u32,
	pub end: u32,
}

impl LiveInterval {
	pub const EMPTY: Self = Self {
		start: u32::MAX,
		end: 0,
	};

	#[must_use]
	pub const fn new(start: u32, end: u32) -> Self {
		Self { start, end }
	}

	/// Temps whose interval is empty are never read after being written.
	#[must_use]
	pub const fn is_empty(self) -> bool {
		self.start >= self.end
	}

	#[must_use]
	pub const fn overlaps(self, other: Self) -> bool {
		!(self.start >= other.end || other.start >= self.end)
	}

	/// Whether the temp is live across `ip`, excluding its first and last
	/// instruction.
	#[must_use]
	pub const fn spans(self, ip: u32) -> bool {
		self.start < ip && self.end > ip
	}

	#[must_use]
	pub const fn len(self) -> u32 {
		self.end.saturating_sub(self.start)
	}

	const fn cover(&mut self, ip: u32) {
		if ip < self.start {
			self.start = ip;
		}

		if ip > self.end {
			self.end = ip;
		}
	}
}

impl Default for LiveInterval {
	fn default() -> Self {
		Self::EMPTY
	}
}

/// Conditional or packed writes seen so far for one temp in one block.
#[derive(Debug, Default, Clone, Copy)]
struct PartialWrites {
	conds: [Option<Cond>; 4],
	channels: u8,
}

pub struct Liveness;

impl Liveness {
	/// Computes per-block dataflow sets and the live interval of every temp.
	#[tracing::instrument("compute liveness", skip(program))]
	pub fn compute(program: &mut Program) {
		let num_temps = program.num_temps as usize;
		let mut intervals = vec![LiveInterval::EMPTY; num_temps];

		Self::setup_def_use(program, &mut intervals);

		let mut iterations = 0usize;
		while Self::dataflow(program) {
			iterations += 1;
		}

		debug!(iterations, "liveness dataflow converged");

		for block in &program.blocks {
			for temp in &block.liveness.live_in {
				intervals[temp].cover(block.start_ip);
			}

			for temp in &block.liveness.live_out {
				intervals[temp].cover(block.end_ip);
			}
		}

		if let Some(entry) = program.blocks.first() {
			for temp in &entry.liveness.live_in {
				warn!(temp, "temp is read before it is written");
			}
		}

		program.intervals = intervals;
	}

	fn setup_def_use(program: &mut Program, intervals: &mut [LiveInterval]) {
		let mut partial = FxHashMap::<usize, PartialWrites>::default();
		let mut ip = 0;

		for block in &mut program.blocks {
			block.liveness = Default::default();
			block.start_ip = ip;
			partial.clear();

			for i in 0..block.instructions.len() {
				let inst = block.instructions[i];

				for src in inst.srcs() {
					Self::setup_use(block, intervals, ip, *src);
				}

				Self::setup_def(block, intervals, &mut partial, ip, &inst);

				if inst.sf {
					for state in partial.values_mut() {
						for cond in &mut state.conds {
							if cond.is_some_and(|c| !matches!(c, Cond::Never)) {
								*cond = None;
							}
						}
					}
				}

				if matches!(inst.op, Op::FragZ | Op::FragW) {
					if let Some(temp) = inst.dst.as_temp() {
						intervals[temp as usize].start = 0;
					}
				}

				ip += 1;
			}

			block.end_ip = ip;
		}
	}

	fn setup_use(block: &mut Block, intervals: &mut [LiveInterval], ip: u32, src: Reg) {
		let Some(temp) = src.as_temp() else {
			return;
		};

		let temp = temp as usize;
		intervals[temp].cover(ip);

		if !block.liveness.defined.contains(temp) {
			block.liveness.used.insert(temp);
		}
	}

	fn setup_def(
		block: &mut Block,
		intervals: &mut [LiveInterval],
		partial: &mut FxHashMap<usize, PartialWrites>,
		ip: u32,
		inst: &Instruction,
	) {
		let Some(temp) = inst.dst.as_temp() else {
			return;
		};

		let temp = temp as usize;
		intervals[temp].cover(ip);

		let liveness = &mut block.liveness;
		if liveness.used.contains(temp) || liveness.defined.contains(temp) {
			return;
		}

		if matches!(inst.cond, Cond::Always) && inst.dst.pack == 0 {
			liveness.defined.insert(temp);
			return;
		}

		let state = partial.entry(temp).or_default();
		let mask = inst.channels_written();

		if matches!(inst.cond, Cond::Always) {
			state.channels |= mask;
		} else {
			for (i, cond) in state.conds.iter_mut().enumerate() {
				if mask & (1 << i) == 0 {
					continue;
				}

				if *cond == Some(inst.cond.complement()) {
					state.channels |= 1 << i;
				} else {
					*cond = Some(inst.cond);
				}
			}
		}

		if state.channels == 0xf {
			liveness.defined.insert(temp);
		}
	}

	fn dataflow(program: &mut Program) -> bool {
		let mut progress = false;

		for index in (0..program.blocks.len()).rev() {
			let mut live_out = std::mem::take(&mut program.blocks[index].liveness.live_out);

			for succ in program.blocks[index].successors() {
				progress |= live_out.union_with(&program.blocks[succ.0].liveness.live_in);
			}

			let liveness = &mut program.blocks[index].liveness;
			let live_in = liveness.used.union(&live_out.difference(&liveness.defined));
			progress |= liveness.live_in.union_with(&live_in);
			liveness.live_out = live_out;
		}

		progress
	}
}

impl Program {
	/// Temps live on entry to `block` or read in it before being written.
	#[must_use]
	pub fn live_in(&self, block: super::BlockId) -> &BitSet {
		&self.block(block).liveness.live_in
	}
}

#[cfg(test)]
mod tests {
	use qpuc_qpu::{BranchCond, Cond};

	use super::{LiveInterval, Liveness};
	use crate::{Instruction, Op, Program, Reg, RegFile, Stage};

	#[test]
	fn straight_line_intervals() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let one = program.uniform_f(1.0);
		let a = program.def(entry, Op::Fmov, &[one]);
		let b = program.def(entry, Op::Fadd, &[a, a]);
		let unused = program.def(entry, Op::Fmul, &[b, a]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbColorWrite, 0), b));

		Liveness::compute(&mut program);

		assert_eq!(program.intervals[0], LiveInterval::new(0, 2));
		assert_eq!(program.intervals[1], LiveInterval::new(1, 3));
		assert!(program.intervals[unused.index as usize].is_empty());
		assert!(program.blocks[0].liveness.live_in.is_empty());
	}

	#[test]
	fn complementary_conditions_define_the_temp() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let next = program.add_block();
		program.set_successors(entry, [Some(next), None]);

		let x = program.def(next, Op::FragZ, &[]);
		let t = program.new_temp();
		program.push(next, Instruction::mov(t, x).with_cond(Cond::Zs));
		program.push(next, Instruction::mov(t, x).with_cond(Cond::Zc));
		program.push(next, Instruction::mov(Reg::new(RegFile::TlbZWrite, 0), t));

		Liveness::compute(&mut program);

		assert!(program.blocks[1].liveness.defined.contains(t.index as usize));
		assert!(!program.blocks[1].liveness.live_in.contains(t.index as usize));
		assert_eq!(program.intervals[t.index as usize], LiveInterval::new(1, 3));
		assert_eq!(program.intervals[x.index as usize].start, 0);
	}

	#[test]
	fn flag_updates_break_complementary_pairs() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let x = program.def(entry, Op::FragZ, &[]);
		let t = program.new_temp();
		program.push(entry, Instruction::mov(t, x).with_cond(Cond::Zs));
		program.push(entry, Instruction::mov(Reg::NULL, x).with_sf());
		program.push(entry, Instruction::mov(t, x).with_cond(Cond::Zc));

		Liveness::compute(&mut program);

		assert!(!program.blocks[0].liveness.defined.contains(t.index as usize));
	}

	#[test]
	fn loops_extend_intervals() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let body = program.add_block();
		let exit = program.add_block();

		let one = program.uniform_f(1.0);
		let acc = program.new_temp();
		program.push(entry, Instruction::mov(acc, one));
		program.set_successors(entry, [Some(body), None]);

		program.push(body, Instruction::alu2(Op::Fadd, acc, acc, one).with_sf());
		program.push(body, Instruction::branch(BranchCond::AnyZc));
		program.set_successors(body, [Some(body), Some(exit)]);

		program.push(exit, Instruction::mov(Reg::new(RegFile::TlbColorWrite, 0), acc));

		Liveness::compute(&mut program);

		let acc = acc.index as usize;
		assert!(program.blocks[1].liveness.live_in.contains(acc));
		assert!(program.blocks[1].liveness.live_out.contains(acc));
		assert_eq!(program.intervals[acc], LiveInterval::new(0, 3));
		assert!(program.blocks[0].liveness.live_in.is_empty());
	}

	#[test]
	fn interval_overlap() {
		let a = LiveInterval::new(0, 4);
		assert!(a.overlaps(LiveInterval::new(3, 6)));
		assert!(!a.overlaps(LiveInterval::new(4, 6)));
		assert!(!a.overlaps(LiveInterval::EMPTY));
		assert!(a.spans(2));
		assert!(!a.spans(4));
	}
}
