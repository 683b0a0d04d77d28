mod classes;
mod coloring;

use std::ops::{BitOr, Index};

use qpuc_qir::Program;
use qpuc_qpu::QpuReg;
use tracing::{debug, trace};

pub use self::classes::*;
use self::coloring::{ColorPicker, InterferenceGraph};
use super::AllocationError;

/// Regfile address holding the fragment Z and W payload.
pub(crate) const FRAG_PAYLOAD_ZW: u8 = 15;

/// Regfile address reserved for moves that resolve read port conflicts.
pub const RADDR_CONFLICT_SCRATCH: u8 = 14;

const AB_INDEX: u8 = 5;

/// An allocatable register: r0-r4, then regfile A and B interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysReg(pub u8);

impl PhysReg {
	pub const COUNT: u8 = AB_INDEX + 64;
	pub const R4: Self = Self(4);

	#[must_use]
	pub const fn r(n: u8) -> Self {
		Self(n)
	}

	#[must_use]
	pub const fn ra(addr: u8) -> Self {
		Self(AB_INDEX + addr * 2)
	}

	#[must_use]
	pub const fn rb(addr: u8) -> Self {
		Self(AB_INDEX + addr * 2 + 1)
	}

	#[must_use]
	pub const fn is_accumulator(self) -> bool {
		self.0 < AB_INDEX
	}

	#[must_use]
	pub const fn qpu_reg(self) -> QpuReg {
		if self.is_accumulator() {
			QpuReg::r(self.0)
		} else if (self.0 - AB_INDEX) % 2 == 0 {
			QpuReg::ra((self.0 - AB_INDEX) / 2)
		} else {
			QpuReg::rb((self.0 - AB_INDEX) / 2)
		}
	}
}

/// A set of [`PhysReg`]s.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RegSet(u128);

impl RegSet {
	pub const EMPTY: Self = Self(0);

	#[must_use]
	pub const fn single(reg: PhysReg) -> Self {
		Self(1 << reg.0)
	}

	/// r0-r3.
	#[must_use]
	pub const fn accumulators() -> Self {
		Self(0b1111)
	}

	#[must_use]
	pub const fn r4() -> Self {
		Self::single(PhysReg::R4)
	}

	#[must_use]
	pub const fn file_a(threaded: bool) -> Self {
		Self::file(threaded, 0)
	}

	#[must_use]
	pub const fn file_b(threaded: bool) -> Self {
		Self::file(threaded, 1)
	}

	/// Threads share the regfile, so each only gets the lower half.
	const fn file(threaded: bool, offset: u8) -> Self {
		let limit = if threaded { 16 } else { 32 };
		let mut set = 0u128;
		let mut addr = 0;

		while addr < limit {
			if addr != RADDR_CONFLICT_SCRATCH {
				set |= 1 << (AB_INDEX + addr * 2 + offset);
			}

			addr += 1;
		}

		Self(set)
	}

	#[must_use]
	pub const fn contains(self, reg: PhysReg) -> bool {
		self.0 & (1 << reg.0) != 0
	}

	#[must_use]
	pub const fn intersects(self, other: Self) -> bool {
		self.0 & other.0 != 0
	}

	#[must_use]
	pub const fn without(self, other: Self) -> Self {
		Self(self.0 & !other.0)
	}

	#[must_use]
	pub const fn len(self) -> u32 {
		self.0.count_ones()
	}

	#[must_use]
	pub const fn is_empty(self) -> bool {
		self.0 == 0
	}

	pub fn iter(self) -> impl Iterator<Item = PhysReg> {
		(0..PhysReg::COUNT)
			.map(PhysReg)
			.filter(move |reg| self.contains(*reg))
	}
}

impl BitOr for RegSet {
	type Output = Self;

	fn bitor(self, rhs: Self) -> Self::Output {
		Self(self.0 | rhs.0)
	}
}

/// The register of every temp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
	regs: Vec<QpuReg>,
}

impl Allocation {
	#[must_use]
	pub fn get(&self, temp: u32) -> Option<QpuReg> {
		self.regs.get(temp as usize).copied()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.regs.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.regs.is_empty()
	}
}

impl Index<u32> for Allocation {
	type Output = QpuReg;

	fn index(&self, index: u32) -> &Self::Output {
		&self.regs[index as usize]
	}
}

pub struct RegisterAllocator;

impl RegisterAllocator {
	/// Colors the interference graph of the program's live intervals.
	///
	/// [`Program::intervals`] must be up to date.
	#[tracing::instrument("allocate registers", skip(program), fields(threaded = program.threaded))]
	pub fn run(program: &Program) -> Result<Allocation, AllocationError> {
		let threaded = program.threaded;
		let constraints = Constraints::compute(program);

		let mut regs = vec![QpuReg::nop(); program.num_temps as usize];
		let mut graph = InterferenceGraph::new();

		for (temp, interval) in program.intervals.iter().enumerate() {
			if interval.is_empty() {
				continue;
			}

			if let Some(reg) = constraints.precolored[temp] {
				graph.add_precolored(temp as u32, *interval, PhysReg(reg));
				continue;
			}

			let class = constraints.classes[temp];
			let Some(allowed) = class.registers(threaded) else {
				return Err(AllocationError::InvalidClass {
					temp: temp as u32,
					class,
				});
			};

			graph.add_node(temp as u32, *interval, allowed);
		}

		graph.build_edges();

		let colors = graph.color(&mut ColorPicker::default())?;

		for (temp, reg) in colors {
			trace!(temp, reg = %reg.qpu_reg(), "assigned register");
			regs[temp as usize] = reg.qpu_reg();
		}

		debug!(temps = regs.len(), nodes = graph.len(), "allocated registers");

		Ok(Allocation { regs })
	}
}

#[cfg(test)]
mod tests {
	use qpuc_qir::{Instruction, Liveness, Op, Program, Reg, RegFile, Stage};
	use qpuc_qpu::{QpuMux, QpuReg};

	use super::{AllocationError, PhysReg, RegSet, RegisterAllocator};

	fn tlb_color() -> Reg {
		Reg::new(RegFile::TlbColorWrite, 0)
	}

	#[test]
	fn physical_register_numbering() {
		assert_eq!(PhysReg::r(2).qpu_reg(), QpuReg::r(2));
		assert_eq!(PhysReg::ra(0).qpu_reg(), QpuReg::ra(0));
		assert_eq!(PhysReg::rb(0).qpu_reg(), QpuReg::rb(0));
		assert_eq!(PhysReg::rb(31).qpu_reg(), QpuReg::rb(31));

		assert_eq!(RegSet::file_a(false).len(), 31);
		assert_eq!(RegSet::file_a(true).len(), 15);
		assert!(!RegSet::file_b(false).contains(PhysReg::rb(14)));
		assert!(!RegSet::file_a(true).contains(PhysReg::ra(16)));
	}

	#[test]
	fn overlapping_temps_get_distinct_registers() -> Result<(), AllocationError> {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let one = program.uniform_f(1.0);

		let values = (0..8)
			.map(|_| program.def(entry, Op::Fmov, &[one]))
			.collect::<Vec<_>>();
		let mut sum = values[0];
		for value in &values[1..] {
			sum = program.def(entry, Op::Fadd, &[sum, *value]);
		}
		program.push(entry, Instruction::mov(tlb_color(), sum));

		Liveness::compute(&mut program);
		let allocation = RegisterAllocator::run(&program)?;

		for a in 0..program.num_temps {
			for b in a + 1..program.num_temps {
				let (ia, ib) = (program.intervals[a as usize], program.intervals[b as usize]);
				if ia.is_empty() || ib.is_empty() || !ia.overlaps(ib) {
					continue;
				}

				assert_ne!(allocation[a], allocation[b], "t{a} and t{b} overlap");
			}
		}

		for temp in 0..program.num_temps {
			assert_ne!(allocation[temp].mux, QpuMux::R4, "t{temp} is not an r4 write");
		}

		Ok(())
	}

	#[test]
	fn first_choice_is_an_accumulator() -> Result<(), AllocationError> {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let one = program.uniform_f(1.0);
		let x = program.def(entry, Op::Fmov, &[one]);
		let y = program.def(entry, Op::Rcp, &[x]);
		program.push(entry, Instruction::mov(tlb_color(), y));

		Liveness::compute(&mut program);
		let allocation = RegisterAllocator::run(&program)?;

		assert!(allocation[x.index].mux.is_accumulator());
		assert_eq!(allocation[y.index], QpuReg::r4());

		Ok(())
	}

	#[test]
	fn unread_temps_write_nothing() -> Result<(), AllocationError> {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let one = program.uniform_f(1.0);
		let unused = program.def(entry, Op::Fmov, &[one]);

		Liveness::compute(&mut program);
		let allocation = RegisterAllocator::run(&program)?;

		assert_eq!(allocation[unused.index], QpuReg::nop());

		Ok(())
	}

	#[test]
	fn too_many_live_temps_fail() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let one = program.uniform_f(1.0);

		let values = (0..80)
			.map(|_| program.def(entry, Op::Fmov, &[one]))
			.collect::<Vec<_>>();
		for value in &values[1..] {
			let sum = program.def(entry, Op::Fadd, &[values[0], *value]);
			program.push(entry, Instruction::mov(tlb_color(), sum));
		}

		Liveness::compute(&mut program);

		assert!(matches!(
			RegisterAllocator::run(&program),
			Err(AllocationError::OutOfRegisters { .. })
		));
	}

	#[test]
	fn threaded_mode_has_fewer_registers() -> Result<(), AllocationError> {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let one = program.uniform_f(1.0);

		let values = (0..40)
			.map(|_| program.def(entry, Op::Fmov, &[one]))
			.collect::<Vec<_>>();
		for value in &values[1..] {
			let sum = program.def(entry, Op::Fadd, &[values[0], *value]);
			program.push(entry, Instruction::mov(tlb_color(), sum));
		}

		Liveness::compute(&mut program);
		RegisterAllocator::run(&program)?;

		program.threaded = true;
		assert!(RegisterAllocator::run(&program).is_err());

		Ok(())
	}
}
