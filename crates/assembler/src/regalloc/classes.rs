use std::{
	fmt::{Display, Formatter, Result as FmtResult},
	ops::{BitAnd, BitAndAssign, BitOr},
};

use qpuc_qir::{Op, Program, RegFile};

use super::RegSet;

/// The kinds of register a temp may be placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RegClass(u8);

impl RegClass {
	pub const A: Self = Self(1 << 0);
	pub const ANY: Self = Self(Self::A.0 | Self::B.0 | Self::R4.0 | Self::R0_R3.0);
	pub const B: Self = Self(1 << 1);
	pub const NONE: Self = Self(0);
	pub const R0_R3: Self = Self(1 << 3);
	pub const R4: Self = Self(1 << 2);

	#[must_use]
	pub const fn contains(self, other: Self) -> bool {
		self.0 & other.0 == other.0
	}

	#[must_use]
	pub const fn without(self, other: Self) -> Self {
		Self(self.0 & !other.0)
	}

	/// The registers of this class, if it is one the allocator supports.
	#[must_use]
	pub fn registers(self, threaded: bool) -> Option<RegSet> {
		const A_B: RegClass = RegClass(RegClass::A.0 | RegClass::B.0);
		const A_B_ACC: RegClass = RegClass(A_B.0 | RegClass::R0_R3.0);
		const A_R4: RegClass = RegClass(RegClass::A.0 | RegClass::R4.0);

		let set = match self {
			Self::ANY => {
				RegSet::accumulators() | RegSet::r4() | RegSet::file_a(threaded) | RegSet::file_b(threaded)
			}
			A_B => RegSet::file_a(threaded) | RegSet::file_b(threaded),
			A_B_ACC => {
				RegSet::accumulators() | RegSet::file_a(threaded) | RegSet::file_b(threaded)
			}
			A_R4 => RegSet::r4() | RegSet::file_a(threaded),
			Self::A => RegSet::file_a(threaded),
			Self::R0_R3 => RegSet::accumulators(),
			_ => return None,
		};

		Some(set)
	}
}

impl BitAnd for RegClass {
	type Output = Self;

	fn bitand(self, rhs: Self) -> Self::Output {
		Self(self.0 & rhs.0)
	}
}

impl BitAndAssign for RegClass {
	fn bitand_assign(&mut self, rhs: Self) {
		self.0 &= rhs.0;
	}
}

impl BitOr for RegClass {
	type Output = Self;

	fn bitor(self, rhs: Self) -> Self::Output {
		Self(self.0 | rhs.0)
	}
}

impl Default for RegClass {
	fn default() -> Self {
		Self::ANY
	}
}

impl Display for RegClass {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		if *self == Self::NONE {
			return f.write_str("{}");
		}

		f.write_str("{")?;

		let mut first = true;
		for (class, name) in [
			(Self::A, "a"),
			(Self::B, "b"),
			(Self::R4, "r4"),
			(Self::R0_R3, "r0-r3"),
		] {
			if !self.contains(class) {
				continue;
			}

			if !first {
				f.write_str("|")?;
			}

			f.write_str(name)?;
			first = false;
		}

		f.write_str("}")
	}
}

/// What the instructions around a temp require of its register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraints {
	pub classes: Vec<RegClass>,
	/// Temps that must live in a specific register, as a register index.
	pub precolored: Vec<Option<u8>>,
}

impl Constraints {
	pub fn compute(program: &Program) -> Self {
		let num_temps = program.num_temps as usize;
		let mut classes = vec![RegClass::ANY; num_temps];
		let mut precolored = vec![None; num_temps];

		let spanning = |ip: u32| {
			program
				.intervals
				.iter()
				.enumerate()
				.filter(move |(_, interval)| interval.spans(ip))
				.map(|(temp, _)| temp)
		};

		for (ip, (_, inst)) in program.instructions().enumerate() {
			let ip = ip as u32;
			let dst = inst.dst.as_temp().map(|temp| temp as usize);

			if inst.writes_r4() {
				// Nothing else may stay in r4 across the write.
				for temp in spanning(ip) {
					classes[temp] &= RegClass::ANY.without(RegClass::R4);
				}

				if !matches!(inst.cond, qpuc_qpu::Cond::Always) {
					if let Some(dst) = dst {
						classes[dst] &= RegClass::ANY.without(RegClass::R4);
					}
				}
			} else if let Some(dst) = dst {
				// r4 is not writable by the ALUs.
				classes[dst] &= RegClass::ANY.without(RegClass::R4);
			}

			match inst.op {
				Op::FragZ => {
					if let Some(dst) = dst {
						precolored[dst] = Some(super::PhysReg::rb(super::FRAG_PAYLOAD_ZW).0);
					}
				}
				Op::FragW => {
					if let Some(dst) = dst {
						precolored[dst] = Some(super::PhysReg::ra(super::FRAG_PAYLOAD_ZW).0);
					}
				}
				Op::RotMul => {
					if let Some(src) = inst.src[0].as_temp() {
						classes[src as usize] &= RegClass::R0_R3;
					}
				}
				Op::Thrsw => {
					// Accumulators do not survive a thread switch.
					for temp in spanning(ip) {
						classes[temp] &= RegClass::A | RegClass::B;
					}
				}
				_ => {}
			}

			if inst.dst.pack != 0 && !inst.is_mul() {
				if let Some(dst) = dst {
					classes[dst] &= RegClass::A;
				}
			}

			for src in inst.srcs() {
				if !matches!(src.file, RegFile::Temp) || src.pack == 0 {
					continue;
				}

				let allowed = if inst.is_float_input() {
					RegClass::A | RegClass::R4
				} else {
					RegClass::A
				};

				classes[src.index as usize] &= allowed;
			}
		}

		Self {
			classes,
			precolored,
		}
	}
}

#[cfg(test)]
mod tests {
	use qpuc_qir::{Instruction, Liveness, Op, Program, Reg, RegFile, Stage};

	use super::{Constraints, RegClass};

	#[test]
	fn sfu_results_may_stay_in_r4() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let one = program.uniform_f(1.0);
		let x = program.def(entry, Op::Fmov, &[one]);
		let y = program.def(entry, Op::Rcp, &[x]);
		let z = program.def(entry, Op::Fmul, &[y, x]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbColorWrite, 0), z));
		Liveness::compute(&mut program);

		let constraints = Constraints::compute(&program);

		assert_eq!(constraints.classes[y.index as usize], RegClass::ANY);
		assert!(!constraints.classes[x.index as usize].contains(RegClass::R4));
		assert!(!constraints.classes[z.index as usize].contains(RegClass::R4));
	}

	#[test]
	fn unpacks_and_rotations_restrict_files() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let one = program.uniform_ui(1);
		let x = program.def(entry, Op::Mov, &[one]);
		let y = program.def(entry, Op::Mov, &[one]);
		let z = program.def(entry, Op::Add, &[x.with_pack(1), y]);
		let rotated = program.def(entry, Op::RotMul, &[y, Reg::small_imm(49)]);
		let w = program.def(entry, Op::Fadd, &[z.with_pack(5), rotated]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbColorWrite, 0), w));
		Liveness::compute(&mut program);

		let constraints = Constraints::compute(&program);

		assert_eq!(constraints.classes[x.index as usize], RegClass::A);
		assert_eq!(constraints.classes[y.index as usize], RegClass::R0_R3);
		assert_eq!(constraints.classes[z.index as usize], RegClass::A);
	}

	#[test]
	fn thread_switches_evict_accumulators() {
		let mut program = Program::new(Stage::Fragment);
		program.threaded = true;
		let entry = program.entry_block();
		let one = program.uniform_f(1.0);
		let x = program.def(entry, Op::Fmov, &[one]);
		program.push(entry, Instruction::thrsw());
		let y = program.def(entry, Op::Fadd, &[x, x]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbColorWrite, 0), y));
		Liveness::compute(&mut program);

		let constraints = Constraints::compute(&program);

		assert_eq!(constraints.classes[x.index as usize], RegClass::A | RegClass::B);
		assert!(constraints.classes[y.index as usize].contains(RegClass::R0_R3));
	}

	#[test]
	fn payload_temps_are_precolored() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let z = program.def(entry, Op::FragZ, &[]);
		let w = program.def(entry, Op::FragW, &[]);
		let sum = program.def(entry, Op::Fadd, &[z, w]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbZWrite, 0), sum));
		Liveness::compute(&mut program);

		let constraints = Constraints::compute(&program);

		assert_eq!(constraints.precolored[z.index as usize], Some(5 + 31));
		assert_eq!(constraints.precolored[w.index as usize], Some(5 + 30));
	}

	#[test]
	fn unsupported_combinations_have_no_registers() {
		assert!((RegClass::B | RegClass::R0_R3).registers(false).is_none());
		assert!(RegClass::NONE.registers(false).is_none());
		assert!(RegClass::A.registers(true).is_some());
	}
}
