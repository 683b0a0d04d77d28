use qpuc_qpu::{BranchCond, Cond};
use serde::{Deserialize, Serialize};

use super::{Op, Reg, RegFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
	pub op: Op,
	#[serde(default)]
	pub dst: Reg,
	#[serde(default)]
	pub src: [Reg; 3],
	#[serde(default)]
	pub cond: Cond,
	#[serde(default)]
	pub sf: bool,
	#[serde(default)]
	pub branch_cond: BranchCond,
}

impl Instruction {
	#[must_use]
	pub const fn new(op: Op, dst: Reg, src0: Reg, src1: Reg) -> Self {
		Self {
			op,
			dst,
			src: [src0, src1, Reg::NULL],
			cond: Cond::Always,
			sf: false,
			branch_cond: BranchCond::Always,
		}
	}

	#[must_use]
	pub const fn alu0(op: Op, dst: Reg) -> Self {
		Self::new(op, dst, Reg::NULL, Reg::NULL)
	}

	#[must_use]
	pub const fn alu1(op: Op, dst: Reg, src: Reg) -> Self {
		Self::new(op, dst, src, Reg::NULL)
	}

	#[must_use]
	pub const fn alu2(op: Op, dst: Reg, src0: Reg, src1: Reg) -> Self {
		Self::new(op, dst, src0, src1)
	}

	#[must_use]
	pub const fn mov(dst: Reg, src: Reg) -> Self {
		Self::alu1(Op::Mov, dst, src)
	}

	#[must_use]
	pub const fn branch(cond: BranchCond) -> Self {
		let mut inst = Self::alu0(Op::Branch, Reg::NULL);
		inst.branch_cond = cond;
		inst
	}

	#[must_use]
	pub const fn thrsw() -> Self {
		Self::alu0(Op::Thrsw, Reg::NULL)
	}

	#[must_use]
	pub const fn with_cond(mut self, cond: Cond) -> Self {
		self.cond = cond;
		self
	}

	#[must_use]
	pub const fn with_sf(mut self) -> Self {
		self.sf = true;
		self
	}

	/// Adds the implicit texture uniform operand after the regular sources.
	#[must_use]
	pub const fn with_tex_uniform(mut self, uniform: Reg) -> Self {
		self.src[self.op.info().nsrc] = uniform;
		self
	}

	/// Texture coordinate writes other than direct lookups carry an implicit
	/// uniform with the sampler configuration.
	#[must_use]
	pub const fn has_implicit_tex_uniform(&self) -> bool {
		matches!(
			self.dst.file,
			RegFile::TexS | RegFile::TexT | RegFile::TexR | RegFile::TexB
		)
	}

	#[must_use]
	pub const fn non_sideband_nsrc(&self) -> usize {
		self.op.info().nsrc
	}

	#[must_use]
	pub const fn nsrc(&self) -> usize {
		self.op.info().nsrc + self.has_implicit_tex_uniform() as usize
	}

	#[must_use]
	pub const fn tex_uniform_src(&self) -> Option<usize> {
		if self.has_implicit_tex_uniform() {
			Some(self.nsrc() - 1)
		} else {
			None
		}
	}

	#[must_use]
	pub fn srcs(&self) -> &[Reg] {
		&self.src[..self.nsrc()]
	}

	pub fn srcs_mut(&mut self) -> &mut [Reg] {
		let nsrc = self.nsrc();
		&mut self.src[..nsrc]
	}

	#[must_use]
	pub const fn is_tex(&self) -> bool {
		self.dst.file.is_tex()
	}

	#[must_use]
	pub const fn is_mul(&self) -> bool {
		self.op.is_mul()
	}

	#[must_use]
	pub const fn is_float_input(&self) -> bool {
		self.op.is_float_input()
	}

	#[must_use]
	pub const fn is_multi_instruction(&self) -> bool {
		self.op.info().multi_instruction
	}

	#[must_use]
	pub const fn writes_r4(&self) -> bool {
		self.op.writes_r4()
	}

	#[must_use]
	pub const fn has_side_effects(&self) -> bool {
		self.dst.file.is_write_only() || self.op.info().has_side_effects
	}

	/// An unconditional move with no packing on either side.
	#[must_use]
	pub const fn is_raw_mov(&self) -> bool {
		self.op.is_mov()
			&& matches!(self.cond, Cond::Always)
			&& self.dst.pack == 0
			&& self.src[0].pack == 0
	}

	#[must_use]
	pub const fn depends_on_flags(&self) -> bool {
		if matches!(self.op, Op::Branch) {
			!matches!(self.branch_cond, BranchCond::Always)
		} else {
			!matches!(self.cond, Cond::Always | Cond::Never)
		}
	}

	#[must_use]
	pub fn has_uniform_read(&self) -> bool {
		self.srcs().iter().any(|src| matches!(src.file, RegFile::Unif))
	}

	#[must_use]
	pub fn reads_temp(&self, temp: u32) -> bool {
		self.srcs().iter().any(|src| src.is_temp_index(temp))
	}

	#[must_use]
	pub fn has_src_unpack(&self) -> bool {
		self.srcs().iter().any(|src| src.pack != 0)
	}

	/// Byte lanes of the destination written, given the destination pack.
	#[must_use]
	pub const fn channels_written(&self) -> u8 {
		let pack = self.dst.pack as u64;
		if self.is_mul() {
			match qpuc_qpu::PackMul::from_bits(pack) {
				Some(pack) => pack.channels(),
				None => 0xf,
			}
		} else {
			qpuc_qpu::PackA::from_bits(pack).channels()
		}
	}

	/// Replaces this instruction with a move of `src`, keeping the destination,
	/// condition and flag update.
	pub fn replace_with_mov(&mut self, src: Reg) {
		let tex_uniform = self.tex_uniform_src().map(|i| self.src[i]);

		self.op = if self.is_mul() {
			Op::Mmov
		} else if self.is_float_input() {
			Op::Fmov
		} else {
			Op::Mov
		};

		self.src = [src, Reg::NULL, Reg::NULL];
		if let Some(uniform) = tex_uniform {
			self.src[1] = uniform;
		}
	}
}

#[cfg(test)]
mod tests {
	use qpuc_qpu::{BranchCond, Cond};

	use super::Instruction;
	use crate::{Op, Reg, RegFile};

	#[test]
	fn tex_writes_carry_an_extra_uniform() {
		let inst = Instruction::mov(Reg::new(RegFile::TexS, 0), Reg::temp(0))
			.with_tex_uniform(Reg::unif(2));
		assert_eq!(inst.nsrc(), 2);
		assert_eq!(inst.tex_uniform_src(), Some(1));
		assert_eq!(inst.srcs()[1], Reg::unif(2));

		let direct = Instruction::mov(Reg::new(RegFile::TexSDirect, 0), Reg::temp(0));
		assert_eq!(direct.nsrc(), 1);
		assert!(direct.is_tex());
		assert!(direct.has_side_effects());
	}

	#[test]
	fn flag_dependence() {
		let add = Instruction::alu2(Op::Add, Reg::temp(0), Reg::temp(1), Reg::temp(2));
		assert!(!add.depends_on_flags());
		assert!(add.with_cond(Cond::Zs).depends_on_flags());
		assert!(!add.with_cond(Cond::Never).depends_on_flags());
		assert!(!Instruction::branch(BranchCond::Always).depends_on_flags());
		assert!(Instruction::branch(BranchCond::AnyZc).depends_on_flags());
	}

	#[test]
	fn mov_replacement_picks_the_unit() {
		let mut mul = Instruction::alu2(Op::Fmul, Reg::temp(0), Reg::temp(1), Reg::temp(2));
		mul.replace_with_mov(Reg::temp(1));
		assert_eq!(mul.op, Op::Mmov);
		assert_eq!(mul.src[1], Reg::NULL);

		let mut fadd = Instruction::alu2(Op::Fadd, Reg::temp(0), Reg::temp(1), Reg::temp(2));
		fadd.replace_with_mov(Reg::temp(2));
		assert_eq!(fadd.op, Op::Fmov);
		assert_eq!(fadd.src[0], Reg::temp(2));

		let mut tex = Instruction::alu2(
			Op::Or,
			Reg::new(RegFile::TexT, 0),
			Reg::temp(1),
			Reg::small_imm(0),
		)
		.with_tex_uniform(Reg::unif(7));
		tex.replace_with_mov(Reg::temp(1));
		assert_eq!(tex.op, Op::Mov);
		assert_eq!(tex.srcs(), &[Reg::temp(1), Reg::unif(7)]);
	}

	#[test]
	fn channels_follow_the_unit() {
		let mut inst = Instruction::alu2(Op::Fmul, Reg::temp(0).with_pack(5), Reg::temp(1), Reg::temp(2));
		assert_eq!(inst.channels_written(), 0x2);
		inst.op = Op::Fadd;
		assert_eq!(inst.channels_written(), 0x2);
		inst.dst.pack = 1;
		assert_eq!(inst.channels_written(), 0x3);
	}
}
