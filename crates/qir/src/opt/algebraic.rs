use qpuc_qpu::Unpack;

use super::Pass;
use crate::{Instruction, Op, Program, Reg, RegFile};

const ONE_F: u32 = 1.0f32.to_bits();

/// Identity and zero folding, plus `a + (0 - b)` into `a - b`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Algebraic;

impl Pass for Algebraic {
	fn name(&self) -> &'static str {
		"algebraic"
	}

	fn run(&mut self, program: &mut Program) -> bool {
		super::rewrite_each(program, |program, inst| simplify(program, inst))
	}
}

const fn is_8bit_unpack(reg: Reg) -> bool {
	reg.pack != 0 && Unpack::from_bits(reg.pack as u64).is_8bit()
}

fn simplify(program: &Program, inst: &Instruction) -> Option<Instruction> {
	let mut inst = *inst;
	let is_zero = |reg: Reg| program.is_constant(reg, 0);
	let is_one = |reg: Reg| program.is_constant(reg, ONE_F);
	let [a, b, _] = inst.src;

	let replacement = match inst.op {
		Op::Fmin if is_one(b) && is_8bit_unpack(a) => a,
		Op::Fmax if is_zero(b) && is_8bit_unpack(a) => a,
		Op::Fsub | Op::Sub if is_zero(b) => a,
		Op::Add if matches!(inst.dst.file, RegFile::TexSDirect) => return None,
		Op::Add | Op::Or | Op::Fadd if is_zero(a) => b,
		Op::Add | Op::Or | Op::Fadd if is_zero(b) => a,
		Op::Fadd => return fold_negation(program, inst),
		Op::Fmul | Op::Mul24 if inst.dst.pack == 0 && is_zero(a) => a,
		Op::Fmul | Op::Mul24 if inst.dst.pack == 0 && is_zero(b) => b,
		Op::Fmul if inst.dst.pack == 0 && is_one(a) => b,
		Op::Fmul if inst.dst.pack == 0 && is_one(b) => a,
		Op::And if is_zero(a) => a,
		Op::And if is_zero(b) => b,
		Op::And if program.is_constant(a, u32::MAX) => b,
		Op::And if program.is_constant(b, u32::MAX) => a,
		Op::Rcp if is_one(a) => a,
		_ => return None,
	};

	inst.replace_with_mov(replacement);
	Some(inst)
}

/// `FADD(a, FSUB(0, b))` or `FADD(FSUB(0, b), a)` into `FSUB(a, b)`.
fn fold_negation(program: &Program, mut inst: Instruction) -> Option<Instruction> {
	for (neg, other) in [(1, 0), (0, 1)] {
		let Some(fsub) = program.def_of(inst.src[neg]) else {
			continue;
		};

		if !matches!(fsub.op, Op::Fsub)
			|| !program.is_constant(fsub.src[0], 0)
			|| inst.src[neg].pack != 0
		{
			continue;
		}

		let negated = fsub.src[1];
		let stable = negated.pack == 0
			&& negated
				.as_temp()
				.is_none_or(|temp| program.is_ssa(temp));
		if !stable {
			continue;
		}

		inst.op = Op::Fsub;
		inst.src[0] = inst.src[other];
		inst.src[1] = negated;
		return Some(inst);
	}

	None
}
