use qpuc_qpu::SmallImm;

use super::Pass;
use crate::{Instruction, Op, Program, Reg, RegFile};

/// Turns constant uniform operands into small immediates where the value is
/// encodable, at most one per instruction.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmallImmediates;

impl Pass for SmallImmediates {
	fn name(&self) -> &'static str {
		"small immediates"
	}

	fn run(&mut self, program: &mut Program) -> bool {
		super::rewrite_each(program, |program, inst| fold_immediate(program, inst))
	}
}

fn fold_immediate(program: &Program, inst: &Instruction) -> Option<Instruction> {
	// Bounds checks on indirect loads keep their uniform.
	if matches!(inst.op, Op::MinNoImm)
		|| inst
			.srcs()
			.iter()
			.any(|src| matches!(src.file, RegFile::SmallImm))
	{
		return None;
	}

	let tex_uniform = inst.tex_uniform_src();

	(0..inst.nsrc()).find_map(|i| {
		if tex_uniform == Some(i) {
			return None;
		}

		let src = program.follow_movs(inst.src[i]);
		if !matches!(src.file, RegFile::Unif) {
			return None;
		}

		let value = program.constant_value(src)?;
		SmallImm::encode(value)?;

		let mut inst = *inst;
		inst.src[i] = Reg::small_imm(value).with_pack(inst.src[i].pack);
		Some(inst)
	})
}

#[cfg(test)]
mod tests {
	use super::SmallImmediates;
	use crate::{opt::run_pass, Instruction, Op, Program, Reg, RegFile, Stage};

	#[test]
	fn encodable_constants_become_immediates() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let half = program.uniform_f(0.5);
		let two = program.uniform_f(2.0);
		let x = program.def(entry, Op::FragZ, &[]);
		let a = program.def(entry, Op::Fmul, &[x, half]);
		let b = program.def(entry, Op::Fadd, &[two, half]);
		let c = program.def(entry, Op::Fadd, &[a, b]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbZWrite, 0), c));

		assert!(run_pass(&mut program, &mut SmallImmediates));
		let insts = &program.blocks[0].instructions;
		assert_eq!(insts[1].src[1], Reg::small_imm(0.5f32.to_bits()));
		assert_eq!(insts[2].src[0], Reg::small_imm(2.0f32.to_bits()));
		assert_eq!(insts[2].src[1], half);
		assert!(!run_pass(&mut program, &mut SmallImmediates));
	}

	#[test]
	fn unencodable_and_texture_uniforms_are_kept() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let big = program.uniform_ui(1000);
		let config = program.uniform_ui(3);
		let x = program.def(entry, Op::FragZ, &[]);
		let a = program.def(entry, Op::Add, &[x, big]);
		program.push(
			entry,
			Instruction::mov(Reg::new(RegFile::TexS, 0), a).with_tex_uniform(config),
		);
		let bound = program.def(entry, Op::MinNoImm, &[x, config]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbZWrite, 0), bound));

		assert!(!run_pass(&mut program, &mut SmallImmediates));
	}
}
