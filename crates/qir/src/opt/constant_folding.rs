use super::Pass;
use crate::{Instruction, Op, Program};

/// Evaluates shifts whose operands are all known at compile time.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstantFolding;

impl Pass for ConstantFolding {
	fn name(&self) -> &'static str {
		"constant folding"
	}

	fn run(&mut self, program: &mut Program) -> bool {
		super::rewrite_each(program, fold)
	}
}

fn fold(program: &mut Program, inst: &Instruction) -> Option<Instruction> {
	if inst.dst.pack != 0 {
		return None;
	}

	let mut values = [0; 2];
	for (value, src) in values.iter_mut().zip(inst.srcs()) {
		*value = program.constant_value(program.follow_movs(*src))?;
	}

	let result = match inst.op {
		Op::Shr => values[0] >> (values[1] & 31),
		_ => return None,
	};

	let mut inst = *inst;
	let uniform = program.uniform_ui(result);
	inst.replace_with_mov(uniform);
	Some(inst)
}

#[cfg(test)]
mod tests {
	use super::ConstantFolding;
	use crate::{opt::run_pass, Instruction, Op, Program, Reg, RegFile, Stage};

	#[test]
	fn constant_shifts_become_uniform_moves() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let value = program.uniform_ui(0x100);
		let amount = Reg::small_imm(36);
		let shifted = program.def(entry, Op::Shr, &[value, amount]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbColorWrite, 0), shifted));

		assert!(run_pass(&mut program, &mut ConstantFolding));

		let inst = program.blocks[0].instructions[0];
		assert_eq!(inst.op, Op::Mov);
		assert_eq!(program.constant_value(inst.src[0]), Some(0x10));
	}

	#[test]
	fn shifts_of_unknown_values_are_kept() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let x = program.def(entry, Op::FragZ, &[]);
		let amount = program.uniform_ui(2);
		let shifted = program.def(entry, Op::Shr, &[x, amount]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbColorWrite, 0), shifted));

		assert!(!run_pass(&mut program, &mut ConstantFolding));
	}
}
