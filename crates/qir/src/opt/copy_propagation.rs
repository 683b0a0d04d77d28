use rustc_hash::FxHashMap;
use tracing::trace;

use super::Pass;
use crate::{Instruction, Op, Program, RegFile};

/// Replaces reads of copied temps with the source of the copy.
///
/// Copies are tracked per block, with single-definition copies from any block
/// used as a fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyPropagation;

impl Pass for CopyPropagation {
	fn name(&self) -> &'static str {
		"copy propagation"
	}

	fn run(&mut self, program: &mut Program) -> bool {
		let mut progress = false;

		for block in 0..program.blocks.len() {
			let mut movs = FxHashMap::<u32, Instruction>::default();
			let mut rebuilt = Vec::with_capacity(program.blocks[block].instructions.len());

			for index in 0..program.blocks[block].instructions.len() {
				let mut inst = program.blocks[block].instructions[index];

				if propagate(program, &mut inst, &movs) {
					trace!(%inst, "propagated copy");
					progress = true;
				}

				if let Some(temp) = inst.dst.as_temp() {
					movs.retain(|&dst, mov| dst != temp && !mov.src[0].is_temp_index(temp));
				}

				if is_copy_mov(&inst) {
					if let Some(temp) = inst.dst.as_temp() {
						movs.insert(temp, inst);
					}
				}

				rebuilt.push(inst);
			}

			program.blocks[block].instructions = rebuilt;
		}

		progress
	}
}

fn is_copy_mov(inst: &Instruction) -> bool {
	matches!(inst.op, Op::Mov | Op::Fmov | Op::Mmov)
		&& inst.dst.is_temp()
		&& matches!(inst.src[0].file, RegFile::Temp | RegFile::Unif)
		&& inst.dst.pack == 0
		&& matches!(inst.cond, qpuc_qpu::Cond::Always)
}

fn propagate(program: &Program, inst: &mut Instruction, movs: &FxHashMap<u32, Instruction>) -> bool {
	let mut progress = false;

	for i in 0..inst.nsrc() {
		let Some(temp) = inst.src[i].as_temp() else {
			continue;
		};

		let mov = match movs.get(&temp) {
			Some(mov) => *mov,
			None => {
				let Some(def) = program.def_of(inst.src[i]).filter(|def| is_copy_mov(def)) else {
					continue;
				};

				if def
					.src[0]
					.as_temp()
					.is_some_and(|source| !program.is_ssa(source))
				{
					continue;
				}

				*def
			}
		};

		let source = mov.src[0];

		// Rotations read their source from an accumulator.
		if matches!(inst.op, Op::RotMul) && (!source.is_temp() || source.pack != 0) {
			continue;
		}

		let unpack = if source.pack == 0 {
			inst.src[i].pack
		} else {
			if inst.is_float_input() != mov.is_float_input()
				|| inst.has_src_unpack()
				|| inst.dst.pack != 0
			{
				continue;
			}

			source.pack
		};

		inst.src[i] = source.with_pack(unpack);
		progress = true;
	}

	progress
}

#[cfg(test)]
mod tests {
	use super::CopyPropagation;
	use crate::{opt::run_pass, Instruction, Op, Program, Reg, RegFile, Stage};

	#[test]
	fn reads_of_copies_use_the_source() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let u = program.uniform_f(0.5);
		let x = program.def(entry, Op::FragZ, &[]);
		let copy = program.def(entry, Op::Mov, &[x]);
		let scaled = program.def(entry, Op::Fmul, &[copy, u]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbZWrite, 0), scaled));

		assert!(run_pass(&mut program, &mut CopyPropagation));
		assert_eq!(program.blocks[0].instructions[2].src[0], x);
		assert!(!run_pass(&mut program, &mut CopyPropagation));
	}

	#[test]
	fn overwritten_sources_end_the_copy() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let x = program.new_temp();
		let copy = program.new_temp();
		program.push(entry, Instruction::alu0(Op::FragZ, x));
		program.push(entry, Instruction::mov(copy, x));
		program.push(entry, Instruction::alu2(Op::Fadd, x, x, x));
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbZWrite, 0), copy));

		assert!(!run_pass(&mut program, &mut CopyPropagation));
		assert_eq!(program.blocks[0].instructions[3].src[0], copy);
	}

	#[test]
	fn rotations_only_take_temps() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let u = program.uniform_ui(7);
		let copy = program.def(entry, Op::Mov, &[u]);
		let rotated = program.def(entry, Op::RotMul, &[copy, Reg::small_imm(48 + 3)]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbColorWrite, 0), rotated));

		assert!(!run_pass(&mut program, &mut CopyPropagation));
	}

	#[test]
	fn unpacks_need_matching_interpretation() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let color = program.def(entry, Op::TlbColorRead, &[]);
		let byte = program.def(entry, Op::Fmov, &[color.with_pack(4)]);
		let float = program.def(entry, Op::Fadd, &[byte, byte]);
		let int = program.def(entry, Op::Add, &[byte, Reg::small_imm(1)]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbColorWrite, 0), float));
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbColorWrite, 0), int));

		assert!(run_pass(&mut program, &mut CopyPropagation));
		let insts = &program.blocks[0].instructions;
		// Only one operand can carry the unpack.
		assert_eq!(insts[2].op, Op::Fadd);
		assert_eq!(insts[2].src[0], color.with_pack(4));
		assert_eq!(insts[2].src[1], byte);
		assert_eq!(insts[3].src[0], byte);
	}
}
