use tracing::trace;

use super::{find_def, sources_written, Pass};
use crate::{Instruction, Op, Program, RegFile};

/// Writes fixed-function outputs (TLB and texture setup) directly from the
/// instruction producing the value, dropping the intermediate move.
///
/// Only single-block programs are handled.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoalesceFfWrites;

impl Pass for CoalesceFfWrites {
	fn name(&self) -> &'static str {
		"coalesce ff writes"
	}

	fn run(&mut self, program: &mut Program) -> bool {
		if program.blocks.len() != 1 {
			return false;
		}

		let use_counts = program.use_counts();
		let mut insts = std::mem::take(&mut program.blocks[0].instructions);
		let mut progress = false;
		let mut index = 0;

		while index < insts.len() {
			match coalesce_into(program, &use_counts, &insts, index) {
				Some(def) => {
					let write = insts[index];
					let mut moved = insts.remove(def);
					moved.dst = write.dst;
					if let Some(uniform) = write.tex_uniform_src() {
						if let Some(slot) = moved.tex_uniform_src() {
							moved.src[slot] = write.src[uniform];
						}
					}

					trace!(inst = %moved, "coalesced fixed-function write");
					insts[index - 1] = moved;
					progress = true;
				}
				None => index += 1,
			}
		}

		program.blocks[0].instructions = insts;
		progress
	}
}

const fn is_ff_target(file: RegFile) -> bool {
	file.is_tex()
		|| matches!(
			file,
			RegFile::TlbZWrite | RegFile::TlbColorWrite | RegFile::TlbColorWriteMs
		)
}

/// The index of the definition that can write the target of the move at
/// `index` directly.
fn coalesce_into(
	program: &Program,
	use_counts: &[u32],
	insts: &[Instruction],
	index: usize,
) -> Option<usize> {
	let write = &insts[index];
	if !write.is_raw_mov() || write.sf || !is_ff_target(write.dst.file) {
		return None;
	}

	let temp = write.src[0].as_temp()?;
	if use_counts[temp as usize] != 1 || !program.is_ssa(temp) {
		return None;
	}

	let def = find_def(insts, index, temp)?;
	let inst = &insts[def];

	// The texture unit takes its parameters from the uniform stream in order.
	if write.is_tex() && inst.has_uniform_read() {
		return None;
	}

	if write.has_implicit_tex_uniform() && inst.op.info().nsrc + 1 > 3 {
		return None;
	}

	let coalescable = !matches!(inst.op, Op::FragZ | Op::FragW | Op::TexResult)
		&& !inst.depends_on_flags()
		&& !inst.sf
		&& !inst.has_side_effects()
		&& !program.has_side_effect_reads(inst)
		&& !sources_written(insts, def + 1..index, inst);

	coalescable.then_some(def)
}

#[cfg(test)]
mod tests {
	use qpuc_qpu::Cond;

	use super::CoalesceFfWrites;
	use crate::{opt::run_pass, Instruction, Op, Program, Reg, RegFile, Stage};

	#[test]
	fn tlb_writes_come_from_the_definition() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let scale = program.uniform_f(3.0);
		let x = program.def(entry, Op::FragZ, &[]);
		let y = program.def(entry, Op::Fmul, &[x, scale]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbColorWrite, 0), y));

		assert!(run_pass(&mut program, &mut CoalesceFfWrites));

		let insts = &program.blocks[0].instructions;
		assert_eq!(insts.len(), 2);
		assert_eq!(insts[1].op, Op::Fmul);
		assert_eq!(insts[1].dst.file, RegFile::TlbColorWrite);
	}

	#[test]
	fn texture_coordinates_keep_their_uniform() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let config = program.uniform_ui(0x10);
		let x = program.def(entry, Op::FragZ, &[]);
		let w = program.def(entry, Op::FragW, &[]);
		let s = program.def(entry, Op::Fmul, &[x, w]);
		program.push(
			entry,
			Instruction::mov(Reg::new(RegFile::TexS, 0), s).with_tex_uniform(config),
		);

		assert!(run_pass(&mut program, &mut CoalesceFfWrites));

		let insts = &program.blocks[0].instructions;
		assert_eq!(insts.len(), 3);
		assert_eq!(insts[2].dst.file, RegFile::TexS);
		assert_eq!(insts[2].src, [x, w, config]);
	}

	#[test]
	fn texture_writes_cannot_take_uniform_reads() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let scale = program.uniform_f(3.0);
		let config = program.uniform_ui(0x10);
		let x = program.def(entry, Op::FragZ, &[]);
		let s = program.def(entry, Op::Fmul, &[x, scale]);
		program.push(
			entry,
			Instruction::mov(Reg::new(RegFile::TexS, 0), s).with_tex_uniform(config),
		);

		assert!(!run_pass(&mut program, &mut CoalesceFfWrites));
	}

	#[test]
	fn flag_dependent_definitions_are_kept() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let x = program.def(entry, Op::FragZ, &[]);
		let y = program.new_temp();
		program.push(entry, Instruction::alu2(Op::Sub, Reg::NULL, x, Reg::small_imm(1)).with_sf());
		program.push(entry, Instruction::alu2(Op::Fadd, y, x, x).with_cond(Cond::Zs));
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbZWrite, 0), y));

		assert!(!run_pass(&mut program, &mut CoalesceFfWrites));
	}

	#[test]
	fn multiple_blocks_are_skipped() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let x = program.def(entry, Op::FragZ, &[]);
		let y = program.def(entry, Op::Fadd, &[x, x]);
		let exit = program.add_block();
		program.set_successors(entry, [Some(exit), None]);
		program.push(exit, Instruction::mov(Reg::new(RegFile::TlbZWrite, 0), y));

		assert!(!run_pass(&mut program, &mut CoalesceFfWrites));
	}
}
