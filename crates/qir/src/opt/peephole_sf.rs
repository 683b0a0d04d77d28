use tracing::trace;

use super::Pass;
use crate::{Instruction, Program, Reg, RegFile};

/// Drops flag updates that are never read, or that recompute the flags an
/// earlier identical instruction already set.
///
/// Flags are assumed live at the end of every block.
#[derive(Debug, Default, Clone, Copy)]
pub struct PeepholeSf;

impl Pass for PeepholeSf {
	fn name(&self) -> &'static str {
		"peephole sf"
	}

	fn run(&mut self, program: &mut Program) -> bool {
		let mut progress = false;

		for block in &mut program.blocks {
			progress |= run_block(&mut block.instructions);
		}

		progress
	}
}

fn run_block(insts: &mut [Instruction]) -> bool {
	let mut progress = false;
	let mut sf_live = true;
	let mut last_sf: Option<usize> = None;

	for index in (0..insts.len()).rev() {
		let inst = insts[index];

		if last_sf.is_some_and(|last| writes_source(&insts[last], &inst)) {
			last_sf = None;
		}

		if inst.sf {
			if sf_live {
				if let Some(last) = last_sf {
					if insts[last].sf && same_result(&insts[last], &inst) {
						trace!(inst = %insts[last], "flags already set");
						insts[last].sf = false;
						progress = true;
					}
				}

				last_sf = Some(index);
			} else {
				trace!(%inst, "flags never read");
				insts[index].sf = false;
				progress = true;
			}

			sf_live = false;
		}

		if inst.depends_on_flags() {
			sf_live = true;
		}
	}

	progress
}

fn writes_source(reader: &Instruction, writer: &Instruction) -> bool {
	writer
		.dst
		.as_temp()
		.is_some_and(|temp| reader.reads_temp(temp))
}

/// Reads of these files return a new value each time.
const fn varies_on_reread(reg: Reg) -> bool {
	matches!(reg.file, RegFile::Vary | RegFile::Vpm | RegFile::Unif)
}

fn same_result(a: &Instruction, b: &Instruction) -> bool {
	if a.op != b.op || a.depends_on_flags() || b.depends_on_flags() {
		return false;
	}

	a.srcs()
		.iter()
		.zip(b.srcs())
		.all(|(x, y)| x == y && !varies_on_reread(*x) && !varies_on_reread(*y))
}

#[cfg(test)]
mod tests {
	use qpuc_qpu::{BranchCond, Cond};

	use super::PeepholeSf;
	use crate::{opt::run_pass, Instruction, Op, Program, Reg, RegFile, Stage};

	fn sf_count(program: &Program) -> usize {
		program.instructions().filter(|(_, inst)| inst.sf).count()
	}

	#[test]
	fn repeated_flag_updates_are_dropped() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let x = program.def(entry, Op::FragZ, &[]);
		let a = program.new_temp();
		let b = program.new_temp();
		let one = Reg::small_imm(1);
		program.push(entry, Instruction::alu2(Op::Sub, a, x, one).with_sf());
		program.push(
			entry,
			Instruction::mov(Reg::new(RegFile::TlbZWrite, 0), x).with_cond(Cond::Zs),
		);
		program.push(entry, Instruction::alu2(Op::Sub, b, x, one).with_sf());
		program.push(
			entry,
			Instruction::mov(Reg::new(RegFile::TlbColorWrite, 0), x).with_cond(Cond::Zc),
		);

		assert!(run_pass(&mut program, &mut PeepholeSf));
		let insts = &program.blocks[0].instructions;
		assert!(insts[1].sf);
		assert!(!insts[3].sf);
	}

	#[test]
	fn overwritten_sources_keep_the_update() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let x = program.def(entry, Op::FragZ, &[]);
		let a = program.new_temp();
		let one = Reg::small_imm(1);
		program.push(entry, Instruction::alu2(Op::Sub, a, x, one).with_sf());
		program.push(
			entry,
			Instruction::mov(Reg::new(RegFile::TlbZWrite, 0), x).with_cond(Cond::Zs),
		);
		program.push(entry, Instruction::alu2(Op::Fadd, x, x, x));
		program.push(entry, Instruction::alu2(Op::Sub, a, x, one).with_sf());
		program.push(entry, Instruction::branch(BranchCond::AnyZs));

		assert!(!run_pass(&mut program, &mut PeepholeSf));
		assert_eq!(sf_count(&program), 2);
	}

	#[test]
	fn unread_flags_are_dropped() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let x = program.def(entry, Op::FragZ, &[]);
		let a = program.new_temp();
		program.push(entry, Instruction::alu2(Op::Sub, a, x, Reg::small_imm(1)).with_sf());
		program.push(entry, Instruction::alu2(Op::Sub, a, x, Reg::small_imm(2)).with_sf());
		program.push(
			entry,
			Instruction::mov(Reg::new(RegFile::TlbZWrite, 0), x).with_cond(Cond::Zs),
		);

		assert!(run_pass(&mut program, &mut PeepholeSf));
		let insts = &program.blocks[0].instructions;
		assert!(!insts[1].sf);
		assert!(insts[2].sf);
	}

	#[test]
	fn identical_unread_update_keeps_the_later_one() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let x = program.def(entry, Op::FragZ, &[]);
		let a = program.new_temp();
		let b = program.new_temp();
		let one = Reg::small_imm(1);
		program.push(entry, Instruction::alu2(Op::Sub, a, x, one).with_sf());
		program.push(entry, Instruction::alu2(Op::Sub, b, x, one).with_sf());
		program.push(
			entry,
			Instruction::mov(Reg::new(RegFile::TlbZWrite, 0), x).with_cond(Cond::Zs),
		);

		assert!(run_pass(&mut program, &mut PeepholeSf));
		assert_eq!(sf_count(&program), 1);
		let insts = &program.blocks[0].instructions;
		assert!(!insts[1].sf);
		assert!(insts[2].sf);
	}

	#[test]
	fn fifo_reads_are_never_equal() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let a = program.new_temp();
		program.push(entry, Instruction::mov(a, Reg::vary(0)).with_sf());
		program.push(
			entry,
			Instruction::mov(Reg::new(RegFile::TlbZWrite, 0), a).with_cond(Cond::Zs),
		);
		program.push(entry, Instruction::mov(a, Reg::vary(0)).with_sf());

		assert!(!run_pass(&mut program, &mut PeepholeSf));
	}
}
