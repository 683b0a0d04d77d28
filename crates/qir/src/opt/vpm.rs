use tracing::trace;

use super::{find_def, sources_written, Pass};
use crate::{Instruction, Program, Reg, RegFile};

/// Reads and writes the VPM directly from the instructions consuming or
/// producing the value, instead of through a temp.
///
/// Only vertex and coordinate shaders touch the VPM, and values are only
/// forwarded within a block.
#[derive(Debug, Default, Clone, Copy)]
pub struct VpmForwarding;

impl Pass for VpmForwarding {
	fn name(&self) -> &'static str {
		"vpm forwarding"
	}

	fn run(&mut self, program: &mut Program) -> bool {
		if program.stage.is_fragment() {
			return false;
		}

		let use_counts = program.use_counts();
		let mut progress = false;

		for block in 0..program.blocks.len() {
			let mut insts = std::mem::take(&mut program.blocks[block].instructions);

			progress |= forward_reads(program, &use_counts, &mut insts);
			progress |= forward_writes(program, &use_counts, &mut insts);

			program.blocks[block].instructions = insts;
		}

		progress
	}
}

fn is_single_use(program: &Program, use_counts: &[u32], temp: u32) -> bool {
	use_counts[temp as usize] == 1 && program.is_ssa(temp)
}

/// Whether `inst` can be freely moved within its block.
fn is_movable(program: &Program, inst: &Instruction) -> bool {
	!inst.depends_on_flags()
		&& !inst.sf
		&& !inst.has_side_effects()
		&& !program.has_side_effect_reads(inst)
}

/// Replaces `t = mov vpm; x = op t` with `x = op vpm` at the position of the
/// read, leaving the order of VPM reads untouched.
fn forward_reads(program: &Program, use_counts: &[u32], insts: &mut Vec<Instruction>) -> bool {
	let mut progress = false;
	let mut index = 0;

	while index < insts.len() {
		let inst = insts[index];

		let dst_ok = inst.dst.is_null()
			|| inst
				.dst
				.as_temp()
				.is_some_and(|temp| program.is_ssa(temp));

		let temps = inst.srcs().iter().filter(|src| src.is_temp()).count();

		if !dst_ok || temps != 1 || !is_movable(program, &inst) || inst.is_tex() {
			index += 1;
			continue;
		}

		let Some(operand) = inst.srcs().iter().position(|src| src.is_temp()) else {
			index += 1;
			continue;
		};

		let temp = inst.src[operand].index;

		let read = find_def(insts, index, temp).filter(|&read| {
			let mov = &insts[read];
			mov.is_raw_mov()
				&& matches!(mov.src[0].file, RegFile::Vpm)
				&& !mov.sf
				&& inst.src[operand].pack == 0
		});

		match read {
			Some(read) if is_single_use(program, use_counts, temp) => {
				let mut forwarded = inst;
				forwarded.src[operand] = insts[read].src[0];
				trace!(inst = %forwarded, "reading vpm directly");

				insts[read] = forwarded;
				insts.remove(index);
				progress = true;
			}
			_ => index += 1,
		}
	}

	progress
}

/// Replaces `t = op ...; mov vpm, t` with `vpm = op ...` at the position of
/// the write.
fn forward_writes(program: &Program, use_counts: &[u32], insts: &mut Vec<Instruction>) -> bool {
	let mut progress = false;
	let mut index = 0;

	while index < insts.len() {
		let write = insts[index];

		let temp = match write.src[0].as_temp() {
			Some(temp)
				if matches!(write.dst.file, RegFile::Vpm)
					&& write.is_raw_mov()
					&& !write.sf
					&& is_single_use(program, use_counts, temp) =>
			{
				temp
			}
			_ => {
				index += 1;
				continue;
			}
		};

		let def = find_def(insts, index, temp).filter(|&def| {
			let inst = &insts[def];
			!inst.is_multi_instruction()
				&& !inst.is_tex()
				&& is_movable(program, inst)
				&& !sources_written(insts, def + 1..index, inst)
		});

		let Some(def) = def else {
			index += 1;
			continue;
		};

		let mut moved = insts.remove(def);
		moved.dst = Reg::new(RegFile::Vpm, 0);
		trace!(inst = %moved, "writing vpm directly");

		insts[index - 1] = moved;
		progress = true;
	}

	progress
}
