use qpuc_utils::BitSet;
use tracing::trace;

use super::Pass;
use crate::{Program, Reg, RegFile};

/// Removes instructions whose results are never read.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadCode;

impl Pass for DeadCode {
	fn name(&self) -> &'static str {
		"dead code"
	}

	fn run(&mut self, program: &mut Program) -> bool {
		let mut used = BitSet::with_capacity(program.num_temps as usize);
		for (_, inst) in program.instructions() {
			for temp in inst.srcs().iter().filter_map(|src| src.as_temp()) {
				used.insert(temp as usize);
			}
		}

		let mut progress = false;

		for block in 0..program.blocks.len() {
			let insts = std::mem::take(&mut program.blocks[block].instructions);
			let mut kept = Vec::with_capacity(insts.len());

			for mut inst in insts {
				let dead_dst = match inst.dst.file {
					RegFile::Null => true,
					RegFile::Temp => !used.contains(inst.dst.index as usize),
					_ => false,
				};

				if !dead_dst || inst.has_side_effects() {
					kept.push(inst);
					continue;
				}

				if inst.sf || program.has_side_effect_reads(&inst) {
					if inst.dst.is_temp() {
						trace!(%inst, "dropping unused destination");
						inst.dst = Reg::NULL;
						progress = true;
					}

					kept.push(inst);
					continue;
				}

				trace!(%inst, "removing");
				progress = true;
			}

			program.blocks[block].instructions = kept;
		}

		progress
	}
}
