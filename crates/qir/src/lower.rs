use std::collections::BTreeMap;

use tracing::{debug, trace};

use super::{
	Instruction, Op, Program, Reg, RegFile, Uniform, UniformContents, UniformTable,
};

/// Sources that can be replaced by a temp; the texture sideband uniform must
/// stay a uniform read.
fn is_lowerable_uniform(inst: &Instruction, src: usize) -> bool {
	matches!(inst.src[src].file, RegFile::Unif) && inst.tex_uniform_src() != Some(src)
}

/// Number of distinct uniform slots an instruction reads.
fn uniform_count(inst: &Instruction) -> usize {
	let srcs = inst.srcs();

	srcs.iter()
		.enumerate()
		.filter(|(i, src)| {
			matches!(src.file, RegFile::Unif)
				&& !srcs[..*i]
					.iter()
					.any(|prev| matches!(prev.file, RegFile::Unif) && prev.index == src.index)
		})
		.count()
}

/// Instructions that consume a slot of the uniform stream.
fn consumes_uniform(inst: &Instruction) -> bool {
	inst.is_tex() || inst.has_uniform_read()
}

fn decrement(counts: &mut BTreeMap<u32, u32>, index: u32) {
	if let Some(count) = counts.get_mut(&index) {
		*count -= 1;
		if *count == 0 {
			counts.remove(&index);
		}
	}
}

impl Program {
	/// Rewrites instructions reading more than one distinct uniform so that
	/// each reads at most one, loading the most contended uniforms into temps
	/// at the top of the blocks that need them.
	#[tracing::instrument("lower uniforms", skip(self))]
	pub fn lower_uniforms(&mut self) {
		let mut counts = BTreeMap::<u32, u32>::new();

		for (_, inst) in self.instructions() {
			if uniform_count(inst) <= 1 {
				continue;
			}

			for i in 0..inst.nsrc() {
				if is_lowerable_uniform(inst, i) {
					*counts.entry(inst.src[i].index).or_default() += 1;
				}
			}
		}

		let mut lowered = 0usize;

		while !counts.is_empty() {
			let mut max_count = 0;
			let mut max_index = 0;
			for (&index, &count) in &counts {
				if count > max_count {
					max_count = count;
					max_index = index;
				}
			}

			trace!(uniform = max_index, references = max_count, "lowering uniform");

			for block in 0..self.blocks.len() {
				let mut temp = None;
				let mut instructions = std::mem::take(&mut self.blocks[block].instructions);

				for inst in &mut instructions {
					let mut count = uniform_count(inst);
					if count <= 1 {
						continue;
					}

					let references = (0..inst.nsrc())
						.any(|i| is_lowerable_uniform(inst, i) && inst.src[i].index == max_index);

					if references {
						let temp = *temp.get_or_insert_with(|| self.new_temp());

						for i in 0..inst.nsrc() {
							if is_lowerable_uniform(inst, i) && inst.src[i].index == max_index {
								inst.src[i].file = temp.file;
								inst.src[i].index = temp.index;
								decrement(&mut counts, max_index);
							}
						}

						count -= 1;
					}

					if count <= 1 {
						for i in 0..inst.nsrc() {
							if is_lowerable_uniform(inst, i) {
								decrement(&mut counts, inst.src[i].index);
							}
						}
					}
				}

				let block = &mut self.blocks[block];
				if let Some(temp) = temp {
					lowered += 1;
					let mut rebuilt = Vec::with_capacity(instructions.len() + 1);
					rebuilt.push(Instruction::mov(temp, Reg::unif(max_index)));
					rebuilt.extend(instructions);
					block.instructions = rebuilt;
				} else {
					block.instructions = instructions;
				}
			}
		}

		debug!(loads = lowered, "lowered uniforms");
	}

	/// Makes every non-entry block that reads uniforms rewind the uniform
	/// stream to the slot it expects, so the stream position does not depend
	/// on the path taken to reach the block.
	#[tracing::instrument("emit uniform stream resets", skip(self))]
	pub fn emit_uniform_stream_resets(&mut self) {
		let mut uniform_count = 0u32;

		for block in 0..self.blocks.len() {
			let reads = self.blocks[block].instructions.iter().any(consumes_uniform);

			if block != 0 && reads {
				let offset = self.new_temp();
				let address = self.uniform(UniformContents::UniformsAddress, 0);

				let instructions = &mut self.blocks[block].instructions;
				let mut rebuilt = Vec::with_capacity(instructions.len() + 2);
				rebuilt.push(Instruction::alu1(
					Op::LoadImm,
					offset,
					Reg::load_imm((uniform_count + 1) * 4),
				));
				rebuilt.push(Instruction::alu2(Op::UniformsReset, Reg::NULL, offset, address));
				rebuilt.append(instructions);
				*instructions = rebuilt;
			}

			uniform_count += self.blocks[block]
				.instructions
				.iter()
				.filter(|inst| consumes_uniform(inst))
				.count() as u32;
		}
	}

	/// Rebuilds the uniform table so entry `i` is the `i`-th uniform read in
	/// program order.
	#[tracing::instrument("reorder uniforms", skip(self))]
	pub fn reorder_uniforms(&mut self) {
		let old = std::mem::take(&mut self.uniforms);
		let mut uniforms = UniformTable::new();

		for inst in self.instructions_mut() {
			let mut slot = None;

			for src in inst.srcs_mut() {
				if !matches!(src.file, RegFile::Unif) {
					continue;
				}

				let index = *slot.get_or_insert_with(|| {
					uniforms.push(old.get(src.index).unwrap_or(Uniform::constant(0)))
				});
				src.index = index;
			}
		}

		debug!(before = old.len(), after = uniforms.len(), "reordered uniforms");

		self.uniforms = uniforms;
	}
}

#[cfg(test)]
mod tests {
	use super::uniform_count;
	use crate::{
		Instruction, Op, Program, Reg, RegFile, Stage, Uniform, UniformContents, Validator,
	};

	#[test]
	fn nine_uniforms_lower_to_one_read_per_instruction() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let uniforms = (0..9)
			.map(|i| program.uniform(UniformContents::User, i))
			.collect::<Vec<_>>();

		let mut acc = program.def(entry, Op::Fadd, &[uniforms[0], uniforms[1]]);
		for pair in uniforms[2..].chunks(2) {
			let sum = match pair {
				[a, b] => program.def(entry, Op::Fadd, &[*a, *b]),
				[a] => program.def(entry, Op::Fadd, &[*a, acc]),
				_ => unreachable!(),
			};
			acc = program.def(entry, Op::Fadd, &[acc, sum]);
		}
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbColorWrite, 0), acc));

		program.lower_uniforms();

		for (_, inst) in program.instructions() {
			assert!(uniform_count(inst) <= 1, "{inst}");
		}

		let loads = program.blocks[0]
			.instructions
			.iter()
			.take_while(|inst| inst.op == Op::Mov && inst.src[0].file == RegFile::Unif)
			.count();
		assert_eq!(loads, 4);
		assert_eq!(Validator::run(&program), Ok(()));
	}

	#[test]
	fn duplicate_reads_do_not_need_lowering() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let u = program.uniform_f(2.0);
		program.def(entry, Op::Fmul, &[u, u]);

		program.lower_uniforms();

		assert_eq!(program.instruction_count(), 1);
	}

	#[test]
	fn texture_sideband_is_never_lowered() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let coord = program.uniform_f(0.5);
		let config = program.uniform(UniformContents::TextureConfigP0, 0);
		program.push(
			entry,
			Instruction::mov(Reg::new(RegFile::TexS, 0), coord).with_tex_uniform(config),
		);

		program.lower_uniforms();

		let tex = program.blocks[0].instructions[1];
		assert_eq!(tex.src[1], config);
		assert_eq!(tex.src[0].file, RegFile::Temp);
	}

	#[test]
	fn stream_resets_rewind_to_the_block_position() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let next = program.add_block();
		program.set_successors(entry, [Some(next), None]);

		let a = program.uniform_ui(7);
		let b = program.uniform_ui(9);
		let t = program.def(entry, Op::Mov, &[a]);
		program.def(entry, Op::Add, &[t, b]);
		program.def(next, Op::Add, &[t, a]);

		program.emit_uniform_stream_resets();

		let block = &program.blocks[1].instructions;
		assert_eq!(block[0].op, Op::LoadImm);
		assert_eq!(block[0].src[0], Reg::load_imm(12));
		assert_eq!(block[1].op, Op::UniformsReset);
		assert_eq!(block[1].src[0], block[0].dst);
		assert_eq!(
			program.uniforms.get(block[1].src[1].index),
			Some(Uniform::new(UniformContents::UniformsAddress, 0))
		);
		assert_eq!(program.blocks[0].len(), 2);
	}

	#[test]
	fn reorder_follows_program_order() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let a = program.uniform_ui(1);
		let b = program.uniform_ui(2);
		program.def(entry, Op::Mov, &[b]);
		program.def(entry, Op::Add, &[a, a]);
		program.def(entry, Op::Mov, &[b]);

		program.reorder_uniforms();

		assert_eq!(program.uniforms.constants(), Some(vec![2, 1, 2]));
		let srcs = program
			.instructions()
			.map(|(_, inst)| inst.src[0].index)
			.collect::<Vec<_>>();
		assert_eq!(srcs, [0, 1, 2]);
		assert_eq!(program.blocks[0].instructions[1].src[1], Reg::unif(1));
	}
}
