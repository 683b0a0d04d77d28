mod algebraic;
mod coalesce_ff_writes;
mod constant_folding;
mod copy_propagation;
mod dead_code;
mod peephole_sf;
mod small_immediates;
mod vpm;

use tracing::{debug, info, trace};

pub use self::{
	algebraic::*, coalesce_ff_writes::*, constant_folding::*, copy_propagation::*, dead_code::*,
	peephole_sf::*, small_immediates::*, vpm::*,
};
use super::{Instruction, Program};

pub trait Pass {
	fn name(&self) -> &'static str;

	/// Rewrites the program, returning whether anything changed.
	///
	/// [`Program::defs`] is up to date when this is called.
	fn run(&mut self, program: &mut Program) -> bool;
}

/// Refreshes the def table and runs a single pass.
pub fn run_pass(program: &mut Program, pass: &mut impl Pass) -> bool {
	program.refresh_defs();

	debug!(
		"running pass {} with {} instructions",
		pass.name(),
		program.instruction_count()
	);

	let progress = pass.run(program);

	if progress {
		debug!(
			"pass {} made progress, {} instructions remain",
			pass.name(),
			program.instruction_count()
		);
	}

	progress
}

/// Rebuilds every block, replacing each instruction `rewrite` returns a new
/// version of. The program seen by `rewrite` is the one before the pass.
pub(crate) fn rewrite_each(
	program: &mut Program,
	mut rewrite: impl FnMut(&mut Program, &Instruction) -> Option<Instruction>,
) -> bool {
	let mut progress = false;

	for block in 0..program.blocks.len() {
		let mut rebuilt = Vec::with_capacity(program.blocks[block].instructions.len());

		for index in 0..program.blocks[block].instructions.len() {
			let inst = program.blocks[block].instructions[index];

			match rewrite(program, &inst) {
				Some(new) => {
					trace!(from = %inst, to = %new, "rewrote instruction");
					progress = true;
					rebuilt.push(new);
				}
				None => rebuilt.push(inst),
			}
		}

		program.blocks[block].instructions = rebuilt;
	}

	progress
}

/// The closest instruction before `before` writing `temp`.
pub(crate) fn find_def(insts: &[Instruction], before: usize, temp: u32) -> Option<usize> {
	insts[..before]
		.iter()
		.rposition(|inst| inst.dst.is_temp_index(temp))
}

/// Whether any instruction in `range` writes a temp that `inst` reads.
pub(crate) fn sources_written(
	insts: &[Instruction],
	range: std::ops::Range<usize>,
	inst: &Instruction,
) -> bool {
	insts[range].iter().any(|other| {
		other
			.dst
			.as_temp()
			.is_some_and(|temp| inst.reads_temp(temp))
	})
}

pub struct Optimizer;

impl Optimizer {
	/// Runs every pass until none of them makes progress, returning the number
	/// of iterations that made progress.
	#[tracing::instrument("optimize qir", skip(program))]
	pub fn optimize(program: &mut Program) -> usize {
		let mut iteration = 0;

		let mut progress = Self::run_passes(program, iteration);

		while progress {
			iteration += 1;
			progress = Self::run_passes(program, iteration);
		}

		info!(
			iterations = iteration,
			instructions = program.instruction_count(),
			temps = program.num_temps,
			uniforms = program.uniforms.len()
		);

		iteration
	}

	#[tracing::instrument(skip(program))]
	fn run_passes(program: &mut Program, iteration: usize) -> bool {
		let mut progress = false;

		Self::run_each_pass(program, &mut progress);

		progress
	}

	fn run_each_pass(program: &mut Program, progress: &mut bool) {
		*progress |= run_pass(program, &mut Algebraic);
		*progress |= run_pass(program, &mut ConstantFolding);
		*progress |= run_pass(program, &mut CopyPropagation);
		*progress |= run_pass(program, &mut PeepholeSf);
		*progress |= run_pass(program, &mut DeadCode);
		*progress |= run_pass(program, &mut SmallImmediates);
		*progress |= run_pass(program, &mut VpmForwarding);
		*progress |= run_pass(program, &mut CoalesceFfWrites);
	}
}

#[cfg(test)]
mod tests {
	use super::Optimizer;
	use crate::{Instruction, Op, Program, Reg, RegFile, Stage};

	#[test]
	fn multiply_then_add_zero_folds_to_the_multiply() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let two = program.uniform_f(2.0);
		let zero = program.uniform_f(0.0);
		let x = program.def(entry, Op::FragZ, &[]);
		let t0 = program.def(entry, Op::Fmul, &[two, x]);
		let y = program.def(entry, Op::Fadd, &[t0, zero]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbZWrite, 0), y));

		Optimizer::optimize(&mut program);

		let insts = &program.blocks[0].instructions;
		assert_eq!(insts.len(), 2, "{program}");
		assert_eq!(insts[0].op, Op::FragZ);
		assert_eq!(insts[1].op, Op::Fmul);
		assert_eq!(insts[1].dst.file, RegFile::TlbZWrite);
		assert_eq!(insts[1].src[0], Reg::small_imm(2.0f32.to_bits()));
		assert_eq!(insts[1].src[1], x);
	}

	#[test]
	fn optimizing_twice_makes_no_progress() {
		let mut program = Program::new(Stage::Vertex);
		program.num_inputs = 2;
		let entry = program.entry_block();
		let one = program.uniform_f(1.0);
		let scale = program.uniform(crate::UniformContents::ViewportXScale, 0);
		let a = program.def(entry, Op::Mov, &[Reg::new(RegFile::Vpm, 0)]);
		let b = program.def(entry, Op::Mov, &[Reg::new(RegFile::Vpm, 0)]);
		let c = program.def(entry, Op::Fmul, &[a, one]);
		let d = program.def(entry, Op::Fmul, &[b, scale]);
		let e = program.def(entry, Op::Fadd, &[c, d]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::Vpm, 0), e));

		Optimizer::optimize(&mut program);
		let first = program.blocks.clone();

		assert_eq!(Optimizer::optimize(&mut program), 0);
		assert_eq!(program.blocks, first);
	}
}
