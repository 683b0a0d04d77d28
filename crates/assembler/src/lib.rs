#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg))]

mod emit;
mod error;
mod flags;
mod regalloc;
mod schedule;
mod validate;

use std::{
	fmt::{Display, Formatter, Result as FmtResult},
	ops::Range,
};

use qpuc_qir::{Liveness, Op, Program, UniformTable, Validator, opt::Optimizer};
use serde::{Deserialize, Serialize};
use tracing::{Span, info, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt as _;

pub use self::{emit::*, error::*, flags::*, regalloc::*, schedule::*, validate::*};

/// Points in the pipeline where the program can be inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrStage {
	Unoptimized,
	Optimized,
	/// After uniform lowering and block scheduling, right before allocation.
	Scheduled,
}

impl IrStage {
	#[must_use]
	pub const fn name(self) -> &'static str {
		match self {
			Self::Unoptimized => "unoptimized",
			Self::Optimized => "optimized",
			Self::Scheduled => "scheduled",
		}
	}
}

impl Display for IrStage {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(self.name())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledProgram {
	pub words: Vec<u64>,
	pub blocks: Vec<Range<usize>>,
	pub uniforms: UniformTable,
	/// Whether the program was allocated for two threads per QPU.
	pub threaded: bool,
	pub cycles: u32,
}

impl AssembledProgram {
	/// The words as they are laid out in memory.
	#[must_use]
	pub fn to_le_bytes(&self) -> Vec<u8> {
		self.words.iter().flat_map(|word| word.to_le_bytes()).collect()
	}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Assembler {
	flags: AssemblerFlags,
}

impl Assembler {
	const STEPS: u64 = 7;

	#[must_use]
	pub const fn new(flags: AssemblerFlags) -> Self {
		Self { flags }
	}

	#[must_use]
	pub const fn flags(&self) -> AssemblerFlags {
		self.flags
	}

	pub fn assemble(&self, program: Program) -> Result<AssembledProgram, AssemblyError> {
		self.assemble_with(program, |_, _| {})
	}

	/// Compiles `program`, handing it to `inspect` between stages.
	///
	/// Fragment shaders are first allocated for two threads when the flags
	/// allow it. If that runs out of registers, the program is compiled again
	/// single threaded with its thread switches removed.
	#[tracing::instrument(
		"assemble",
		skip_all,
		fields(stage = %program.stage, indicatif.pb_show = tracing::field::Empty)
	)]
	pub fn assemble_with(
		&self,
		mut program: Program,
		mut inspect: impl FnMut(IrStage, &Program),
	) -> Result<AssembledProgram, AssemblyError> {
		let span = Span::current();
		span.pb_set_length(Self::STEPS);

		program.threaded = self.flags.threaded && program.stage.is_fragment();
		program.refresh_defs();
		inspect(IrStage::Unoptimized, &program);

		if self.flags.optimize {
			info!("optimizing qir");
			Optimizer::optimize(&mut program);
		}
		span.pb_inc(1);

		Validator::run(&program)?;
		inspect(IrStage::Optimized, &program);
		span.pb_inc(1);

		if !program.threaded {
			return self.compile(program, &mut inspect);
		}

		match self.compile(program.clone(), &mut inspect) {
			Err(AssemblyError::Allocation(e)) => {
				warn!(error = %e, "threaded allocation failed, retrying single threaded");

				program.threaded = false;
				for block in &mut program.blocks {
					block.instructions.retain(|inst| !matches!(inst.op, Op::Thrsw));
				}
				program.refresh_defs();

				self.compile(program, &mut inspect).map_err(|e| match e {
					AssemblyError::Allocation(e) => AssemblyError::ThreadedFallbackFailed(e),
					e => e,
				})
			}
			result => result,
		}
	}

	fn compile(
		&self,
		mut program: Program,
		inspect: &mut impl FnMut(IrStage, &Program),
	) -> Result<AssembledProgram, AssemblyError> {
		let span = Span::current();

		info!(threaded = program.threaded, "lowering uniforms");
		program.lower_uniforms();
		program.schedule_instructions();
		program.emit_uniform_stream_resets();
		program.reorder_uniforms();
		inspect(IrStage::Scheduled, &program);
		span.pb_inc(1);

		Liveness::compute(&mut program);
		span.pb_inc(1);

		info!("allocating registers");
		let allocation = RegisterAllocator::run(&program)?;
		span.pb_inc(1);

		info!("emitting qpu code");
		let emitted = Emitter::new(&program, &allocation).emit();
		let scheduled = PostScheduler::new(&program).run(&emitted);
		span.pb_inc(1);

		if self.flags.validate {
			info!("validating qpu code");
			HardwareValidator::run(&scheduled.words, program.threaded)?;
		}
		span.pb_inc(1);

		info!(
			words = scheduled.words.len(),
			uniforms = scheduled.uniforms.len(),
			cycles = scheduled.cycles,
			"assembled program"
		);

		Ok(AssembledProgram {
			words: scheduled.words.iter().map(|word| word.0).collect(),
			blocks: scheduled.blocks,
			uniforms: scheduled.uniforms,
			threaded: program.threaded,
			cycles: scheduled.cycles,
		})
	}
}

#[cfg(test)]
mod tests {
	use qpuc_qir::{InputSlot, Instruction, Op, Program, Reg, RegFile, Stage};
	use qpuc_qpu::{QpuInst, Sig};

	use super::{Assembler, AssemblerFlags, AssemblyError, IrStage};

	fn tlb_color() -> Reg {
		Reg::new(RegFile::TlbColorWrite, 0)
	}

	fn flags() -> AssemblerFlags {
		AssemblerFlags::new().with_optimize(false).with_validate(true)
	}

	/// Reads `count` varyings before a thread switch and sums them in reverse
	/// afterwards, so every one of them is live across the switch.
	fn varying_sum(count: u32) -> Program {
		let mut program = Program::new(Stage::Fragment);
		program.input_slots = vec![InputSlot::default(); count as usize];
		let entry = program.entry_block();

		let values = (0..count)
			.map(|i| program.def(entry, Op::Fmov, &[Reg::vary(i)]))
			.collect::<Vec<_>>();
		program.push(entry, Instruction::thrsw());

		let mut sum = values[values.len() - 1];
		for value in values.iter().rev().skip(1) {
			sum = program.def(entry, Op::Fadd, &[sum, *value]);
		}
		program.push(entry, Instruction::mov(tlb_color(), sum));

		program
	}

	#[test]
	fn fragment_shader_ends_cleanly() -> Result<(), AssemblyError> {
		let mut program = Program::new(Stage::Fragment);
		program.input_slots = vec![InputSlot::default()];
		let entry = program.entry_block();
		let two = program.uniform_f(2.0);
		let x = program.def(entry, Op::Fmov, &[Reg::vary(0)]);
		let y = program.def(entry, Op::Fmul, &[x, two]);
		program.push(entry, Instruction::mov(tlb_color(), y));

		let assembled = Assembler::new(flags().with_threaded(false)).assemble(program)?;
		let words = assembled
			.words
			.iter()
			.map(|&word| QpuInst(word))
			.collect::<Vec<_>>();

		assert!(!assembled.threaded);
		assert_eq!(assembled.blocks, vec![0..words.len()]);
		assert_eq!(assembled.uniforms.len(), 1);
		assert_eq!(assembled.to_le_bytes().len(), words.len() * 8);

		let end = words.len() - 3;
		assert!(matches!(words[end].sig(), Sig::ProgEnd));
		assert!(matches!(words[end + 2].sig(), Sig::ScoreboardUnlock));
		assert!(!words[..2].iter().any(|word| word.is_tlb()));

		Ok(())
	}

	#[test]
	fn stages_are_inspected_in_order() -> Result<(), AssemblyError> {
		let mut program = Program::new(Stage::Vertex);
		let entry = program.entry_block();
		let one = program.uniform_f(1.0);
		let x = program.def(entry, Op::Fmov, &[one]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::Vpm, 0), x));

		let mut stages = Vec::new();
		Assembler::new(flags()).assemble_with(program, |stage, _| stages.push(stage))?;

		assert_eq!(
			stages,
			[IrStage::Unoptimized, IrStage::Optimized, IrStage::Scheduled]
		);

		Ok(())
	}

	#[test]
	fn threaded_allocation_falls_back() -> Result<(), AssemblyError> {
		let mut stages = Vec::new();
		let assembled = Assembler::new(flags().with_threaded(true))
			.assemble_with(varying_sum(40), |stage, program| {
				if matches!(stage, IrStage::Scheduled) {
					stages.push(program.threaded);
				}
			})?;

		assert!(!assembled.threaded);
		assert_eq!(stages, [true, false]);

		let switches = assembled
			.words
			.iter()
			.filter(|&&word| QpuInst(word).sig().is_thread_switch())
			.count();
		assert_eq!(switches, 0);

		Ok(())
	}

	#[test]
	fn hopeless_programs_report_failure() {
		let threaded = Assembler::new(flags().with_threaded(true)).assemble(varying_sum(80));
		assert!(matches!(
			threaded,
			Err(AssemblyError::ThreadedFallbackFailed(..))
		));

		let single = Assembler::new(flags().with_threaded(false)).assemble(varying_sum(80));
		assert!(matches!(single, Err(AssemblyError::Allocation(..))));
	}
}
