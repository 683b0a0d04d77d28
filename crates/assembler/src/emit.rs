use qpuc_qir::{BlockId, Instruction, Op, Program, Reg, RegFile};
use qpuc_qpu::{
	AddOp, Cond, Field, LoadImmMode, MulOp, QpuInst, QpuMux, QpuReg, RAddr, Sig, SmallImm, WAddr,
};
use tracing::{debug, trace};

use super::{Allocation, RADDR_CONFLICT_SCRATCH};

/// A word waiting to be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedInst {
	pub inst: QpuInst,
	/// The uniform slot this word consumes.
	pub uniform: Option<u32>,
	/// Where a branch word jumps to.
	pub branch_target: Option<BlockId>,
}

impl QueuedInst {
	#[must_use]
	pub const fn new(inst: QpuInst) -> Self {
		Self {
			inst,
			uniform: None,
			branch_target: None,
		}
	}
}

#[derive(Debug, Clone, Copy)]
enum AluOp {
	Add(AddOp),
	Mul(MulOp),
}

const fn translate(op: Op) -> Option<AluOp> {
	Some(match op {
		Op::Mov => AluOp::Add(AddOp::Or),
		Op::Fmov => AluOp::Add(AddOp::Fmax),
		Op::Mmov => AluOp::Mul(MulOp::V8Min),
		Op::Fadd => AluOp::Add(AddOp::Fadd),
		Op::Fsub => AluOp::Add(AddOp::Fsub),
		Op::Fmul => AluOp::Mul(MulOp::Fmul),
		Op::V8Muld => AluOp::Mul(MulOp::V8Muld),
		Op::V8Min => AluOp::Mul(MulOp::V8Min),
		Op::V8Max => AluOp::Mul(MulOp::V8Max),
		Op::V8Adds => AluOp::Mul(MulOp::V8Adds),
		Op::V8Subs => AluOp::Mul(MulOp::V8Subs),
		Op::Mul24 => AluOp::Mul(MulOp::Mul24),
		Op::Fmin => AluOp::Add(AddOp::Fmin),
		Op::Fmax => AluOp::Add(AddOp::Fmax),
		Op::FminAbs => AluOp::Add(AddOp::FminAbs),
		Op::FmaxAbs => AluOp::Add(AddOp::FmaxAbs),
		Op::Add => AluOp::Add(AddOp::Add),
		Op::Sub => AluOp::Add(AddOp::Sub),
		Op::Shl => AluOp::Add(AddOp::Shl),
		Op::Shr => AluOp::Add(AddOp::Shr),
		Op::Asr => AluOp::Add(AddOp::Asr),
		Op::Min | Op::MinNoImm => AluOp::Add(AddOp::Min),
		Op::Max => AluOp::Add(AddOp::Max),
		Op::And => AluOp::Add(AddOp::And),
		Op::Or => AluOp::Add(AddOp::Or),
		Op::Xor => AluOp::Add(AddOp::Xor),
		Op::Not => AluOp::Add(AddOp::Not),
		Op::Ftoi => AluOp::Add(AddOp::Ftoi),
		Op::Itof => AluOp::Add(AddOp::Itof),
		_ => return None,
	})
}

/// Whether a regfile read can be moved to the other file's port for free.
const fn swap_file(src: &mut QpuReg) -> bool {
	if src.addr != RAddr::UNIF.0 && src.addr != RAddr::VARY.0 {
		return false;
	}

	match src.mux {
		QpuMux::A => src.mux = QpuMux::B,
		QpuMux::B => src.mux = QpuMux::A,
		_ => return false,
	}

	true
}

/// The QPU words of every block, before scheduling.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EmittedProgram {
	pub blocks: Vec<Vec<QueuedInst>>,
}

impl EmittedProgram {
	#[must_use]
	pub fn len(&self) -> usize {
		self.blocks.iter().map(Vec::len).sum()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Translates QIR into unscheduled QPU words using the allocated registers.
pub struct Emitter<'a> {
	program: &'a Program,
	allocation: &'a Allocation,
	inputs_remaining: u32,
	inputs_in_fifo: u32,
	vpm_read_offset: u32,
	last_thrsw: Option<(usize, usize)>,
	queue: Vec<QueuedInst>,
}

impl<'a> Emitter<'a> {
	#[must_use]
	pub const fn new(program: &'a Program, allocation: &'a Allocation) -> Self {
		Self {
			program,
			allocation,
			inputs_remaining: program.num_inputs,
			inputs_in_fifo: 0,
			vpm_read_offset: 0,
			last_thrsw: None,
			queue: Vec::new(),
		}
	}

	#[tracing::instrument("emit qpu code", skip(self))]
	pub fn emit(mut self) -> EmittedProgram {
		let mut blocks = Vec::with_capacity(self.program.blocks.len());

		for (index, block) in self.program.blocks.iter().enumerate() {
			if index == 0 && !self.program.stage.is_fragment() {
				self.push(QpuInst::load_imm(QpuReg::vwsetup(), 0x1a00, LoadImmMode::U32));
			}

			for inst in &block.instructions {
				let start = self.queue.len();
				self.emit_inst(inst, block.successors[0]);

				if matches!(inst.op, Op::Thrsw) {
					self.last_thrsw = Some((index, self.queue.len() - 1));
				}

				if let Some(uniform) = inst.srcs().iter().find(|src| matches!(src.file, RegFile::Unif)) {
					if let Some(queued) = self.queue[start..]
						.iter_mut()
						.find(|queued| queued.inst.reads_uniform())
					{
						queued.uniform = Some(uniform.index);
					}
				}

				for queued in &self.queue[start..] {
					trace!(qir = %inst, qpu = %queued.inst, "emitted");
				}
			}

			blocks.push(std::mem::take(&mut self.queue));
		}

		if let Some((block, index)) = self.last_thrsw {
			blocks[block][index].inst.set_sig(Sig::LastThreadSwitch);
		}

		let emitted = EmittedProgram { blocks };

		debug!(words = emitted.len(), "emitted qpu code");

		emitted
	}

	fn push(&mut self, inst: QpuInst) {
		self.queue.push(QueuedInst::new(inst));
	}

	fn last(&mut self) -> &mut QpuInst {
		let Some(last) = self.queue.last_mut() else {
			unreachable!("no instruction queued");
		};

		&mut last.inst
	}

	fn setup_for_vpm_read(&mut self) {
		if self.inputs_in_fifo > 0 {
			self.inputs_in_fifo -= 1;
			return;
		}

		self.inputs_in_fifo = self.inputs_remaining.clamp(1, 16);

		let setup = self.vpm_read_offset | 0x1a00 | ((self.inputs_in_fifo & 0xf) << 20);
		self.push(QpuInst::load_imm(QpuReg::vrsetup(), setup, LoadImmMode::U32));

		self.vpm_read_offset += self.inputs_in_fifo;
		self.inputs_remaining = self.inputs_remaining.saturating_sub(self.inputs_in_fifo);
		self.inputs_in_fifo -= 1;
	}

	fn source(&mut self, src: Reg, unpack: &mut u8, pm: &mut bool) -> QpuReg {
		match src.file {
			RegFile::Null | RegFile::LoadImm => QpuReg::r(0),
			RegFile::Temp => {
				let reg = self.allocation[src.index];

				if src.pack != 0 {
					debug_assert!(*unpack == 0 || *unpack == src.pack, "conflicting unpacks");
					*unpack = src.pack;
					if matches!(reg.mux, QpuMux::R4) {
						*pm = true;
					}
				}

				reg
			}
			RegFile::Unif => QpuReg::unif(),
			RegFile::Vary => QpuReg::vary(),
			RegFile::SmallImm => {
				let Some(imm) = SmallImm::encode(src.index) else {
					unreachable!("unencodable small immediate {:#x}", src.index);
				};

				QpuReg::small_imm(imm)
			}
			RegFile::Vpm => {
				self.setup_for_vpm_read();
				QpuReg::ra(RAddr::VPM.0)
			}
			RegFile::FragX => QpuReg::ra(RAddr::XY_PIXEL_COORD.0),
			RegFile::FragY => QpuReg::rb(RAddr::XY_PIXEL_COORD.0),
			RegFile::FragRevFlag => QpuReg::rb(RAddr::MS_REV_FLAGS.0),
			RegFile::QpuElement => QpuReg::ra(RAddr::ELEM_QPU.0),
			file => unreachable!("{file:?} is not readable"),
		}
	}

	fn destination(&self, dst: Reg) -> QpuReg {
		match dst.file {
			RegFile::Null => QpuReg::nop(),
			RegFile::Temp => self.allocation[dst.index],
			RegFile::Vpm => QpuReg::ra(WAddr::VPM.0),
			RegFile::TlbColorWrite => QpuReg::ra(WAddr::TLB_COLOR_ALL.0),
			RegFile::TlbColorWriteMs => QpuReg::ra(WAddr::TLB_COLOR_MS.0),
			RegFile::TlbZWrite => QpuReg::ra(WAddr::TLB_Z.0),
			RegFile::TlbStencilSetup => QpuReg::ra(WAddr::TLB_STENCIL_SETUP.0),
			RegFile::TexS | RegFile::TexSDirect => QpuReg::rb(WAddr::TMU0_S.0),
			RegFile::TexT => QpuReg::rb(WAddr::TMU0_T.0),
			RegFile::TexR => QpuReg::rb(WAddr::TMU0_R.0),
			RegFile::TexB => QpuReg::rb(WAddr::TMU0_B.0),
			file => unreachable!("{file:?} is not writable"),
		}
	}

	/// Reading two different addresses of the same file needs one of them
	/// moved to the other file first.
	fn fixup_raddr_conflict(
		&mut self,
		inst: &Instruction,
		src0: &mut QpuReg,
		src1: &mut QpuReg,
		unpack: &mut u8,
	) {
		let (mux0, mux1) = (src0.mux.mux(), src1.mux.mux());

		if mux0.is_accumulator()
			|| mux0 != mux1
			|| (src0.addr == src1.addr && src0.mux == src1.mux)
		{
			return;
		}

		if swap_file(src0) || swap_file(src1) {
			return;
		}

		if matches!(src0.mux, QpuMux::A) {
			let scratch = QpuReg::rb(RADDR_CONFLICT_SCRATCH);
			let mov = if inst.is_float_input() {
				QpuInst::a_alu2(AddOp::Fmax, scratch, *src0, *src0)
			} else {
				QpuInst::a_mov(scratch, *src0)
			};
			self.push(mov);

			// Unpacks only apply to regfile A reads, so src0's has to happen on
			// the way into the scratch register.
			if inst.src[0].pack != 0 {
				self.last().set(Field::UNPACK, (*unpack).into());
				if inst.src[1].pack == 0 {
					*unpack = 0;
				}
			}

			*src0 = scratch;
		} else {
			let scratch = QpuReg::ra(RADDR_CONFLICT_SCRATCH);
			self.push(QpuInst::a_mov(scratch, *src0));
			*src0 = scratch;
		}
	}

	/// Copies an r4 result into the destination unless it was allocated to r4.
	fn move_from_r4(&mut self, inst: &Instruction, dst: QpuReg) {
		if matches!(dst.mux, QpuMux::R4) {
			debug_assert!(matches!(inst.cond, Cond::Always), "conditional write to r4");
			return;
		}

		self.push(QpuInst::a_mov(dst, QpuReg::r4()));
		self.last().set_cond_add(inst.cond);
	}

	fn signal_word(&mut self, sig: Sig) {
		let mut nop = QpuInst::nop();
		nop.set_sig(sig);
		self.push(nop);
	}

	fn emit_inst(&mut self, inst: &Instruction, branch_target: Option<BlockId>) {
		let mut unpack = 0u8;
		let mut pm = false;
		let mut src = [QpuReg::r(0); 3];

		let nsrc = inst.non_sideband_nsrc();
		for i in 0..nsrc {
			if matches!(inst.op, Op::RotMul) && i == 1 {
				continue;
			}

			src[i] = self.source(inst.src[i], &mut unpack, &mut pm);
		}

		let dst = self.destination(inst.dst);
		let [mut src0, mut src1, _] = src;

		// Cond has been applied to the right half already.
		let mut handled_cond = false;

		match inst.op {
			Op::Rcp | Op::Rsq | Op::Exp2 | Op::Log2 => {
				let waddr = match inst.op {
					Op::Rcp => WAddr::SFU_RECIP,
					Op::Rsq => WAddr::SFU_RECIPSQRT,
					Op::Exp2 => WAddr::SFU_EXP,
					_ => WAddr::SFU_LOG,
				};

				self.push(QpuInst::a_mov(QpuReg::rb(waddr.0), src0));
				self.apply_unpack(unpack, pm);
				self.move_from_r4(inst, dst);
				handled_cond = true;
			}
			Op::LoadImm | Op::LoadImmU2 | Op::LoadImmI2 => {
				let mode = match inst.op {
					Op::LoadImmU2 => LoadImmMode::PerElementUnsigned,
					Op::LoadImmI2 => LoadImmMode::PerElementSigned,
					_ => LoadImmMode::U32,
				};

				self.push(QpuInst::load_imm(dst, inst.src[0].index, mode));
			}
			Op::MsMask => {
				src1 = QpuReg::ra(RAddr::MS_REV_FLAGS.0);
				self.fixup_raddr_conflict(inst, &mut src0, &mut src1, &mut unpack);
				self.push(QpuInst::a_alu2(
					AddOp::And,
					QpuReg::ra(WAddr::MS_FLAGS.0),
					src0,
					src1,
				));
				self.apply_unpack(unpack, pm);
			}
			Op::FragZ | Op::FragW => return,
			Op::TlbColorRead | Op::TexResult => {
				let sig = if matches!(inst.op, Op::TexResult) {
					Sig::LoadTmu0
				} else {
					Sig::ColorLoad
				};

				self.signal_word(sig);
				self.move_from_r4(inst, dst);
				handled_cond = true;
			}
			Op::VaryAddC => {
				self.push(QpuInst::a_alu2(AddOp::Fadd, dst, src0, QpuReg::r5()));
				self.apply_unpack(unpack, pm);
			}
			Op::Thrsw => {
				self.signal_word(Sig::ThreadSwitch);
				handled_cond = true;
			}
			Op::Branch => {
				self.queue.push(QueuedInst {
					inst: QpuInst::branch(inst.branch_cond, 0),
					uniform: None,
					branch_target,
				});
				return;
			}
			Op::UniformsReset => {
				self.fixup_raddr_conflict(inst, &mut src0, &mut src1, &mut unpack);
				self.push(QpuInst::a_alu2(
					AddOp::Add,
					QpuReg::ra(WAddr::UNIFORMS_ADDRESS.0),
					src0,
					src1,
				));
				self.apply_unpack(unpack, pm);
			}
			Op::RotMul => {
				let rotation = SmallImm::from_code(inst.src[1].index as u8);
				self.push(QpuInst::m_rot(dst, src0, rotation));
				self.apply_unpack(unpack, pm);
			}
			op => {
				let Some(alu) = translate(op) else {
					unreachable!("{op:?} has no ALU encoding");
				};

				if inst.is_raw_mov() && !inst.sf && dst == src0 {
					return;
				}

				if nsrc == 1 {
					src1 = src0;
				}

				self.fixup_raddr_conflict(inst, &mut src0, &mut src1, &mut unpack);

				match alu {
					AluOp::Mul(op) => {
						self.push(QpuInst::m_alu2(op, dst, src0, src1));
						if inst.dst.pack != 0 {
							self.last().set(Field::PACK, inst.dst.pack.into());
							pm = true;
						}
					}
					AluOp::Add(op) => {
						self.push(QpuInst::a_alu2(op, dst, src0, src1));
						if inst.dst.pack != 0 {
							self.last().set(Field::PACK, inst.dst.pack.into());
						}
					}
				}

				self.apply_unpack(unpack, pm);
			}
		}

		if !handled_cond {
			let cond = inst.cond;
			if inst.is_mul() {
				self.last().set_cond_mul(cond);
			} else {
				self.last().set_cond_add(cond);
			}
		}

		if inst.sf {
			self.last().set_sf(true);
		}
	}

	fn apply_unpack(&mut self, unpack: u8, pm: bool) {
		let last = self.last();

		if unpack != 0 {
			last.set(Field::UNPACK, unpack.into());
		}

		if pm {
			last.set(Field::PM, 1);
		}
	}
}

#[cfg(test)]
mod tests {
	use qpuc_qir::{Instruction, Liveness, Op, Program, Reg, RegFile, Stage};
	use qpuc_qpu::{AddOp, BranchCond, Field, LoadImmMode, QpuInst, QpuReg, RAddr, Sig, WAddr};

	use super::{EmittedProgram, Emitter};
	use crate::RegisterAllocator;

	fn emit(program: &mut Program) -> EmittedProgram {
		Liveness::compute(program);
		let allocation = RegisterAllocator::run(program).unwrap();
		Emitter::new(program, &allocation).emit()
	}

	fn words(emitted: &EmittedProgram) -> Vec<QpuInst> {
		emitted.blocks.iter().flatten().map(|queued| queued.inst).collect()
	}

	#[test]
	fn sfu_result_left_in_r4() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let one = program.uniform_f(2.0);
		let x = program.def(entry, Op::Fmov, &[one]);
		let y = program.def(entry, Op::Rcp, &[x]);
		program.push(entry, Instruction::mov(Reg::new(RegFile::TlbColorWrite, 0), y));

		let words = words(&emit(&mut program));

		assert_eq!(words.len(), 3);
		assert_eq!(words[1].waddr_add(), WAddr::SFU_RECIP);
		assert_eq!(words[2].waddr_add(), WAddr::TLB_COLOR_ALL);
		assert!(words[2].reads_mux(qpuc_qpu::Mux::R4));
	}

	#[test]
	fn uniform_and_varying_reads_swap_files() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let u = program.uniform_f(1.0);
		program.push(
			entry,
			Instruction::alu2(Op::Fadd, Reg::new(RegFile::TlbColorWrite, 0), u, Reg::vary(0)),
		);

		let emitted = emit(&mut program);
		let words = words(&emitted);

		assert_eq!(words.len(), 1);
		assert_eq!(words[0].raddr_b(), RAddr::UNIF);
		assert_eq!(words[0].raddr_a(), RAddr::VARY);
		assert_eq!(emitted.blocks[0][0].uniform, Some(0));
	}

	#[test]
	fn regfile_a_conflicts_go_through_scratch() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		program.push(
			entry,
			Instruction::alu1(Op::MsMask, Reg::NULL, Reg::new(RegFile::FragX, 0)),
		);

		let words = words(&emit(&mut program));

		assert_eq!(words.len(), 2);
		assert_eq!(words[0], QpuInst::a_mov(QpuReg::rb(14), QpuReg::ra(41)));
		assert_eq!(words[1].op_add(), Some(AddOp::And));
		assert_eq!(words[1].waddr_add(), WAddr::MS_FLAGS);
		assert_eq!(words[1].raddr_a(), RAddr::MS_REV_FLAGS);
		assert_eq!(words[1].raddr_b().0, 14);
	}

	#[test]
	fn vertex_shaders_set_up_the_vpm() {
		let mut program = Program::new(Stage::Vertex);
		program.num_inputs = 3;
		let entry = program.entry_block();
		let mut sum = program.def(entry, Op::Mov, &[Reg::new(RegFile::Vpm, 0)]);
		for _ in 0..2 {
			let attr = program.def(entry, Op::Mov, &[Reg::new(RegFile::Vpm, 0)]);
			sum = program.def(entry, Op::Fadd, &[sum, attr]);
		}
		program.push(entry, Instruction::mov(Reg::new(RegFile::Vpm, 0), sum));

		let words = words(&emit(&mut program));

		let setups = words
			.iter()
			.filter(|word| word.sig() == Sig::LoadImm)
			.collect::<Vec<_>>();
		assert_eq!(setups.len(), 2);
		assert_eq!(
			*setups[0],
			QpuInst::load_imm(QpuReg::vwsetup(), 0x1a00, LoadImmMode::U32)
		);
		assert_eq!(*setups[1], QpuInst::load_imm(QpuReg::vrsetup(), 0x1a00 | (3 << 20), LoadImmMode::U32));
		assert_eq!(setups[1].get(Field::WS), 0);
	}

	#[test]
	fn last_thread_switch_is_marked() {
		let mut program = Program::new(Stage::Fragment);
		program.threaded = true;
		let entry = program.entry_block();
		program.push(entry, Instruction::thrsw());
		program.push(entry, Instruction::thrsw());

		let words = words(&emit(&mut program));

		assert_eq!(words[0].sig(), Sig::ThreadSwitch);
		assert_eq!(words[1].sig(), Sig::LastThreadSwitch);
	}

	#[test]
	fn branches_remember_their_target() {
		let mut program = Program::new(Stage::Fragment);
		let entry = program.entry_block();
		let exit = program.add_block();
		let one = program.uniform_ui(1);
		program.push(entry, Instruction::alu1(Op::Mov, Reg::NULL, one).with_sf());
		program.push(entry, Instruction::branch(BranchCond::AllZs));
		program.set_successors(entry, [Some(exit), Some(exit)]);

		let emitted = emit(&mut program);
		let branch = emitted.blocks[0][1];

		assert_eq!(branch.inst.sig(), Sig::Branch);
		assert_eq!(branch.inst.branch_cond(), Some(BranchCond::AllZs));
		assert_eq!(branch.branch_target, Some(exit));
		assert!(emitted.blocks[0][0].inst.sf());
	}
}
