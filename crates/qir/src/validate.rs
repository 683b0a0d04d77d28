use qpuc_qpu::{BranchCond, SmallImm};

use super::{BlockId, Instruction, InstructionId, Op, Program, QirError, Reg, RegFile};

/// The VPM read FIFO holds four setups of sixteen words each.
pub const MAX_VPM_READS: u32 = 64;

pub struct Validator;

impl Validator {
	pub fn run(program: &Program) -> Result<(), QirError> {
		if program.num_inputs > MAX_VPM_READS {
			return Err(QirError::TooManyVpmReads(program.num_inputs));
		}

		for (i, block) in program.blocks.iter().enumerate() {
			if block.id != BlockId(i) {
				return Err(QirError::BlockIdMismatch {
					block: BlockId(i),
					found: block.id,
				});
			}

			for (index, inst) in block.instructions.iter().enumerate() {
				let id = InstructionId::new(block.id, index);

				if matches!(inst.op, Op::Branch) && index + 1 != block.instructions.len() {
					return Err(QirError::MisplacedBranch(id));
				}

				Self::check_destination(program, id, inst)?;
				Self::check_sources(program, id, inst)?;
			}

			Self::check_successors(program, i)?;
		}

		Ok(())
	}

	fn check_destination(
		program: &Program,
		id: InstructionId,
		inst: &Instruction,
	) -> Result<(), QirError> {
		let dst = inst.dst;
		let illegal = if inst.op.info().has_dst {
			dst.file.is_read_only()
		} else {
			!dst.is_null()
		};

		if illegal {
			return Err(QirError::IllegalDestination { inst: id, file: dst.file });
		}

		Self::check_index(program, id, dst)
	}

	fn check_sources(
		program: &Program,
		id: InstructionId,
		inst: &Instruction,
	) -> Result<(), QirError> {
		let mut small_imm = None;

		for (i, &src) in inst.srcs().iter().enumerate() {
			let load_imm_operand = inst.op.is_load_imm() && i == 0;
			if src.file.is_write_only() || (matches!(src.file, RegFile::LoadImm) != load_imm_operand)
			{
				return Err(QirError::IllegalSource { inst: id, file: src.file });
			}

			Self::check_index(program, id, src)?;

			if !matches!(src.file, RegFile::SmallImm) {
				continue;
			}

			let rotation = matches!(inst.op, Op::RotMul) && i == 1;
			let encodable = if rotation {
				src.index <= u32::from(u8::MAX)
					&& SmallImm::from_code(src.index as u8).is_rotation()
			} else {
				SmallImm::encode(src.index).is_some()
			};

			if !encodable {
				return Err(QirError::UnencodableSmallImmediate {
					inst: id,
					value: src.index,
				});
			}

			match small_imm {
				Some(previous) if previous != src.index => {
					return Err(QirError::MultipleSmallImmediates(id));
				}
				_ => small_imm = Some(src.index),
			}
		}

		if matches!(inst.op, Op::RotMul)
			&& !matches!(inst.src[1].file, RegFile::SmallImm)
		{
			return Err(QirError::IllegalSource {
				inst: id,
				file: inst.src[1].file,
			});
		}

		Ok(())
	}

	fn check_index(program: &Program, id: InstructionId, reg: Reg) -> Result<(), QirError> {
		match reg.file {
			RegFile::Temp if reg.index >= program.num_temps => Err(QirError::TempOutOfRange {
				inst: id,
				temp: reg.index,
			}),
			RegFile::Unif if reg.index as usize >= program.uniforms.len() => {
				Err(QirError::UniformOutOfRange {
					inst: id,
					index: reg.index,
				})
			}
			RegFile::Vary if reg.index as usize >= program.input_slots.len() => {
				Err(QirError::VaryingOutOfRange {
					inst: id,
					index: reg.index,
				})
			}
			_ => Ok(()),
		}
	}

	fn check_successors(program: &Program, index: usize) -> Result<(), QirError> {
		let block = &program.blocks[index];
		let next = (index + 1 < program.blocks.len()).then_some(BlockId(index + 1));
		let in_range = |id: Option<BlockId>| id.is_none_or(|id| id.0 < program.blocks.len());

		let valid = in_range(block.successors[0])
			&& in_range(block.successors[1])
			&& match block.instructions.last() {
				Some(inst) if matches!(inst.op, Op::Branch) => {
					if matches!(inst.branch_cond, BranchCond::Always) {
						block.successors[0].is_some() && block.successors[1].is_none()
					} else {
						block.successors[0].is_some() && block.successors[1] == next && next.is_some()
					}
				}
				_ => block.successors == [next, None],
			};

		if valid {
			Ok(())
		} else {
			Err(QirError::BadSuccessors(block.id))
		}
	}
}
