use std::{
	error::Error,
	fmt::{Debug, Display, Formatter, Result as FmtResult},
};

use super::{BlockId, InstructionId, RegFile};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QirError {
	TempOutOfRange {
		inst: InstructionId,
		temp: u32,
	},
	UniformOutOfRange {
		inst: InstructionId,
		index: u32,
	},
	VaryingOutOfRange {
		inst: InstructionId,
		index: u32,
	},
	IllegalDestination {
		inst: InstructionId,
		file: RegFile,
	},
	IllegalSource {
		inst: InstructionId,
		file: RegFile,
	},
	UnencodableSmallImmediate {
		inst: InstructionId,
		value: u32,
	},
	MultipleSmallImmediates(InstructionId),
	MisplacedBranch(InstructionId),
	BadSuccessors(BlockId),
	BlockIdMismatch {
		block: BlockId,
		found: BlockId,
	},
	TooManyVpmReads(u32),
}

impl Display for QirError {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::TempOutOfRange { inst, temp } => {
				f.write_str("temp t")?;
				Display::fmt(&temp, f)?;
				f.write_str(" at ")?;
				Display::fmt(&inst, f)?;
				f.write_str(" is out of range")
			}
			Self::UniformOutOfRange { inst, index } => {
				f.write_str("uniform u")?;
				Display::fmt(&index, f)?;
				f.write_str(" at ")?;
				Display::fmt(&inst, f)?;
				f.write_str(" is not in the uniform table")
			}
			Self::VaryingOutOfRange { inst, index } => {
				f.write_str("varying v")?;
				Display::fmt(&index, f)?;
				f.write_str(" at ")?;
				Display::fmt(&inst, f)?;
				f.write_str(" has no input slot")
			}
			Self::IllegalDestination { inst, file } => {
				f.write_str("cannot write to ")?;
				Debug::fmt(&file, f)?;
				f.write_str(" at ")?;
				Display::fmt(&inst, f)
			}
			Self::IllegalSource { inst, file } => {
				f.write_str("cannot read from ")?;
				Debug::fmt(&file, f)?;
				f.write_str(" at ")?;
				Display::fmt(&inst, f)
			}
			Self::UnencodableSmallImmediate { inst, value } => {
				f.write_str("small immediate 0x")?;
				std::fmt::LowerHex::fmt(&value, f)?;
				f.write_str(" at ")?;
				Display::fmt(&inst, f)?;
				f.write_str(" has no encoding")
			}
			Self::MultipleSmallImmediates(inst) => {
				f.write_str("instruction ")?;
				Display::fmt(&inst, f)?;
				f.write_str(" reads more than one small immediate")
			}
			Self::MisplacedBranch(inst) => {
				f.write_str("branch at ")?;
				Display::fmt(&inst, f)?;
				f.write_str(" is not the last instruction of its block")
			}
			Self::BadSuccessors(block) => {
				f.write_str("successors of ")?;
				Display::fmt(&block, f)?;
				f.write_str(" do not match its terminator")
			}
			Self::BlockIdMismatch { block, found } => {
				Display::fmt(&block, f)?;
				f.write_str(" is labelled ")?;
				Display::fmt(&found, f)
			}
			Self::TooManyVpmReads(count) => {
				f.write_str("cannot read ")?;
				Display::fmt(&count, f)?;
				f.write_str(" attribute words from the vpm")
			}
		}
	}
}

impl Error for QirError {}
