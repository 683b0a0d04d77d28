use std::fmt::{Display, Formatter, Result as FmtResult};

use qpuc_utils::BitSet;
use serde::{Deserialize, Serialize};

use super::Instruction;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct BlockId(pub usize);

impl Display for BlockId {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str("block")?;
		Display::fmt(&self.0, f)
	}
}

/// Per-block dataflow sets over temps.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BlockLiveness {
	/// Temps read before being fully written in the block.
	pub used: BitSet,
	/// Temps fully written before any read in the block.
	pub defined: BitSet,
	pub live_in: BitSet,
	pub live_out: BitSet,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
	pub id: BlockId,
	#[serde(default)]
	pub instructions: Vec<Instruction>,
	/// The fall-through or taken successor, then the other one.
	#[serde(default)]
	pub successors: [Option<BlockId>; 2],
	#[serde(skip)]
	pub liveness: BlockLiveness,
	/// Instruction pointer of the first instruction, in program order.
	#[serde(skip)]
	pub start_ip: u32,
	/// Instruction pointer one past the last instruction.
	#[serde(skip)]
	pub end_ip: u32,
}

impl Block {
	#[must_use]
	pub const fn new(id: BlockId) -> Self {
		Self {
			id,
			instructions: Vec::new(),
			successors: [None, None],
			liveness: BlockLiveness {
				used: BitSet::new(),
				defined: BitSet::new(),
				live_in: BitSet::new(),
				live_out: BitSet::new(),
			},
			start_ip: 0,
			end_ip: 0,
		}
	}

	pub fn successors(&self) -> impl Iterator<Item = BlockId> + '_ {
		self.successors.iter().flatten().copied()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.instructions.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.instructions.is_empty()
	}
}
