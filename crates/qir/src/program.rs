use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};

use super::{
	Block, BlockId, Instruction, LiveInterval, Op, Reg, RegFile, Uniform, UniformContents,
	UniformTable,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
	#[default]
	Fragment,
	Vertex,
	Coordinate,
}

impl Stage {
	#[must_use]
	pub const fn is_fragment(self) -> bool {
		matches!(self, Self::Fragment)
	}
}

impl Display for Stage {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(match self {
			Self::Fragment => "fragment",
			Self::Vertex => "vertex",
			Self::Coordinate => "coordinate",
		})
	}
}

/// Where a varying read comes from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputSlot {
	pub slot: u8,
	pub swizzle: u8,
}

impl InputSlot {
	/// Marks varyings produced by fixed-function hardware, such as point
	/// coordinates, which are always read.
	pub const FIXED_FUNCTION: u8 = 0xff;

	#[must_use]
	pub const fn is_fixed_function(self) -> bool {
		self.slot == Self::FIXED_FUNCTION
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstructionId {
	pub block: BlockId,
	pub index: usize,
}

impl InstructionId {
	#[must_use]
	pub const fn new(block: BlockId, index: usize) -> Self {
		Self { block, index }
	}
}

impl Display for InstructionId {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		Display::fmt(&self.block, f)?;
		f.write_str(":")?;
		Display::fmt(&self.index, f)
	}
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Program {
	pub stage: Stage,
	/// Whether fragment thread switches are allowed.
	pub threaded: bool,
	pub blocks: Vec<Block>,
	pub num_temps: u32,
	pub uniforms: UniformTable,
	pub input_slots: Vec<InputSlot>,
	/// Number of attribute words read from the VPM.
	pub num_inputs: u32,
	/// The unique unconditional, unpacked write of each temp, if it has one.
	#[serde(skip)]
	pub defs: Vec<Option<InstructionId>>,
	#[serde(skip)]
	pub intervals: Vec<LiveInterval>,
}

impl Program {
	/// Creates a program with an empty entry block.
	#[must_use]
	pub fn new(stage: Stage) -> Self {
		Self {
			stage,
			blocks: vec![Block::new(BlockId(0))],
			..Self::default()
		}
	}

	pub fn new_temp(&mut self) -> Reg {
		let temp = Reg::temp(self.num_temps);
		self.num_temps += 1;
		temp
	}

	pub fn add_block(&mut self) -> BlockId {
		let id = BlockId(self.blocks.len());
		self.blocks.push(Block::new(id));
		id
	}

	#[must_use]
	pub const fn entry_block(&self) -> BlockId {
		BlockId(0)
	}

	#[must_use]
	pub fn exit_block(&self) -> Option<BlockId> {
		self.blocks.last().map(|b| b.id)
	}

	#[must_use]
	pub fn block(&self, id: BlockId) -> &Block {
		&self.blocks[id.0]
	}

	pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
		&mut self.blocks[id.0]
	}

	pub fn set_successors(&mut self, block: BlockId, successors: [Option<BlockId>; 2]) {
		self.block_mut(block).successors = successors;
	}

	pub fn push(&mut self, block: BlockId, inst: Instruction) -> InstructionId {
		let instructions = &mut self.block_mut(block).instructions;
		instructions.push(inst);
		InstructionId::new(block, instructions.len() - 1)
	}

	/// Pushes `op` writing a fresh temp and returns the temp.
	pub fn def(&mut self, block: BlockId, op: Op, srcs: &[Reg]) -> Reg {
		let dst = self.new_temp();
		let mut inst = Instruction::alu0(op, dst);
		inst.src[..srcs.len()].copy_from_slice(srcs);
		self.push(block, inst);
		dst
	}

	pub fn uniform(&mut self, contents: UniformContents, data: u32) -> Reg {
		Reg::unif(self.uniforms.add(Uniform::new(contents, data)))
	}

	pub fn uniform_ui(&mut self, value: u32) -> Reg {
		self.uniform(UniformContents::Constant, value)
	}

	pub fn uniform_f(&mut self, value: f32) -> Reg {
		self.uniform_ui(value.to_bits())
	}

	#[must_use]
	pub fn instruction(&self, id: InstructionId) -> &Instruction {
		&self.block(id.block).instructions[id.index]
	}

	pub fn instruction_mut(&mut self, id: InstructionId) -> &mut Instruction {
		&mut self.block_mut(id.block).instructions[id.index]
	}

	/// Every instruction, in block order.
	pub fn instructions(&self) -> impl Iterator<Item = (InstructionId, &Instruction)> + '_ {
		self.blocks.iter().flat_map(|block| {
			block
				.instructions
				.iter()
				.enumerate()
				.map(move |(i, inst)| (InstructionId::new(block.id, i), inst))
		})
	}

	pub fn instructions_mut(&mut self) -> impl Iterator<Item = &mut Instruction> + '_ {
		self.blocks
			.iter_mut()
			.flat_map(|block| block.instructions.iter_mut())
	}

	#[must_use]
	pub fn instruction_count(&self) -> usize {
		self.blocks.iter().map(Block::len).sum()
	}

	/// The instruction defining `reg`, if `reg` has a single unconditional
	/// definition.
	#[must_use]
	pub fn def_of(&self, reg: Reg) -> Option<&Instruction> {
		let temp = reg.as_temp()?;
		let id = (*self.defs.get(temp as usize)?)?;
		Some(self.instruction(id))
	}

	#[must_use]
	pub fn is_ssa(&self, temp: u32) -> bool {
		self.defs.get(temp as usize).is_some_and(Option::is_some)
	}

	/// Recomputes [`Self::defs`] from the current instruction stream.
	pub fn refresh_defs(&mut self) {
		let mut writes = vec![0u32; self.num_temps as usize];
		let mut defs = vec![None; self.num_temps as usize];

		for (id, inst) in self.instructions() {
			let Some(temp) = inst.dst.as_temp() else {
				continue;
			};

			let temp = temp as usize;
			writes[temp] += 1;
			if inst.cond == qpuc_qpu::Cond::Always && inst.dst.pack == 0 {
				defs[temp] = Some(id);
			}
		}

		for (def, writes) in defs.iter_mut().zip(writes) {
			if writes != 1 {
				*def = None;
			}
		}

		self.defs = defs;
	}

	/// Number of source reads of each temp.
	#[must_use]
	pub fn use_counts(&self) -> Vec<u32> {
		let mut counts = vec![0; self.num_temps as usize];

		for (_, inst) in self.instructions() {
			for src in inst.srcs() {
				if let Some(temp) = src.as_temp() {
					counts[temp as usize] += 1;
				}
			}
		}

		counts
	}

	/// Follows chains of raw moves back to their source, keeping the pack of
	/// `reg`.
	#[must_use]
	pub fn follow_movs(&self, mut reg: Reg) -> Reg {
		let pack = reg.pack;

		while let Some(def) = self.def_of(reg) {
			if !def.op.is_mov() || def.dst.pack != 0 || def.src[0].pack != 0 {
				break;
			}

			reg = def.src[0];
		}

		reg.pack = pack;
		reg
	}

	/// The literal value of an unpacked constant uniform or small immediate.
	#[must_use]
	pub fn constant_value(&self, reg: Reg) -> Option<u32> {
		if reg.pack != 0 {
			return None;
		}

		match reg.file {
			RegFile::Unif => self.uniforms.constant_value(reg.index),
			RegFile::SmallImm => Some(reg.index),
			_ => None,
		}
	}

	#[must_use]
	pub fn is_constant(&self, reg: Reg, value: u32) -> bool {
		self.constant_value(self.follow_movs(reg)) == Some(value)
	}

	/// Whether the instruction reads something that cannot be dropped or
	/// reordered freely, such as the VPM FIFO or fixed-function varyings.
	#[must_use]
	pub fn has_side_effect_reads(&self, inst: &Instruction) -> bool {
		let reads = inst.srcs().iter().any(|src| match src.file {
			RegFile::Vpm => true,
			RegFile::Vary => self
				.input_slots
				.get(src.index as usize)
				.is_some_and(|slot| slot.is_fixed_function()),
			_ => false,
		});

		reads || matches!(inst.dst.file, RegFile::Vpm)
	}

	/// Renumbers instruction pointers across blocks in order.
	pub fn number_instructions(&mut self) {
		let mut ip = 0;
		for block in &mut self.blocks {
			block.start_ip = ip;
			ip += block.instructions.len() as u32;
			block.end_ip = ip;
		}
	}
}
