use serde::{Deserialize, Serialize};

/// Static facts about an [`Op`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
	pub name: &'static str,
	pub has_dst: bool,
	/// Source count, not counting the implicit texture uniform.
	pub nsrc: usize,
	pub has_side_effects: bool,
	/// Whether the op expands to more than one hardware instruction, with the
	/// result only available after the last one.
	pub multi_instruction: bool,
}

impl OpInfo {
	const fn new(name: &'static str, has_dst: bool, nsrc: usize) -> Self {
		Self {
			name,
			has_dst,
			nsrc,
			has_side_effects: false,
			multi_instruction: false,
		}
	}

	const fn side_effects(mut self) -> Self {
		self.has_side_effects = true;
		self
	}

	const fn multi(mut self) -> Self {
		self.multi_instruction = true;
		self
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
	Mov,
	Fmov,
	Mmov,
	Fadd,
	Fsub,
	Fmul,
	V8Muld,
	V8Min,
	V8Max,
	V8Adds,
	V8Subs,
	Mul24,
	Fmin,
	Fmax,
	FminAbs,
	FmaxAbs,
	Add,
	Sub,
	Shl,
	Shr,
	Asr,
	Min,
	MinNoImm,
	Max,
	And,
	Or,
	Xor,
	Not,
	Ftoi,
	Itof,
	Rcp,
	Rsq,
	Exp2,
	Log2,
	TlbColorRead,
	MsMask,
	VaryAddC,
	FragZ,
	FragW,
	TexResult,
	Thrsw,
	LoadImm,
	LoadImmU2,
	LoadImmI2,
	RotMul,
	Branch,
	UniformsReset,
}

impl Op {
	#[must_use]
	pub const fn info(self) -> OpInfo {
		match self {
			Self::Mov => OpInfo::new("mov", true, 1),
			Self::Fmov => OpInfo::new("fmov", true, 1),
			Self::Mmov => OpInfo::new("mmov", true, 1),
			Self::Fadd => OpInfo::new("fadd", true, 2),
			Self::Fsub => OpInfo::new("fsub", true, 2),
			Self::Fmul => OpInfo::new("fmul", true, 2),
			Self::V8Muld => OpInfo::new("v8muld", true, 2),
			Self::V8Min => OpInfo::new("v8min", true, 2),
			Self::V8Max => OpInfo::new("v8max", true, 2),
			Self::V8Adds => OpInfo::new("v8adds", true, 2),
			Self::V8Subs => OpInfo::new("v8subs", true, 2),
			Self::Mul24 => OpInfo::new("mul24", true, 2),
			Self::Fmin => OpInfo::new("fmin", true, 2),
			Self::Fmax => OpInfo::new("fmax", true, 2),
			Self::FminAbs => OpInfo::new("fminabs", true, 2),
			Self::FmaxAbs => OpInfo::new("fmaxabs", true, 2),
			Self::Add => OpInfo::new("add", true, 2),
			Self::Sub => OpInfo::new("sub", true, 2),
			Self::Shl => OpInfo::new("shl", true, 2),
			Self::Shr => OpInfo::new("shr", true, 2),
			Self::Asr => OpInfo::new("asr", true, 2),
			Self::Min => OpInfo::new("min", true, 2),
			Self::MinNoImm => OpInfo::new("min_noimm", true, 2),
			Self::Max => OpInfo::new("max", true, 2),
			Self::And => OpInfo::new("and", true, 2),
			Self::Or => OpInfo::new("or", true, 2),
			Self::Xor => OpInfo::new("xor", true, 2),
			Self::Not => OpInfo::new("not", true, 1),
			Self::Ftoi => OpInfo::new("ftoi", true, 1),
			Self::Itof => OpInfo::new("itof", true, 1),
			Self::Rcp => OpInfo::new("rcp", true, 1).multi(),
			Self::Rsq => OpInfo::new("rsq", true, 1).multi(),
			Self::Exp2 => OpInfo::new("exp2", true, 1).multi(),
			Self::Log2 => OpInfo::new("log2", true, 1).multi(),
			Self::TlbColorRead => OpInfo::new("tlb_color_read", true, 0),
			Self::MsMask => OpInfo::new("ms_mask", false, 1).side_effects(),
			Self::VaryAddC => OpInfo::new("vary_add_c", true, 1),
			Self::FragZ => OpInfo::new("frag_z", true, 0),
			Self::FragW => OpInfo::new("frag_w", true, 0),
			Self::TexResult => OpInfo::new("tex_result", true, 0).side_effects(),
			Self::Thrsw => OpInfo::new("thrsw", false, 0).side_effects(),
			Self::LoadImm => OpInfo::new("load_imm", true, 1),
			Self::LoadImmU2 => OpInfo::new("load_imm_u2", true, 1),
			Self::LoadImmI2 => OpInfo::new("load_imm_i2", true, 1),
			Self::RotMul => OpInfo::new("rot_mul", true, 2),
			Self::Branch => OpInfo::new("branch", false, 0).side_effects(),
			Self::UniformsReset => OpInfo::new("uniforms_reset", false, 2).side_effects(),
		}
	}

	#[must_use]
	pub const fn name(self) -> &'static str {
		self.info().name
	}

	#[must_use]
	pub const fn is_mov(self) -> bool {
		matches!(self, Self::Mov | Self::Fmov | Self::Mmov)
	}

	/// Ops executed by the multiply ALU.
	#[must_use]
	pub const fn is_mul(self) -> bool {
		matches!(
			self,
			Self::Mmov
				| Self::Fmul
				| Self::Mul24
				| Self::V8Muld
				| Self::V8Min
				| Self::V8Max
				| Self::V8Adds
				| Self::V8Subs
				| Self::RotMul
		)
	}

	/// Ops whose unpacked inputs are interpreted as floats.
	#[must_use]
	pub const fn is_float_input(self) -> bool {
		matches!(
			self,
			Self::Fmov
				| Self::Fmul
				| Self::Fadd
				| Self::Fsub
				| Self::Fmin
				| Self::Fmax
				| Self::FminAbs
				| Self::FmaxAbs
				| Self::Ftoi
		)
	}

	#[must_use]
	pub const fn is_sfu(self) -> bool {
		matches!(self, Self::Rcp | Self::Rsq | Self::Exp2 | Self::Log2)
	}

	#[must_use]
	pub const fn writes_r4(self) -> bool {
		self.is_sfu() || matches!(self, Self::TexResult | Self::TlbColorRead)
	}

	#[must_use]
	pub const fn is_load_imm(self) -> bool {
		matches!(self, Self::LoadImm | Self::LoadImmU2 | Self::LoadImmI2)
	}
}
