use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Sig {
	Break,
	None,
	ThreadSwitch,
	ProgEnd,
	WaitForScoreboard,
	ScoreboardUnlock,
	LastThreadSwitch,
	CoverageLoad,
	ColorLoad,
	ColorLoadEnd,
	LoadTmu0,
	LoadTmu1,
	AlphaMaskLoad,
	SmallImm,
	LoadImm,
	Branch,
}

impl Sig {
	#[must_use]
	pub const fn from_bits(bits: u64) -> Self {
		match bits & 0xf {
			0 => Self::Break,
			1 => Self::None,
			2 => Self::ThreadSwitch,
			3 => Self::ProgEnd,
			4 => Self::WaitForScoreboard,
			5 => Self::ScoreboardUnlock,
			6 => Self::LastThreadSwitch,
			7 => Self::CoverageLoad,
			8 => Self::ColorLoad,
			9 => Self::ColorLoadEnd,
			10 => Self::LoadTmu0,
			11 => Self::LoadTmu1,
			12 => Self::AlphaMaskLoad,
			13 => Self::SmallImm,
			14 => Self::LoadImm,
			_ => Self::Branch,
		}
	}

	/// Signals that make the result land in r4.
	#[must_use]
	pub const fn writes_r4(self) -> bool {
		matches!(
			self,
			Self::ColorLoad | Self::LoadTmu0 | Self::LoadTmu1 | Self::AlphaMaskLoad
		)
	}

	#[must_use]
	pub const fn is_thread_switch(self) -> bool {
		matches!(self, Self::ThreadSwitch | Self::LastThreadSwitch)
	}

	#[must_use]
	pub const fn name(self) -> &'static str {
		match self {
			Self::Break => "bkpt",
			Self::None => "",
			Self::ThreadSwitch => "thrsw",
			Self::ProgEnd => "thrend",
			Self::WaitForScoreboard => "sbwait",
			Self::ScoreboardUnlock => "sbdone",
			Self::LastThreadSwitch => "lthrsw",
			Self::CoverageLoad => "loadcv",
			Self::ColorLoad => "loadc",
			Self::ColorLoadEnd => "ldcend",
			Self::LoadTmu0 => "ldtmu0",
			Self::LoadTmu1 => "ldtmu1",
			Self::AlphaMaskLoad => "loadam",
			Self::SmallImm => "small_imm",
			Self::LoadImm => "load_imm",
			Self::Branch => "branch",
		}
	}
}

/// Per-lane write condition for one ALU half.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Cond {
	Never,
	#[default]
	Always,
	Zs,
	Zc,
	Ns,
	Nc,
	Cs,
	Cc,
}

impl Cond {
	#[must_use]
	pub const fn from_bits(bits: u64) -> Self {
		match bits & 0x7 {
			0 => Self::Never,
			1 => Self::Always,
			2 => Self::Zs,
			3 => Self::Zc,
			4 => Self::Ns,
			5 => Self::Nc,
			6 => Self::Cs,
			_ => Self::Cc,
		}
	}

	/// The condition selecting exactly the lanes this one rejects.
	#[must_use]
	pub const fn complement(self) -> Self {
		Self::from_bits(self as u64 ^ 1)
	}

	#[must_use]
	pub const fn suffix(self) -> &'static str {
		match self {
			Self::Never => ".never",
			Self::Always => "",
			Self::Zs => ".zs",
			Self::Zc => ".zc",
			Self::Ns => ".ns",
			Self::Nc => ".nc",
			Self::Cs => ".cs",
			Self::Cc => ".cc",
		}
	}
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BranchCond {
	AllZs = 0,
	AllZc = 1,
	AnyZs = 2,
	AnyZc = 3,
	AllNs = 4,
	AllNc = 5,
	AnyNs = 6,
	AnyNc = 7,
	AllCs = 8,
	AllCc = 9,
	AnyCs = 10,
	AnyCc = 11,
	#[default]
	Always = 15,
}

impl BranchCond {
	#[must_use]
	pub const fn from_bits(bits: u64) -> Option<Self> {
		Some(match bits & 0xf {
			0 => Self::AllZs,
			1 => Self::AllZc,
			2 => Self::AnyZs,
			3 => Self::AnyZc,
			4 => Self::AllNs,
			5 => Self::AllNc,
			6 => Self::AnyNs,
			7 => Self::AnyNc,
			8 => Self::AllCs,
			9 => Self::AllCc,
			10 => Self::AnyCs,
			11 => Self::AnyCc,
			15 => Self::Always,
			_ => return None,
		})
	}

	#[must_use]
	pub const fn suffix(self) -> &'static str {
		match self {
			Self::AllZs => ".all_zs",
			Self::AllZc => ".all_zc",
			Self::AnyZs => ".any_zs",
			Self::AnyZc => ".any_zc",
			Self::AllNs => ".all_ns",
			Self::AllNc => ".all_nc",
			Self::AnyNs => ".any_ns",
			Self::AnyNc => ".any_nc",
			Self::AllCs => ".all_cs",
			Self::AllCc => ".all_cc",
			Self::AnyCs => ".any_cs",
			Self::AnyCc => ".any_cc",
			Self::Always => "",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AddOp {
	Nop = 0,
	Fadd = 1,
	Fsub = 2,
	Fmin = 3,
	Fmax = 4,
	FminAbs = 5,
	FmaxAbs = 6,
	Ftoi = 7,
	Itof = 8,
	Add = 12,
	Sub = 13,
	Shr = 14,
	Asr = 15,
	Ror = 16,
	Shl = 17,
	Min = 18,
	Max = 19,
	And = 20,
	Or = 21,
	Xor = 22,
	Not = 23,
	Clz = 24,
	V8Adds = 30,
	V8Subs = 31,
}

impl AddOp {
	#[must_use]
	pub const fn from_bits(bits: u64) -> Option<Self> {
		Some(match bits & 0x1f {
			0 => Self::Nop,
			1 => Self::Fadd,
			2 => Self::Fsub,
			3 => Self::Fmin,
			4 => Self::Fmax,
			5 => Self::FminAbs,
			6 => Self::FmaxAbs,
			7 => Self::Ftoi,
			8 => Self::Itof,
			12 => Self::Add,
			13 => Self::Sub,
			14 => Self::Shr,
			15 => Self::Asr,
			16 => Self::Ror,
			17 => Self::Shl,
			18 => Self::Min,
			19 => Self::Max,
			20 => Self::And,
			21 => Self::Or,
			22 => Self::Xor,
			23 => Self::Not,
			24 => Self::Clz,
			30 => Self::V8Adds,
			31 => Self::V8Subs,
			_ => return None,
		})
	}

	#[must_use]
	pub const fn nsrc(self) -> usize {
		match self {
			Self::Nop => 0,
			Self::Ftoi | Self::Itof | Self::Not | Self::Clz => 1,
			_ => 2,
		}
	}

	#[must_use]
	pub const fn name(self) -> &'static str {
		match self {
			Self::Nop => "nop",
			Self::Fadd => "fadd",
			Self::Fsub => "fsub",
			Self::Fmin => "fmin",
			Self::Fmax => "fmax",
			Self::FminAbs => "fminabs",
			Self::FmaxAbs => "fmaxabs",
			Self::Ftoi => "ftoi",
			Self::Itof => "itof",
			Self::Add => "add",
			Self::Sub => "sub",
			Self::Shr => "shr",
			Self::Asr => "asr",
			Self::Ror => "ror",
			Self::Shl => "shl",
			Self::Min => "min",
			Self::Max => "max",
			Self::And => "and",
			Self::Or => "or",
			Self::Xor => "xor",
			Self::Not => "not",
			Self::Clz => "clz",
			Self::V8Adds => "v8adds",
			Self::V8Subs => "v8subs",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MulOp {
	Nop,
	Fmul,
	Mul24,
	V8Muld,
	V8Min,
	V8Max,
	V8Adds,
	V8Subs,
}

impl MulOp {
	#[must_use]
	pub const fn from_bits(bits: u64) -> Self {
		match bits & 0x7 {
			0 => Self::Nop,
			1 => Self::Fmul,
			2 => Self::Mul24,
			3 => Self::V8Muld,
			4 => Self::V8Min,
			5 => Self::V8Max,
			6 => Self::V8Adds,
			_ => Self::V8Subs,
		}
	}

	#[must_use]
	pub const fn nsrc(self) -> usize {
		match self {
			Self::Nop => 0,
			_ => 2,
		}
	}

	#[must_use]
	pub const fn name(self) -> &'static str {
		match self {
			Self::Nop => "nop",
			Self::Fmul => "fmul",
			Self::Mul24 => "mul24",
			Self::V8Muld => "v8muld",
			Self::V8Min => "v8min",
			Self::V8Max => "v8max",
			Self::V8Adds => "v8adds",
			Self::V8Subs => "v8subs",
		}
	}
}

/// ALU input selector: one of the six accumulators or a register file read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Mux {
	R0,
	R1,
	R2,
	R3,
	R4,
	R5,
	A,
	B,
}

impl Mux {
	#[must_use]
	pub const fn from_bits(bits: u64) -> Self {
		match bits & 0x7 {
			0 => Self::R0,
			1 => Self::R1,
			2 => Self::R2,
			3 => Self::R3,
			4 => Self::R4,
			5 => Self::R5,
			6 => Self::A,
			_ => Self::B,
		}
	}

	#[must_use]
	pub const fn is_accumulator(self) -> bool {
		(self as u8) <= Self::R5 as u8
	}
}

/// Register file write address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct WAddr(pub u8);

impl WAddr {
	pub const ACC0: Self = Self(32);
	pub const ACC1: Self = Self(33);
	pub const ACC2: Self = Self(34);
	pub const ACC3: Self = Self(35);
	pub const ACC5: Self = Self(37);
	pub const HOST_INT: Self = Self(38);
	pub const MS_FLAGS: Self = Self(41);
	pub const MUTEX_RELEASE: Self = Self(51);
	pub const NOP: Self = Self(39);
	pub const QUAD_XY: Self = Self(41);
	pub const REV_FLAG: Self = Self(42);
	pub const SFU_EXP: Self = Self(54);
	pub const SFU_LOG: Self = Self(55);
	pub const SFU_RECIP: Self = Self(52);
	pub const SFU_RECIPSQRT: Self = Self(53);
	pub const TLB_ALPHA_MASK: Self = Self(47);
	pub const TLB_COLOR_ALL: Self = Self(46);
	pub const TLB_COLOR_MS: Self = Self(45);
	pub const TLB_STENCIL_SETUP: Self = Self(43);
	pub const TLB_Z: Self = Self(44);
	pub const TMU0_B: Self = Self(59);
	pub const TMU0_R: Self = Self(58);
	pub const TMU0_S: Self = Self(56);
	pub const TMU0_T: Self = Self(57);
	pub const TMU1_B: Self = Self(63);
	pub const TMU1_R: Self = Self(62);
	pub const TMU1_S: Self = Self(60);
	pub const TMU1_T: Self = Self(61);
	pub const TMU_NOSWAP: Self = Self(36);
	pub const UNIFORMS_ADDRESS: Self = Self(40);
	pub const VPM: Self = Self(48);
	pub const VPMVCD_SETUP: Self = Self(49);
	pub const VPM_ADDR: Self = Self(50);

	#[must_use]
	pub const fn is_regfile(self) -> bool {
		self.0 < 32
	}

	#[must_use]
	pub const fn is_sfu(self) -> bool {
		matches!(self.0, 52..=55)
	}

	#[must_use]
	pub const fn is_tmu(self) -> bool {
		matches!(self.0, 56..=63)
	}

	#[must_use]
	pub const fn is_tmu_s(self) -> bool {
		matches!(self, Self::TMU0_S | Self::TMU1_S)
	}

	#[must_use]
	pub const fn is_tlb(self) -> bool {
		matches!(self, Self::TLB_COLOR_ALL | Self::TLB_COLOR_MS | Self::TLB_Z)
	}

	/// Write addresses that mean the same thing no matter which file `ws`
	/// selects.
	#[must_use]
	pub const fn ignores_ws(self) -> bool {
		matches!(
			self.0,
			32..=35 | 39 | 44..=48 | 52..=63
		)
	}

	/// Closely coupled peripheral writes; only one may happen per word.
	#[must_use]
	pub const fn is_sf_access(self) -> bool {
		matches!(self, Self::TLB_COLOR_MS | Self::TLB_COLOR_ALL | Self::TLB_Z)
			|| self.is_tmu()
			|| self.is_sfu()
	}
}

impl Display for WAddr {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		let name = match *self {
			Self::ACC0 => "r0",
			Self::ACC1 => "r1",
			Self::ACC2 => "r2",
			Self::ACC3 => "r3",
			Self::TMU_NOSWAP => "tmu_noswap",
			Self::ACC5 => "r5",
			Self::HOST_INT => "host_int",
			Self::NOP => "-",
			Self::UNIFORMS_ADDRESS => "uniforms_addr",
			Self::MS_FLAGS => "ms_flags",
			Self::REV_FLAG => "rev_flag",
			Self::TLB_STENCIL_SETUP => "tlb_stencil_setup",
			Self::TLB_Z => "tlb_z",
			Self::TLB_COLOR_MS => "tlb_color_ms",
			Self::TLB_COLOR_ALL => "tlb_color_all",
			Self::TLB_ALPHA_MASK => "tlb_alpha_mask",
			Self::VPM => "vpm",
			Self::VPMVCD_SETUP => "vpmvcd_setup",
			Self::VPM_ADDR => "vpm_addr",
			Self::MUTEX_RELEASE => "mutex_release",
			Self::SFU_RECIP => "sfu_recip",
			Self::SFU_RECIPSQRT => "sfu_recipsqrt",
			Self::SFU_EXP => "sfu_exp",
			Self::SFU_LOG => "sfu_log",
			Self::TMU0_S => "tmu0_s",
			Self::TMU0_T => "tmu0_t",
			Self::TMU0_R => "tmu0_r",
			Self::TMU0_B => "tmu0_b",
			Self::TMU1_S => "tmu1_s",
			Self::TMU1_T => "tmu1_t",
			Self::TMU1_R => "tmu1_r",
			Self::TMU1_B => "tmu1_b",
			Self(addr) => {
				f.write_str("w")?;
				return Display::fmt(&addr, f);
			}
		};

		f.write_str(name)
	}
}

/// Register file read address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct RAddr(pub u8);

impl RAddr {
	pub const ELEM_QPU: Self = Self(38);
	pub const ELEMENT: Self = Self(37);
	pub const MS_REV_FLAGS: Self = Self(42);
	pub const MUTEX_ACQUIRE: Self = Self(51);
	pub const NOP: Self = Self(39);
	pub const UNIF: Self = Self(32);
	pub const VARY: Self = Self(35);
	pub const VPM: Self = Self(48);
	pub const XY_PIXEL_COORD: Self = Self(41);

	#[must_use]
	pub const fn is_regfile(self) -> bool {
		self.0 < 32
	}
}

/// Result packing applied on regfile A writes when `pm` is clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PackA {
	Nop,
	Lo16,
	Hi16,
	Rep8888,
	Byte0,
	Byte1,
	Byte2,
	Byte3,
	Sat32,
	Lo16Sat,
	Hi16Sat,
	Rep8888Sat,
	Byte0Sat,
	Byte1Sat,
	Byte2Sat,
	Byte3Sat,
}

impl PackA {
	#[must_use]
	pub const fn from_bits(bits: u64) -> Self {
		match bits & 0xf {
			0 => Self::Nop,
			1 => Self::Lo16,
			2 => Self::Hi16,
			3 => Self::Rep8888,
			4 => Self::Byte0,
			5 => Self::Byte1,
			6 => Self::Byte2,
			7 => Self::Byte3,
			8 => Self::Sat32,
			9 => Self::Lo16Sat,
			10 => Self::Hi16Sat,
			11 => Self::Rep8888Sat,
			12 => Self::Byte0Sat,
			13 => Self::Byte1Sat,
			14 => Self::Byte2Sat,
			_ => Self::Byte3Sat,
		}
	}

	/// Byte lanes of the destination that the packed write touches.
	#[must_use]
	pub const fn channels(self) -> u8 {
		match self {
			Self::Nop | Self::Rep8888 | Self::Rep8888Sat | Self::Sat32 => 0xf,
			Self::Byte0 | Self::Byte0Sat => 0x1,
			Self::Byte1 | Self::Byte1Sat => 0x2,
			Self::Byte2 | Self::Byte2Sat => 0x4,
			Self::Byte3 | Self::Byte3Sat => 0x8,
			Self::Lo16 | Self::Lo16Sat => 0x3,
			Self::Hi16 | Self::Hi16Sat => 0xc,
		}
	}
}

/// Result packing applied on mul unit writes when `pm` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PackMul {
	Nop = 0,
	Rep8888 = 3,
	Byte0 = 4,
	Byte1 = 5,
	Byte2 = 6,
	Byte3 = 7,
}

impl PackMul {
	#[must_use]
	pub const fn from_bits(bits: u64) -> Option<Self> {
		Some(match bits & 0xf {
			0 => Self::Nop,
			3 => Self::Rep8888,
			4 => Self::Byte0,
			5 => Self::Byte1,
			6 => Self::Byte2,
			7 => Self::Byte3,
			_ => return None,
		})
	}

	#[must_use]
	pub const fn channels(self) -> u8 {
		match self {
			Self::Nop | Self::Rep8888 => 0xf,
			Self::Byte0 => 0x1,
			Self::Byte1 => 0x2,
			Self::Byte2 => 0x4,
			Self::Byte3 => 0x8,
		}
	}
}

/// Unpacking applied on regfile A reads, or on r4 reads when `pm` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Unpack {
	Nop,
	Lo16,
	Hi16,
	Rep8d,
	Byte0,
	Byte1,
	Byte2,
	Byte3,
}

impl Unpack {
	#[must_use]
	pub const fn from_bits(bits: u64) -> Self {
		match bits & 0x7 {
			0 => Self::Nop,
			1 => Self::Lo16,
			2 => Self::Hi16,
			3 => Self::Rep8d,
			4 => Self::Byte0,
			5 => Self::Byte1,
			6 => Self::Byte2,
			_ => Self::Byte3,
		}
	}

	/// Unpacks producing a normalized float from a byte lane.
	#[must_use]
	pub const fn is_8bit(self) -> bool {
		matches!(
			self,
			Self::Rep8d | Self::Byte0 | Self::Byte1 | Self::Byte2 | Self::Byte3
		)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LoadImmMode {
	U32 = 0,
	PerElementSigned = 1,
	PerElementUnsigned = 3,
}
