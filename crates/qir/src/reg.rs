use std::fmt::{Display, Formatter, Result as FmtResult, Write as _};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegFile {
	#[default]
	Null,
	Temp,
	Vary,
	Unif,
	TlbColorWrite,
	TlbColorWriteMs,
	TlbZWrite,
	TlbStencilSetup,
	FragX,
	FragY,
	FragRevFlag,
	QpuElement,
	TexSDirect,
	TexS,
	TexT,
	TexR,
	TexB,
	Vpm,
	LoadImm,
	SmallImm,
}

impl RegFile {
	#[must_use]
	pub const fn is_tex(self) -> bool {
		matches!(
			self,
			Self::TexSDirect | Self::TexS | Self::TexT | Self::TexR | Self::TexB
		)
	}

	#[must_use]
	pub const fn is_tlb_write(self) -> bool {
		matches!(
			self,
			Self::TlbColorWrite | Self::TlbColorWriteMs | Self::TlbZWrite | Self::TlbStencilSetup
		)
	}

	/// Files that only make sense as an instruction destination.
	#[must_use]
	pub const fn is_write_only(self) -> bool {
		self.is_tex() || self.is_tlb_write()
	}

	/// Files that only make sense as an instruction source.
	#[must_use]
	pub const fn is_read_only(self) -> bool {
		matches!(
			self,
			Self::Vary
				| Self::Unif
				| Self::FragX
				| Self::FragY
				| Self::FragRevFlag
				| Self::QpuElement
				| Self::LoadImm
				| Self::SmallImm
		)
	}

	const fn prefix(self) -> &'static str {
		match self {
			Self::Null => "null",
			Self::Temp => "t",
			Self::Vary => "v",
			Self::Unif => "u",
			Self::TlbColorWrite => "tlb_c",
			Self::TlbColorWriteMs => "tlb_c_ms",
			Self::TlbZWrite => "tlb_z",
			Self::TlbStencilSetup => "tlb_stencil",
			Self::FragX => "frag_x",
			Self::FragY => "frag_y",
			Self::FragRevFlag => "frag_rev_flag",
			Self::QpuElement => "elem",
			Self::TexSDirect => "tex_s_direct",
			Self::TexS => "tex_s",
			Self::TexT => "tex_t",
			Self::TexR => "tex_r",
			Self::TexB => "tex_b",
			Self::Vpm => "vpm",
			Self::LoadImm => "imm",
			Self::SmallImm => "small_imm",
		}
	}

	const fn is_indexed(self) -> bool {
		matches!(self, Self::Temp | Self::Vary | Self::Unif)
	}
}

/// A register reference: a file, an index within it, and a pack code.
///
/// The pack code is a source unpack on reads, a mul pack on the destination of
/// a mul op, and a regfile A pack on any other destination. Zero means none.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reg {
	pub file: RegFile,
	#[serde(default)]
	pub index: u32,
	#[serde(default)]
	pub pack: u8,
}

impl Reg {
	pub const NULL: Self = Self::new(RegFile::Null, 0);

	#[must_use]
	pub const fn new(file: RegFile, index: u32) -> Self {
		Self {
			file,
			index,
			pack: 0,
		}
	}

	#[must_use]
	pub const fn temp(index: u32) -> Self {
		Self::new(RegFile::Temp, index)
	}

	#[must_use]
	pub const fn unif(index: u32) -> Self {
		Self::new(RegFile::Unif, index)
	}

	#[must_use]
	pub const fn vary(index: u32) -> Self {
		Self::new(RegFile::Vary, index)
	}

	/// A small immediate holding the raw 32-bit value it encodes.
	#[must_use]
	pub const fn small_imm(value: u32) -> Self {
		Self::new(RegFile::SmallImm, value)
	}

	#[must_use]
	pub const fn load_imm(value: u32) -> Self {
		Self::new(RegFile::LoadImm, value)
	}

	#[must_use]
	pub const fn with_pack(mut self, pack: u8) -> Self {
		self.pack = pack;
		self
	}

	#[must_use]
	pub const fn is_null(self) -> bool {
		matches!(self.file, RegFile::Null)
	}

	#[must_use]
	pub const fn is_temp(self) -> bool {
		matches!(self.file, RegFile::Temp)
	}

	/// The temp index, if this is a temp.
	#[must_use]
	pub const fn as_temp(self) -> Option<u32> {
		if self.is_temp() {
			Some(self.index)
		} else {
			None
		}
	}

	#[must_use]
	pub const fn is_temp_index(self, index: u32) -> bool {
		self.is_temp() && self.index == index
	}
}

impl Display for Reg {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(self.file.prefix())?;

		match self.file {
			file if file.is_indexed() => Display::fmt(&self.index, f)?,
			RegFile::LoadImm | RegFile::SmallImm => {
				f.write_char('(')?;
				Display::fmt(&self.index, f)?;
				f.write_char(')')?;
			}
			_ => {}
		}

		if self.pack != 0 {
			f.write_str(".p")?;
			Display::fmt(&self.pack, f)?;
		}

		Ok(())
	}
}
