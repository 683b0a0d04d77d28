use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};

use super::{Mux, RAddr, SmallImm, WAddr};

/// Where an operand comes from or goes to, before it is encoded into a word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QpuMux {
	R0,
	R1,
	R2,
	R3,
	R4,
	R5,
	A,
	B,
	SmallImm,
}

impl QpuMux {
	#[must_use]
	pub const fn accumulator(n: u8) -> Self {
		match n {
			0 => Self::R0,
			1 => Self::R1,
			2 => Self::R2,
			3 => Self::R3,
			4 => Self::R4,
			_ => Self::R5,
		}
	}

	/// The ALU input selector; small immediates are read through mux B.
	#[must_use]
	pub const fn mux(self) -> Mux {
		match self {
			Self::R0 => Mux::R0,
			Self::R1 => Mux::R1,
			Self::R2 => Mux::R2,
			Self::R3 => Mux::R3,
			Self::R4 => Mux::R4,
			Self::R5 => Mux::R5,
			Self::A => Mux::A,
			Self::B | Self::SmallImm => Mux::B,
		}
	}

	#[must_use]
	pub const fn is_accumulator(self) -> bool {
		self.mux().is_accumulator()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QpuReg {
	pub mux: QpuMux,
	pub addr: u8,
}

impl QpuReg {
	#[must_use]
	pub const fn new(mux: QpuMux, addr: u8) -> Self {
		Self { mux, addr }
	}

	#[must_use]
	pub const fn r(n: u8) -> Self {
		Self::new(QpuMux::accumulator(n), 0)
	}

	#[must_use]
	pub const fn r4() -> Self {
		Self::r(4)
	}

	#[must_use]
	pub const fn r5() -> Self {
		Self::r(5)
	}

	#[must_use]
	pub const fn ra(addr: u8) -> Self {
		Self::new(QpuMux::A, addr)
	}

	#[must_use]
	pub const fn rb(addr: u8) -> Self {
		Self::new(QpuMux::B, addr)
	}

	#[must_use]
	pub const fn small_imm(imm: SmallImm) -> Self {
		Self::new(QpuMux::SmallImm, imm.code())
	}

	#[must_use]
	pub const fn nop() -> Self {
		Self::ra(WAddr::NOP.0)
	}

	#[must_use]
	pub const fn unif() -> Self {
		Self::ra(RAddr::UNIF.0)
	}

	#[must_use]
	pub const fn vary() -> Self {
		Self::ra(RAddr::VARY.0)
	}

	#[must_use]
	pub const fn vrsetup() -> Self {
		Self::ra(WAddr::VPMVCD_SETUP.0)
	}

	#[must_use]
	pub const fn vwsetup() -> Self {
		Self::rb(WAddr::VPMVCD_SETUP.0)
	}

	#[must_use]
	pub const fn is_nop(self) -> bool {
		matches!(self.mux, QpuMux::A | QpuMux::B) && self.addr == WAddr::NOP.0
	}

	/// Whether this is a general purpose regfile slot rather than an
	/// accumulator or a peripheral address.
	#[must_use]
	pub const fn is_regfile(self) -> bool {
		matches!(self.mux, QpuMux::A | QpuMux::B) && self.addr < 32
	}
}

impl Display for QpuReg {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self.mux {
			QpuMux::A => {
				f.write_str("ra")?;
				Display::fmt(&self.addr, f)
			}
			QpuMux::B => {
				f.write_str("rb")?;
				Display::fmt(&self.addr, f)
			}
			QpuMux::SmallImm => Display::fmt(&SmallImm::from_code(self.addr), f),
			acc => {
				f.write_str("r")?;
				Display::fmt(&(acc.mux() as u8), f)
			}
		}
	}
}
