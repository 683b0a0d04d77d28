use serde::{Deserialize, Serialize};

use super::{AddOp, Cond, MulOp, Mux, QpuInst, Sig, SmallImm, Unpack, WAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RegFile {
	A,
	B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AluOp {
	Add(AddOp),
	Mul(MulOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
	Accumulator(u8),
	Reg(RegFile, u8),
	SmallImm(SmallImm),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecodedSource {
	pub source: Source,
	pub unpack: Unpack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
	pub waddr: WAddr,
	/// `None` for addresses that mean the same in either file.
	pub file: Option<RegFile>,
	pub pack: u8,
}

/// One ALU half of a word, with its operands resolved through the
/// shared raddr and pack fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AluHalf {
	pub op: AluOp,
	pub dst: Destination,
	pub cond: Cond,
	pub sources: Vec<DecodedSource>,
}

impl QpuInst {
	#[must_use]
	pub fn decode_add(self) -> Option<AluHalf> {
		if !self.has_add() {
			return None;
		}

		let op = self.op_add()?;
		let waddr = self.waddr_add();

		Some(AluHalf {
			op: AluOp::Add(op),
			dst: Destination {
				waddr,
				file: self.dst_file(waddr, RegFile::A),
				pack: self.dst_pack(waddr, false),
			},
			cond: self.cond_add(),
			sources: [self.add_a(), self.add_b()]
				.into_iter()
				.take(op.nsrc())
				.map(|mux| self.decode_source(mux))
				.collect(),
		})
	}

	#[must_use]
	pub fn decode_mul(self) -> Option<AluHalf> {
		if !self.has_mul() {
			return None;
		}

		let op = self.op_mul();
		let waddr = self.waddr_mul();

		Some(AluHalf {
			op: AluOp::Mul(op),
			dst: Destination {
				waddr,
				file: self.dst_file(waddr, RegFile::B),
				pack: self.dst_pack(waddr, true),
			},
			cond: self.cond_mul(),
			sources: [self.mul_a(), self.mul_b()]
				.into_iter()
				.take(op.nsrc())
				.map(|mux| self.decode_source(mux))
				.collect(),
		})
	}

	fn dst_file(self, waddr: WAddr, unswapped: RegFile) -> Option<RegFile> {
		if waddr.ignores_ws() {
			return None;
		}

		Some(match (unswapped, self.ws()) {
			(RegFile::A, false) | (RegFile::B, true) => RegFile::A,
			_ => RegFile::B,
		})
	}

	fn dst_pack(self, waddr: WAddr, is_mul: bool) -> u8 {
		if self.pm() {
			return if is_mul { self.pack() } else { 0 };
		}

		let writes_a = waddr.is_regfile() && self.ws() == is_mul;
		if writes_a { self.pack() } else { 0 }
	}

	fn decode_source(self, mux: Mux) -> DecodedSource {
		let (source, unpack) = match mux {
			Mux::A => (
				Source::Reg(RegFile::A, self.raddr_a().0),
				if self.pm() { Unpack::Nop } else { self.unpack() },
			),
			Mux::B if matches!(self.sig(), Sig::SmallImm) => (
				Source::SmallImm(SmallImm::from_code(self.raddr_b().0)),
				Unpack::Nop,
			),
			Mux::B => (Source::Reg(RegFile::B, self.raddr_b().0), Unpack::Nop),
			Mux::R4 if self.pm() => (Source::Accumulator(4), self.unpack()),
			acc => (Source::Accumulator(acc as u8), Unpack::Nop),
		};

		DecodedSource { source, unpack }
	}
}
