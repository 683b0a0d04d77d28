use std::fmt::{Display, Formatter, LowerHex, Result as FmtResult};

use serde::{Deserialize, Serialize};

use super::{
	AddOp, BranchCond, Cond, LoadImmMode, MulOp, Mux, QpuMux, QpuReg, RAddr, Sig, SmallImm,
	Unpack, WAddr,
};

/// A bit range inside an instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
	shift: u32,
	width: u32,
}

impl Field {
	pub const ADD_A: Self = Self::new(9, 3);
	pub const ADD_B: Self = Self::new(6, 3);
	pub const BRANCH_COND: Self = Self::new(52, 4);
	pub const BRANCH_RADDR_A: Self = Self::new(45, 5);
	pub const BRANCH_REG: Self = Self::new(50, 1);
	pub const BRANCH_REL: Self = Self::new(51, 1);
	pub const BRANCH_TARGET: Self = Self::new(0, 32);
	pub const COND_ADD: Self = Self::new(49, 3);
	pub const COND_MUL: Self = Self::new(46, 3);
	pub const IMMEDIATE: Self = Self::new(0, 32);
	pub const LOAD_IMM_MODE: Self = Self::new(57, 3);
	pub const MUL_A: Self = Self::new(3, 3);
	pub const MUL_B: Self = Self::new(0, 3);
	pub const OP_ADD: Self = Self::new(24, 5);
	pub const OP_MUL: Self = Self::new(29, 3);
	pub const PACK: Self = Self::new(52, 4);
	pub const PM: Self = Self::new(56, 1);
	pub const RADDR_A: Self = Self::new(18, 6);
	pub const RADDR_B: Self = Self::new(12, 6);
	pub const SF: Self = Self::new(45, 1);
	pub const SIG: Self = Self::new(60, 4);
	pub const UNPACK: Self = Self::new(57, 3);
	pub const WADDR_ADD: Self = Self::new(38, 6);
	pub const WADDR_MUL: Self = Self::new(32, 6);
	pub const WS: Self = Self::new(44, 1);

	#[must_use]
	pub const fn new(shift: u32, width: u32) -> Self {
		Self { shift, width }
	}

	#[must_use]
	pub const fn mask(self) -> u64 {
		(u64::MAX >> (64 - self.width)) << self.shift
	}

	#[must_use]
	pub const fn place(self, value: u64) -> u64 {
		(value << self.shift) & self.mask()
	}
}

/// One encoded 64-bit QPU instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct QpuInst(pub u64);

impl QpuInst {
	/// A word doing nothing in either ALU, reading and writing nothing.
	#[must_use]
	pub const fn nop() -> Self {
		Self(0)
			.with(Field::SIG, Sig::None as u64)
			.with(Field::WADDR_ADD, WAddr::NOP.0 as u64)
			.with(Field::WADDR_MUL, WAddr::NOP.0 as u64)
			.with(Field::RADDR_A, RAddr::NOP.0 as u64)
			.with(Field::RADDR_B, RAddr::NOP.0 as u64)
	}

	#[must_use]
	pub fn a_alu2(op: AddOp, dst: QpuReg, src0: QpuReg, src1: QpuReg) -> Self {
		let mut inst = Self::nop()
			.with(Field::OP_ADD, op as u64)
			.with(Field::COND_ADD, Cond::Always as u64);

		inst.set_add_dst(dst);
		inst.set(Field::ADD_A, src0.mux.mux() as u64);
		inst.set_src_raddr(src0);
		inst.set(Field::ADD_B, src1.mux.mux() as u64);
		inst.set_src_raddr(src1);

		inst
	}

	#[must_use]
	pub fn m_alu2(op: MulOp, dst: QpuReg, src0: QpuReg, src1: QpuReg) -> Self {
		let mut inst = Self::nop()
			.with(Field::OP_MUL, op as u64)
			.with(Field::COND_MUL, Cond::Always as u64);

		inst.set_mul_dst(dst);
		inst.set(Field::MUL_A, src0.mux.mux() as u64);
		inst.set_src_raddr(src0);
		inst.set(Field::MUL_B, src1.mux.mux() as u64);
		inst.set_src_raddr(src1);

		inst
	}

	#[must_use]
	pub fn a_mov(dst: QpuReg, src: QpuReg) -> Self {
		Self::a_alu2(AddOp::Or, dst, src, src)
	}

	#[must_use]
	pub fn m_mov(dst: QpuReg, src: QpuReg) -> Self {
		Self::m_alu2(MulOp::V8Min, dst, src, src)
	}

	/// Mul unit vector rotation of `src` across the 16 SIMD lanes.
	#[must_use]
	pub fn m_rot(dst: QpuReg, src: QpuReg, rotation: SmallImm) -> Self {
		debug_assert!(src.mux.is_accumulator(), "rotating non-accumulator {src}");

		Self::m_mov(dst, src)
			.with(Field::SIG, Sig::SmallImm as u64)
			.with(Field::RADDR_B, rotation.code() as u64)
	}

	#[must_use]
	pub fn load_imm(dst: QpuReg, value: u32, mode: LoadImmMode) -> Self {
		let mut inst = Self(0)
			.with(Field::SIG, Sig::LoadImm as u64)
			.with(Field::LOAD_IMM_MODE, mode as u64)
			.with(Field::WADDR_MUL, WAddr::NOP.0 as u64)
			.with(Field::COND_ADD, Cond::Always as u64)
			.with(Field::COND_MUL, Cond::Never as u64)
			.with(Field::IMMEDIATE, value.into());

		inst.set_add_dst(dst);
		inst
	}

	#[must_use]
	pub const fn branch(cond: BranchCond, target: u32) -> Self {
		Self(0)
			.with(Field::SIG, Sig::Branch as u64)
			.with(Field::BRANCH_COND, cond as u64)
			.with(Field::BRANCH_REL, 1)
			.with(Field::WADDR_ADD, WAddr::NOP.0 as u64)
			.with(Field::WADDR_MUL, WAddr::NOP.0 as u64)
			.with(Field::BRANCH_TARGET, target as u64)
	}

	#[must_use]
	pub const fn get(self, field: Field) -> u64 {
		(self.0 & field.mask()) >> field.shift
	}

	pub const fn set(&mut self, field: Field, value: u64) {
		self.0 = (self.0 & !field.mask()) | field.place(value);
	}

	#[must_use]
	pub const fn with(mut self, field: Field, value: u64) -> Self {
		self.set(field, value);
		self
	}

	#[must_use]
	pub const fn sig(self) -> Sig {
		Sig::from_bits(self.get(Field::SIG))
	}

	pub const fn set_sig(&mut self, sig: Sig) {
		self.set(Field::SIG, sig as u64);
	}

	#[must_use]
	pub const fn op_add(self) -> Option<AddOp> {
		AddOp::from_bits(self.get(Field::OP_ADD))
	}

	#[must_use]
	pub const fn op_mul(self) -> MulOp {
		MulOp::from_bits(self.get(Field::OP_MUL))
	}

	#[must_use]
	pub const fn has_add(self) -> bool {
		!self.is_special() && !matches!(self.get(Field::OP_ADD), 0)
	}

	#[must_use]
	pub const fn has_mul(self) -> bool {
		!self.is_special() && !matches!(self.op_mul(), MulOp::Nop)
	}

	/// Load immediate and branch words reuse the ALU fields for other data.
	#[must_use]
	pub const fn is_special(self) -> bool {
		matches!(self.sig(), Sig::LoadImm | Sig::Branch)
	}

	#[must_use]
	pub const fn waddr_add(self) -> WAddr {
		WAddr(self.get(Field::WADDR_ADD) as u8)
	}

	#[must_use]
	pub const fn waddr_mul(self) -> WAddr {
		WAddr(self.get(Field::WADDR_MUL) as u8)
	}

	#[must_use]
	pub const fn raddr_a(self) -> RAddr {
		RAddr(self.get(Field::RADDR_A) as u8)
	}

	#[must_use]
	pub const fn raddr_b(self) -> RAddr {
		RAddr(self.get(Field::RADDR_B) as u8)
	}

	#[must_use]
	pub const fn cond_add(self) -> Cond {
		Cond::from_bits(self.get(Field::COND_ADD))
	}

	#[must_use]
	pub const fn cond_mul(self) -> Cond {
		Cond::from_bits(self.get(Field::COND_MUL))
	}

	pub const fn set_cond_add(&mut self, cond: Cond) {
		self.set(Field::COND_ADD, cond as u64);
	}

	pub const fn set_cond_mul(&mut self, cond: Cond) {
		self.set(Field::COND_MUL, cond as u64);
	}

	#[must_use]
	pub const fn sf(self) -> bool {
		!matches!(self.sig(), Sig::Branch) && self.get(Field::SF) != 0
	}

	pub const fn set_sf(&mut self, sf: bool) {
		self.set(Field::SF, sf as u64);
	}

	#[must_use]
	pub const fn ws(self) -> bool {
		self.get(Field::WS) != 0
	}

	#[must_use]
	pub const fn pm(self) -> bool {
		self.get(Field::PM) != 0
	}

	#[must_use]
	pub const fn pack(self) -> u8 {
		self.get(Field::PACK) as u8
	}

	#[must_use]
	pub const fn unpack(self) -> Unpack {
		Unpack::from_bits(self.get(Field::UNPACK))
	}

	#[must_use]
	pub const fn add_a(self) -> Mux {
		Mux::from_bits(self.get(Field::ADD_A))
	}

	#[must_use]
	pub const fn add_b(self) -> Mux {
		Mux::from_bits(self.get(Field::ADD_B))
	}

	#[must_use]
	pub const fn mul_a(self) -> Mux {
		Mux::from_bits(self.get(Field::MUL_A))
	}

	#[must_use]
	pub const fn mul_b(self) -> Mux {
		Mux::from_bits(self.get(Field::MUL_B))
	}

	#[must_use]
	pub const fn branch_cond(self) -> Option<BranchCond> {
		BranchCond::from_bits(self.get(Field::BRANCH_COND))
	}

	pub const fn set_branch_target(&mut self, target: i32) {
		self.set(Field::BRANCH_TARGET, target as u32 as u64);
	}

	#[must_use]
	pub const fn branch_target(self) -> i32 {
		self.get(Field::BRANCH_TARGET) as u32 as i32
	}

	/// The muxes read by the ALU halves that actually do something.
	#[must_use]
	pub fn read_muxes(self) -> Vec<Mux> {
		let mut muxes = Vec::with_capacity(4);

		if let Some(op) = self.op_add().filter(|_| !self.is_special()) {
			muxes.extend([self.add_a(), self.add_b()].into_iter().take(op.nsrc()));
		}

		if !self.is_special() {
			let op = self.op_mul();
			muxes.extend([self.mul_a(), self.mul_b()].into_iter().take(op.nsrc()));
		}

		muxes
	}

	#[must_use]
	pub fn reads_mux(self, mux: Mux) -> bool {
		self.read_muxes().contains(&mux)
	}

	/// Whether the word reads regfile A at `raddr_a`.
	#[must_use]
	pub const fn reads_raddr_a(self) -> bool {
		!self.is_special() && self.raddr_a().0 != RAddr::NOP.0
	}

	/// Whether the word reads regfile B at `raddr_b` (not a small immediate).
	#[must_use]
	pub const fn reads_raddr_b(self) -> bool {
		!self.is_special()
			&& !matches!(self.sig(), Sig::SmallImm)
			&& self.raddr_b().0 != RAddr::NOP.0
	}

	/// Whether the word consumes an entry of the uniform stream. Texture
	/// parameter writes take their configuration from it implicitly.
	#[must_use]
	pub fn reads_uniform(self) -> bool {
		self.reads_raddr(RAddr::UNIF)
			|| (!self.is_special()
				&& self.writes_waddr(|w| w.is_tmu() && w != WAddr::TMU_NOSWAP))
	}

	#[must_use]
	pub const fn reads_raddr(self, raddr: RAddr) -> bool {
		(self.reads_raddr_a() && self.raddr_a().0 == raddr.0)
			|| (self.reads_raddr_b() && self.raddr_b().0 == raddr.0)
	}

	/// Tests both write addresses, skipping slots that write nothing.
	#[must_use]
	pub fn writes_waddr(self, f: impl Fn(WAddr) -> bool) -> bool {
		let add = self.waddr_add();
		let mul = self.waddr_mul();

		(add != WAddr::NOP && f(add)) || (mul != WAddr::NOP && f(mul))
	}

	/// The regfile A write address, if this word writes regfile A.
	#[must_use]
	pub const fn regfile_a_write(self) -> Option<u8> {
		let add = self.waddr_add();
		let mul = self.waddr_mul();

		if !self.ws() && add.is_regfile() {
			Some(add.0)
		} else if self.ws() && mul.is_regfile() {
			Some(mul.0)
		} else {
			None
		}
	}

	/// The regfile B write address, if this word writes regfile B.
	#[must_use]
	pub const fn regfile_b_write(self) -> Option<u8> {
		let add = self.waddr_add();
		let mul = self.waddr_mul();

		if self.ws() && add.is_regfile() {
			Some(add.0)
		} else if !self.ws() && mul.is_regfile() {
			Some(mul.0)
		} else {
			None
		}
	}

	#[must_use]
	pub const fn writes_regfile(self) -> bool {
		self.waddr_add().is_regfile() || self.waddr_mul().is_regfile()
	}

	/// Counts accesses to closely coupled peripherals (TLB, TMU, SFU, mutex).
	#[must_use]
	pub const fn num_sf_accesses(self) -> u32 {
		let mut accesses = 0;

		if self.waddr_add().is_sf_access() {
			accesses += 1;
		}

		if self.waddr_mul().is_sf_access() {
			accesses += 1;
		}

		if !self.is_special() {
			if self.raddr_a().0 == RAddr::MUTEX_ACQUIRE.0 {
				accesses += 1;
			}

			if self.raddr_b().0 == RAddr::MUTEX_ACQUIRE.0 && !matches!(self.sig(), Sig::SmallImm) {
				accesses += 1;
			}
		}

		if matches!(
			self.sig(),
			Sig::ColorLoad | Sig::ColorLoadEnd | Sig::LoadTmu0 | Sig::LoadTmu1
		) {
			accesses += 1;
		}

		accesses
	}

	/// Whether the word touches the tile buffer and so needs the scoreboard.
	#[must_use]
	pub fn is_tlb(self) -> bool {
		self.writes_waddr(WAddr::is_tlb)
			|| matches!(self.sig(), Sig::ColorLoad | Sig::WaitForScoreboard)
	}

	fn set_add_dst(&mut self, dst: QpuReg) {
		match dst.mux {
			QpuMux::A => self.set(Field::WADDR_ADD, dst.addr.into()),
			QpuMux::B => {
				self.set(Field::WADDR_ADD, dst.addr.into());
				self.set(Field::WS, 1);
			}
			QpuMux::SmallImm => unreachable!("write to small immediate"),
			acc => {
				debug_assert!(!matches!(acc, QpuMux::R4), "r4 is not writable");
				self.set(
					Field::WADDR_ADD,
					u64::from(WAddr::ACC0.0) + acc.mux() as u64,
				);
			}
		}
	}

	fn set_mul_dst(&mut self, dst: QpuReg) {
		match dst.mux {
			QpuMux::A => {
				self.set(Field::WADDR_MUL, dst.addr.into());
				self.set(Field::WS, 1);
			}
			QpuMux::B => self.set(Field::WADDR_MUL, dst.addr.into()),
			QpuMux::SmallImm => unreachable!("write to small immediate"),
			acc => {
				debug_assert!(!matches!(acc, QpuMux::R4), "r4 is not writable");
				self.set(
					Field::WADDR_MUL,
					u64::from(WAddr::ACC0.0) + acc.mux() as u64,
				);
			}
		}
	}

	fn set_src_raddr(&mut self, src: QpuReg) {
		match src.mux {
			QpuMux::A => {
				debug_assert!(
					matches!(self.raddr_a(), RAddr::NOP) || self.raddr_a().0 == src.addr,
					"raddr a conflict"
				);
				self.set(Field::RADDR_A, src.addr.into());
			}
			QpuMux::B => {
				debug_assert!(
					(matches!(self.raddr_b(), RAddr::NOP) || self.raddr_b().0 == src.addr)
						&& !matches!(self.sig(), Sig::SmallImm),
					"raddr b conflict"
				);
				self.set(Field::RADDR_B, src.addr.into());
			}
			QpuMux::SmallImm => {
				debug_assert!(
					matches!(self.raddr_b(), RAddr::NOP)
						|| (matches!(self.sig(), Sig::SmallImm) && self.raddr_b().0 == src.addr),
					"small immediate conflict"
				);
				self.set_sig(Sig::SmallImm);
				self.set(Field::RADDR_B, src.addr.into());
			}
			_ => {}
		}
	}
}

impl Default for QpuInst {
	fn default() -> Self {
		Self::nop()
	}
}

impl LowerHex for QpuInst {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		LowerHex::fmt(&self.0, f)
	}
}

impl Display for QpuInst {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self.sig() {
			Sig::LoadImm => {
				f.write_str("load_imm ")?;
				Display::fmt(&self.waddr_add(), f)?;
				f.write_str(", ")?;
				write!(f, "{:#010x}", self.get(Field::IMMEDIATE))
			}
			Sig::Branch => {
				f.write_str("brr")?;
				if let Some(cond) = self.branch_cond() {
					f.write_str(cond.suffix())?;
				}
				f.write_str(" ")?;
				Display::fmt(&self.branch_target(), f)
			}
			sig => {
				let add = self.op_add().unwrap_or(AddOp::Nop);
				f.write_str(add.name())?;
				f.write_str(self.cond_add().suffix())?;
				if !matches!(add, AddOp::Nop) {
					f.write_str(" ")?;
					Display::fmt(&self.waddr_add(), f)?;
				}

				f.write_str(" ; ")?;
				let mul = self.op_mul();
				f.write_str(mul.name())?;
				f.write_str(self.cond_mul().suffix())?;
				if !matches!(mul, MulOp::Nop) {
					f.write_str(" ")?;
					Display::fmt(&self.waddr_mul(), f)?;
				}

				if !matches!(sig, Sig::None) {
					f.write_str(" ; ")?;
					f.write_str(sig.name())?;
				}

				if self.sf() {
					f.write_str(".sf")?;
				}

				Ok(())
			}
		}
	}
}
