use super::{AddOp, Field, MulOp, Mux, QpuInst, RAddr, Sig, Unpack, WAddr};

const MUX_FIELDS: [Field; 4] = [Field::ADD_A, Field::ADD_B, Field::MUL_A, Field::MUL_B];

impl QpuInst {
	/// Combines two words into one dual-issue word, or `None` if their
	/// fields can't be satisfied by a single encoding.
	#[must_use]
	pub fn merge(self, other: Self) -> Option<Self> {
		let (mut a, mut b) = (self, other);

		if [a.sig(), b.sig()]
			.iter()
			.any(|s| matches!(s, Sig::LoadImm | Sig::SmallImm | Sig::Branch))
		{
			return None;
		}

		if a.has_add() && b.has_add() {
			if a.has_mul() || b.has_mul() {
				return None;
			}

			if let Some(converted) = a.convert_mov() {
				a = converted;
			} else {
				b = b.convert_mov()?;
			}
		}

		if a.has_mul() && b.has_mul() {
			return None;
		}

		if a.num_sf_accesses() > 0 && b.num_sf_accesses() > 0 {
			return None;
		}

		let mut merge = Self(a.0 | b.0);

		merge_field(
			&mut merge,
			a,
			b,
			Field::SIG.mask(),
			Field::SIG.place(Sig::None as u64),
		)
		.then_some(())?;
		merge_field(&mut merge, a, b, Field::SF.mask(), u64::MAX).then_some(())?;

		let raddr_nop = Field::RADDR_A.place(RAddr::NOP.0.into());
		if !merge_field(&mut merge, a, b, Field::RADDR_A.mask(), raddr_nop) {
			if let Some((swapped, merged)) = try_swap_ra_file(merge, a, b) {
				a = swapped;
				merge = merged;
			} else {
				let (swapped, merged) = try_swap_ra_file(merge, b, a)?;
				b = swapped;
				merge = merged;
			}
		}

		let fields = [
			(Field::RADDR_B, u64::from(RAddr::NOP.0)),
			(Field::WADDR_ADD, u64::from(WAddr::NOP.0)),
			(Field::WADDR_MUL, u64::from(WAddr::NOP.0)),
		];
		for (field, ignore) in fields {
			merge_field(&mut merge, a, b, field.mask(), field.place(ignore)).then_some(())?;
		}

		let ignores_ws = |inst: Self| inst.waddr_add().ignores_ws() && inst.waddr_mul().ignores_ws();
		if ignores_ws(a) {
			merge.set(Field::WS, b.get(Field::WS));
		} else if ignores_ws(b) {
			merge.set(Field::WS, a.get(Field::WS));
		} else if a.ws() != b.ws() {
			return None;
		}

		if a.pm() == b.pm() {
			merge_packing(&mut merge, a, b).then_some(merge)
		} else {
			let (packed, plain) = if a.pm() { (a, b) } else { (b, a) };

			if plain.pack() != 0 || !matches!(plain.unpack(), Unpack::Nop) {
				return None;
			}

			if packed.pack() != 0 && plain.has_mul() {
				return None;
			}

			if !matches!(packed.unpack(), Unpack::Nop) && plain.reads_mux(Mux::R4) {
				return None;
			}

			Some(merge)
		}
	}

	/// Rewrites an add unit `or x, x` as the equivalent `v8min x, x` on the
	/// mul unit.
	fn convert_mov(self) -> Option<Self> {
		if self.op_add() != Some(AddOp::Or)
			|| self.add_a() != self.add_b()
			|| !matches!(self.sig(), Sig::None)
			|| self.pack() != 0
			|| self.pm()
		{
			return None;
		}

		let waddr = self.waddr_add();
		let mux = self.get(Field::ADD_A);

		let mut inst = self
			.with(Field::OP_ADD, AddOp::Nop as u64)
			.with(Field::ADD_A, 0)
			.with(Field::ADD_B, 0)
			.with(Field::WADDR_ADD, WAddr::NOP.0.into())
			.with(Field::COND_ADD, 0)
			.with(Field::OP_MUL, MulOp::V8Min as u64)
			.with(Field::MUL_A, mux)
			.with(Field::MUL_B, mux)
			.with(Field::WADDR_MUL, waddr.0.into())
			.with(Field::COND_MUL, self.get(Field::COND_ADD));

		if !waddr.ignores_ws() {
			inst.set(Field::WS, u64::from(!self.ws()));
		}

		Some(inst)
	}

	const fn writes_a_file(self) -> bool {
		if self.ws() {
			self.waddr_mul().is_regfile()
		} else {
			self.waddr_add().is_regfile()
		}
	}
}

const fn merge_field(merge: &mut QpuInst, a: QpuInst, b: QpuInst, mask: u64, ignore: u64) -> bool {
	if a.0 & mask == ignore {
		merge.0 = (merge.0 & !mask) | (b.0 & mask);
	} else if b.0 & mask == ignore {
		merge.0 = (merge.0 & !mask) | (a.0 & mask);
	} else if a.0 & mask != b.0 & mask {
		return false;
	}

	true
}

/// Moves a uniform or varying read of `a` from regfile A to regfile B, which
/// reads the same FIFO.
fn try_swap_ra_file(merge: QpuInst, a: QpuInst, b: QpuInst) -> Option<(QpuInst, QpuInst)> {
	let raddr = a.raddr_a();

	if a.raddr_b() != RAddr::NOP || !matches!(raddr, RAddr::UNIF | RAddr::VARY) {
		return None;
	}

	if !merge.pm() && !matches!(merge.unpack(), Unpack::Nop) {
		return None;
	}

	if b.raddr_b() != RAddr::NOP && b.raddr_b() != raddr {
		return None;
	}

	let mut a = a
		.with(Field::RADDR_A, RAddr::NOP.0.into())
		.with(Field::RADDR_B, raddr.0.into());
	for field in MUX_FIELDS {
		if a.get(field) == Mux::A as u64 {
			a.set(field, Mux::B as u64);
		}
	}

	let mut merge = merge
		.with(Field::RADDR_A, b.raddr_a().0.into())
		.with(Field::RADDR_B, raddr.0.into());
	for field in MUX_FIELDS {
		merge.set(field, a.get(field) | b.get(field));
	}

	Some((a, merge))
}

fn merge_packing(merge: &mut QpuInst, a: QpuInst, b: QpuInst) -> bool {
	if !merge_field(merge, a, b, Field::PACK.mask(), 0) {
		return false;
	}

	let new_a_pack = a.pack() != merge.pack();
	let new_b_pack = b.pack() != merge.pack();
	if merge.pm() {
		if (new_a_pack && a.has_mul()) || (new_b_pack && b.has_mul()) {
			return false;
		}
	} else if (new_a_pack && a.writes_a_file()) || (new_b_pack && b.writes_a_file()) {
		return false;
	}

	if !merge_field(merge, a, b, Field::UNPACK.mask(), 0) {
		return false;
	}

	let new_a_unpack = a.unpack() != merge.unpack();
	let new_b_unpack = b.unpack() != merge.unpack();
	if merge.pm() {
		!((new_a_unpack && a.reads_mux(Mux::R4)) || (new_b_unpack && b.reads_mux(Mux::R4)))
	} else {
		!((new_a_unpack && a.raddr_a() != RAddr::NOP) || (new_b_unpack && b.raddr_a() != RAddr::NOP))
	}
}
