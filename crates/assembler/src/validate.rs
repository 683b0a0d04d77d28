use qpuc_qpu::{Mux, QpuInst, RAddr, Sig, SmallImm, WAddr};
use tracing::debug;

use super::{RADDR_CONFLICT_SCRATCH, ValidationError, ValidationErrorKind as Kind};

fn writes(word: QpuInst, waddr: WAddr) -> bool {
	(!word.is_special() && word.writes_waddr(|w| w == waddr))
		|| (matches!(word.sig(), Sig::LoadImm) && word.waddr_add() == waddr)
}

fn reads_file_a(word: QpuInst, addr: u8) -> bool {
	word.reads_raddr_a() && word.raddr_a().0 == addr && word.reads_mux(Mux::A)
}

fn reads_file_b(word: QpuInst, addr: u8) -> bool {
	word.reads_raddr_b() && word.raddr_b().0 == addr && word.reads_mux(Mux::B)
}

fn touches_scratch(word: QpuInst) -> bool {
	word.reads_raddr(RAddr(RADDR_CONFLICT_SCRATCH))
		|| word.regfile_a_write() == Some(RADDR_CONFLICT_SCRATCH)
		|| word.regfile_b_write() == Some(RADDR_CONFLICT_SCRATCH)
}

/// Checks final words against the hardware's documented restrictions.
pub struct HardwareValidator;

impl HardwareValidator {
	#[tracing::instrument("validate qpu words", skip(words), fields(words = words.len()))]
	pub fn run(words: &[QpuInst], threaded: bool) -> Result<(), ValidationError> {
		let fail = |ip: usize, kind: Kind| Err(ValidationError::new(ip, words[ip], kind));

		Self::check_program_end(words)?;

		if let Some(ip) = words.iter().take(2).position(|word| word.is_tlb()) {
			return fail(ip, Kind::EarlyScoreboard);
		}

		let mut last_noswap = -10i64;
		let mut last_sfu = -10i64;
		let mut last_uniforms_reset = -3i64;

		for (ip, &word) in words.iter().enumerate() {
			let i = ip as i64;

			if word.num_sf_accesses() > 1 {
				return fail(ip, Kind::MultiplePeripheralAccesses);
			}

			if i - last_noswap <= 3 && (writes(word, WAddr::TMU0_S) || writes(word, WAddr::TMU1_S)) {
				return fail(ip, Kind::TmuAfterNoswap);
			}

			if writes(word, WAddr::TMU_NOSWAP) {
				last_noswap = i;
			}

			let writes_sfu = !word.is_special() && word.writes_waddr(WAddr::is_sfu);
			if i - last_sfu <= 2
				&& (writes_sfu || word.sig().writes_r4() || word.reads_mux(Mux::R4))
			{
				return fail(ip, Kind::SfuResultTooSoon);
			}

			if writes_sfu {
				last_sfu = i;
			}

			if word.reads_uniform() && i - last_uniforms_reset <= 2 {
				return fail(ip, Kind::UniformAfterReset);
			}

			if writes(word, WAddr::UNIFORMS_ADDRESS) {
				last_uniforms_reset = i;
			}

			if let Some(prev) = ip.checked_sub(1).map(|prev| words[prev]) {
				if let Some(addr) = prev.regfile_a_write().filter(|&addr| reads_file_a(word, addr)) {
					return fail(ip, Kind::ReadAfterWrite(addr));
				}

				if let Some(addr) = prev.regfile_b_write().filter(|&addr| reads_file_b(word, addr)) {
					return fail(ip, Kind::ReadAfterWrite(addr));
				}
			}

			if let Some(kind) = Self::check_rotation(word, ip.checked_sub(1).map(|prev| words[prev])) {
				return fail(ip, kind);
			}

			let after_z = (1..=2)
				.filter_map(|back| ip.checked_sub(back))
				.any(|prev| writes(words[prev], WAddr::TLB_Z));
			if after_z && reads_file_a(word, RAddr::MS_REV_FLAGS.0) {
				return fail(ip, Kind::MsFlagsAfterTlbZ);
			}
		}

		if threaded {
			Self::check_thread_switches(words)?;
		}

		debug!("words follow the hardware rules");

		Ok(())
	}

	/// The thread end word and its two delay slots.
	fn check_program_end(words: &[QpuInst]) -> Result<(), ValidationError> {
		let mut locked = false;

		for (ip, &word) in words.iter().enumerate() {
			if !matches!(word.sig(), Sig::ProgEnd) {
				locked |= word.is_tlb();
				continue;
			}

			let fail = |ip: usize, kind: Kind| Err(ValidationError::new(ip, words[ip], kind));

			if word.writes_regfile() || (word.is_tlb() && !locked) || ip + 2 >= words.len() {
				return fail(ip, Kind::ProgramEndAccess);
			}

			for slot in ip..=ip + 2 {
				let word = words[slot];

				if writes(word, WAddr::VPM)
					|| word.reads_raddr(RAddr::VARY)
					|| word.reads_raddr(RAddr::UNIF)
					|| word.reads_raddr(RAddr::VPM)
					|| touches_scratch(word)
				{
					return fail(slot, Kind::ProgramEndAccess);
				}
			}

			if writes(words[ip + 2], WAddr::TLB_Z) {
				return fail(ip + 2, Kind::ProgramEndTlbZ);
			}
		}

		Ok(())
	}

	fn check_rotation(word: QpuInst, prev: Option<QpuInst>) -> Option<Kind> {
		if !matches!(word.sig(), Sig::SmallImm) {
			return None;
		}

		let imm = SmallImm::from_code(word.raddr_b().0);
		if !imm.is_rotation() {
			return None;
		}

		let muxes = [word.mul_a(), word.mul_b()];
		if muxes.iter().any(|&mux| mux as u8 > Mux::R3 as u8) {
			return Some(Kind::RotateSource);
		}

		let prev = prev?;

		if imm == SmallImm::ROTATE_BY_R5 && writes(prev, WAddr::ACC5) {
			return Some(Kind::RotateAfterWrite);
		}

		muxes
			.iter()
			.any(|&mux| writes(prev, WAddr(WAddr::ACC0.0 + mux as u8)))
			.then_some(Kind::RotateAfterWrite)
	}

	/// Texture results come back in request order, so every load that was
	/// requested before a switch must be collected before the next one.
	fn check_thread_switches(words: &[QpuInst]) -> Result<(), ValidationError> {
		let fail = |ip: usize, kind: Kind| Err(ValidationError::new(ip, words[ip], kind));

		let mut last_found = false;
		let mut locked = false;
		let mut outstanding = 0u32;
		let mut outstanding_before_switch = 0u32;
		let mut switch_ip = None;

		for (ip, &word) in words.iter().enumerate() {
			let sig = word.sig();

			if switch_ip == Some(ip) {
				if outstanding_before_switch != 0 {
					return fail(ip, Kind::ThreadSwitchPendingTexture);
				}

				outstanding_before_switch = outstanding;
				outstanding = 0;
			}

			locked |= word.is_tlb();

			match sig {
				Sig::ThreadSwitch | Sig::LastThreadSwitch => {
					if locked {
						return fail(ip, Kind::ThreadSwitchLocked);
					}

					if last_found {
						return fail(ip, Kind::ThreadSwitchAfterLast);
					}

					if switch_ip.is_some_and(|switch| ip < switch) {
						return fail(ip, Kind::ThreadSwitchInDelaySlot);
					}

					last_found = matches!(sig, Sig::LastThreadSwitch);
					switch_ip = Some(ip + super::DELAY_SLOTS);
				}
				Sig::LoadTmu0 | Sig::LoadTmu1 => {
					if outstanding_before_switch > 0 {
						outstanding_before_switch -= 1;
					} else if outstanding > 0 {
						outstanding -= 1;
					} else {
						return fail(ip, Kind::TmuLoadNotRequested);
					}
				}
				_ => {}
			}

			if !word.is_special() && word.writes_waddr(WAddr::is_tmu_s) {
				outstanding += 1;
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use qpuc_qpu::{AddOp, QpuInst, QpuReg, Sig, SmallImm, WAddr};

	use super::HardwareValidator;
	use crate::{ValidationError, ValidationErrorKind};

	fn with_sig(mut word: QpuInst, sig: Sig) -> QpuInst {
		word.set_sig(sig);
		word
	}

	/// Appends a valid program end.
	fn finish(mut words: Vec<QpuInst>) -> Vec<QpuInst> {
		words.push(with_sig(QpuInst::nop(), Sig::ProgEnd));
		words.push(QpuInst::nop());
		words.push(QpuInst::nop());
		words
	}

	fn kind(words: &[QpuInst], threaded: bool) -> Option<ValidationErrorKind> {
		HardwareValidator::run(words, threaded)
			.err()
			.map(|e| e.kind)
	}

	#[test]
	fn well_spaced_program_passes() -> Result<(), ValidationError> {
		let words = finish(vec![
			QpuInst::a_mov(QpuReg::ra(3), QpuReg::r(0)),
			QpuInst::nop(),
			QpuInst::a_alu2(AddOp::Add, QpuReg::r(1), QpuReg::ra(3), QpuReg::r(0)),
		]);

		HardwareValidator::run(&words, false)
	}

	#[test]
	fn regfile_read_right_after_write() {
		let words = finish(vec![
			QpuInst::a_mov(QpuReg::ra(3), QpuReg::r(0)),
			QpuInst::a_alu2(AddOp::Add, QpuReg::r(1), QpuReg::ra(3), QpuReg::r(0)),
		]);

		assert_eq!(kind(&words, false), Some(ValidationErrorKind::ReadAfterWrite(3)));
	}

	#[test]
	fn program_end_may_not_write_the_regfile() {
		let words = vec![
			with_sig(QpuInst::a_mov(QpuReg::ra(1), QpuReg::r(0)), Sig::ProgEnd),
			QpuInst::nop(),
			QpuInst::nop(),
		];

		assert_eq!(kind(&words, false), Some(ValidationErrorKind::ProgramEndAccess));
	}

	#[test]
	fn program_end_needs_its_delay_slots() {
		let words = vec![with_sig(QpuInst::nop(), Sig::ProgEnd), QpuInst::nop()];

		assert_eq!(kind(&words, false), Some(ValidationErrorKind::ProgramEndAccess));
	}

	#[test]
	fn final_word_may_not_write_z() {
		let words = vec![
			QpuInst::nop(),
			QpuInst::nop(),
			with_sig(QpuInst::nop(), Sig::ProgEnd),
			QpuInst::nop(),
			QpuInst::a_mov(QpuReg::ra(WAddr::TLB_Z.0), QpuReg::r(0)),
		];

		assert_eq!(kind(&words, false), Some(ValidationErrorKind::ProgramEndTlbZ));
	}

	#[test]
	fn sfu_results_need_two_words() {
		let words = finish(vec![
			QpuInst::a_mov(QpuReg::rb(WAddr::SFU_RECIP.0), QpuReg::r(0)),
			QpuInst::nop(),
			QpuInst::a_mov(QpuReg::r(1), QpuReg::r4()),
		]);

		assert_eq!(kind(&words, false), Some(ValidationErrorKind::SfuResultTooSoon));
	}

	#[test]
	fn tile_buffer_is_not_touched_early() {
		let words = finish(vec![QpuInst::a_mov(
			QpuReg::ra(WAddr::TLB_COLOR_ALL.0),
			QpuReg::r(0),
		)]);

		assert_eq!(kind(&words, false), Some(ValidationErrorKind::EarlyScoreboard));
	}

	#[test]
	fn rotations_read_settled_accumulators() {
		let words = finish(vec![
			QpuInst::a_mov(QpuReg::r(2), QpuReg::ra(0)),
			QpuInst::m_rot(QpuReg::r(3), QpuReg::r(2), SmallImm::from_code(50)),
		]);

		assert_eq!(kind(&words, false), Some(ValidationErrorKind::RotateAfterWrite));
	}

	#[test]
	fn uniforms_wait_after_a_reset() {
		let words = finish(vec![
			QpuInst::a_mov(QpuReg::ra(WAddr::UNIFORMS_ADDRESS.0), QpuReg::r(0)),
			QpuInst::nop(),
			QpuInst::a_mov(QpuReg::r(0), QpuReg::unif()),
		]);

		assert_eq!(kind(&words, false), Some(ValidationErrorKind::UniformAfterReset));
	}

	#[test]
	fn thread_switches_stay_apart() {
		let words = finish(vec![
			with_sig(QpuInst::nop(), Sig::ThreadSwitch),
			QpuInst::nop(),
			with_sig(QpuInst::nop(), Sig::ThreadSwitch),
			QpuInst::nop(),
			QpuInst::nop(),
		]);

		assert_eq!(kind(&words, true), Some(ValidationErrorKind::ThreadSwitchInDelaySlot));
		assert_eq!(kind(&words, false), None);
	}

	#[test]
	fn nothing_switches_after_the_last_switch() {
		let words = finish(vec![
			with_sig(QpuInst::nop(), Sig::LastThreadSwitch),
			QpuInst::nop(),
			QpuInst::nop(),
			with_sig(QpuInst::nop(), Sig::ThreadSwitch),
			QpuInst::nop(),
			QpuInst::nop(),
		]);

		assert_eq!(kind(&words, true), Some(ValidationErrorKind::ThreadSwitchAfterLast));
	}

	#[test]
	fn texture_results_are_collected_before_the_next_switch() {
		let words = finish(vec![
			QpuInst::a_mov(QpuReg::rb(WAddr::TMU0_S.0), QpuReg::r(0)),
			with_sig(QpuInst::nop(), Sig::ThreadSwitch),
			QpuInst::nop(),
			QpuInst::nop(),
			with_sig(QpuInst::nop(), Sig::ThreadSwitch),
			QpuInst::nop(),
			QpuInst::nop(),
			with_sig(QpuInst::nop(), Sig::LoadTmu0),
		]);

		assert_eq!(
			kind(&words, true),
			Some(ValidationErrorKind::ThreadSwitchPendingTexture)
		);
	}

	#[test]
	fn texture_loads_need_a_request() {
		let unrequested = finish(vec![with_sig(QpuInst::nop(), Sig::LoadTmu0)]);
		assert_eq!(
			kind(&unrequested, true),
			Some(ValidationErrorKind::TmuLoadNotRequested)
		);

		let requested = finish(vec![
			QpuInst::a_mov(QpuReg::rb(WAddr::TMU0_S.0), QpuReg::r(0)),
			QpuInst::nop(),
			with_sig(QpuInst::nop(), Sig::LoadTmu0),
		]);
		assert_eq!(kind(&requested, true), None);
	}
}
