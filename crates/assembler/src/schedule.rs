use std::ops::Range;

use qpuc_qir::{BlockId, Program, UniformTable};
use qpuc_qpu::{Cond, Mux, QpuInst, RAddr, Sig, SmallImm, WAddr};
use qpuc_utils::{Dag, NodeId};
use serde::{Deserialize, Serialize};
use tracing::{Span, debug, info_span, trace};
use tracing_indicatif::span_ext::IndicatifSpanExt as _;

use super::{EmittedProgram, QueuedInst, RADDR_CONFLICT_SCRATCH};

/// Words in flight after a thread switch or branch before it takes effect.
pub const DELAY_SLOTS: usize = 3;

/// Consecutive stall words after which no head can ever be chosen.
const MAX_STALLS: u32 = 16;

/// The final words of a program and where they came from.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledProgram {
	pub words: Vec<QpuInst>,
	/// The word range of each block, including its branch delay slots.
	pub blocks: Vec<Range<usize>>,
	/// The uniform stream, in the order the scheduled words consume it.
	pub uniforms: UniformTable,
	/// Estimated cycles, counting latency stalls.
	pub cycles: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
	Forward,
	Reverse,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
	Accumulator(usize),
	FileA(u8),
	FileB(u8),
	Flags,
	VpmRead,
	VpmWrite,
	TmuWrite,
	Tlb,
	UniformsReset,
}

#[derive(Debug, Default)]
struct LastAccess {
	accumulators: [Option<NodeId>; 6],
	file_a: [Option<NodeId>; 32],
	file_b: [Option<NodeId>; 32],
	flags: Option<NodeId>,
	vpm_read: Option<NodeId>,
	vpm_write: Option<NodeId>,
	tmu_write: Option<NodeId>,
	tlb: Option<NodeId>,
	uniforms_reset: Option<NodeId>,
}

impl LastAccess {
	fn get(&mut self, slot: Slot) -> &mut Option<NodeId> {
		match slot {
			Slot::Accumulator(n) => &mut self.accumulators[n],
			Slot::FileA(addr) => &mut self.file_a[addr as usize],
			Slot::FileB(addr) => &mut self.file_b[addr as usize],
			Slot::Flags => &mut self.flags,
			Slot::VpmRead => &mut self.vpm_read,
			Slot::VpmWrite => &mut self.vpm_write,
			Slot::TmuWrite => &mut self.tmu_write,
			Slot::Tlb => &mut self.tlb,
			Slot::UniformsReset => &mut self.uniforms_reset,
		}
	}
}

struct DependencyBuilder<'a> {
	dag: &'a mut Dag<QueuedInst>,
	dir: Direction,
	last: LastAccess,
}

impl<'a> DependencyBuilder<'a> {
	fn new(dag: &'a mut Dag<QueuedInst>, dir: Direction) -> Self {
		Self {
			dag,
			dir,
			last: LastAccess::default(),
		}
	}

	fn add_dep(&mut self, before: Option<NodeId>, after: NodeId, write: bool) {
		let Some(before) = before else {
			return;
		};

		if before == after {
			return;
		}

		let war = !write && matches!(self.dir, Direction::Reverse);
		let (parent, child) = match self.dir {
			Direction::Forward => (before, after),
			Direction::Reverse => (after, before),
		};

		self.dag.add_edge(parent, child, war);
	}

	fn read(&mut self, slot: Slot, n: NodeId) {
		let before = *self.last.get(slot);
		self.add_dep(before, n, false);
	}

	fn write(&mut self, slot: Slot, n: NodeId) {
		let before = self.last.get(slot).replace(n);
		self.add_dep(before, n, true);
	}

	fn raddr_deps(&mut self, n: NodeId, raddr: RAddr, is_a: bool) {
		match raddr {
			RAddr::VARY => self.write(Slot::Accumulator(5), n),
			RAddr::VPM => self.write(Slot::VpmRead, n),
			RAddr::UNIF => self.read(Slot::UniformsReset, n),
			RAddr::MS_REV_FLAGS if is_a => self.read(Slot::Tlb, n),
			raddr if raddr.is_regfile() => {
				self.read(
					if is_a {
						Slot::FileA(raddr.0)
					} else {
						Slot::FileB(raddr.0)
					},
					n,
				);
			}
			_ => {}
		}
	}

	fn waddr_deps(&mut self, n: NodeId, inst: QpuInst, waddr: WAddr, is_add: bool) {
		let is_a = is_add ^ inst.ws();

		match waddr {
			waddr if waddr.is_regfile() => self.write(
				if is_a {
					Slot::FileA(waddr.0)
				} else {
					Slot::FileB(waddr.0)
				},
				n,
			),
			waddr if waddr.is_tmu() => {
				self.write(Slot::TmuWrite, n);
				self.read(Slot::UniformsReset, n);
			}
			waddr if waddr.is_sfu() => self.write(Slot::Accumulator(4), n),
			WAddr::ACC0 | WAddr::ACC1 | WAddr::ACC2 | WAddr::ACC3 | WAddr::ACC5 => {
				self.write(Slot::Accumulator((waddr.0 - WAddr::ACC0.0) as usize), n);
			}
			WAddr::TLB_COLOR_ALL
			| WAddr::TLB_COLOR_MS
			| WAddr::TLB_Z
			| WAddr::TLB_STENCIL_SETUP
			| WAddr::TLB_ALPHA_MASK
			| WAddr::MS_FLAGS => self.write(Slot::Tlb, n),
			WAddr::VPM | WAddr::VPM_ADDR => self.write(Slot::VpmWrite, n),
			WAddr::VPMVCD_SETUP => self.write(
				if is_a {
					Slot::VpmRead
				} else {
					Slot::VpmWrite
				},
				n,
			),
			WAddr::TMU_NOSWAP => self.write(Slot::TmuWrite, n),
			WAddr::UNIFORMS_ADDRESS => self.write(Slot::UniformsReset, n),
			_ => {}
		}
	}

	fn calculate_deps(&mut self, n: NodeId) {
		let inst = self.dag[n].data.inst;
		let sig = inst.sig();

		if !inst.is_special() {
			self.raddr_deps(n, inst.raddr_a(), true);
			if !matches!(sig, Sig::SmallImm) {
				self.raddr_deps(n, inst.raddr_b(), false);
			}

			for mux in inst.read_muxes() {
				if mux.is_accumulator() {
					self.read(Slot::Accumulator(mux as usize), n);
				}
			}
		}

		if !matches!(sig, Sig::Branch) {
			self.waddr_deps(n, inst, inst.waddr_add(), true);
			self.waddr_deps(n, inst, inst.waddr_mul(), false);
		}

		if sig.writes_r4() {
			self.write(Slot::Accumulator(4), n);
		}

		match sig {
			Sig::ThreadSwitch | Sig::LastThreadSwitch => {
				// Accumulators and flags are lost across the switch.
				for acc in 0..6 {
					self.write(Slot::Accumulator(acc), n);
				}

				self.write(Slot::Flags, n);

				// Scoreboard locking must stay after the last switch.
				self.write(Slot::Tlb, n);
				self.write(Slot::TmuWrite, n);
			}
			Sig::LoadTmu0 | Sig::LoadTmu1 => self.write(Slot::TmuWrite, n),
			Sig::ColorLoad => self.write(Slot::Tlb, n),
			Sig::Branch => {
				self.read(Slot::Flags, n);
				return;
			}
			_ => {}
		}

		for cond in [inst.cond_add(), inst.cond_mul()] {
			if !matches!(cond, Cond::Always | Cond::Never) {
				self.read(Slot::Flags, n);
			}
		}

		if inst.sf() {
			self.write(Slot::Flags, n);
		}
	}
}

fn waddr_latency(waddr: WAddr, after: QpuInst) -> u32 {
	match waddr {
		waddr if waddr.is_regfile() => 2,
		WAddr::TMU0_S if matches!(after.sig(), Sig::LoadTmu0) => 100,
		WAddr::TMU1_S if matches!(after.sig(), Sig::LoadTmu1) => 100,
		waddr if waddr.is_sfu() => 3,
		_ => 1,
	}
}

fn latency(before: QpuInst, after: QpuInst) -> u32 {
	waddr_latency(before.waddr_add(), after).max(waddr_latency(before.waddr_mul(), after))
}

fn build_dag(queued: &[QueuedInst]) -> Dag<QueuedInst> {
	let mut dag = Dag::new();
	let ids = queued
		.iter()
		.map(|inst| dag.add_node(*inst))
		.collect::<Vec<_>>();

	let mut forward = DependencyBuilder::new(&mut dag, Direction::Forward);
	for &id in &ids {
		forward.calculate_deps(id);
	}

	let mut reverse = DependencyBuilder::new(&mut dag, Direction::Reverse);
	for &id in ids.iter().rev() {
		reverse.calculate_deps(id);
	}

	for id in dag.bottom_up_order() {
		let inst = dag[id].data.inst;
		let delay = dag[id]
			.children()
			.iter()
			.map(|edge| dag[edge.child].delay + latency(inst, dag[edge.child].data.inst))
			.fold(1, u32::max);

		dag[id].delay = delay;
	}

	dag
}

/// Lower numbers are scheduled later.
fn priority(inst: QpuInst) -> u32 {
	if inst.is_tlb() {
		0
	} else if matches!(inst.sig(), Sig::LoadTmu0 | Sig::LoadTmu1) {
		1
	} else if inst.writes_waddr(WAddr::is_tmu) {
		3
	} else {
		2
	}
}

fn mark_scheduled(dag: &mut Dag<QueuedInst>, time: u32, id: NodeId) {
	let inst = dag[id].data.inst;
	let children = dag[id].children().to_vec();

	for edge in children {
		let latency = latency(inst, dag[edge.child].data.inst);
		let child = &mut dag[edge.child];
		child.unblocked_time = child.unblocked_time.max(time + latency);
	}

	dag.prune_head(id);
}

/// What recently issued words forbid of the next one.
#[derive(Debug, Clone, Copy)]
struct Scoreboard {
	tick: i64,
	last_waddr_a: WAddr,
	last_waddr_b: WAddr,
	last_sfu_write_tick: i64,
	last_uniforms_reset_tick: i64,
	tlb_locked: bool,
}

impl Scoreboard {
	const fn new() -> Self {
		Self {
			tick: 0,
			last_waddr_a: WAddr::NOP,
			last_waddr_b: WAddr::NOP,
			last_sfu_write_tick: -10,
			last_uniforms_reset_tick: -10,
			tlb_locked: false,
		}
	}

	fn update(&mut self, inst: QpuInst) {
		self.tick += 1;

		if matches!(inst.sig(), Sig::Branch) {
			self.last_waddr_a = WAddr::NOP;
			self.last_waddr_b = WAddr::NOP;
			return;
		}

		let (add, mul) = (inst.waddr_add(), inst.waddr_mul());
		if inst.ws() {
			self.last_waddr_a = mul;
			self.last_waddr_b = add;
		} else {
			self.last_waddr_a = add;
			self.last_waddr_b = mul;
		}

		let tick = self.tick - 1;

		if add.is_sfu() || mul.is_sfu() {
			self.last_sfu_write_tick = tick;
		}

		if add == WAddr::UNIFORMS_ADDRESS || mul == WAddr::UNIFORMS_ADDRESS {
			self.last_uniforms_reset_tick = tick;
		}

		if inst.is_tlb() {
			self.tlb_locked = true;
		}
	}

	fn wrote(&self, waddr: WAddr) -> bool {
		self.last_waddr_a == waddr || self.last_waddr_b == waddr
	}

	fn reads_too_soon(&self, inst: QpuInst) -> bool {
		// r4 may not be overwritten either.
		if (inst.writes_waddr(WAddr::is_sfu) || inst.sig().writes_r4())
			&& self.tick - self.last_sfu_write_tick <= 2
		{
			return true;
		}

		if matches!(inst.sig(), Sig::LoadImm) {
			return false;
		}

		let raddr_a = inst.raddr_a();
		let raddr_b = inst.raddr_b();
		let small_imm = matches!(inst.sig(), Sig::SmallImm);

		for mux in inst.read_muxes() {
			match mux {
				Mux::A if raddr_a.is_regfile() && self.last_waddr_a.0 == raddr_a.0 => return true,
				Mux::B
					if !small_imm && raddr_b.is_regfile() && self.last_waddr_b.0 == raddr_b.0 =>
				{
					return true;
				}
				Mux::R4 if self.tick - self.last_sfu_write_tick <= 2 => return true,
				_ => {}
			}
		}

		if small_imm && SmallImm::from_code(raddr_b.0).is_rotation() {
			let rotated = [inst.mul_a(), inst.mul_b()];
			if rotated
				.iter()
				.any(|&mux| self.wrote(WAddr(WAddr::ACC0.0 + mux as u8)))
			{
				return true;
			}

			if SmallImm::from_code(raddr_b.0) == SmallImm::ROTATE_BY_R5 && self.wrote(WAddr::ACC5) {
				return true;
			}
		}

		inst.reads_uniform() && self.tick - self.last_uniforms_reset_tick <= 2
	}

	/// The first tile buffer access waits on the scoreboard, which may not
	/// happen in the first two words.
	fn tlb_too_soon(&self, inst: QpuInst) -> bool {
		self.tick < 2 && inst.is_tlb()
	}
}

/// Packs the emitted words of each block into dual-issue words.
pub struct PostScheduler<'a> {
	program: &'a Program,
	scoreboard: Scoreboard,
	words: Vec<QpuInst>,
	uniforms: UniformTable,
	time: u32,
	/// The first word a thread switch may still be folded into.
	thrsw_floor: usize,
	branches: Vec<(usize, BlockId)>,
}

impl<'a> PostScheduler<'a> {
	#[must_use]
	pub const fn new(program: &'a Program) -> Self {
		Self {
			program,
			scoreboard: Scoreboard::new(),
			words: Vec::new(),
			uniforms: UniformTable::new(),
			time: 0,
			thrsw_floor: 0,
			branches: Vec::new(),
		}
	}

	#[tracing::instrument("schedule qpu words", skip_all, fields(words = emitted.len()))]
	pub fn run(mut self, emitted: &EmittedProgram) -> ScheduledProgram {
		let span = Span::current();
		span.pb_set_length(emitted.blocks.len() as u64);

		let mut blocks = Vec::with_capacity(emitted.blocks.len());
		for (index, queued) in emitted.blocks.iter().enumerate() {
			let range = info_span!("block", index).in_scope(|| self.schedule_block(queued));
			blocks.push(range);
			span.pb_inc(1);
		}

		for &(ip, target) in &self.branches {
			let Some(start) = blocks.get(target.0).map(|range: &Range<usize>| range.start) else {
				unreachable!("branch at {ip} to missing {target}");
			};

			let offset = (start as i64 - (ip + DELAY_SLOTS + 1) as i64) * 8;
			trace!(ip, %target, offset, "resolved branch");
			self.words[ip].set_branch_target(offset as i32);
		}

		self.finish_program();
		if let Some(last) = blocks.last_mut() {
			last.end = self.words.len();
		}

		debug!(
			words = self.words.len(),
			uniforms = self.uniforms.len(),
			cycles = self.time,
			"scheduled program"
		);

		ScheduledProgram {
			words: self.words,
			blocks,
			uniforms: self.uniforms,
			cycles: self.time,
		}
	}

	fn schedule_block(&mut self, queued: &[QueuedInst]) -> Range<usize> {
		let start = self.words.len();
		let mut dag = build_dag(queued);
		let mut stalls = 0;

		while !dag.is_empty() {
			let mut inst = QpuInst::nop();
			let mut branch_target = None;

			let chosen = self.choose(&dag, None);
			let mut merged = None;

			if let Some((chosen, _)) = chosen {
				let node = dag[chosen].data;
				self.time = self.time.max(dag[chosen].unblocked_time);
				dag.remove_war_edges(chosen);
				self.record_uniform(node);
				inst = node.inst;
				branch_target = node.branch_target;

				merged = self.choose(&dag, Some(chosen));
				if let Some((partner, word)) = merged {
					self.time = self.time.max(dag[partner].unblocked_time);
					self.record_uniform(dag[partner].data);
					inst = word;
				}

				trace!(ip = self.words.len(), word = %inst, merged = merged.is_some(), "issued");
				stalls = 0;
			} else {
				stalls += 1;
				if stalls > MAX_STALLS {
					unreachable!("no schedulable word among {} heads", dag.heads().len());
				}
			}

			if let Some((chosen, _)) = chosen {
				mark_scheduled(&mut dag, self.time, chosen);
			}

			if let Some((partner, _)) = merged {
				mark_scheduled(&mut dag, self.time, partner);
			}

			if inst.sig().is_thread_switch() {
				self.emit_thrsw(inst, start);
			} else {
				self.push(inst);
			}

			self.time += 1;

			if matches!(inst.sig(), Sig::Branch) {
				if let Some(target) = branch_target {
					self.branches.push((self.words.len() - 1, target));
				}

				for _ in 0..DELAY_SLOTS {
					self.pad();
				}
			}
		}

		start..self.words.len()
	}

	/// Picks the best ready word, or the best word to pair with `prev`
	/// together with the merged encoding.
	fn choose(&self, dag: &Dag<QueuedInst>, prev: Option<NodeId>) -> Option<(NodeId, QpuInst)> {
		let prev_id = prev;
		let prev = prev.map(|id| dag[id].data);

		if prev.is_some_and(|prev| prev.inst.sig().is_thread_switch()) {
			return None;
		}

		let mut chosen: Option<(NodeId, QpuInst, u32)> = None;

		for &id in dag.heads() {
			if prev_id == Some(id) {
				continue;
			}

			let node = &dag[id];
			let candidate = node.data;
			let sig = candidate.inst.sig();

			if prev.is_none() && matches!(sig, Sig::Branch) && dag.heads().len() > 1 {
				continue;
			}

			if self.scoreboard.reads_too_soon(candidate.inst)
				|| self.scoreboard.tlb_too_soon(candidate.inst)
			{
				continue;
			}

			let mut inst = candidate.inst;

			if let Some(prev) = prev {
				if sig.is_thread_switch()
					|| (prev.uniform.is_some() && candidate.uniform.is_some())
					|| (!self.scoreboard.tlb_locked && inst.is_tlb())
				{
					continue;
				}

				let Some(word) = prev.inst.merge(inst) else {
					continue;
				};

				inst = word;
			}

			let prio = priority(inst);

			let better = match chosen {
				None => true,
				Some((best, _, best_prio)) => {
					prio > best_prio || (prio == best_prio && node.delay > dag[best].delay)
				}
			};

			if better {
				chosen = Some((id, inst, prio));
			}
		}

		chosen.map(|(id, inst, _)| (id, inst))
	}

	fn record_uniform(&mut self, queued: QueuedInst) {
		let Some(index) = queued.uniform else {
			return;
		};

		if let Some(uniform) = self.program.uniforms.get(index) {
			self.uniforms.push(uniform);
		}
	}

	fn push(&mut self, inst: QpuInst) {
		self.scoreboard.update(inst);
		self.words.push(inst);
	}

	fn pad(&mut self) {
		self.push(QpuInst::nop());
		self.time += 1;
	}

	/// Folds the switch into one of the last few words with no signal,
	/// then fills the delay slots.
	fn emit_thrsw(&mut self, inst: QpuInst, block_start: usize) {
		let count = self.words.len();
		let floor = block_start.max(self.thrsw_floor);

		let mut thrsw_ip = count;
		for ip in (count.saturating_sub(DELAY_SLOTS).max(floor)..count).rev() {
			if matches!(self.words[ip].sig(), Sig::None) {
				thrsw_ip = ip;
			}
		}

		if thrsw_ip == count {
			self.push(inst);
		} else {
			trace!(ip = thrsw_ip, "folded thread switch");
			self.words[thrsw_ip].set_sig(inst.sig());
		}

		while self.words.len() < thrsw_ip + DELAY_SLOTS {
			self.pad();
		}

		self.thrsw_floor = thrsw_ip + DELAY_SLOTS;
	}

	/// The thread end word and its two delay slots may not touch the VPM,
	/// uniforms, varyings, the tile buffer or the regfiles.
	fn finish_program(&mut self) {
		let needs_pad = self.words.last().is_none_or(|&last| {
			!matches!(last.sig(), Sig::None)
				|| last.writes_regfile()
				|| last.is_tlb()
				|| last.reads_uniform()
				|| last.reads_raddr(RAddr::VARY)
				|| last.reads_raddr(RAddr::VPM)
				|| last.reads_raddr(RAddr(RADDR_CONFLICT_SCRATCH))
				|| last.writes_waddr(|w| matches!(w, WAddr::VPM | WAddr::VPMVCD_SETUP))
		}) || self.words.len() <= self.thrsw_floor;

		if needs_pad {
			self.pad();
		}

		let Some(last) = self.words.last_mut() else {
			unreachable!("padding left no words");
		};
		last.set_sig(Sig::ProgEnd);

		self.pad();
		self.pad();

		if self.program.stage.is_fragment() {
			if let Some(last) = self.words.last_mut() {
				last.set_sig(Sig::ScoreboardUnlock);
			}
		}
	}
}
