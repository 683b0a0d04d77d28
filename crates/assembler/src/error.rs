use std::{
	error::Error as StdError,
	fmt::{Display, Formatter, Result as FmtResult},
};

use qpuc_qir::QirError;
use qpuc_qpu::QpuInst;

use super::regalloc::RegClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationError {
	/// The constraints on a temp leave no register file that satisfies all of
	/// them.
	InvalidClass { temp: u32, class: RegClass },
	/// The interference graph could not be colored with the available
	/// registers.
	OutOfRegisters { temp: u32, live: usize },
}

impl Display for AllocationError {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::InvalidClass { temp, class } => {
				f.write_str("temp t")?;
				Display::fmt(&temp, f)?;
				f.write_str(" has unsatisfiable register constraints ")?;
				Display::fmt(&class, f)
			}
			Self::OutOfRegisters { temp, live } => {
				f.write_str("no register left for temp t")?;
				Display::fmt(&temp, f)?;
				f.write_str(" with ")?;
				Display::fmt(&live, f)?;
				f.write_str(" interfering temps")
			}
		}
	}
}

impl StdError for AllocationError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
	/// The program end word or one of its delay slots touches VPM, varyings,
	/// uniforms, the regfile or the reserved scratch register.
	ProgramEndAccess,
	/// The final word writes TLB Z.
	ProgramEndTlbZ,
	/// A regfile address is read by the word right after its write.
	ReadAfterWrite(u8),
	/// r4 is read or overwritten too soon after an SFU write.
	SfuResultTooSoon,
	/// A rotate reads something other than r0-r3.
	RotateSource,
	/// A rotate reads an accumulator written by the previous word.
	RotateAfterWrite,
	/// A uniform is read too soon after the uniform stream address changed.
	UniformAfterReset,
	/// The scoreboard is touched in the first two words.
	EarlyScoreboard,
	/// A TMU write comes too soon after a TMU_NOSWAP write.
	TmuAfterNoswap,
	/// More than one closely coupled peripheral access in a word.
	MultiplePeripheralAccesses,
	/// MS flags are read too soon after a TLB Z write.
	MsFlagsAfterTlbZ,
	/// A thread switch happens with the scoreboard locked.
	ThreadSwitchLocked,
	/// A thread switch in the delay slots of another.
	ThreadSwitchInDelaySlot,
	/// A thread switch after the last thread switch.
	ThreadSwitchAfterLast,
	/// A thread switch with texture results still pending from before the
	/// previous switch.
	ThreadSwitchPendingTexture,
	/// A texture result is collected with no request outstanding.
	TmuLoadNotRequested,
}

impl Display for ValidationErrorKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::ProgramEndAccess => {
				f.write_str("program end delay slots access peripherals or the regfile")
			}
			Self::ProgramEndTlbZ => f.write_str("final word writes TLB Z"),
			Self::ReadAfterWrite(addr) => {
				f.write_str("regfile address ")?;
				Display::fmt(&addr, f)?;
				f.write_str(" read right after being written")
			}
			Self::SfuResultTooSoon => f.write_str("r4 accessed within two words of an SFU write"),
			Self::RotateSource => f.write_str("rotate of a non r0-r3 source"),
			Self::RotateAfterWrite => f.write_str("rotate of an accumulator written by the previous word"),
			Self::UniformAfterReset => {
				f.write_str("uniform read within two words of a uniforms address write")
			}
			Self::EarlyScoreboard => f.write_str("scoreboard access in the first two words"),
			Self::TmuAfterNoswap => f.write_str("TMU write within three words of TMU_NOSWAP"),
			Self::MultiplePeripheralAccesses => {
				f.write_str("more than one peripheral access in one word")
			}
			Self::MsFlagsAfterTlbZ => f.write_str("MS flags read within two words of a TLB Z write"),
			Self::ThreadSwitchLocked => f.write_str("thread switch with the scoreboard locked"),
			Self::ThreadSwitchInDelaySlot => {
				f.write_str("thread switch in the delay slots of another")
			}
			Self::ThreadSwitchAfterLast => f.write_str("thread switch after the last thread switch"),
			Self::ThreadSwitchPendingTexture => {
				f.write_str("thread switch with texture results pending across a switch")
			}
			Self::TmuLoadNotRequested => f.write_str("texture result loaded with no request pending"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationError {
	pub ip: usize,
	pub word: QpuInst,
	pub kind: ValidationErrorKind,
}

impl ValidationError {
	#[must_use]
	pub const fn new(ip: usize, word: QpuInst, kind: ValidationErrorKind) -> Self {
		Self { ip, word, kind }
	}
}

impl Display for ValidationError {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		Display::fmt(&self.kind, f)?;
		f.write_str(" at ")?;
		Display::fmt(&self.ip, f)?;
		f.write_str(": 0x")?;
		f.write_fmt(format_args!("{:016x}", self.word))?;
		f.write_str(" ")?;
		Display::fmt(&self.word, f)
	}
}

impl StdError for ValidationError {}

#[derive(Debug)]
pub enum AssemblyError {
	Qir(QirError),
	Allocation(AllocationError),
	Validation(ValidationError),
	/// Allocation failed in threaded mode and again without threading.
	ThreadedFallbackFailed(AllocationError),
}

impl Display for AssemblyError {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::Qir(..) => f.write_str("the input program is invalid"),
			Self::Allocation(..) => f.write_str("register allocation failed"),
			Self::Validation(..) => f.write_str("the scheduled program violates hardware rules"),
			Self::ThreadedFallbackFailed(..) => {
				f.write_str("register allocation failed with and without threading")
			}
		}
	}
}

impl StdError for AssemblyError {
	fn source(&self) -> Option<&(dyn StdError + 'static)> {
		match self {
			Self::Qir(e) => Some(e),
			Self::Allocation(e) | Self::ThreadedFallbackFailed(e) => Some(e),
			Self::Validation(e) => Some(e),
		}
	}
}

impl From<QirError> for AssemblyError {
	fn from(value: QirError) -> Self {
		Self::Qir(value)
	}
}

impl From<AllocationError> for AssemblyError {
	fn from(value: AllocationError) -> Self {
		Self::Allocation(value)
	}
}

impl From<ValidationError> for AssemblyError {
	fn from(value: ValidationError) -> Self {
		Self::Validation(value)
	}
}
