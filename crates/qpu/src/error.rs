use std::{
	error::Error,
	fmt::{Display, Formatter, Result as FmtResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpuError {
	UnencodableImmediate(u32),
	InvalidRotation(u32),
}

impl Display for QpuError {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::UnencodableImmediate(value) => {
				f.write_str("value ")?;
				write!(f, "{value:#010x}")?;
				f.write_str(" has no small immediate encoding")
			}
			Self::InvalidRotation(rot) => {
				f.write_str("cannot rotate by ")?;
				Display::fmt(&rot, f)
			}
		}
	}
}

impl Error for QpuError {}
