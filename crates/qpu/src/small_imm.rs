use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};

use super::QpuError;

/// The 6-bit immediate stored in the raddr B field under the small
/// immediate signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct SmallImm(u8);

impl SmallImm {
	/// Rotation by the amount held in r5.
	pub const ROTATE_BY_R5: Self = Self(48);

	#[must_use]
	pub const fn encode(value: u32) -> Option<Self> {
		if value <= 15 {
			return Some(Self(value as u8));
		}

		if (value as i32) < 0 && (value as i32) >= -16 {
			return Some(Self((value as i32 + 32) as u8));
		}

		let code = match value {
			0x3f80_0000 => 32,
			0x4000_0000 => 33,
			0x4080_0000 => 34,
			0x4100_0000 => 35,
			0x4180_0000 => 36,
			0x4200_0000 => 37,
			0x4280_0000 => 38,
			0x4300_0000 => 39,
			0x3b80_0000 => 40,
			0x3c00_0000 => 41,
			0x3c80_0000 => 42,
			0x3d00_0000 => 43,
			0x3d80_0000 => 44,
			0x3e00_0000 => 45,
			0x3e80_0000 => 46,
			0x3f00_0000 => 47,
			_ => return None,
		};

		Some(Self(code))
	}

	/// Mul unit vector rotation; zero rotates by r5.
	pub const fn rotate(amount: u32) -> Result<Self, QpuError> {
		if amount > 15 {
			return Err(QpuError::InvalidRotation(amount));
		}

		Ok(Self(48 + amount as u8))
	}

	#[must_use]
	pub const fn from_code(code: u8) -> Self {
		Self(code & 0x3f)
	}

	#[must_use]
	pub const fn code(self) -> u8 {
		self.0
	}

	#[must_use]
	pub const fn is_rotation(self) -> bool {
		self.0 >= 48
	}

	/// The rotation amount, where zero means "by r5".
	#[must_use]
	pub const fn rotation(self) -> Option<u8> {
		if self.is_rotation() {
			Some(self.0 - 48)
		} else {
			None
		}
	}

	#[must_use]
	pub const fn value(self) -> Option<u32> {
		Some(match self.0 {
			0..=15 => self.0 as u32,
			16..=31 => (self.0 as i32 - 32) as u32,
			32..=39 => 0x3f80_0000 + ((self.0 as u32 - 32) << 23),
			40..=47 => 0x3b80_0000 + ((self.0 as u32 - 40) << 23),
			_ => return None,
		})
	}
}

impl TryFrom<u32> for SmallImm {
	type Error = QpuError;

	fn try_from(value: u32) -> Result<Self, Self::Error> {
		Self::encode(value).ok_or(QpuError::UnencodableImmediate(value))
	}
}

impl Display for SmallImm {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match (self.value(), self.rotation()) {
			(_, Some(0)) => f.write_str("r5 rot"),
			(_, Some(rot)) => {
				Display::fmt(&rot, f)?;
				f.write_str(" rot")
			}
			(Some(v), None) if self.0 >= 32 => Display::fmt(&f32::from_bits(v), f),
			(Some(v), None) => Display::fmt(&(v as i32), f),
			(None, None) => f.write_str("?"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::SmallImm;
	use crate::QpuError;

	#[test]
	fn integers_and_floats_encode() {
		assert_eq!(SmallImm::encode(7).map(SmallImm::code), Some(7));
		assert_eq!(SmallImm::encode(-1i32 as u32).map(SmallImm::code), Some(31));
		assert_eq!(SmallImm::encode(-16i32 as u32).map(SmallImm::code), Some(16));
		assert_eq!(SmallImm::encode(1.0f32.to_bits()).map(SmallImm::code), Some(32));
		assert_eq!(SmallImm::encode(128.0f32.to_bits()).map(SmallImm::code), Some(39));
		assert_eq!(SmallImm::encode(0.5f32.to_bits()).map(SmallImm::code), Some(47));
		assert_eq!(SmallImm::encode((1.0f32 / 256.0).to_bits()).map(SmallImm::code), Some(40));
	}

	#[test]
	fn unencodable_values_are_rejected() {
		assert_eq!(SmallImm::encode(16), None);
		assert_eq!(SmallImm::encode(-17i32 as u32), None);
		assert_eq!(
			SmallImm::try_from(3.0f32.to_bits()),
			Err(QpuError::UnencodableImmediate(3.0f32.to_bits()))
		);
	}

	#[test]
	fn every_value_code_decodes_to_itself() {
		for code in 0..48 {
			let imm = SmallImm::from_code(code);
			let value = imm.value().unwrap();
			assert_eq!(SmallImm::encode(value), Some(imm));
		}
	}

	#[test]
	fn rotations() {
		assert_eq!(SmallImm::rotate(0), Ok(SmallImm::ROTATE_BY_R5));
		assert_eq!(SmallImm::rotate(15).map(SmallImm::code), Ok(63));
		assert_eq!(SmallImm::rotate(3).ok().and_then(SmallImm::rotation), Some(3));
		assert_eq!(SmallImm::rotate(16), Err(QpuError::InvalidRotation(16)));
		assert_eq!(SmallImm::ROTATE_BY_R5.value(), None);
	}
}
