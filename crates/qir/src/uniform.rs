use std::{
	fmt::{Display, Formatter, Result as FmtResult},
	ops::Index,
};

use serde::{Deserialize, Serialize};

/// What the driver writes into a uniform stream slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniformContents {
	/// A literal 32-bit value.
	Constant,
	/// The user uniform at `data`.
	User,
	TextureConfigP0,
	TextureConfigP1,
	TextureConfigP2,
	TextureFirstLevel,
	TextureMsaaAddr,
	TextureBorderColor,
	TexrectScaleX,
	TexrectScaleY,
	UboAddr,
	ViewportXScale,
	ViewportYScale,
	ViewportZOffset,
	ViewportZScale,
	UserClipPlane,
	BlendConstColorRgba,
	BlendConstColorAaaa,
	Stencil,
	AlphaRef,
	SampleMask,
	/// The address of the uniform stream itself, used to rewind it.
	UniformsAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uniform {
	pub contents: UniformContents,
	pub data: u32,
}

impl Uniform {
	#[must_use]
	pub const fn new(contents: UniformContents, data: u32) -> Self {
		Self { contents, data }
	}

	#[must_use]
	pub const fn constant(value: u32) -> Self {
		Self::new(UniformContents::Constant, value)
	}

	#[must_use]
	pub const fn constant_value(self) -> Option<u32> {
		match self.contents {
			UniformContents::Constant => Some(self.data),
			_ => None,
		}
	}
}

impl Display for Uniform {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self.contents {
			UniformContents::Constant => {
				f.write_str("0x")?;
				std::fmt::LowerHex::fmt(&self.data, f)?;
				f.write_str(" (")?;
				Display::fmt(&f32::from_bits(self.data), f)?;
				f.write_str(")")
			}
			contents => {
				std::fmt::Debug::fmt(&contents, f)?;
				f.write_str("[")?;
				Display::fmt(&self.data, f)?;
				f.write_str("]")
			}
		}
	}
}

/// The contents of each uniform stream slot, in stream order once finalized.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniformTable {
	entries: Vec<Uniform>,
}

impl UniformTable {
	#[must_use]
	pub const fn new() -> Self {
		Self {
			entries: Vec::new(),
		}
	}

	/// Returns the index of a matching entry, adding one if none exists.
	pub fn add(&mut self, uniform: Uniform) -> u32 {
		if let Some(index) = self.entries.iter().position(|u| *u == uniform) {
			return index as u32;
		}

		self.push(uniform)
	}

	/// Appends an entry without deduplicating.
	pub fn push(&mut self, uniform: Uniform) -> u32 {
		self.entries.push(uniform);
		(self.entries.len() - 1) as u32
	}

	#[must_use]
	pub fn get(&self, index: u32) -> Option<Uniform> {
		self.entries.get(index as usize).copied()
	}

	#[must_use]
	pub fn constant_value(&self, index: u32) -> Option<u32> {
		self.get(index).and_then(Uniform::constant_value)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Uniform> {
		self.entries.iter()
	}

	/// Raw values for a stream consisting only of constants, in order.
	#[must_use]
	pub fn constants(&self) -> Option<Vec<u32>> {
		self.iter().map(|u| u.constant_value()).collect()
	}
}

impl Index<u32> for UniformTable {
	type Output = Uniform;

	fn index(&self, index: u32) -> &Self::Output {
		&self.entries[index as usize]
	}
}

impl FromIterator<Uniform> for UniformTable {
	fn from_iter<T: IntoIterator<Item = Uniform>>(iter: T) -> Self {
		Self {
			entries: iter.into_iter().collect(),
		}
	}
}

impl<'a> IntoIterator for &'a UniformTable {
	type IntoIter = std::slice::Iter<'a, Uniform>;
	type Item = &'a Uniform;

	fn into_iter(self) -> Self::IntoIter {
		self.iter()
	}
}

#[cfg(test)]
mod tests {
	use super::{Uniform, UniformContents, UniformTable};

	#[test]
	fn add_deduplicates() {
		let mut table = UniformTable::new();
		let a = table.add(Uniform::constant(1));
		let b = table.add(Uniform::new(UniformContents::User, 1));
		let c = table.add(Uniform::constant(1));

		assert_eq!(a, c);
		assert_ne!(a, b);
		assert_eq!(table.len(), 2);
		assert_eq!(table.constant_value(a), Some(1));
		assert_eq!(table.constant_value(b), None);
	}

	#[test]
	fn push_keeps_duplicates() {
		let mut table = UniformTable::new();
		table.push(Uniform::constant(3));
		table.push(Uniform::constant(3));
		assert_eq!(table.constants(), Some(vec![3, 3]));
	}
}
