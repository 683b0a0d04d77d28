use alloc::vec::Vec;
use core::{
	fmt::{Debug, Formatter, Result as FmtResult},
	iter::FusedIterator,
};

const WORD_BITS: usize = u64::BITS as usize;

/// A growable set of small integers, stored as packed 64-bit words.
#[derive(Default, Clone, PartialEq, Eq, Hash)]
pub struct BitSet {
	words: Vec<u64>,
}

impl BitSet {
	#[must_use]
	pub const fn new() -> Self {
		Self { words: Vec::new() }
	}

	#[must_use]
	pub fn with_capacity(bits: usize) -> Self {
		Self {
			words: alloc::vec![0; bits.div_ceil(WORD_BITS)],
		}
	}

	#[must_use]
	pub fn contains(&self, index: usize) -> bool {
		let (word, bit) = Self::locate(index);

		self.words.get(word).is_some_and(|w| w & bit != 0)
	}

	pub fn insert(&mut self, index: usize) -> bool {
		let (word, bit) = Self::locate(index);

		if word >= self.words.len() {
			self.words.resize(word + 1, 0);
		}

		let w = &mut self.words[word];
		let was_set = *w & bit != 0;
		*w |= bit;
		!was_set
	}

	pub fn remove(&mut self, index: usize) -> bool {
		let (word, bit) = Self::locate(index);

		let Some(w) = self.words.get_mut(word) else {
			return false;
		};

		let was_set = *w & bit != 0;
		*w &= !bit;
		was_set
	}

	pub fn clear(&mut self) {
		self.words.iter_mut().for_each(|w| *w = 0);
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.words.iter().all(|w| matches!(w, 0))
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.words.iter().map(|w| w.count_ones() as usize).sum()
	}

	/// Adds every member of `other`, returning whether anything new was added.
	pub fn union_with(&mut self, other: &Self) -> bool {
		if other.words.len() > self.words.len() {
			self.words.resize(other.words.len(), 0);
		}

		let mut changed = false;
		for (w, o) in self.words.iter_mut().zip(&other.words) {
			let new = *o & !*w;
			if new != 0 {
				*w |= new;
				changed = true;
			}
		}

		changed
	}

	#[must_use]
	pub fn difference(&self, other: &Self) -> Self {
		let words = self
			.words
			.iter()
			.enumerate()
			.map(|(i, w)| w & !other.words.get(i).copied().unwrap_or(0))
			.collect();

		Self { words }
	}

	#[must_use]
	pub fn union(&self, other: &Self) -> Self {
		let mut out = self.clone();
		out.union_with(other);
		out
	}

	#[must_use]
	pub fn iter(&self) -> Iter<'_> {
		Iter {
			words: &self.words,
			word: 0,
			current: self.words.first().copied().unwrap_or(0),
		}
	}

	const fn locate(index: usize) -> (usize, u64) {
		(index / WORD_BITS, 1 << (index % WORD_BITS))
	}
}

impl Debug for BitSet {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_set().entries(self.iter()).finish()
	}
}

impl Extend<usize> for BitSet {
	fn extend<T>(&mut self, iter: T)
	where
		T: IntoIterator<Item = usize>,
	{
		for i in iter {
			self.insert(i);
		}
	}
}

impl FromIterator<usize> for BitSet {
	fn from_iter<T>(iter: T) -> Self
	where
		T: IntoIterator<Item = usize>,
	{
		let mut out = Self::new();
		out.extend(iter);
		out
	}
}

impl<'a> IntoIterator for &'a BitSet {
	type IntoIter = Iter<'a>;
	type Item = usize;

	fn into_iter(self) -> Self::IntoIter {
		self.iter()
	}
}

#[derive(Debug, Clone)]
pub struct Iter<'a> {
	words: &'a [u64],
	word: usize,
	current: u64,
}

impl Iterator for Iter<'_> {
	type Item = usize;

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			if self.current != 0 {
				let bit = self.current.trailing_zeros() as usize;
				self.current &= self.current - 1;
				return Some(self.word * WORD_BITS + bit);
			}

			self.word += 1;
			self.current = *self.words.get(self.word)?;
		}
	}
}

impl FusedIterator for Iter<'_> {}
