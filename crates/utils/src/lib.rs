#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg))]
#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "bitset")]
mod bitset;
#[cfg(feature = "dag")]
mod dag;

#[cfg(feature = "bitset")]
pub use self::bitset::*;
#[cfg(feature = "dag")]
pub use self::dag::*;
