#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg))]

mod decode;
mod defines;
mod error;
mod inst;
mod merge;
mod reg;
mod small_imm;

pub use self::{decode::*, defines::*, error::*, inst::*, merge::*, reg::*, small_imm::*};
