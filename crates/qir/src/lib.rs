#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg))]

mod block;
mod display;
mod error;
mod instruction;
mod live;
mod lower;
mod op;
pub mod opt;
mod program;
mod reg;
mod schedule;
mod uniform;
mod validate;

pub use self::{
	block::*, error::*, instruction::*, live::*, op::*, program::*, reg::*, schedule::*,
	uniform::*, validate::*,
};
