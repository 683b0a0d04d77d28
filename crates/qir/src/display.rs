use std::fmt::{Display, Formatter, Result as FmtResult, Write as _};

use super::{Block, Instruction, Op, Program};

impl Display for Instruction {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(self.op.name())?;

		if matches!(self.op, Op::Branch) {
			f.write_str(self.branch_cond.suffix())?;
		} else {
			f.write_str(self.cond.suffix())?;
		}

		if self.sf {
			f.write_str(".sf")?;
		}

		let mut first = true;
		let mut operand = |f: &mut Formatter<'_>, value: &dyn Display| -> FmtResult {
			f.write_str(if first { " " } else { ", " })?;
			first = false;
			value.fmt(f)
		};

		if self.op.info().has_dst || !self.dst.is_null() {
			operand(f, &self.dst)?;
		}

		for src in self.srcs() {
			operand(f, src)?;
		}

		Ok(())
	}
}

impl Display for Block {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		Display::fmt(&self.id, f)?;
		f.write_char(':')?;

		let mut successors = self.successors().peekable();
		if successors.peek().is_some() {
			f.write_str(" ->")?;
			for successor in successors {
				f.write_char(' ')?;
				Display::fmt(&successor, f)?;
			}
		}

		f.write_char('\n')?;

		for inst in &self.instructions {
			f.write_char('\t')?;
			Display::fmt(inst, f)?;
			f.write_char('\n')?;
		}

		Ok(())
	}
}

impl Display for Program {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str("; ")?;
		Display::fmt(&self.stage, f)?;
		if self.threaded {
			f.write_str(" threaded")?;
		}

		f.write_str(", ")?;
		Display::fmt(&self.num_temps, f)?;
		f.write_str(" temps\n")?;

		for (i, uniform) in self.uniforms.iter().enumerate() {
			f.write_str("; u")?;
			Display::fmt(&i, f)?;
			f.write_str(" = ")?;
			Display::fmt(uniform, f)?;
			f.write_char('\n')?;
		}

		for block in &self.blocks {
			Display::fmt(block, f)?;
		}

		Ok(())
	}
}
