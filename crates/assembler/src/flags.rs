use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct AssemblerFlags {
	/// Try threaded compilation for fragment shaders, falling back to a single
	/// thread if registers run out.
	pub threaded: bool,
	pub optimize: bool,
	/// Check the scheduled words against the hardware's timing rules.
	pub validate: bool,
	/// Write snapshots of the program between stages.
	pub dump_ir: bool,
}

impl AssemblerFlags {
	#[must_use]
	pub const fn new() -> Self {
		Self {
			threaded: true,
			optimize: true,
			validate: cfg!(debug_assertions),
			dump_ir: false,
		}
	}

	#[must_use]
	pub const fn with_threaded(mut self, threaded: bool) -> Self {
		self.threaded = threaded;
		self
	}

	#[must_use]
	pub const fn with_optimize(mut self, optimize: bool) -> Self {
		self.optimize = optimize;
		self
	}

	#[must_use]
	pub const fn with_validate(mut self, validate: bool) -> Self {
		self.validate = validate;
		self
	}
}

impl Default for AssemblerFlags {
	fn default() -> Self {
		Self::new()
	}
}
