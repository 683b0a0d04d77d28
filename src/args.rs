use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
	/// The QIR program to compile, in RON.
	pub file_path: PathBuf,
	/// Where the little-endian instruction words are written.
	#[arg(short, long)]
	pub output_path: PathBuf,
	/// A TOML file holding the assembler flags.
	#[arg(short, long)]
	pub flags_path: Option<PathBuf>,
	/// Directory for the stage snapshots and logs.
	#[arg(long, default_value = "./out")]
	pub out_dir: PathBuf,
}
