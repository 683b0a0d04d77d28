mod args;

use std::{fs, path::Path};

use clap::Parser as _;
use color_eyre::{Result, eyre::WrapErr as _};
use qpuc_assembler::{Assembler, AssemblerFlags};
use qpuc_qir::Program;
use ron::ser::PrettyConfig;
use serde::Serialize;
use tracing::{error, info};
use tracing_error::ErrorLayer;
use tracing_indicatif::{IndicatifLayer, style::ProgressStyle};
use tracing_subscriber::{
	EnvFilter,
	fmt::{self, format::FmtSpan},
	prelude::*,
};

use self::args::Args;

#[cfg(target_os = "windows")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
	let args = match Args::try_parse() {
		Ok(a) => a,
		Err(e) => {
			eprintln!("{e}");
			return Ok(());
		}
	};

	install_tracing(&args.out_dir)?;
	color_eyre::install()?;

	let raw_data = fs::read_to_string(&args.file_path)
		.wrap_err_with(|| format!("failed to read {}", args.file_path.display()))?;
	let program = ron::from_str::<Program>(&raw_data)?;

	let flags = match &args.flags_path {
		Some(path) => toml::from_str::<AssemblerFlags>(&fs::read_to_string(path)?)?,
		None => AssemblerFlags::default(),
	};

	info!(?flags, stage = %program.stage, "compiling {}", args.file_path.display());

	let mut snapshot_result = Ok(());
	let assembled = Assembler::new(flags).assemble_with(program, |stage, program| {
		if flags.dump_ir && snapshot_result.is_ok() {
			snapshot_result = serialize_snapshot(program, &args.out_dir, stage.name());
		}
	});

	if let Err(e) = &snapshot_result {
		error!("failed to write snapshot: {e}");
	}

	let assembled = assembled?;

	if flags.dump_ir {
		serialize_snapshot(&assembled, &args.out_dir, "assembled")?;
	}

	fs::write(&args.output_path, assembled.to_le_bytes())?;

	info!(
		words = assembled.words.len(),
		threaded = assembled.threaded,
		"wrote {}",
		args.output_path.display()
	);

	Ok(())
}

fn install_tracing(out_dir: &Path) -> Result<()> {
	fs::create_dir_all(out_dir)?;

	let log_file = fs::OpenOptions::new()
		.create(true)
		.write(true)
		.truncate(true)
		.open(out_dir.join("output.log"))?;

	let json_log_file = fs::OpenOptions::new()
		.create(true)
		.truncate(true)
		.write(true)
		.open(out_dir.join("output.json"))?;

	let indicatif_layer = IndicatifLayer::new().with_progress_style(
		ProgressStyle::with_template(
			"{span_child_prefix}{spinner} {span_name}({span_fields}) [{bar:30}] {pos}/{len}",
		)?
		.progress_chars("#>-"),
	);

	let file_layer = fmt::layer().with_ansi(false).with_writer(log_file);

	let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let fmt_layer = fmt::layer()
		.with_target(false)
		.with_writer(indicatif_layer.get_stderr_writer())
		.with_filter(filter_layer);

	let json_file_layer = fmt::layer()
		.with_ansi(false)
		.json()
		.flatten_event(true)
		.with_span_events(FmtSpan::FULL)
		.with_writer(json_log_file);

	tracing_subscriber::registry()
		.with(json_file_layer)
		.with(file_layer)
		.with(fmt_layer)
		.with(indicatif_layer)
		.with(ErrorLayer::default())
		.init();

	Ok(())
}

fn serialize_snapshot(value: &impl Serialize, out_dir: &Path, file_name: &str) -> Result<()> {
	let mut output = String::new();
	let mut serializer = ron::Serializer::with_options(
		&mut output,
		Some(PrettyConfig::new().separate_tuple_members(true)),
		&ron::Options::default(),
	)?;

	value.serialize(&mut serializer)?;

	fs::write(out_dir.join(format!("{file_name}.ron")), output)?;

	Ok(())
}
