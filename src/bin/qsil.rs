//! Command-line entry point: load an image, run it to completion, write it
//! back out.

use std::fs::File;
use std::io::BufWriter;
use std::process::ExitCode;

use clap::Parser;
use log::error;

use qsil_core::image;
use qsil_core::interpreter::Interpreter;

#[derive(Parser, Debug)]
#[command(name = "qsil", about = "Run a QSIL object-memory image to completion")]
struct Cli {
    /// Path to the image file to load and, on clean termination, write back.
    image_path: String,

    /// Log every bytecode as it executes.
    #[arg(long)]
    trace: bool,

    /// Bytecode steps between GC sweeps.
    #[arg(long, default_value_t = qsil_core::interpreter::DEFAULT_GC_INTERVAL)]
    gc_interval: u32,
}

fn run(cli: &Cli) -> qsil_core::Result<()> {
    let file = File::open(&cli.image_path)?;
    let (memory, active_context) = image::read(file)?;

    let mut interp = Interpreter::new(memory, active_context)?.with_gc_interval(cli.gc_interval);
    interp.trace = cli.trace;

    let result = interp.run();

    let out = File::create(&cli.image_path)?;
    image::write(BufWriter::new(out), &interp.memory, interp.active_context())?;

    result
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
