use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;

use watershed::error::{Error, Result};
use watershed::loader;
use watershed::report::{EncodedSink, Format, ThreadedSink, TextSink};
use watershed::solver::{ImplicitEuler, SolverSettings};




#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Cbor,
    Msgpack,
}




#[derive(Debug, Parser)]
#[clap(version, about = "Coupled surface and subsurface watershed simulation")]
struct Opts {
    /// Project file; read from projectName.txt when omitted
    project: Option<PathBuf>,

    #[clap(short = 'o', long, default_value = "output")]
    output: PathBuf,

    #[clap(short = 'f', long, value_enum, default_value = "text")]
    format: OutputFormat,

    #[clap(long, default_value = "info")]
    log_level: LevelFilter,

    /// Threads used to evaluate fluxes; more than one enables parallel evaluation
    #[clap(short = 't', long, default_value = "1")]
    threads: usize,

    /// Frames buffered between the simulation and the writer thread
    #[clap(long, default_value = "16")]
    queue: usize,
}




// ============================================================================
fn project_path(opts: &Opts) -> Result<PathBuf> {
    match &opts.project {
        Some(path) => Ok(path.clone()),
        None => {
            let name = std::fs::read_to_string("projectName.txt")
                .map_err(|e| Error::config(format!("no project given and projectName.txt unreadable: {}", e)))?;
            let name = name.trim();

            if name.is_empty() {
                return Err(Error::config("projectName.txt is empty"));
            }
            Ok(PathBuf::from(format!("{}.json", name)))
        }
    }
}

fn run(opts: &Opts) -> Result<()> {
    let path = project_path(opts)?;
    let prefix = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "watershed".into());

    let mut project = loader::load(&path)?;
    project.control.parallel |= opts.threads > 1;

    let cancel = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&cancel))?;

    let mut sink = match opts.format {
        OutputFormat::Text => ThreadedSink::spawn(TextSink::create(&opts.output, &prefix)?, opts.queue),
        OutputFormat::Cbor => {
            std::fs::create_dir_all(&opts.output)?;
            let path = opts.output.join(format!("{}.cbor", prefix));
            ThreadedSink::spawn(EncodedSink::create(&path, Format::Cbor)?, opts.queue)
        }
        OutputFormat::Msgpack => {
            std::fs::create_dir_all(&opts.output)?;
            let path = opts.output.join(format!("{}.msgpack", prefix));
            ThreadedSink::spawn(EncodedSink::create(&path, Format::MessagePack)?, opts.queue)
        }
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.threads)
        .build()
        .map_err(|e| Error::config(e.to_string()))?;

    let solver = ImplicitEuler::new(SolverSettings::from_control(&project.control));
    let mut controller = project.controller(solver)?.with_cancel_flag(cancel);
    let summary = pool.install(|| controller.run(&mut sink))?;

    info!(
        "{} reports, {} sub-steps, {} solver steps ({} rejected), {} linear iterations, {} evaluations, {} clamps",
        summary.reports,
        summary.substeps,
        summary.solver.steps,
        summary.solver.rejected,
        summary.solver.linear_iterations,
        summary.numerics.evaluations,
        summary.numerics.clamped);
    info!("{:.3} m^3 of water held at t={}", summary.storage, summary.final_time);

    if summary.cancelled {
        info!("stopped early at t={}", summary.final_time);
    }
    Ok(())
}




// ============================================================================
fn main() {
    let opts = Opts::parse();

    if let Err(e) = SimpleLogger::new().with_level(opts.log_level).init() {
        eprintln!("{}", e);
    }

    if let Err(e) = run(&opts) {
        error!("{}", e);
        std::process::exit(if e.is_configuration() { 2 } else { 1 });
    }
}
