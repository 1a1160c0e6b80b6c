//! CLI tool to run the moderation pipeline over a message file.
//!
//! Usage:
//!   pipe-run <input.data>
//!   pipe-run <input.data> -o <output.data> --buyers buyers.txt
//!
//! If no output file is specified, writes to stdout.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{error, info};
use pipes_filters_rs::{
    BuyerCheck, FaultPolicy, LineSink, Pipeline, PipelineConfig, PipelineError, RecordSink,
    RunReport, create_sink, open_source, read_records, run_sequential, standard_chain,
};

/// Run buyer, profanity, political, image, link and sentiment filters over
/// one message per line.
#[derive(Parser)]
#[command(name = "pipe-run", version)]
struct Cli {
    /// Input file, one `buyer, product, review, image` record per line
    input: PathBuf,

    /// Write output to file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// File of `Name - Product` pairs (default: built-in list)
    #[arg(long)]
    buyers: Option<PathBuf>,

    /// Records in flight per channel
    #[arg(long, default_value_t = pipes_filters_rs::DEFAULT_CAPACITY)]
    capacity: usize,

    /// Use unbounded channels
    #[arg(long, conflicts_with = "capacity")]
    unbounded: bool,

    /// Run each filter over the whole batch in turn instead of concurrently
    #[arg(long)]
    sequential: bool,

    /// Fail the run on the first filter panic instead of dropping the record
    #[arg(long)]
    abort_on_fault: bool,

    /// Give up if the last stage produces nothing for this many milliseconds
    #[arg(long, value_name = "MS")]
    drain_timeout: Option<u64>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();
}

fn load_buyers(path: Option<&PathBuf>) -> Result<BuyerCheck, PipelineError> {
    match path {
        Some(path) => {
            let file = File::open(path).map_err(|source| PipelineError::Open {
                path: path.clone(),
                source,
            })?;
            BuyerCheck::from_reader(BufReader::new(file))
        }
        None => Ok(BuyerCheck::with_defaults()),
    }
}

fn config(cli: &Cli) -> PipelineConfig {
    PipelineConfig {
        capacity: (!cli.unbounded).then_some(cli.capacity),
        fault_policy: if cli.abort_on_fault {
            FaultPolicy::Abort
        } else {
            FaultPolicy::Isolate
        },
        drain_timeout: cli.drain_timeout.map(Duration::from_millis),
    }
}

fn run(cli: &Cli) -> Result<RunReport, PipelineError> {
    let buyers = load_buyers(cli.buyers.as_ref())?;
    info!("{} buyer-product pairs loaded", buyers.len());
    let filters = standard_chain(buyers);

    let mut sink: Box<dyn RecordSink> = match &cli.output {
        Some(path) => Box::new(create_sink(path)?),
        None => Box::new(LineSink::new(io::stdout().lock())),
    };

    if cli.sequential {
        let output = run_sequential(&filters, read_records(&cli.input)?);
        for record in output.records {
            sink.accept(record)?;
        }
        sink.finish()?;
        return Ok(output.report);
    }

    let source = open_source(&cli.input)?;
    Pipeline::build(filters, config(cli))?.run_stream(source, sink.as_mut())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let started = Instant::now();
    match run(&cli) {
        Ok(report) => {
            for fault in report.faults() {
                eprintln!("Dropped after fault: {fault}");
            }
            let destination = cli
                .output
                .as_ref()
                .map(|p| format!(", output: {}", p.display()))
                .unwrap_or_default();
            eprintln!(
                "Processed {} -> {} records in {} ms{}",
                report.records_in,
                report.records_out,
                started.elapsed().as_millis(),
                destination
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("pipeline failed: {e}");
            eprintln!("Pipeline error: {e}");
            ExitCode::FAILURE
        }
    }
}
