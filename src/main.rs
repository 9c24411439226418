use std::path::PathBuf;
use std::process;

use clap::error::ErrorKind;
use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use procmr::parameters::MAX_READ_SIZE;
use procmr::word_freq::WordFreq;
use procmr::{MRController, MRParameters};

const USAGE: &str = "mapreduce -d <dirname> [-m <map_workers>] [-r <reduce_workers>]";

/// Count word frequencies over the files of a directory with a pool of map and reduce processes
#[derive(Parser, Debug)]
#[command(name = "mapreduce", version, override_usage = USAGE)]
struct Cli {
    /// Directory whose files are the input
    #[arg(short = 'd', long = "dir", value_name = "dirname")]
    dir: PathBuf,

    /// Number of map worker processes
    #[arg(short = 'm', long = "mappers", default_value_t = 2,
          value_parser = clap::value_parser!(u16).range(1..))]
    mappers: u16,

    /// Number of reduce worker processes
    #[arg(short = 'r', long = "reducers", default_value_t = 2,
          value_parser = clap::value_parser!(u16).range(1..))]
    reducers: u16,

    /// Directory where the reducers write their <pid>.out files
    #[arg(short = 'o', long = "output-dir", default_value = ".")]
    output_dir: PathBuf,

    /// Bytes read from an input file per map() call (at most 16 MiB)
    #[arg(long = "read-size", default_value_t = 4096,
          value_parser = clap::value_parser!(u32).range(1..=MAX_READ_SIZE as i64))]
    read_size: u32,

    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let params = MRParameters::new()
        .set_concurrency(cli.mappers as usize, cli.reducers as usize)
        .set_read_size(cli.read_size as usize)
        .set_output_dir(cli.output_dir);
    debug!(?params, "parameters");

    let mr = WordFreq::new(&params);
    let report = MRController::run(&mr, params, &cli.dir)?;

    info!(
        files = report.files,
        pairs = report.pairs,
        groups = report.groups,
        outputs = report.outputs.len(),
        "job done"
    );
    for out in &report.outputs {
        debug!(path = %out.display(), "reduce output");
    }
    Ok(())
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                let _ = e.print();
                process::exit(1);
            }
        },
    };

    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        let code = e.downcast_ref::<procmr::Error>().map_or(1, procmr::Error::exit_code);
        process::exit(code);
    }
}
