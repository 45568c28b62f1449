//! Command line entry point.
//!
//! Handles argument parsing, logging setup, and the mapping of every
//! pipeline failure to its distinct exit code. Diagnostics go to stderr so
//! stdout carries only the success report.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{info, trace};
use tracing_subscriber::EnvFilter;

use hivejoin::{encode, extract, reader::HiveSet, store, JoinResult};

#[derive(Parser)]
#[command(
    name = "hivejoin",
    version,
    about = "Recover Active Directory machine-account secrets from Windows registry hives"
)]
struct Args {
    /// Print intermediate results and debug info (repeat for more).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Generate a secrets JSON file in place of the record store.
    #[arg(short = 'J', long)]
    json: bool,

    /// Output file name and location.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Windows registry hive files directory (e.g. '/mnt/win/Windows/System32/config').
    #[arg(value_name = "DIR")]
    dir: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(args: &Args) -> JoinResult<()> {
    info!(
        "looking for Windows registry hive files in '{}'",
        args.dir.display()
    );
    let hives = HiveSet::open(&args.dir)?;

    let bundle = extract(&hives)?;
    // The full bundle, password included, is only ever shown at maximum
    // verbosity.
    if tracing::enabled!(tracing::Level::TRACE) {
        let structured = encode::to_structured(&bundle)?;
        trace!("recovered secrets bundle: {structured}");
    }

    let output = args.output.clone().unwrap_or_else(|| {
        PathBuf::from(if args.json { "secrets.json" } else { "secrets.db" })
    });

    if args.json {
        store::write_secrets_json(&output, &bundle)?;
        info!("wrote secrets JSON to '{}'", output.display());
    } else {
        let records = encode::to_records(&bundle)?;
        let mut record_store = store::RecordFileStore::create(&output)?;
        store::write_records(&mut record_store, &records)?;
        record_store.finish()?;
        info!("wrote {} secrets records to '{}'", records.len(), output.display());
    }

    println!("{}", bundle.ads_domain);
    println!(
        "Joined '{}' to realm '{}'",
        bundle.hostname,
        bundle.dns_domain.to_uppercase()
    );
    Ok(())
}
