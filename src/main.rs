//! Schemelet batch entry point: evaluates source files and `-e` expressions
//! against one shared global environment.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use schemelet::parser::DEFAULT_MAX_DEPTH;
use schemelet::{Interpreter, RunError};
use tracing::{Level, debug, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "schemelet", version, about = "Evaluate Scheme source files")]
struct Args {
    /// Source files, evaluated in order as if concatenated
    files: Vec<PathBuf>,

    /// Expression to evaluate after the files (repeatable)
    #[arg(short = 'e', long = "eval", value_name = "EXPR")]
    expressions: Vec<String>,

    /// Enable debug logging on stderr
    #[arg(short, long)]
    verbose: bool,

    /// Deepest list nesting the parser accepts
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,
}

/// Evaluates one source, printing values to stdout and diagnostics to
/// stderr. Returns whether any error was reported.
fn run_source(interpreter: &Interpreter, name: &str, source: &str) -> Result<bool> {
    let mut failed = false;
    let mut report_failure = None;
    let status = interpreter.run(source, |result| match result {
        Ok(value) if value.is_unspecified() => {}
        Ok(value) => println!("{}", value),
        Err(err) => {
            failed = true;
            if let Err(io_err) = err.pretty_print(name, source) {
                if report_failure.is_none() {
                    report_failure = Some(io_err);
                }
            }
        }
    });
    if let Some(io_err) = report_failure {
        return Err(io_err).context("Failed to write diagnostics");
    }
    if let Err(err) = status {
        debug!(source = name, "run stopped: {}", err);
        err.pretty_print(name, source)
            .context("Failed to write diagnostics")?;
        if let RunError::Internal(_) = err {
            anyhow::bail!("{}: {}", name, err);
        }
        failed = true;
    }
    Ok(failed)
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")?;

    let interpreter = Interpreter::new().with_max_depth(args.max_depth);
    let mut failed = false;

    for path in &args.files {
        info!("Loading {}", path.display());
        let source = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        failed |= run_source(&interpreter, &path.display().to_string(), &source)?;
    }
    for expression in &args.expressions {
        failed |= run_source(&interpreter, "<expr>", expression)?;
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
