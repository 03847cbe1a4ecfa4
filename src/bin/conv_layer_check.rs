//! Validates the blocked direct convolution against the naive reference and
//! measures its throughput.

use std::env;

use log::error;
use naiveconv::backend::BlockedDirectBackend;
use naiveconv::errors::HarnessResult;
use naiveconv::harness::{ConfigLoader, HarnessConfig, ReferenceHarness, ValidationConfig};

fn main() {
    env_logger::init();

    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("Convolution check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Returns whether the run passed.
fn run() -> HarnessResult<bool> {
    let args: Vec<String> = env::args().skip(1).collect();

    let config = match args.first().map(String::as_str) {
        Some("-h") | Some("--help") => {
            print_usage();
            return Ok(true);
        }
        Some("--config") => match args.get(1) {
            Some(path) => ConfigLoader::load(path)?,
            None => {
                print_usage();
                return Ok(false);
            }
        },
        Some(_) => HarnessConfig::from_positional_args(&args)?,
        None => ConfigLoader::load_or_default(ConfigLoader::DEFAULT_PATH)?,
    };

    let validation = ValidationConfig::from_env_values(
        env::var("CHECK").ok().as_deref(),
        env::var("CHECK_SCALE").ok().as_deref(),
    )?;

    let harness = ReferenceHarness::new(config, validation, BlockedDirectBackend::default())?;
    let report = harness.run()?;

    if !report.checked {
        println!("Correctness checking disabled (CHECK=0)");
        return Ok(true);
    }

    match report.verdict(&validation) {
        Ok(()) => {
            println!("PASSED with an error of {}%", 100.0 * report.combined.normf_rel);
            Ok(true)
        }
        Err(e) => {
            eprintln!("{}", e);
            Ok(false)
        }
    }
}

fn print_usage() {
    println!("Usage:");
    println!("  conv_layer_check                          # Run {}", ConfigLoader::DEFAULT_PATH);
    println!("  conv_layer_check --config <file.json>     # Run a JSON configuration");
    println!(
        "  conv_layer_check {}",
        HarnessConfig::POSITIONAL_ARGS.join(" ")
    );
    println!();
    println!("  type: A (all), F (forward), B (backward)");
    println!("  padding_mode: 0 implicit, 1 materialized, >1 materialized with pad_w overridden");
    println!();
    println!("Environment:");
    println!("  CHECK=<tolerance>      (default 1.0, 0 disables checking)");
    println!("  CHECK_SCALE=<scale>    (default 100)");
    println!("  RUST_LOG=<level>       (log verbosity)");
}
