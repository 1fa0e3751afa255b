//! Command-line front end shared by the `legacy-pack` binaries.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use legacy_pack_rs::config::DEFAULT_CONFIG_FILE;
use legacy_pack_rs::{BuildConfig, Pipeline, Stage, Variant};

/// Builds the synthesizer library and its AudioWorklet processor as ES5
/// scripts for RPG Maker MV (NW.js / Chromium 85)
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the build configuration. Defaults apply when the file does not exist
    #[clap(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Log every stage and tool command line
    #[clap(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[clap(short, long)]
    pub quiet: bool,
}

impl Args {
    fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

fn init_logging(args: &Args) {
    // RUST_LOG still wins over the flags
    env_logger::Builder::from_env(Env::default().default_filter_or(args.log_filter()))
        .format_target(false)
        .init();
}

/// Parses the command line, runs one build and reports the outcome.
pub fn run(variant: Variant) -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    let config = match BuildConfig::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err.at(Stage::Config, args.config.display().to_string()));
            return ExitCode::FAILURE;
        }
    };

    match Pipeline::new(variant, config).run() {
        Ok(report) => {
            println!("{report}");
            ExitCode::SUCCESS
        }
        Err(failure) => {
            eprintln!("{failure}");
            ExitCode::FAILURE
        }
    }
}
