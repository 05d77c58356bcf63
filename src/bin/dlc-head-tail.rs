use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use imutils::{
    LogConfig, LogConfigurator,
    tracking::{
        CorrectionReport, HeadTailConfig, HeadTailCorrection, correct_file, corrected_output_path,
    },
};

/// Correct head/tail swaps in DeepLabCut CSV output.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Swap detection against averaged neighbouring frames
    Neighbour {
        #[command(flatten)]
        common: Common,
        /// Distance threshold for swap detection
        #[arg(long, default_value_t = 10.0)]
        threshold: f64,
    },
    /// Dynamic window head correction followed by a Hampel filter
    Dynamic {
        #[command(flatten)]
        common: Common,
        /// Standard deviations for jump detection
        #[arg(long, default_value_t = 1.0)]
        n_sigmas: f64,
    },
}

#[derive(Args)]
struct Common {
    /// DeepLabCut CSV file
    #[arg(value_name = "FILE")]
    csv_path: PathBuf,
    /// Output CSV file, next to the input by default
    #[arg(long, value_name = "FILE")]
    output_file_path: Option<PathBuf>,
    /// Name of the head body part
    #[arg(long, default_value = "head")]
    head: String,
    /// Name of the tail body part
    #[arg(long, default_value = "tail")]
    tail: String,
    /// Window size in frames
    #[arg(long, default_value_t = 20)]
    window: usize,
}

fn main() -> imutils::Result<()> {
    let args = Cli::parse();
    let logs = LogConfigurator::new(LogConfig::default())?;
    logs.install()?;

    let (common, correction) = match args.command {
        Command::Neighbour { common, threshold } => {
            (common, HeadTailCorrection::NeighbourAverage { threshold })
        }
        Command::Dynamic { common, n_sigmas } => {
            (common, HeadTailCorrection::DynamicWindow { n_sigmas })
        }
    };
    let output = common
        .output_file_path
        .unwrap_or_else(|| corrected_output_path(&common.csv_path, common.window));
    let config = HeadTailConfig {
        head: common.head,
        tail: common.tail,
        window: common.window,
        correction,
    };

    match correct_file(&common.csv_path, &output, &config)? {
        CorrectionReport::Swaps(frames) => {
            log::info!("Corrected {} frames: {frames:?}", frames.len())
        }
        CorrectionReport::Threshold(threshold) => {
            log::info!("Processing completed with threshold {threshold}")
        }
    }
    logs.flush();
    Ok(())
}
