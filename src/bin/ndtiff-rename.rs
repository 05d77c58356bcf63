use std::path::PathBuf;

use clap::Parser;
use imutils::{
    LogConfig, LogConfigurator, Verbosity,
    rename::{RenameOptions, rename_datasets},
};

/// Copy NDTiff datasets under cleaned or new names.
///
/// The source is either a single dataset folder or a folder whose
/// subfolders are datasets.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Dataset folder, or parent folder of dataset subfolders
    #[arg(long, value_name = "DIR")]
    src_folder: PathBuf,
    /// Folder the renamed datasets are written to
    #[arg(long, value_name = "DIR")]
    dst_folder: PathBuf,
    /// New name for a single dataset, or prefix for dataset subfolders
    #[arg(long)]
    new_name: Option<String>,
    /// Log debug messages and per-image metadata
    #[arg(long)]
    verbose: bool,
    /// Do not prefix the new names with the current date and time
    #[arg(long)]
    no_date_prefix: bool,
}

fn main() -> imutils::Result<()> {
    let args = Cli::parse();

    let level = if args.verbose {
        Verbosity::Debug
    } else {
        Verbosity::Info
    };
    let logs = LogConfigurator::new(LogConfig {
        level,
        ..Default::default()
    })?;
    logs.install()?;

    let options = RenameOptions {
        add_date_time: !args.no_date_prefix,
        verbose: args.verbose,
    };
    let report = rename_datasets(
        &args.src_folder,
        &args.dst_folder,
        args.new_name.as_deref(),
        &options,
    )?;
    log::info!(
        "Processing complete. Successfully processed {}/{} datasets.",
        report.succeeded.len(),
        report.total()
    );
    logs.flush();
    if report.failed.is_empty() {
        Ok(())
    } else {
        Err(imutils::Error::general(format!(
            "{} datasets failed",
            report.failed.len()
        )))
    }
}
