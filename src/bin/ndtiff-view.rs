use std::path::PathBuf;

use clap::Parser;
use imutils::{LogConfig, LogConfigurator, MicroscopeDataReader};

/// Show the layout of an NDTiff dataset and open it in the viewer.
///
/// The viewer program is `napari` unless `IMUTILS_VIEWER` is set.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Dataset folder
    #[arg(value_name = "DIR")]
    path: PathBuf,
    /// Only print the dataset layout
    #[arg(long)]
    info: bool,
}

fn main() -> imutils::Result<()> {
    let args = Cli::parse();
    let logs = LogConfigurator::new(LogConfig::default())?;
    logs.install()?;

    let reader = MicroscopeDataReader::open(&args.path)?;
    println!("axes:     {}", reader.axis_string());
    println!("shape:    {:?}", reader.shape());
    println!("type:     {:?}", reader.pixel_type());
    println!("channels: {}", reader.channel_names().join(", "));
    println!("images:   {}", reader.image_coordinates().len());

    if !args.info {
        let mut child = reader.open_in_viewer()?;
        child.wait()?;
    }
    Ok(())
}
