use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "nfscan")]
#[command(about = "Extract the most plausible text from a photographed nota fiscal")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every preprocessing variant and OCR profile on one image
    Extract {
        image: PathBuf,
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Where to write the best candidate (overrides the configured path)
        #[arg(long)]
        report: Option<PathBuf>,
        /// How many ranked candidates to print
        #[arg(long)]
        top: Option<usize>,
        /// Print the full result as JSON instead of a summary
        #[arg(long)]
        json: bool,
        /// Re-run even if this image was already processed
        #[arg(long)]
        force: bool,
    },
    /// Process images as they appear in a folder
    Watch {
        dir: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List previous extraction runs
    History {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nfscan=info,nfscan_ocr=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match args.command {
        Command::Extract { image, config, report, top, json, force } => {
            let config = commands::load_config(config.as_deref())?;
            let opts = commands::ExtractOptions { report, top, json, force };
            commands::extract(&config, &image, &opts).await
        }
        Command::Watch { dir, config } => {
            let config = commands::load_config(config.as_deref())?;
            commands::watch(&config, &dir).await
        }
        Command::History { config, limit } => {
            let config = commands::load_config(config.as_deref())?;
            commands::history(&config, limit).await
        }
    }
}
