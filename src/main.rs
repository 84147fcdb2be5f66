use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use recorder_sync::audio::WAV_MIME;
use recorder_sync::{AudioReconstructor, CatalogDecoder, Config, ReconstructedAudio};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "recorder-sync")]
#[command(about = "Offline tools for voice recorder dumps")]
struct Args {
    /// Config file (without extension)
    #[arg(short, long, default_value = "config/recorder-sync")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Turn a raw file dump into a playable recording
    Reconstruct {
        /// Raw bytes as downloaded from the device
        input: PathBuf,

        /// Name the device listed the file under (defaults to the input file name)
        #[arg(short, long)]
        name: Option<String>,

        /// Output directory (defaults to audio.output_dir)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Trim a recording to a time range
    Slice {
        input: PathBuf,

        /// Start time in seconds
        #[arg(short, long)]
        start: f64,

        /// End time in seconds
        #[arg(short, long)]
        end: f64,

        /// Output directory (defaults to audio.output_dir)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Decode a raw catalog dump and print it as JSON
    Catalog {
        /// Concatenated 28-byte catalog records
        input: PathBuf,
    },
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("Invalid file name: {}", path.display()))
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;
    let reconstructor = AudioReconstructor::new(&cfg.audio);

    match args.command {
        Command::Reconstruct {
            input,
            name,
            output_dir,
        } => {
            let name = match name {
                Some(name) => name,
                None => file_name(&input)?,
            };
            let bytes = read(&input)?;

            let audio = reconstructor
                .reconstruct(&name, bytes)
                .with_context(|| format!("Failed to reconstruct {}", name))?;

            let dir = output_dir.unwrap_or_else(|| PathBuf::from(&cfg.audio.output_dir));
            let path = audio.write_to(&dir)?;
            info!("{} -> {} ({})", name, path.display(), audio.mime_type);
        }

        Command::Slice {
            input,
            start,
            end,
            output_dir,
        } => {
            let name = file_name(&input)?;
            let source = ReconstructedAudio {
                mime_type: if name.to_ascii_lowercase().ends_with(".wav") {
                    WAV_MIME.to_string()
                } else {
                    "application/octet-stream".to_string()
                },
                file_name: name,
                bytes: read(&input)?,
            };

            let sliced = reconstructor.slice(&source, start, end);
            if sliced == source {
                info!("Slice unchanged, keeping original");
            }

            let dir = output_dir.unwrap_or_else(|| PathBuf::from(&cfg.audio.output_dir));
            let path = sliced.write_to(&dir)?;
            info!("Wrote {:.2}s-{:.2}s to {}", start, end, path.display());
        }

        Command::Catalog { input } => {
            let bytes = read(&input)?;
            let files = CatalogDecoder::decode_stream(&bytes, Utc::now());
            info!("Decoded {} catalog entries", files.len());

            println!("{}", serde_json::to_string_pretty(&files)?);
        }
    }

    Ok(())
}
