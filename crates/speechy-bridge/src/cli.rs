use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "speechy-bridge", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Optional config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bytes appended before playback is first attempted
    #[arg(long)]
    pub start_threshold_bytes: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept play_audio messages over HTTP and play them
    Listen {
        /// HTTP bind address, e.g. 127.0.0.1:5590
        #[arg(long)]
        bind: Option<SocketAddr>,
    },

    /// Stream a local MP3 or WAV file through the player the way a speech provider would
    Speak {
        /// Path to the audio file
        path: PathBuf,

        /// Provider name used in the playback id (Google sends WAV, OpenAI sends MP3)
        #[arg(long, default_value = "Google")]
        provider: String,

        /// Voice name used in the playback id
        #[arg(long, default_value = "local")]
        voice: String,
    },
}
