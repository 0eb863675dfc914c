//! speechy-bridge: plays streamed speech audio on a local output device.
//!
//! ## Modes
//! - `listen`: accept `play_audio` chunk messages over HTTP and play them as they arrive.
//! - `speak`: act as the producer for a local file, sending it through the same message path.

use anyhow::{Result, bail};
use clap::Parser;
use speechy_bridge::cli::{Args, Command};
use speechy_bridge::config::{BridgeConfig, BridgeListenConfig, BridgeSpeakConfig};
use speechy_bridge::runtime;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,speechy_bridge=info")),
        )
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let file = match args.config.as_ref() {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    let playback = file.playback_config(args.start_threshold_bytes);
    let output = file.output_config(args.device.clone());

    match args.cmd {
        Some(Command::Listen { bind }) => {
            let bind = file.bind_addr(bind)?;
            runtime::run_listen(BridgeListenConfig {
                bind,
                playback,
                output,
            })
            .await
        }
        Some(Command::Speak {
            path,
            provider,
            voice,
        }) => {
            runtime::run_speak(BridgeSpeakConfig {
                path,
                provider,
                voice,
                playback,
                output,
            })
            .await
        }
        None => bail!("no command given; use `listen`, `speak` or --list-devices"),
    }
}
