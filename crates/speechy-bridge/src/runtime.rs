//! Bridge entry points: device listing, the HTTP listener and the local file producer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use speechy_player::backend::{self, CpalHost};
use speechy_player::listener::{handle_message, playback_id};
use speechy_player::{OutputConfig, PlaybackConfig, SessionManager};
use speechy_types::InboundMessage;

use crate::config::{BridgeListenConfig, BridgeSpeakConfig};
use crate::http_api;

/// Body chunk size used by the local producer.
pub const PRODUCER_CHUNK_BYTES: usize = 32 * 1024;
const WAV_HEADER_BYTES: usize = 44;
const DRAIN_POLL: Duration = Duration::from_millis(100);
const START_TIMEOUT: Duration = Duration::from_secs(10);

/// Print output device names to stdout.
pub fn list_devices() -> Result<()> {
    for (i, name) in backend::list_devices()?.iter().enumerate() {
        println!("#{i}: {name}");
    }
    Ok(())
}

/// Serve `play_audio` messages over HTTP until the process is stopped.
pub async fn run_listen(config: BridgeListenConfig) -> Result<()> {
    let manager = new_manager(config.output, config.playback);
    install_ctrlc(manager.clone());
    spawn_idle_sweep(manager.clone());
    http_api::serve(config.bind, manager).await
}

/// Play a local file by feeding it through the message path chunk by chunk.
pub async fn run_speak(config: BridgeSpeakConfig) -> Result<()> {
    let bytes =
        std::fs::read(&config.path).with_context(|| format!("read {:?}", config.path))?;
    if bytes.is_empty() {
        bail!("{:?} is empty", config.path);
    }

    let manager = new_manager(config.output, config.playback);
    install_ctrlc(manager.clone());
    let identity = playback_id(&config.provider, &config.voice);
    tracing::info!(identity = %identity, path = ?config.path, bytes = bytes.len(), "speaking file");

    let chunks = producer_chunks(&bytes);
    let last = chunks.len() - 1;
    for (index, chunk) in chunks.into_iter().enumerate() {
        let message = InboundMessage::play_audio(chunk, index == last, &identity);
        let reply = handle_message(&manager, message).await;
        if !reply.success {
            manager.cleanup();
            return Err(anyhow!(
                "chunk {index} rejected: {}",
                reply.error.unwrap_or_default()
            ));
        }
    }

    let result = wait_for_drain(&manager, &identity).await;
    manager.cleanup();
    result
}

fn new_manager(output: OutputConfig, playback: PlaybackConfig) -> SessionManager {
    tracing::info!(
        device = output.device.as_deref().unwrap_or("default"),
        threshold_bytes = playback.start_threshold_bytes,
        "player ready"
    );
    SessionManager::new(Arc::new(CpalHost::new(output)), playback)
}

fn install_ctrlc(manager: SessionManager) {
    let _ = ctrlc::set_handler(move || {
        manager.cleanup();
        std::process::exit(130);
    });
}

fn spawn_idle_sweep(manager: SessionManager) {
    let Some(timeout) = manager.config().idle_timeout else {
        return;
    };
    let period = timeout.min(Duration::from_secs(5));
    actix_web::rt::spawn(async move {
        let mut tick = tokio::time::interval(period);
        loop {
            tick.tick().await;
            if let Some(identity) = manager.sweep_idle() {
                tracing::info!(identity = %identity, "idle session torn down");
            }
        }
    });
}

async fn wait_for_drain(manager: &SessionManager, identity: &str) -> Result<()> {
    let since = tokio::time::Instant::now();
    loop {
        if manager.has_finished(identity) {
            tracing::info!(identity = %identity, "playback finished");
            return Ok(());
        }
        let snapshot = manager.snapshot();
        if snapshot.identity.as_deref() != Some(identity) {
            bail!("playback {identity} ended before the stream drained");
        }
        if !snapshot.has_started_playing && since.elapsed() > START_TIMEOUT {
            bail!("playback {identity} never started");
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }
}

/// Split a file the way speech providers deliver it.
///
/// A WAV header goes out as its own chunk, then fixed-size body chunks follow.
pub fn producer_chunks(bytes: &[u8]) -> Vec<Vec<u8>> {
    let (header, body) = if bytes.starts_with(b"RIFF") && bytes.len() > WAV_HEADER_BYTES {
        bytes.split_at(WAV_HEADER_BYTES)
    } else {
        (&bytes[..0], bytes)
    };
    let mut chunks = Vec::with_capacity(1 + body.len() / PRODUCER_CHUNK_BYTES);
    if !header.is_empty() {
        chunks.push(header.to_vec());
    }
    chunks.extend(body.chunks(PRODUCER_CHUNK_BYTES).map(<[u8]>::to_vec));
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_travels_alone() {
        let mut wav = b"RIFF".to_vec();
        wav.resize(44 + PRODUCER_CHUNK_BYTES + 10, 0);
        let chunks = producer_chunks(&wav);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 44);
        assert_eq!(chunks[1].len(), PRODUCER_CHUNK_BYTES);
        assert_eq!(chunks[2].len(), 10);
        assert_eq!(chunks.concat(), wav);
    }

    #[test]
    fn mp3_is_split_into_fixed_chunks() {
        let mut mp3 = b"ID3\x04".to_vec();
        mp3.resize(2 * PRODUCER_CHUNK_BYTES, 0xAA);
        let chunks = producer_chunks(&mp3);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == PRODUCER_CHUNK_BYTES));
    }

    #[test]
    fn tiny_file_is_one_chunk() {
        assert_eq!(producer_chunks(b"RIFF"), vec![b"RIFF".to_vec()]);
    }
}
