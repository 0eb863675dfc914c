//! Inbound `play_audio` message handling.

use std::time::{SystemTime, UNIX_EPOCH};

use speechy_types::{InboundMessage, PLAY_AUDIO_ACTION, PlayAudioResponse};

use crate::error::{PlayerError, Result};
use crate::manager::SessionManager;

/// Validate one message, hand its chunk to the manager and build the reply.
pub async fn handle_message(manager: &SessionManager, message: InboundMessage) -> PlayAudioResponse {
    match dispatch(manager, message).await {
        Ok(()) => PlayAudioResponse::ok(),
        Err(e) => {
            tracing::warn!(error = %e, "play_audio failed");
            PlayAudioResponse::failed(e.to_string())
        }
    }
}

async fn dispatch(manager: &SessionManager, message: InboundMessage) -> Result<()> {
    let InboundMessage {
        action,
        audio_data,
        is_last_chunk,
        playback_id,
    } = message;

    if action != PLAY_AUDIO_ACTION {
        return Err(PlayerError::Transport(format!("unsupported action: {action}")));
    }
    let is_last = is_last_chunk.unwrap_or(false);
    let chunk = match audio_data {
        None => return Err(PlayerError::Transport("missing audioData".into())),
        Some(data) if data.is_empty() && !is_last => {
            return Err(PlayerError::Transport("empty audioData".into()));
        }
        Some(data) => data,
    };

    let identity = match playback_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => id,
        None => manager.open_identity().unwrap_or_else(mint_playback_id),
    };
    manager.append_chunk(chunk, is_last, &identity).await
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Identity for messages that arrive without one and no session is open.
pub fn mint_playback_id() -> String {
    format!("playback-{}", unix_millis())
}

/// Identity a producer assigns to one synthesis request: `<provider>-<voice>-<unix millis>`.
pub fn playback_id(provider: &str, voice: &str) -> String {
    format!("{provider}-{voice}-{}", unix_millis())
}
