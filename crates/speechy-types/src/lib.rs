use serde::{Deserialize, Serialize};

/// Action name carried by audio chunk messages.
pub const PLAY_AUDIO_ACTION: &str = "play_audio";

/// One inbound chunk message from the privileged side.
///
/// Fields are optional on the wire so that validation can report a precise
/// transport error instead of a generic deserialization failure.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Message action; only `play_audio` is accepted.
    pub action: String,
    /// Raw chunk bytes as a sequence of 0-255 values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_data: Option<Vec<u8>>,
    /// `true` on exactly the final chunk of a playback identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_last_chunk: Option<bool>,
    /// Opaque playback identity; minted by the receiver when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_id: Option<String>,
}

impl InboundMessage {
    /// Build a `play_audio` message for one chunk.
    pub fn play_audio(audio_data: Vec<u8>, is_last_chunk: bool, playback_id: &str) -> Self {
        Self {
            action: PLAY_AUDIO_ACTION.to_string(),
            audio_data: Some(audio_data),
            is_last_chunk: Some(is_last_chunk),
            playback_id: Some(playback_id.to_string()),
        }
    }
}

/// Reply sent back for every inbound chunk message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayAudioResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlayAudioResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

/// Lifecycle phase of the playback session slot.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No session exists.
    Empty,
    /// Sink and decode session are being constructed.
    Initializing,
    /// Accepting chunks, draining, possibly playing.
    Active,
    /// Final chunk received, queue still non-empty.
    Draining,
    /// End-of-stream signaled; the sink plays out what is buffered.
    Completed,
}

/// Point-in-time view of the session slot, returned by status endpoints.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    /// Playback identity of the live (or initializing) session.
    pub identity: Option<String>,
    /// Container selected for the session (`mp3` / `wav`) once known.
    pub container: Option<String>,
    pub queued_chunks: usize,
    pub total_bytes_appended: u64,
    pub has_started_playing: bool,
    pub end_of_stream_signaled: bool,
}

impl SessionSnapshot {
    /// Snapshot of an empty slot.
    pub fn empty() -> Self {
        Self {
            phase: SessionPhase::Empty,
            identity: None,
            container: None,
            queued_chunks: 0,
            total_bytes_appended: 0,
            has_started_playing: false,
            end_of_stream_signaled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_message_reads_camel_case_fields() {
        let raw = r#"{"action":"play_audio","audioData":[1,2,255],"isLastChunk":true,"playbackId":"Google-en-US-1"}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.action, "play_audio");
        assert_eq!(msg.audio_data, Some(vec![1, 2, 255]));
        assert_eq!(msg.is_last_chunk, Some(true));
        assert_eq!(msg.playback_id.as_deref(), Some("Google-en-US-1"));
    }

    #[test]
    fn inbound_message_optional_fields_default_to_none() {
        let msg: InboundMessage = serde_json::from_str(r#"{"action":"play_audio"}"#).unwrap();
        assert!(msg.audio_data.is_none());
        assert!(msg.is_last_chunk.is_none());
        assert!(msg.playback_id.is_none());
    }

    #[test]
    fn inbound_message_rejects_out_of_range_bytes() {
        let raw = r#"{"action":"play_audio","audioData":[256]}"#;
        assert!(serde_json::from_str::<InboundMessage>(raw).is_err());
    }

    #[test]
    fn response_omits_error_on_success() {
        let json = serde_json::to_string(&PlayAudioResponse::ok()).unwrap();
        assert_eq!(json, r#"{"success":true}"#);
        let json = serde_json::to_string(&PlayAudioResponse::failed("boom")).unwrap();
        assert_eq!(json, r#"{"success":false,"error":"boom"}"#);
    }

    #[test]
    fn session_phase_serializes_snake_case() {
        let json = serde_json::to_string(&SessionPhase::Initializing).unwrap();
        assert_eq!(json, r#""initializing""#);
    }
}
