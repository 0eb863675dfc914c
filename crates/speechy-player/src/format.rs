//! Container sniffing for the first bytes of a playback stream.
//!
//! Two container families are produced by the speech providers:
//! - compressed MPEG audio frames (optionally preceded by an ID3 tag)
//! - RIFF/WAVE wrapped linear PCM
//!
//! Detection is a pure function over a byte prefix; when the prefix is inconclusive the
//! caller falls back to the provider hint carried by the session.

use std::fmt;

/// Minimum number of leading bytes inspected before a decision is made.
pub const MIN_SNIFF_BYTES: usize = 4;

/// Audio container selected once per session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerFormat {
    /// MPEG audio frames (frame-sync or ID3-tagged).
    Mpeg,
    /// RIFF/WAVE linear PCM.
    Wav,
}

impl ContainerFormat {
    /// MIME type used when negotiating a decode buffer.
    pub fn mime_type(self) -> &'static str {
        match self {
            ContainerFormat::Mpeg => "audio/mpeg",
            ContainerFormat::Wav => "audio/wav",
        }
    }

    /// File extension handed to the demuxer as a probe hint.
    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Mpeg => "mp3",
            ContainerFormat::Wav => "wav",
        }
    }

    /// Container a speech provider is expected to emit.
    ///
    /// Google synthesizes LINEAR16 wrapped in a WAV header; OpenAI streams MP3.
    pub fn for_provider(provider: &str) -> Option<Self> {
        if provider.eq_ignore_ascii_case("google") {
            Some(ContainerFormat::Wav)
        } else if provider.eq_ignore_ascii_case("openai") {
            Some(ContainerFormat::Mpeg)
        } else {
            None
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Outcome of inspecting a byte prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sniff {
    Detected(ContainerFormat),
    /// Enough bytes were inspected but none of the known signatures matched.
    Unknown,
    /// Fewer than [`MIN_SNIFF_BYTES`] are available; detection must be deferred.
    Incomplete,
}

/// Classify the container from the leading bytes of a stream.
pub fn detect(prefix: &[u8]) -> Sniff {
    if prefix.len() < MIN_SNIFF_BYTES {
        return Sniff::Incomplete;
    }
    if &prefix[..4] == b"RIFF" {
        return Sniff::Detected(ContainerFormat::Wav);
    }
    if &prefix[..3] == b"ID3" || (prefix[0] == 0xFF && prefix[1] & 0xE0 == 0xE0) {
        return Sniff::Detected(ContainerFormat::Mpeg);
    }
    Sniff::Unknown
}

/// Pick the session container: sniffed value first, then the hint, then MPEG.
pub fn resolve(sniff: Sniff, hint: Option<ContainerFormat>) -> ContainerFormat {
    match sniff {
        Sniff::Detected(format) => format,
        Sniff::Unknown | Sniff::Incomplete => hint.unwrap_or(ContainerFormat::Mpeg),
    }
}

/// Provider hint derived from the identity prefix (text before the first `-`).
pub fn provider_hint(identity: &str) -> Option<ContainerFormat> {
    let provider = identity.split('-').next()?;
    ContainerFormat::for_provider(provider.trim())
}
