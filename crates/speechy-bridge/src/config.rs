//! Bridge configuration: an optional TOML file merged under CLI flags.
//!
//! ```toml
//! bind = "127.0.0.1:5590"
//! device = "Speakers"
//!
//! [playback]
//! start_threshold_bytes = 32768
//! start_retry_delay_ms = 200
//! max_start_retries = 5
//! idle_timeout_secs = 60   # 0 disables the idle sweep
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use speechy_player::{OutputConfig, PlaybackConfig};

pub const DEFAULT_BIND: &str = "127.0.0.1:5590";

/// Top-level bridge configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// HTTP bind address (host:port).
    pub bind: Option<String>,
    /// Output device substring.
    pub device: Option<String>,
    pub playback: Option<PlaybackSection>,
}

/// `[playback]` overrides; absent keys keep the built-in defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaybackSection {
    pub start_threshold_bytes: Option<u64>,
    pub start_retry_delay_ms: Option<u64>,
    pub max_start_retries: Option<u32>,
    /// Keep retrying a failed start for as long as the session lives.
    pub unbounded_start_retries: Option<bool>,
    pub idle_timeout_secs: Option<u64>,
    pub retired_history: Option<usize>,
    pub spool_capacity_bytes: Option<usize>,
    pub buffer_seconds: Option<f32>,
    pub ready_buffer_ms: Option<u64>,
    pub chunk_frames: Option<usize>,
    pub refill_max_frames: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct BridgeListenConfig {
    pub bind: SocketAddr,
    pub playback: PlaybackConfig,
    pub output: OutputConfig,
}

#[derive(Clone, Debug)]
pub struct BridgeSpeakConfig {
    pub path: PathBuf,
    pub provider: String,
    pub voice: String,
    pub playback: PlaybackConfig,
    pub output: OutputConfig,
}

impl BridgeConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<BridgeConfig>(raw)?)
    }

    /// CLI flag first, then the file, then [`DEFAULT_BIND`].
    pub fn bind_addr(&self, cli: Option<SocketAddr>) -> Result<SocketAddr> {
        if let Some(addr) = cli {
            return Ok(addr);
        }
        let raw = self.bind.as_deref().unwrap_or(DEFAULT_BIND);
        raw.parse().with_context(|| format!("parse bind address {raw}"))
    }

    pub fn playback_config(&self, start_threshold_bytes: Option<u64>) -> PlaybackConfig {
        let mut cfg = PlaybackConfig::default();
        if let Some(p) = &self.playback {
            if let Some(v) = p.start_threshold_bytes {
                cfg.start_threshold_bytes = v;
            }
            if let Some(ms) = p.start_retry_delay_ms {
                cfg.start_retry_delay = Duration::from_millis(ms);
            }
            if let Some(v) = p.max_start_retries {
                cfg.max_start_retries = Some(v);
            }
            if p.unbounded_start_retries == Some(true) {
                cfg.max_start_retries = None;
            }
            if let Some(secs) = p.idle_timeout_secs {
                cfg.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
            if let Some(v) = p.retired_history {
                cfg.retired_history = v;
            }
        }
        if let Some(v) = start_threshold_bytes {
            cfg.start_threshold_bytes = v;
        }
        cfg
    }

    pub fn output_config(&self, cli_device: Option<String>) -> OutputConfig {
        let mut cfg = OutputConfig {
            device: normalize_device_name(cli_device.or_else(|| self.device.clone())),
            ..OutputConfig::default()
        };
        if let Some(p) = &self.playback {
            if let Some(v) = p.spool_capacity_bytes {
                cfg.spool_capacity_bytes = v;
            }
            if let Some(v) = p.buffer_seconds {
                cfg.buffer_seconds = v;
            }
            if let Some(v) = p.ready_buffer_ms {
                cfg.ready_buffer_ms = v;
            }
            if let Some(v) = p.chunk_frames {
                cfg.chunk_frames = v;
            }
            if let Some(v) = p.refill_max_frames {
                cfg.refill_max_frames = v;
            }
        }
        cfg
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
