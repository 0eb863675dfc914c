//! Streaming playback of synthesized speech delivered as encoded chunks.
//!
//! A producer sends `play_audio` messages carrying MP3 or WAV bytes tagged with a playback id.
//! [`SessionManager`] keeps at most one playback session alive, appends each chunk to the
//! host's decode buffer in order, and starts output once enough audio has arrived.

pub mod backend;
pub mod chunk_queue;
pub mod config;
mod controller;
mod decode_pipe;
pub mod error;
pub mod format;
pub mod host;
pub mod listener;
pub mod manager;
mod session;

#[cfg(test)]
mod mock_host;

pub use config::{OutputConfig, PlaybackConfig};
pub use error::{PlayerError, Result};
pub use manager::SessionManager;
