//! Default playback backend: symphonia decoding into a CPAL output stream.

mod cpal_host;
mod decode;
mod device;
mod output;
mod pcm;
mod resample;
mod spool;

pub use cpal_host::CpalHost;
pub use device::list_devices;
