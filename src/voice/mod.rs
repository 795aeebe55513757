//! Speaker output
//!
//! Plays audio fetched by remote synthesis on the default output device.

#[cfg(feature = "playback")]
mod playback;

#[cfg(feature = "playback")]
pub use playback::AudioPlayback;
