//! Audio input, output and signal helpers.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod output;
pub mod recorder;
pub mod vad;
pub mod wav;
