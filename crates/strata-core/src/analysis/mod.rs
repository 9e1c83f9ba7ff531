//! Offline signal analysis
//!
//! Converts decoded PCM into the small summaries the player needs: a
//! fixed-width amplitude envelope for waveform display and a coarse attack
//! onset estimate for drift annotation. Everything here is pure - the
//! waveform cache depends on identical input producing identical output.

pub mod onset;
pub mod waveform;

pub use onset::detect_onset;
pub use waveform::envelope;
