//! Playback element - one addressable audio source bound to a stem
//!
//! The element is a clocked position holder, not a renderer: it tracks where
//! a stem's playhead is (base position plus elapsed wall time scaled by the
//! playback rate) and what its gain/mute flags are. The host is responsible
//! for actually producing sound from the URL; the engine only guarantees that
//! every sibling element reports the same timeline.

use std::time::Instant;

use thiserror::Error;

use crate::types::StemKey;

/// Raised when an element cannot start playback
#[derive(Debug, Error)]
pub enum PlaybackStartError {
    #[error("stem '{0}' has no playable source")]
    NoSource(StemKey),
}

/// One per-stem playback element
///
/// Created when a song's stems finish loading, destroyed when the session for
/// that song ends. External code must not mutate elements directly - all
/// mutation flows through the engine.
pub struct PlaybackElement {
    key: StemKey,
    url: String,
    /// Source duration in seconds, known from decode
    duration: f64,
    /// Position at the last anchor point, in seconds
    base_position: f64,
    /// Set while playing; position accrues from this instant
    started_at: Option<Instant>,
    /// Playback rate multiplier (1.0 = natural speed)
    rate: f64,
    gain: f32,
    muted: bool,
}

impl PlaybackElement {
    pub fn new(key: StemKey, url: String, duration: f64) -> Self {
        Self {
            key,
            url,
            duration,
            base_position: 0.0,
            started_at: None,
            rate: 1.0,
            gain: 1.0,
            muted: false,
        }
    }

    pub fn key(&self) -> &StemKey {
        &self.key
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Source duration in seconds
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Current playhead position in seconds, clamped to the duration
    pub fn position(&self) -> f64 {
        let position = match self.started_at {
            Some(anchor) => self.base_position + anchor.elapsed().as_secs_f64() * self.rate,
            None => self.base_position,
        };
        position.clamp(0.0, self.duration)
    }

    /// Move the playhead, clamped to `[0, duration]`; the playing state is
    /// unaffected (a playing element keeps running from the new position)
    pub fn set_position(&mut self, seconds: f64) {
        self.base_position = seconds.clamp(0.0, self.duration);
        if self.started_at.is_some() {
            self.started_at = Some(Instant::now());
        }
    }

    /// Start the clock from the current position
    pub fn play(&mut self) -> Result<(), PlaybackStartError> {
        if self.url.is_empty() || !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(PlaybackStartError::NoSource(self.key.clone()));
        }
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        Ok(())
    }

    /// Freeze the clock, keeping the current position
    pub fn pause(&mut self) {
        self.base_position = self.position();
        self.started_at = None;
    }

    pub fn is_playing(&self) -> bool {
        self.started_at.is_some()
    }

    /// Whether the playhead has reached the end of the source
    pub fn ended(&self) -> bool {
        self.duration > 0.0 && self.position() >= self.duration
    }

    /// Change the rate without jumping the playhead
    pub fn set_rate(&mut self, rate: f64) {
        self.base_position = self.position();
        if self.started_at.is_some() {
            self.started_at = Some(Instant::now());
        }
        self.rate = rate;
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 1.0);
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }
}
