//! Stem playback engine
//!
//! [`StemEngine`] owns everything that is mutable for one loaded song: the
//! per-stem playback elements, the shared transport, the per-stem mix state,
//! and the EQ pipeline. All mutation flows through its methods - there is no
//! ambient shared state, which keeps the whole state machine testable
//! headlessly.
//!
//! Synchronization model: every element is driven from the one shared
//! position. Play and seek write that position into every element; while
//! playing, a ~100ms poll reads the designated reference element back and
//! publishes it as the shared position. Drift between siblings beyond the
//! reference is not measured or corrected.

mod element;
mod track_state;

pub use element::{PlaybackElement, PlaybackStartError};
pub use track_state::{TrackState, TrackStateManager};

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::eq::EqPipeline;
use crate::types::{ColorToken, StemKey, SAMPLE_RATE};

/// Suggested cadence for transport polling
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Allowed playback rate range (the upper bound matches what browser media
/// elements accept without dropping audio)
pub const MIN_PLAYBACK_RATE: f64 = 0.25;
pub const MAX_PLAYBACK_RATE: f64 = 4.0;

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Lock-free transport snapshot for display threads
///
/// The engine writes these atomics on every transition and poll; a UI can
/// read them without any lock. `Ordering::Relaxed` is enough - only
/// visibility matters, not ordering against other memory.
pub struct TransportAtomics {
    /// Shared position in milliseconds
    position_ms: AtomicU64,
    /// Reference duration in milliseconds
    duration_ms: AtomicU64,
    /// 0 = Stopped, 1 = Playing, 2 = Paused
    state: AtomicU8,
}

impl TransportAtomics {
    fn new() -> Self {
        Self {
            position_ms: AtomicU64::new(0),
            duration_ms: AtomicU64::new(0),
            state: AtomicU8::new(0),
        }
    }

    /// Shared position in seconds (lock-free)
    pub fn position(&self) -> f64 {
        self.position_ms.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// Reference duration in seconds (lock-free)
    pub fn duration(&self) -> f64 {
        self.duration_ms.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// Transport state (lock-free)
    pub fn play_state(&self) -> PlayState {
        match self.state.load(Ordering::Relaxed) {
            1 => PlayState::Playing,
            2 => PlayState::Paused,
            _ => PlayState::Stopped,
        }
    }
}

/// Description of one loaded stem, handed to [`StemEngine::install`]
#[derive(Debug, Clone)]
pub struct StemSource {
    pub key: StemKey,
    pub url: String,
    /// Decoded source duration in seconds
    pub duration_seconds: f64,
}

/// The engine owning one song session's playback state
pub struct StemEngine {
    /// Elements in install order; index 0 is the position reference
    elements: Vec<PlaybackElement>,
    state: PlayState,
    /// Shared position in seconds, authoritative while not playing
    position: f64,
    /// Reference element duration in seconds
    duration: f64,
    master_volume: f32,
    master_muted: bool,
    playback_rate: f64,
    tracks: TrackStateManager,
    eq: EqPipeline,
    atomics: Arc<TransportAtomics>,
}

impl StemEngine {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            elements: Vec::new(),
            state: PlayState::Stopped,
            position: 0.0,
            duration: 0.0,
            master_volume: 1.0,
            master_muted: false,
            playback_rate: 1.0,
            tracks: TrackStateManager::new(),
            eq: EqPipeline::new(sample_rate),
            atomics: Arc::new(TransportAtomics::new()),
        }
    }

    /// Lock-free transport snapshot handle for display threads
    pub fn atomics(&self) -> Arc<TransportAtomics> {
        Arc::clone(&self.atomics)
    }

    // --- Session lifecycle ---

    /// Replace the element set with a freshly loaded song's stems
    ///
    /// Every element comes up paused at position 0 - loading never
    /// auto-starts playback. The first stem becomes the position reference,
    /// and the mix state resets to defaults for the new key set.
    pub fn install(&mut self, sources: Vec<StemSource>) {
        let rate = self.playback_rate;
        self.elements = sources
            .into_iter()
            .map(|s| {
                let mut el = PlaybackElement::new(s.key, s.url, s.duration_seconds);
                el.pause();
                el.set_position(0.0);
                el.set_rate(rate);
                el
            })
            .collect();

        self.state = PlayState::Stopped;
        self.position = 0.0;
        self.duration = self.elements.first().map(|el| el.duration()).unwrap_or(0.0);
        self.tracks.reset(self.elements.iter().map(|el| el.key().clone()));
        self.eq.reset();
        self.sync_mix();
        self.sync_transport_atomics();

        log::info!(
            "installed {} playback elements, reference duration {:.2}s",
            self.elements.len(),
            self.duration
        );
    }

    /// Tear down the element set (the session for this song is over)
    pub fn clear(&mut self) {
        self.elements.clear();
        self.state = PlayState::Stopped;
        self.position = 0.0;
        self.duration = 0.0;
        self.sync_transport_atomics();
    }

    pub fn has_elements(&self) -> bool {
        !self.elements.is_empty()
    }

    pub fn element(&self, key: &StemKey) -> Option<&PlaybackElement> {
        self.elements.iter().find(|el| el.key() == key)
    }

    pub fn elements(&self) -> impl Iterator<Item = &PlaybackElement> {
        self.elements.iter()
    }

    // --- Transport ---

    pub fn state(&self) -> PlayState {
        self.state
    }

    /// Shared position in seconds
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Reference element duration in seconds
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Start every element from the shared position
    ///
    /// A single element failing to start is logged and does not block its
    /// siblings; the transport still flips to Playing.
    pub fn play(&mut self) {
        if self.elements.is_empty() {
            log::warn!("play ignored: no stems loaded");
            return;
        }

        let position = self.position;
        for el in &mut self.elements {
            el.set_position(position);
            if let Err(e) = el.play() {
                log::error!("failed to start {}: {}", el.key(), e);
            }
        }
        self.state = PlayState::Playing;
        self.sync_transport_atomics();
    }

    /// Pause every element, keeping positions
    pub fn pause(&mut self) {
        if self.state != PlayState::Playing {
            return;
        }
        for el in &mut self.elements {
            el.pause();
        }
        self.position = self.reference_position();
        self.state = PlayState::Paused;
        self.sync_transport_atomics();
    }

    /// Pause every element and rewind everything to 0
    pub fn stop(&mut self) {
        for el in &mut self.elements {
            el.pause();
            el.set_position(0.0);
        }
        self.position = 0.0;
        self.state = PlayState::Stopped;
        self.eq.reset();
        self.sync_transport_atomics();
    }

    /// Jump every element to `seconds` (clamped to the reference duration);
    /// the playing state is preserved
    pub fn seek(&mut self, seconds: f64) {
        let target = seconds.clamp(0.0, self.duration);
        for el in &mut self.elements {
            el.set_position(target);
        }
        self.position = target;
        self.sync_transport_atomics();
    }

    /// Sample the reference element and publish the shared position
    ///
    /// Call on a ~100ms cadence while playing ([`POLL_INTERVAL`]). The first
    /// element to reach its end stops and rewinds the whole set - stems of
    /// one recording end together.
    pub fn poll(&mut self) -> f64 {
        if self.state == PlayState::Playing {
            self.position = self.reference_position();
            if self.elements.iter().any(|el| el.ended()) {
                log::info!("stem ended, stopping all elements");
                self.stop();
                return self.position;
            }
            self.sync_transport_atomics();
        }
        self.position
    }

    fn reference_position(&self) -> f64 {
        self.elements.first().map(|el| el.position()).unwrap_or(0.0)
    }

    // --- Mix controls (per-stem state delegates) ---

    pub fn tracks(&self) -> &TrackStateManager {
        &self.tracks
    }

    pub fn mute(&mut self, key: &StemKey) {
        self.tracks.mute(key);
        self.sync_mix();
    }

    pub fn unmute(&mut self, key: &StemKey) {
        self.tracks.unmute(key);
        self.sync_mix();
    }

    pub fn toggle_mute(&mut self, key: &StemKey) {
        self.tracks.toggle_mute(key);
        self.sync_mix();
    }

    pub fn toggle_solo(&mut self, key: &StemKey) {
        self.tracks.toggle_solo(key);
        self.sync_mix();
    }

    pub fn set_volume(&mut self, key: &StemKey, volume: f32) {
        self.tracks.set_volume(key, volume);
        self.sync_mix();
    }

    /// Set a stem's color locally; persistence to the remote store is the
    /// session's job
    pub fn set_color(&mut self, key: &StemKey, color: ColorToken) {
        self.tracks.set_color(key, color);
    }

    /// Effective audible volume for a stem right now, after the solo rule,
    /// its own mute/fader, and the master controls
    pub fn effective_volume(&self, key: &StemKey) -> f32 {
        if self.master_muted {
            return 0.0;
        }
        self.tracks.effective_gain(key) * self.master_volume
    }

    // --- Master controls ---

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.clamp(0.0, 1.0);
        self.sync_mix();
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn set_master_muted(&mut self, muted: bool) {
        self.master_muted = muted;
        self.sync_mix();
    }

    pub fn is_master_muted(&self) -> bool {
        self.master_muted
    }

    /// Apply one shared playback rate to every element
    pub fn set_playback_rate(&mut self, rate: f64) {
        let rate = rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE);
        self.playback_rate = rate;
        for el in &mut self.elements {
            el.set_rate(rate);
        }
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    // --- EQ ---

    pub fn eq(&self) -> &EqPipeline {
        &self.eq
    }

    pub fn eq_mut(&mut self) -> &mut EqPipeline {
        &mut self.eq
    }

    // --- Internal ---

    /// Push the current mix state into the elements. Always reads the state
    /// managers directly so no element ever acts on a stale snapshot.
    fn sync_mix(&mut self) {
        for el in &mut self.elements {
            let key = el.key().clone();
            el.set_muted(self.master_muted || !self.tracks.is_audible(&key));
            el.set_gain(self.tracks.volume(&key) * self.master_volume);
        }
    }

    fn sync_transport_atomics(&self) {
        self.atomics
            .position_ms
            .store((self.position * 1000.0).round() as u64, Ordering::Relaxed);
        self.atomics
            .duration_ms
            .store((self.duration * 1000.0).round() as u64, Ordering::Relaxed);
        let state = match self.state {
            PlayState::Stopped => 0,
            PlayState::Playing => 1,
            PlayState::Paused => 2,
        };
        self.atomics.state.store(state, Ordering::Relaxed);
    }
}

impl Default for StemEngine {
    fn default() -> Self {
        Self::new(SAMPLE_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Maximum tolerated spread between sibling element positions
    const SYNC_TOLERANCE: f64 = 0.05;

    fn sources(duration: f64) -> Vec<StemSource> {
        [StemKey::Vocals, StemKey::Drums, StemKey::Bass]
            .into_iter()
            .map(|key| StemSource {
                url: format!("file:///stems/{}.wav", key),
                key,
                duration_seconds: duration,
            })
            .collect()
    }

    fn engine_with(duration: f64) -> StemEngine {
        let mut engine = StemEngine::new(44_100);
        engine.install(sources(duration));
        engine
    }

    fn assert_in_sync(engine: &StemEngine, target: f64) {
        for el in engine.elements() {
            assert!(
                (el.position() - target).abs() <= SYNC_TOLERANCE,
                "{} at {} expected {}",
                el.key(),
                el.position(),
                target
            );
        }
    }

    #[test]
    fn test_install_leaves_everything_paused_at_zero() {
        let engine = engine_with(180.0);
        assert_eq!(engine.state(), PlayState::Stopped);
        assert_eq!(engine.position(), 0.0);
        assert_eq!(engine.duration(), 180.0);
        for el in engine.elements() {
            assert!(!el.is_playing());
            assert_eq!(el.position(), 0.0);
        }
    }

    #[test]
    fn test_play_ignored_without_elements() {
        let mut engine = StemEngine::new(44_100);
        engine.play();
        assert_eq!(engine.state(), PlayState::Stopped);
    }

    #[test]
    fn test_play_aligns_all_elements() {
        let mut engine = engine_with(180.0);
        engine.seek(42.0);
        engine.play();
        assert_eq!(engine.state(), PlayState::Playing);
        assert_in_sync(&engine, 42.0);
        for el in engine.elements() {
            assert!(el.is_playing());
        }
    }

    #[test]
    fn test_seek_clamps_and_preserves_state() {
        let mut engine = engine_with(100.0);

        engine.seek(250.0);
        assert_eq!(engine.position(), 100.0);
        assert_eq!(engine.state(), PlayState::Stopped);

        engine.seek(10.0);
        engine.play();
        engine.seek(20.0);
        assert_eq!(engine.state(), PlayState::Playing);
        assert_in_sync(&engine, 20.0);
    }

    #[test]
    fn test_pause_keeps_position_stop_rewinds() {
        let mut engine = engine_with(180.0);
        engine.seek(30.0);
        engine.play();
        std::thread::sleep(Duration::from_millis(30));

        engine.pause();
        assert_eq!(engine.state(), PlayState::Paused);
        assert!(engine.position() >= 30.0);
        assert_in_sync(&engine, engine.position());

        engine.stop();
        assert_eq!(engine.state(), PlayState::Stopped);
        assert_eq!(engine.position(), 0.0);
        assert_in_sync(&engine, 0.0);
    }

    #[test]
    fn test_poll_publishes_reference_position() {
        let mut engine = engine_with(180.0);
        let atomics = engine.atomics();
        engine.play();
        std::thread::sleep(Duration::from_millis(120));

        let polled = engine.poll();
        assert!(polled > 0.05, "polled {}", polled);
        assert!((atomics.position() - polled).abs() < 0.01);
        assert_eq!(atomics.play_state(), PlayState::Playing);
    }

    #[test]
    fn test_first_ended_stem_stops_the_set() {
        // 50ms long stems: the set should stop itself shortly after starting
        let mut engine = engine_with(0.05);
        engine.play();
        std::thread::sleep(Duration::from_millis(80));

        engine.poll();
        assert_eq!(engine.state(), PlayState::Stopped);
        assert_eq!(engine.position(), 0.0);
        assert_in_sync(&engine, 0.0);
    }

    #[test]
    fn test_mute_never_pauses_the_element() {
        let mut engine = engine_with(180.0);
        engine.play();
        engine.mute(&StemKey::Drums);

        let drums = engine.element(&StemKey::Drums).unwrap();
        assert!(drums.is_muted());
        assert!(drums.is_playing(), "muted stems keep running silently");
    }

    #[test]
    fn test_solo_scenario() {
        let mut engine = engine_with(180.0);

        engine.toggle_solo(&StemKey::Vocals);
        assert!(engine.effective_volume(&StemKey::Vocals) > 0.0);
        assert_eq!(engine.effective_volume(&StemKey::Drums), 0.0);
        assert!(engine.element(&StemKey::Drums).unwrap().is_muted());

        engine.toggle_solo(&StemKey::Drums);
        assert!(engine.effective_volume(&StemKey::Drums) > 0.0);
        assert_eq!(engine.effective_volume(&StemKey::Bass), 0.0);

        engine.toggle_solo(&StemKey::Vocals);
        engine.toggle_solo(&StemKey::Drums);
        assert!(engine.effective_volume(&StemKey::Vocals) > 0.0);
        assert!(engine.effective_volume(&StemKey::Bass) > 0.0);
        assert!(!engine.element(&StemKey::Bass).unwrap().is_muted());
    }

    #[test]
    fn test_master_controls_scale_everything() {
        let mut engine = engine_with(180.0);
        engine.set_volume(&StemKey::Vocals, 0.5);
        engine.set_master_volume(0.5);
        assert!((engine.effective_volume(&StemKey::Vocals) - 0.25).abs() < 1e-6);

        engine.set_master_muted(true);
        assert_eq!(engine.effective_volume(&StemKey::Vocals), 0.0);
        assert!(engine.element(&StemKey::Vocals).unwrap().is_muted());

        engine.set_master_muted(false);
        assert!(engine.effective_volume(&StemKey::Vocals) > 0.0);
    }

    #[test]
    fn test_playback_rate_applies_to_all_elements() {
        let mut engine = engine_with(180.0);
        engine.set_playback_rate(2.0);
        for el in engine.elements() {
            assert_eq!(el.rate(), 2.0);
        }
        engine.set_playback_rate(100.0);
        assert_eq!(engine.playback_rate(), MAX_PLAYBACK_RATE);
    }

    #[test]
    fn test_install_resets_mix_state() {
        let mut engine = engine_with(180.0);
        engine.mute(&StemKey::Drums);
        engine.toggle_solo(&StemKey::Vocals);

        engine.install(sources(60.0));
        assert!(!engine.tracks().is_muted(&StemKey::Drums));
        assert!(!engine.tracks().any_soloed());
        assert_eq!(engine.duration(), 60.0);
    }
}
