//! Per-stem mix state: mute, solo, volume, color
//!
//! Mute and solo are mutually exclusive per stem, and solo has global
//! priority: while anything is soloed, every non-soloed stem is forced
//! silent regardless of its own settings. Consumers must read effective
//! gain through [`TrackStateManager::effective_gain`] at the moment of use
//! rather than caching it - mix decisions made from stale snapshots are how
//! the ghost-audio bugs happen.

use std::collections::BTreeMap;

use crate::types::{ColorToken, StemKey};

/// Mix state for a single stem
#[derive(Debug, Clone)]
pub struct TrackState {
    pub muted: bool,
    pub soloed: bool,
    /// Fader volume in [0, 1]
    pub volume: f32,
    pub color: ColorToken,
}

impl TrackState {
    fn new(key: &StemKey) -> Self {
        Self {
            muted: false,
            soloed: false,
            volume: 1.0,
            color: key.default_color().to_string(),
        }
    }
}

/// Mix state for all stems of the loaded song
#[derive(Debug, Default)]
pub struct TrackStateManager {
    states: BTreeMap<StemKey, TrackState>,
}

impl TrackStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to defaults for the given stems (called when a new song opens)
    pub fn reset(&mut self, keys: impl IntoIterator<Item = StemKey>) {
        self.states = keys
            .into_iter()
            .map(|key| {
                let state = TrackState::new(&key);
                (key, state)
            })
            .collect();
    }

    fn state_mut(&mut self, key: &StemKey) -> &mut TrackState {
        self.states
            .entry(key.clone())
            .or_insert_with(|| TrackState::new(key))
    }

    /// Mute a stem. A soloed stem drops its solo first - the two states are
    /// mutually exclusive.
    pub fn mute(&mut self, key: &StemKey) {
        let state = self.state_mut(key);
        state.soloed = false;
        state.muted = true;
    }

    pub fn unmute(&mut self, key: &StemKey) {
        self.state_mut(key).muted = false;
    }

    pub fn toggle_mute(&mut self, key: &StemKey) {
        if self.is_muted(key) {
            self.unmute(key);
        } else {
            self.mute(key);
        }
    }

    /// Toggle solo. Soloing a muted stem unmutes it first.
    pub fn toggle_solo(&mut self, key: &StemKey) {
        let state = self.state_mut(key);
        if state.soloed {
            state.soloed = false;
        } else {
            state.muted = false;
            state.soloed = true;
        }
    }

    /// Set a stem's fader volume, clamped to [0, 1]
    pub fn set_volume(&mut self, key: &StemKey, volume: f32) {
        self.state_mut(key).volume = volume.clamp(0.0, 1.0);
    }

    pub fn set_color(&mut self, key: &StemKey, color: ColorToken) {
        self.state_mut(key).color = color;
    }

    pub fn is_muted(&self, key: &StemKey) -> bool {
        self.states.get(key).map(|s| s.muted).unwrap_or(false)
    }

    pub fn is_soloed(&self, key: &StemKey) -> bool {
        self.states.get(key).map(|s| s.soloed).unwrap_or(false)
    }

    pub fn volume(&self, key: &StemKey) -> f32 {
        self.states.get(key).map(|s| s.volume).unwrap_or(1.0)
    }

    pub fn color(&self, key: &StemKey) -> Option<&ColorToken> {
        self.states.get(key).map(|s| &s.color)
    }

    /// Snapshot of all colors, in the shape the remote store persists
    pub fn colors(&self) -> BTreeMap<StemKey, ColorToken> {
        self.states
            .iter()
            .map(|(key, state)| (key.clone(), state.color.clone()))
            .collect()
    }

    /// Whether any stem is currently soloed
    pub fn any_soloed(&self) -> bool {
        self.states.values().any(|s| s.soloed)
    }

    /// Whether a stem is audible under the global solo rule
    pub fn is_audible(&self, key: &StemKey) -> bool {
        if self.any_soloed() {
            self.is_soloed(key)
        } else {
            !self.is_muted(key)
        }
    }

    /// Effective gain for a stem: its fader volume, or 0 when the solo rule
    /// or its own mute silences it
    pub fn effective_gain(&self, key: &StemKey) -> f32 {
        if self.is_audible(key) {
            self.volume(key)
        } else {
            0.0
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &StemKey> {
        self.states.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TrackStateManager {
        let mut m = TrackStateManager::new();
        m.reset([StemKey::Vocals, StemKey::Drums, StemKey::Bass]);
        m
    }

    #[test]
    fn test_solo_and_mute_are_exclusive() {
        let mut m = manager();

        m.toggle_solo(&StemKey::Vocals);
        assert!(m.is_soloed(&StemKey::Vocals));
        assert!(!m.is_muted(&StemKey::Vocals));

        // Muting a soloed stem drops the solo
        m.mute(&StemKey::Vocals);
        assert!(m.is_muted(&StemKey::Vocals));
        assert!(!m.is_soloed(&StemKey::Vocals));

        // Soloing a muted stem unmutes it
        m.toggle_solo(&StemKey::Vocals);
        assert!(m.is_soloed(&StemKey::Vocals));
        assert!(!m.is_muted(&StemKey::Vocals));
    }

    #[test]
    fn test_solo_silences_everything_else() {
        let mut m = manager();
        m.set_volume(&StemKey::Drums, 0.9);

        m.toggle_solo(&StemKey::Vocals);
        assert_eq!(m.effective_gain(&StemKey::Vocals), 1.0);
        assert_eq!(m.effective_gain(&StemKey::Drums), 0.0);
        assert_eq!(m.effective_gain(&StemKey::Bass), 0.0);

        // Second solo joins the audible set
        m.toggle_solo(&StemKey::Drums);
        assert_eq!(m.effective_gain(&StemKey::Drums), 0.9);
        assert_eq!(m.effective_gain(&StemKey::Bass), 0.0);

        // Clearing all solos restores per-stem audibility
        m.toggle_solo(&StemKey::Vocals);
        m.toggle_solo(&StemKey::Drums);
        assert_eq!(m.effective_gain(&StemKey::Bass), 1.0);
        assert_eq!(m.effective_gain(&StemKey::Drums), 0.9);
    }

    #[test]
    fn test_mute_restored_after_solo_clears() {
        let mut m = manager();
        m.mute(&StemKey::Bass);

        m.toggle_solo(&StemKey::Vocals);
        m.toggle_solo(&StemKey::Vocals);

        // Bass's own mute is back in charge once no solo is active
        assert_eq!(m.effective_gain(&StemKey::Bass), 0.0);
        assert_eq!(m.effective_gain(&StemKey::Drums), 1.0);
    }

    #[test]
    fn test_volume_clamped() {
        let mut m = manager();
        m.set_volume(&StemKey::Vocals, 2.5);
        assert_eq!(m.volume(&StemKey::Vocals), 1.0);
        m.set_volume(&StemKey::Vocals, -1.0);
        assert_eq!(m.volume(&StemKey::Vocals), 0.0);
    }

    #[test]
    fn test_reset_clears_session_state_and_colors() {
        let mut m = manager();
        m.mute(&StemKey::Vocals);
        m.set_color(&StemKey::Vocals, "bg-pink-500".to_string());

        m.reset([StemKey::Vocals, StemKey::Drums]);
        assert!(!m.is_muted(&StemKey::Vocals));
        assert_eq!(
            m.color(&StemKey::Vocals).map(String::as_str),
            Some(StemKey::Vocals.default_color())
        );
    }

    #[test]
    fn test_unknown_key_defaults() {
        let m = manager();
        let unknown = StemKey::Custom("theremin".into());
        assert!(!m.is_muted(&unknown));
        assert_eq!(m.volume(&unknown), 1.0);
        assert_eq!(m.effective_gain(&unknown), 1.0);
    }
}
