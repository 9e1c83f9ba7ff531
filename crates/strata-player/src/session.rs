//! Song session
//!
//! A [`Session`] is the single owner of one song's playback world: it feeds
//! the loader, applies loader results to the engine, and carries the
//! per-stem display data (envelopes, onsets, load phases).
//!
//! Song switches are guarded by a generation counter. Every load request is
//! stamped with the generation it was issued under; a result arriving with a
//! stale stamp belongs to a song the user already navigated away from and is
//! dropped without touching engine state. That check is the only
//! cancellation mechanism - the in-flight work itself is not interrupted.

use std::collections::BTreeMap;
use std::sync::Arc;

use strata_core::engine::{PlayState, StemEngine, StemSource};
use strata_core::types::{ColorToken, Song, StemKey, WaveformEnvelope};

use crate::loader::{StemLoadRequest, StemLoadResult, StemLoader};
use crate::store::SongStore;

/// Load phase of a single stem, for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPhase {
    #[default]
    Idle,
    /// Request in flight
    Loading,
    /// Loaded with a cached waveform
    Cached,
    /// Loaded with a freshly analyzed waveform
    Ready,
    /// Fetch or decode failed; the stem is unavailable this session
    Failed,
}

/// One song session: engine + loader + store, kept consistent across
/// song switches
pub struct Session {
    engine: StemEngine,
    loader: StemLoader,
    store: Arc<dyn SongStore>,
    current_song: Option<Song>,
    /// Bumped on every open_song; stale loader results are detected by
    /// comparing against this
    generation: u64,
    /// Whether the current song's elements are installed (play/seek are
    /// refused until then)
    installed: bool,
    envelopes: BTreeMap<StemKey, WaveformEnvelope>,
    onsets: BTreeMap<StemKey, u32>,
    phases: BTreeMap<StemKey, LoadPhase>,
}

impl Session {
    pub fn new(engine: StemEngine, loader: StemLoader, store: Arc<dyn SongStore>) -> Self {
        Self {
            engine,
            loader,
            store,
            current_song: None,
            generation: 0,
            installed: false,
            envelopes: BTreeMap::new(),
            onsets: BTreeMap::new(),
            phases: BTreeMap::new(),
        }
    }

    /// Open a song: tear down the previous session state and queue its stems
    /// for loading. Playback never auto-starts.
    pub fn open_song(&mut self, song: &Song) {
        self.generation += 1;
        self.installed = false;

        self.engine.stop();
        self.engine.clear();
        self.envelopes.clear();
        self.onsets.clear();
        self.phases = song
            .stems
            .keys()
            .map(|key| (key.clone(), LoadPhase::Loading))
            .collect();
        self.current_song = Some(song.clone());

        log::info!(
            "opening song '{}' ({} stems, generation {})",
            song.title,
            song.stems.len(),
            self.generation
        );

        let request = StemLoadRequest {
            generation: self.generation,
            song_id: song.id.clone(),
            stems: song
                .stems
                .iter()
                .map(|(key, url)| (key.clone(), url.clone()))
                .collect(),
        };
        if let Err(e) = self.loader.request(request) {
            log::error!("failed to queue stem load: {}", e);
        }
    }

    /// Drain loader results, applying those that still belong to the current
    /// song. Returns true when a result was applied.
    pub fn pump(&mut self) -> bool {
        let mut applied = false;
        while let Some(result) = self.loader.try_recv() {
            if result.generation != self.generation {
                log::info!(
                    "discarding stale load result for song {} (generation {} != {})",
                    result.song_id,
                    result.generation,
                    self.generation
                );
                continue;
            }
            self.apply(result);
            applied = true;
        }
        applied
    }

    fn apply(&mut self, result: StemLoadResult) {
        let sources: Vec<StemSource> = result
            .stems
            .iter()
            .map(|stem| StemSource {
                key: stem.key.clone(),
                url: stem.url.clone(),
                duration_seconds: stem.duration_seconds,
            })
            .collect();
        self.engine.install(sources);

        for stem in &result.stems {
            self.envelopes.insert(stem.key.clone(), stem.envelope.clone());
            self.onsets.insert(stem.key.clone(), stem.onset_ms);
            let phase = if stem.from_cache { LoadPhase::Cached } else { LoadPhase::Ready };
            self.phases.insert(stem.key.clone(), phase);
        }

        // Anything still marked Loading never came back: fetch/decode failed
        for phase in self.phases.values_mut() {
            if *phase == LoadPhase::Loading {
                *phase = LoadPhase::Failed;
            }
        }

        // Stored colors override the defaults the engine reset to
        if let Some(song) = &self.current_song {
            for (key, color) in &song.track_colors {
                self.engine.set_color(key, color.clone());
            }
        }

        self.installed = true;
    }

    /// Whether the current song's elements are installed and playable
    pub fn is_ready(&self) -> bool {
        self.installed
    }

    // --- Transport (refused until the load completed) ---

    pub fn play(&mut self) {
        if !self.installed {
            log::warn!("play refused: stems still loading");
            return;
        }
        self.engine.play();
    }

    pub fn pause(&mut self) {
        self.engine.pause();
    }

    pub fn stop(&mut self) {
        self.engine.stop();
    }

    pub fn seek(&mut self, seconds: f64) {
        if !self.installed {
            log::warn!("seek refused: stems still loading");
            return;
        }
        self.engine.seek(seconds);
    }

    /// Poll the transport (call on a ~100ms cadence while playing)
    pub fn poll(&mut self) -> f64 {
        self.engine.poll()
    }

    // --- Colors ---

    /// Set a stem's color locally and persist it to the remote store.
    ///
    /// Persistence is best-effort: on failure the error is logged and
    /// returned for a one-shot user alert, but local state is not rolled
    /// back.
    pub fn set_track_color(&mut self, key: &StemKey, color: ColorToken) -> anyhow::Result<()> {
        self.engine.set_color(key, color);

        let Some(song) = &self.current_song else {
            return Ok(());
        };
        let colors = self.engine.tracks().colors();
        if let Err(e) = self.store.update_track_colors(&song.id, &colors) {
            log::error!("failed to persist track colors for {}: {}", song.id, e);
            return Err(e);
        }
        Ok(())
    }

    /// Delete a song from the remote store
    pub fn delete_song(&mut self, song_id: &str) -> anyhow::Result<()> {
        self.store.delete_song(song_id)?;
        if self.current_song.as_ref().is_some_and(|s| s.id == song_id) {
            self.engine.stop();
            self.engine.clear();
            self.current_song = None;
            self.installed = false;
        }
        Ok(())
    }

    // --- Accessors ---

    pub fn engine(&self) -> &StemEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut StemEngine {
        &mut self.engine
    }

    pub fn current_song(&self) -> Option<&Song> {
        self.current_song.as_ref()
    }

    pub fn envelopes(&self) -> &BTreeMap<StemKey, WaveformEnvelope> {
        &self.envelopes
    }

    pub fn onsets(&self) -> &BTreeMap<StemKey, u32> {
        &self.onsets
    }

    pub fn phase(&self, key: &StemKey) -> LoadPhase {
        self.phases.get(key).copied().unwrap_or_default()
    }

    pub fn play_state(&self) -> PlayState {
        self.engine.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::{Duration, Instant};
    use strata_core::cache::WaveformCache;
    use strata_core::types::ENVELOPE_LEN;

    use crate::store::MemorySongStore;

    const RATE: u32 = 8_000;

    fn write_wav(path: &Path, seconds: f64) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..(seconds * RATE as f64) as usize {
            let value = 0.5 * (i as f32 * std::f32::consts::TAU * 220.0 / RATE as f32).sin();
            writer.write_sample((value * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn song_with_stems(id: &str, stems: &[(StemKey, &Path)]) -> Song {
        Song {
            id: id.to_string(),
            title: format!("Song {}", id),
            stems: stems
                .iter()
                .map(|(key, path)| (key.clone(), path.to_string_lossy().into_owned()))
                .collect(),
            ..Song::default()
        }
    }

    fn session_with_cache(dir: &Path) -> Session {
        let loader = StemLoader::spawn(WaveformCache::new(dir.join("cache.json")));
        Session::new(
            StemEngine::new(44_100),
            loader,
            Arc::new(MemorySongStore::new()),
        )
    }

    fn pump_until_ready(session: &mut Session) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !session.is_ready() {
            session.pump();
            assert!(Instant::now() < deadline, "load timed out");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_two_miss_load_fills_cache_and_installs_paused() {
        let dir = tempfile::tempdir().unwrap();
        let vocals = dir.path().join("vocals.wav");
        let drums = dir.path().join("drums.wav");
        write_wav(&vocals, 0.5);
        write_wav(&drums, 0.5);

        let mut session = session_with_cache(dir.path());
        let song = song_with_stems("a", &[(StemKey::Vocals, &vocals), (StemKey::Drums, &drums)]);
        session.open_song(&song);

        assert_eq!(session.phase(&StemKey::Vocals), LoadPhase::Loading);
        pump_until_ready(&mut session);

        // Both elements installed, paused at 0
        assert_eq!(session.engine().elements().count(), 2);
        for el in session.engine().elements() {
            assert!(!el.is_playing());
            assert_eq!(el.position(), 0.0);
        }
        assert_eq!(session.phase(&StemKey::Vocals), LoadPhase::Ready);
        assert_eq!(session.envelopes().len(), 2);
        assert!(session
            .envelopes()
            .values()
            .all(|env| env.len() == ENVELOPE_LEN));
        assert_eq!(session.onsets().len(), 2);

        // The write-through cache now holds both entries
        let mut cache = WaveformCache::new(dir.path().join("cache.json"));
        cache.load_all();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_stale_load_discarded_on_song_switch() {
        let dir = tempfile::tempdir().unwrap();
        let a_stem = dir.path().join("a-vocals.wav");
        let b_stem = dir.path().join("b-vocals.wav");
        write_wav(&a_stem, 0.5);
        write_wav(&b_stem, 0.5);

        let mut session = session_with_cache(dir.path());
        let song_a = song_with_stems("a", &[(StemKey::Vocals, &a_stem)]);
        let song_b = song_with_stems("b", &[(StemKey::Vocals, &b_stem)]);

        // Switch songs before the first load resolves
        session.open_song(&song_a);
        session.open_song(&song_b);
        pump_until_ready(&mut session);

        // Only B's stems may be installed; A's result was dropped
        assert_eq!(session.current_song().unwrap().id, "b");
        let b_url = b_stem.to_string_lossy().into_owned();
        let urls: Vec<&str> = session.engine().elements().map(|el| el.url()).collect();
        assert_eq!(urls, vec![b_url.as_str()]);
    }

    #[test]
    fn test_play_refused_until_installed() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("vocals.wav");
        write_wav(&stem, 0.5);

        let mut session = session_with_cache(dir.path());
        let song = song_with_stems("a", &[(StemKey::Vocals, &stem)]);
        session.open_song(&song);

        session.play();
        assert_eq!(session.play_state(), PlayState::Stopped);

        pump_until_ready(&mut session);
        session.play();
        assert_eq!(session.play_state(), PlayState::Playing);
        session.stop();
    }

    #[test]
    fn test_failed_stem_marked_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("vocals.wav");
        write_wav(&good, 0.5);
        let missing = dir.path().join("never-written.wav");

        let mut session = session_with_cache(dir.path());
        let song = song_with_stems("a", &[(StemKey::Vocals, &good), (StemKey::Drums, &missing)]);
        session.open_song(&song);
        pump_until_ready(&mut session);

        assert_eq!(session.engine().elements().count(), 1);
        assert_eq!(session.phase(&StemKey::Vocals), LoadPhase::Ready);
        assert_eq!(session.phase(&StemKey::Drums), LoadPhase::Failed);
    }

    #[test]
    fn test_reopening_song_uses_cache_and_resets_state() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("vocals.wav");
        write_wav(&stem, 0.5);

        let mut session = session_with_cache(dir.path());
        let song = song_with_stems("a", &[(StemKey::Vocals, &stem)]);

        session.open_song(&song);
        pump_until_ready(&mut session);
        session.engine_mut().mute(&StemKey::Vocals);

        session.open_song(&song);
        pump_until_ready(&mut session);
        assert_eq!(session.phase(&StemKey::Vocals), LoadPhase::Cached);
        assert!(!session.engine().tracks().is_muted(&StemKey::Vocals));
        // Onsets are recomputed on every load, cached or not
        assert!(session.onsets().contains_key(&StemKey::Vocals));
    }

    #[test]
    fn test_color_persists_to_store() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("vocals.wav");
        write_wav(&stem, 0.5);

        let store = Arc::new(MemorySongStore::new());
        let song = song_with_stems("a", &[(StemKey::Vocals, &stem)]);
        store.add_song(song.clone());

        let loader = StemLoader::spawn(WaveformCache::new(dir.path().join("cache.json")));
        let mut session = Session::new(StemEngine::new(44_100), loader, store.clone());
        session.open_song(&song);
        pump_until_ready(&mut session);

        session
            .set_track_color(&StemKey::Vocals, "bg-pink-500".to_string())
            .unwrap();

        let songs = store.fetch_songs("anyone").unwrap();
        assert_eq!(
            songs[0].track_colors.get(&StemKey::Vocals).map(String::as_str),
            Some("bg-pink-500")
        );

        session.delete_song("a").unwrap();
        assert!(session.current_song().is_none());
    }
}
