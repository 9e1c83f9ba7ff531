//! Persistent waveform envelope cache
//!
//! Stem content at a URL is immutable once the separation backend has
//! produced it, so envelopes are cached by exact URL and never expire. The
//! whole map lives in one JSON blob on disk: loaded once at startup, and
//! rewritten in full on every `put` (write-through, no batching, no
//! eviction). A read failure of any kind degrades to an empty cache; a
//! persist failure is logged and swallowed, leaving the in-memory map
//! authoritative.
//!
//! The blob carries a schema version so a future analyzer change can
//! invalidate stale envelopes by bumping [`CACHE_VERSION`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::WaveformEnvelope;

/// Schema version of the persisted blob; entries written under a different
/// version are discarded on load
pub const CACHE_VERSION: u32 = 1;

/// File name of the cache blob under the application cache directory
const CACHE_FILE: &str = "waveforms.json";

/// Errors raised while persisting the cache blob
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to create cache directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write cache blob {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize cache blob: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// On-disk shape of the cache
#[derive(Serialize, Deserialize)]
struct CacheBlob {
    version: u32,
    entries: HashMap<String, Vec<f32>>,
}

/// URL-keyed waveform envelope cache
pub struct WaveformCache {
    path: PathBuf,
    entries: HashMap<String, WaveformEnvelope>,
}

impl WaveformCache {
    /// Create an empty cache backed by the given blob path (nothing is read
    /// until [`load_all`](Self::load_all))
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            entries: HashMap::new(),
        }
    }

    /// Create a cache at the default per-user location
    pub fn at_default_location() -> Self {
        let base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join("strata").join(CACHE_FILE))
    }

    /// Path of the backing blob
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted blob into memory, replacing current entries
    ///
    /// Missing file, unreadable JSON, a version mismatch, or malformed
    /// entries all degrade to an empty (or partially filtered) cache with a
    /// warning - a broken cache must never break loading.
    pub fn load_all(&mut self) {
        self.entries.clear();

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("waveform cache not found at {:?}, starting empty", self.path);
                return;
            }
            Err(e) => {
                log::warn!("failed to read waveform cache {:?}: {}", self.path, e);
                return;
            }
        };

        let blob: CacheBlob = match serde_json::from_str(&contents) {
            Ok(blob) => blob,
            Err(e) => {
                log::warn!("waveform cache {:?} is corrupt, ignoring: {}", self.path, e);
                return;
            }
        };

        if blob.version != CACHE_VERSION {
            log::warn!(
                "waveform cache {:?} has schema version {} (expected {}), discarding",
                self.path,
                blob.version,
                CACHE_VERSION
            );
            return;
        }

        let total = blob.entries.len();
        for (url, points) in blob.entries {
            match WaveformEnvelope::from_points(points) {
                Some(envelope) => {
                    self.entries.insert(url, envelope);
                }
                None => log::warn!("dropping malformed cache entry for {}", url),
            }
        }

        log::info!(
            "waveform cache loaded: {} of {} entries from {:?}",
            self.entries.len(),
            total,
            self.path
        );
    }

    /// Look up the envelope for a stem URL
    pub fn get(&self, url: &str) -> Option<&WaveformEnvelope> {
        self.entries.get(url)
    }

    /// Insert an envelope and immediately rewrite the blob
    ///
    /// A persist failure is logged and swallowed; the in-memory entry stays.
    pub fn put(&mut self, url: &str, envelope: WaveformEnvelope) {
        self.entries.insert(url.to_string(), envelope);
        if let Err(e) = self.persist() {
            log::warn!("failed to persist waveform cache: {}", e);
        }
    }

    /// Serialize the full current map to the backing blob
    pub fn persist(&self) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let blob = CacheBlob {
            version: CACHE_VERSION,
            entries: self
                .entries
                .iter()
                .map(|(url, env)| (url.clone(), env.points().to_vec()))
                .collect(),
        };

        let json = serde_json::to_string(&blob)?;
        std::fs::write(&self.path, json).map_err(|source| CacheError::Write {
            path: self.path.clone(),
            source,
        })?;

        Ok(())
    }

    /// Number of cached envelopes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ENVELOPE_LEN;

    fn test_envelope(fill: f32) -> WaveformEnvelope {
        WaveformEnvelope::from_points(vec![fill; ENVELOPE_LEN]).unwrap()
    }

    #[test]
    fn test_roundtrip_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waveforms.json");

        let mut cache = WaveformCache::new(&path);
        cache.load_all();
        assert!(cache.is_empty());

        cache.put("https://cdn.example/vocals.mp3", test_envelope(0.25));
        cache.put("https://cdn.example/drums.mp3", test_envelope(0.75));

        // Fresh instance simulating the next session
        let mut reloaded = WaveformCache::new(&path);
        reloaded.load_all();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.get("https://cdn.example/vocals.mp3"),
            Some(&test_envelope(0.25))
        );
    }

    #[test]
    fn test_corrupt_blob_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waveforms.json");
        std::fs::write(&path, "{not json").unwrap();

        let mut cache = WaveformCache::new(&path);
        cache.load_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_version_mismatch_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waveforms.json");
        let blob = serde_json::json!({
            "version": CACHE_VERSION + 1,
            "entries": { "url": vec![0.5f32; ENVELOPE_LEN] }
        });
        std::fs::write(&path, blob.to_string()).unwrap();

        let mut cache = WaveformCache::new(&path);
        cache.load_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_malformed_entry_dropped_others_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waveforms.json");
        let blob = serde_json::json!({
            "version": CACHE_VERSION,
            "entries": {
                "short": vec![0.5f32; 10],
                "ok": vec![0.5f32; ENVELOPE_LEN]
            }
        });
        std::fs::write(&path, blob.to_string()).unwrap();

        let mut cache = WaveformCache::new(&path);
        cache.load_all();
        assert_eq!(cache.len(), 1);
        assert!(cache.get("ok").is_some());
        assert!(cache.get("short").is_none());
    }

    #[test]
    fn test_put_survives_unwritable_path() {
        // Persist fails (directory cannot be created under /dev/null) but the
        // in-memory entry must stay authoritative
        let mut cache = WaveformCache::new("/dev/null/nope/waveforms.json");
        cache.put("url", test_envelope(0.5));
        assert_eq!(cache.get("url"), Some(&test_envelope(0.5)));
    }
}
