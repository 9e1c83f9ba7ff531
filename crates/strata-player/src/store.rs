//! Remote song store interface
//!
//! The metadata store (song list, stem URLs, track colors) lives outside
//! this system; only its surface is modeled here. [`SongStore`] is the seam
//! a real backend implements. [`MemorySongStore`] backs tests and the CLI,
//! loading its songs from a JSON manifest.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use anyhow::{bail, Context, Result};

use strata_core::types::{ColorToken, Song, StemKey};

/// Callback invoked with the full song list whenever it changes
pub type SongsChangedFn = Box<dyn Fn(&[Song]) + Send + Sync>;

/// The remote metadata store surface
pub trait SongStore: Send + Sync {
    /// Fetch all songs visible to a user
    fn fetch_songs(&self, user_id: &str) -> Result<Vec<Song>>;

    /// Watch for song list changes; dropping the returned guard
    /// unsubscribes
    fn subscribe(&self, user_id: &str, on_change: SongsChangedFn) -> StoreSubscription;

    /// Persist a song's track colors (the only field this system writes)
    fn update_track_colors(
        &self,
        song_id: &str,
        colors: &BTreeMap<StemKey, ColorToken>,
    ) -> Result<()>;

    /// Delete a song
    fn delete_song(&self, song_id: &str) -> Result<()>;
}

struct Subscriber {
    on_change: SongsChangedFn,
}

type SubscriberMap = Mutex<HashMap<u64, Subscriber>>;

/// Subscription guard; unsubscribes on drop
pub struct StoreSubscription {
    id: u64,
    subscribers: Weak<SubscriberMap>,
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            if let Ok(mut map) = subscribers.lock() {
                map.remove(&self.id);
            }
        }
    }
}

/// In-memory song store
///
/// Serves every song to every user id (single-tenant manifests don't carry
/// ownership). Mutations notify subscribers synchronously.
#[derive(Default)]
pub struct MemorySongStore {
    songs: Mutex<Vec<Song>>,
    subscribers: Arc<SubscriberMap>,
    next_subscriber: AtomicU64,
}

impl MemorySongStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load songs from a JSON manifest (an array of songs in the store's
    /// wire shape)
    pub fn from_manifest<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read song manifest {:?}", path))?;
        let songs: Vec<Song> = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse song manifest {:?}", path))?;
        log::info!("loaded {} songs from manifest {:?}", songs.len(), path);

        let store = Self::new();
        *store.songs.lock().unwrap() = songs;
        Ok(store)
    }

    /// Add a song and notify subscribers
    pub fn add_song(&self, song: Song) {
        self.songs.lock().unwrap().push(song);
        self.notify();
    }

    fn notify(&self) {
        let songs = self.songs.lock().unwrap().clone();
        let subscribers = self.subscribers.lock().unwrap();
        for subscriber in subscribers.values() {
            (subscriber.on_change)(&songs);
        }
    }
}

impl SongStore for MemorySongStore {
    fn fetch_songs(&self, _user_id: &str) -> Result<Vec<Song>> {
        Ok(self.songs.lock().unwrap().clone())
    }

    fn subscribe(&self, _user_id: &str, on_change: SongsChangedFn) -> StoreSubscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .unwrap()
            .insert(id, Subscriber { on_change });
        StoreSubscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    fn update_track_colors(
        &self,
        song_id: &str,
        colors: &BTreeMap<StemKey, ColorToken>,
    ) -> Result<()> {
        {
            let mut songs = self.songs.lock().unwrap();
            let song = match songs.iter_mut().find(|s| s.id == song_id) {
                Some(song) => song,
                None => bail!("song {} not found", song_id),
            };
            song.track_colors = colors.clone();
        }
        self.notify();
        Ok(())
    }

    fn delete_song(&self, song_id: &str) -> Result<()> {
        {
            let mut songs = self.songs.lock().unwrap();
            let before = songs.len();
            songs.retain(|s| s.id != song_id);
            if songs.len() == before {
                bail!("song {} not found", song_id);
            }
        }
        self.notify();
        Ok(())
    }
}
