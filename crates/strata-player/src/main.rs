//! Strata Player - headless stem playback driver
//!
//! Loads a song manifest, opens one song, waits for its stems to load, and
//! runs the synchronized transport for a few seconds while reporting the
//! shared position. Useful for exercising the whole pipeline (fetch, decode,
//! analysis, cache, transport) without a UI or an audio device.
//!
//! Usage: `strata-player <manifest.json> [song-id]`

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use strata_core::cache::WaveformCache;
use strata_core::engine::{StemEngine, POLL_INTERVAL};
use strata_core::types::SAMPLE_RATE;
use strata_player::{MemorySongStore, Session, SongStore, StemLoader};

/// How long to wait for a song's stems before giving up
const LOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// How long to run the transport for the demo
const PLAY_DURATION: Duration = Duration::from_secs(3);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut args = std::env::args().skip(1);
    let manifest = args
        .next()
        .context("usage: strata-player <manifest.json> [song-id]")?;
    let song_id = args.next();

    let store = Arc::new(MemorySongStore::from_manifest(&manifest)?);
    let songs = store.fetch_songs("local")?;
    if songs.is_empty() {
        bail!("manifest {} contains no songs", manifest);
    }

    let song = match &song_id {
        Some(id) => songs
            .iter()
            .find(|s| &s.id == id)
            .with_context(|| format!("song {} not found in manifest", id))?,
        None => &songs[0],
    };
    log::info!("selected '{}' by {}", song.title, song.artist);

    let loader = StemLoader::spawn(WaveformCache::at_default_location());
    let mut session = Session::new(StemEngine::new(SAMPLE_RATE), loader, store.clone());

    session.open_song(song);
    let deadline = Instant::now() + LOAD_TIMEOUT;
    while !session.is_ready() {
        session.pump();
        if Instant::now() > deadline {
            bail!("timed out loading stems for '{}'", song.title);
        }
        std::thread::sleep(Duration::from_millis(25));
    }

    println!("loaded '{}':", song.title);
    for el in session.engine().elements() {
        let key = el.key().clone();
        let onset = session.onsets().get(&key).copied().unwrap_or(0);
        let peak = session
            .envelopes()
            .get(&key)
            .map(|env| env.points().iter().cloned().fold(0.0f32, f32::max))
            .unwrap_or(0.0);
        println!(
            "  {:<12} {:>7.2}s  onset {:>5}ms  envelope peak {:.2}  [{:?}]",
            key.name(),
            el.duration(),
            onset,
            peak,
            session.phase(&key),
        );
    }

    session.play();
    let until = Instant::now() + PLAY_DURATION;
    while Instant::now() < until {
        std::thread::sleep(POLL_INTERVAL);
        let position = session.poll();
        println!("  position {:>6.2}s / {:.2}s", position, session.engine().duration());
    }
    session.stop();
    println!("stopped.");

    Ok(())
}
