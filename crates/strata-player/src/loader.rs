//! Background stem loader
//!
//! Moves the expensive part of opening a song (network fetch, PCM decode,
//! waveform synthesis) off the caller's thread. One loader thread owns the
//! waveform cache: it loads the persisted blob before touching its request
//! queue, so a load can never race a partially-populated cache, and all
//! write-through puts are serialized through it.
//!
//! Per song the stems are processed in parallel with Rayon. A stem whose
//! fetch or decode fails is logged and omitted from the result; its siblings
//! are unaffected. There are no fetch/decode timeouts - a hung transfer
//! stalls only that song's load.

use std::io::Read;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use rayon::prelude::*;
use thiserror::Error;

use strata_core::analysis;
use strata_core::cache::WaveformCache;
use strata_core::types::{StemKey, WaveformEnvelope};

/// Errors for a single stem's load; always local - one failing stem never
/// aborts the song
#[derive(Debug, Error)]
pub enum StemLoadError {
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("failed to decode {url}: {message}")]
    Decode { url: String, message: String },
}

/// Request to load one song's stems
#[derive(Debug)]
pub struct StemLoadRequest {
    /// Session generation this request belongs to; the session discards
    /// results whose generation is no longer current
    pub generation: u64,
    pub song_id: String,
    /// (stem, url) pairs, already filtered to stems that exist
    pub stems: Vec<(StemKey, String)>,
}

/// One successfully loaded stem
#[derive(Debug, Clone)]
pub struct LoadedStem {
    pub key: StemKey,
    pub url: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub envelope: WaveformEnvelope,
    /// First attack onset in milliseconds (recomputed on every load)
    pub onset_ms: u32,
    /// Whether the envelope came from the persistent cache
    pub from_cache: bool,
}

/// Result of a song load; stems that failed are simply absent
pub struct StemLoadResult {
    pub generation: u64,
    pub song_id: String,
    pub stems: Vec<LoadedStem>,
}

/// Handle to the background loader thread
pub struct StemLoader {
    tx: Sender<StemLoadRequest>,
    rx: Receiver<StemLoadResult>,
    _handle: JoinHandle<()>,
}

impl StemLoader {
    /// Spawn the loader thread around the given cache
    ///
    /// The thread reads the persisted blob before serving any request.
    pub fn spawn(cache: WaveformCache) -> Self {
        let (request_tx, request_rx) = std::sync::mpsc::channel::<StemLoadRequest>();
        let (result_tx, result_rx) = std::sync::mpsc::channel::<StemLoadResult>();

        let handle = thread::Builder::new()
            .name("stem-loader".to_string())
            .spawn(move || loader_thread(request_rx, result_tx, cache))
            .expect("failed to spawn stem loader thread");

        Self {
            tx: request_tx,
            rx: result_rx,
            _handle: handle,
        }
    }

    /// Queue a song load (non-blocking)
    pub fn request(&self, request: StemLoadRequest) -> Result<(), String> {
        self.tx
            .send(request)
            .map_err(|e| format!("loader thread disconnected: {}", e))
    }

    /// Try to receive a completed load result (non-blocking)
    pub fn try_recv(&self) -> Option<StemLoadResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                log::error!("stem loader thread disconnected unexpectedly");
                None
            }
        }
    }
}

fn loader_thread(
    rx: Receiver<StemLoadRequest>,
    tx: Sender<StemLoadResult>,
    mut cache: WaveformCache,
) {
    log::info!("stem loader thread started");
    cache.load_all();

    while let Ok(request) = rx.recv() {
        let result = load_song_stems(request, &mut cache);
        if tx.send(result).is_err() {
            break;
        }
    }

    log::info!("stem loader thread shutting down");
}

fn load_song_stems(request: StemLoadRequest, cache: &mut WaveformCache) -> StemLoadResult {
    let started = std::time::Instant::now();
    let song_id = request.song_id;

    // Snapshot cache hits up front; the parallel phase must not touch the
    // cache, puts happen sequentially afterwards
    let jobs: Vec<(StemKey, String, Option<WaveformEnvelope>)> = request
        .stems
        .into_iter()
        .map(|(key, url)| {
            let cached = cache.get(&url).cloned();
            (key, url, cached)
        })
        .collect();

    let stems: Vec<LoadedStem> = jobs
        .into_par_iter()
        .filter_map(|(key, url, cached)| match load_single_stem(key, url, cached) {
            Ok(stem) => Some(stem),
            Err(e) => {
                log::error!("stem load failed, continuing without it: {}", e);
                None
            }
        })
        .collect();

    for stem in stems.iter().filter(|s| !s.from_cache) {
        cache.put(&stem.url, stem.envelope.clone());
    }

    log::info!(
        "loaded {} stems for song {} in {:?} ({} from cache)",
        stems.len(),
        song_id,
        started.elapsed(),
        stems.iter().filter(|s| s.from_cache).count()
    );

    StemLoadResult {
        generation: request.generation,
        song_id,
        stems,
    }
}

fn load_single_stem(
    key: StemKey,
    url: String,
    cached: Option<WaveformEnvelope>,
) -> Result<LoadedStem, StemLoadError> {
    let bytes = fetch_stem_bytes(&url)?;
    let decoded = decode_first_channel(bytes, &url)?;

    let from_cache = cached.is_some();
    if from_cache {
        log::debug!("waveform cache hit for {}", url);
    }
    let envelope = cached.unwrap_or_else(|| analysis::envelope(&decoded.samples));

    // Onset is cheap and transient: recomputed even on cache hits
    let onset_ms = analysis::detect_onset(&decoded.samples, decoded.sample_rate);
    log::debug!("{}: first attack at {}ms", key, onset_ms);

    Ok(LoadedStem {
        key,
        url,
        duration_seconds: decoded.duration_seconds,
        sample_rate: decoded.sample_rate,
        envelope,
        onset_ms,
        from_cache,
    })
    // `decoded` is dropped here - the PCM buffer is never retained
}

/// Fetch the raw bytes of a stem
///
/// http(s) URLs go through ureq; anything else is treated as a local path
/// (with an optional `file://` prefix), which is what tests and the CLI use.
fn fetch_stem_bytes(url: &str) -> Result<Vec<u8>, StemLoadError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        let response = ureq::get(url).call().map_err(|e| StemLoadError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| StemLoadError::Fetch {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(bytes)
    } else {
        let path = url.strip_prefix("file://").unwrap_or(url);
        std::fs::read(path).map_err(|e| StemLoadError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

struct DecodedStem {
    /// Channel 0 only - enough for envelope and onset analysis
    samples: Vec<f32>,
    sample_rate: u32,
    duration_seconds: f64,
}

/// Decode stem bytes to PCM with Symphonia, keeping only the first channel
fn decode_first_channel(bytes: Vec<u8>, url: &str) -> Result<DecodedStem, StemLoadError> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let decode_err = |message: String| StemLoadError::Decode {
        url: url.to_string(),
        message,
    };

    let mss = MediaSourceStream::new(Box::new(std::io::Cursor::new(bytes)), Default::default());

    // Hint with the URL's extension when it has one
    let mut hint = Hint::new();
    if let Some(ext) = url_extension(url) {
        hint.with_extension(&ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| decode_err(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| decode_err("no audio track found".to_string()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| decode_err("unknown sample rate".to_string()))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(2)
        .max(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_err(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                log::warn!("error reading packet from {}: {}", url, e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("error decoding packet from {}: {}", url, e);
                continue;
            }
        };

        if sample_buf.is_none() {
            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;
            sample_buf = Some(SampleBuffer::new(capacity, spec));
        }

        if let Some(ref mut buf) = sample_buf {
            buf.copy_interleaved_ref(decoded);
            samples.extend(buf.samples().iter().step_by(channels));
        }
    }

    if samples.is_empty() {
        return Err(decode_err("no decodable audio data".to_string()));
    }

    let duration_seconds = samples.len() as f64 / f64::from(sample_rate);
    Ok(DecodedStem {
        samples,
        sample_rate,
        duration_seconds,
    })
}

/// Extension of the URL's path component, if any
fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
