//! Common types for Strata
//!
//! Fundamental types shared across the engine: sample/buffer types for DSP,
//! stem identifiers, the song model, and the fixed-width waveform envelope.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Default sample rate assumed for EQ processing when the host doesn't say
/// otherwise (44.1kHz - what consumer stem files are encoded at)
pub const SAMPLE_RATE: u32 = 44_100;

/// Number of columns in a waveform envelope (one per display pixel)
pub const ENVELOPE_LEN: usize = 800;

/// Audio sample type (32-bit float for processing)
pub type Sample = f32;

/// A color token as stored in the remote song metadata (opaque to the engine)
pub type ColorToken = String;

/// Stem identifiers
///
/// The set of stems is open-ended: the separation backend may emit keys the
/// engine has never seen. Known keys get dedicated variants; anything else
/// round-trips through [`StemKey::Custom`] and receives default treatment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StemKey {
    Vocals,
    Instrumental,
    Drums,
    Bass,
    Piano,
    Other,
    Custom(String),
}

impl StemKey {
    /// Parse a stem key from its wire name
    pub fn parse(name: &str) -> Self {
        match name {
            "vocals" => StemKey::Vocals,
            "instrumental" => StemKey::Instrumental,
            "drums" => StemKey::Drums,
            "bass" => StemKey::Bass,
            "piano" => StemKey::Piano,
            "other" => StemKey::Other,
            _ => StemKey::Custom(name.to_string()),
        }
    }

    /// Get the wire name of this stem
    pub fn name(&self) -> &str {
        match self {
            StemKey::Vocals => "vocals",
            StemKey::Instrumental => "instrumental",
            StemKey::Drums => "drums",
            StemKey::Bass => "bass",
            StemKey::Piano => "piano",
            StemKey::Other => "other",
            StemKey::Custom(name) => name,
        }
    }

    /// Default display color token for this stem, used until the song's
    /// stored colors override it. Unknown stems all get the same neutral.
    pub fn default_color(&self) -> &'static str {
        match self {
            StemKey::Vocals => "bg-cyan-500",
            StemKey::Instrumental => "bg-purple-500",
            StemKey::Drums => "bg-red-500",
            StemKey::Bass => "bg-yellow-500",
            StemKey::Piano => "bg-blue-500",
            StemKey::Other => "bg-green-500",
            StemKey::Custom(_) => "bg-gray-500",
        }
    }
}

impl From<String> for StemKey {
    fn from(name: String) -> Self {
        StemKey::parse(&name)
    }
}

impl From<StemKey> for String {
    fn from(key: StemKey) -> Self {
        key.name().to_string()
    }
}

impl fmt::Display for StemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A song as stored in the remote metadata store
///
/// Read-only from the engine's point of view, except `track_colors`, which
/// the engine writes back through the store when the user recolors a stem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artist: String,
    /// Stem URLs keyed by stem; a missing key means that stem was never
    /// produced for this song
    #[serde(default)]
    pub stems: BTreeMap<StemKey, String>,
    #[serde(default)]
    pub bpm: Option<f64>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub time_signature: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub track_colors: BTreeMap<StemKey, ColorToken>,
}

/// A fixed-width amplitude envelope for waveform display
///
/// Always exactly [`ENVELOPE_LEN`] values in `[0, 1]`, one per pixel column,
/// regardless of the source duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformEnvelope(Vec<f32>);

impl WaveformEnvelope {
    /// Wrap a point vector, returning `None` unless it holds exactly
    /// [`ENVELOPE_LEN`] finite values (used when validating cache entries)
    pub fn from_points(points: Vec<f32>) -> Option<Self> {
        if points.len() == ENVELOPE_LEN && points.iter().all(|v| v.is_finite()) {
            Some(Self(points))
        } else {
            None
        }
    }

    /// Wrap a point vector the analyzer produced; panics on length mismatch,
    /// which would be an analyzer bug rather than bad input
    pub(crate) fn from_analysis(points: Vec<f32>) -> Self {
        assert_eq!(points.len(), ENVELOPE_LEN, "envelope must be {} points", ENVELOPE_LEN);
        Self(points)
    }

    #[inline]
    pub fn points(&self) -> &[f32] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_points(self) -> Vec<f32> {
        self.0
    }
}

/// A single stereo sample (left and right channels)
///
/// `#[repr(C)]` guarantees [left, right] layout so a `&[StereoSample]` can be
/// reinterpreted as interleaved `&[f32]` with bytemuck when a host needs it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Mono sample (same value in both channels)
    #[inline]
    pub fn mono(value: Sample) -> Self {
        Self { left: value, right: value }
    }

    /// Peak amplitude (max of abs(left), abs(right))
    #[inline]
    pub fn peak(&self) -> Sample {
        self.left.abs().max(self.right.abs())
    }
}

impl std::ops::Mul<Sample> for StereoSample {
    type Output = Self;

    #[inline]
    fn mul(self, factor: Sample) -> Self {
        Self {
            left: self.left * factor,
            right: self.right * factor,
        }
    }
}

impl std::ops::MulAssign<Sample> for StereoSample {
    #[inline]
    fn mul_assign(&mut self, factor: Sample) {
        self.left *= factor;
        self.right *= factor;
    }
}

/// A buffer of stereo samples, the unit the EQ pipeline processes
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    samples: Vec<StereoSample>,
}

impl StereoBuffer {
    /// Create a buffer filled with silence
    pub fn silence(len: usize) -> Self {
        Self {
            samples: vec![StereoSample::silence(); len],
        }
    }

    /// Create a buffer from interleaved samples [L, R, L, R, ...]
    pub fn from_interleaved(interleaved: &[Sample]) -> Self {
        assert!(interleaved.len() % 2 == 0, "interleaved buffer must have even length");
        let samples = interleaved
            .chunks_exact(2)
            .map(|pair| StereoSample::new(pair[0], pair[1]))
            .collect();
        Self { samples }
    }

    /// Create a buffer by duplicating mono samples into both channels
    pub fn from_mono(mono: &[Sample]) -> Self {
        Self {
            samples: mono.iter().map(|&v| StereoSample::mono(v)).collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[StereoSample] {
        &self.samples
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [StereoSample] {
        &mut self.samples
    }

    /// Zero-copy view of samples as interleaved f32 [L, R, L, R, ...]
    #[inline]
    pub fn as_interleaved(&self) -> &[Sample] {
        bytemuck::cast_slice(&self.samples)
    }

    /// Scale all samples by a factor
    pub fn scale(&mut self, factor: Sample) {
        for sample in &mut self.samples {
            *sample *= factor;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &StereoSample> {
        self.samples.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut StereoSample> {
        self.samples.iter_mut()
    }

    /// Peak amplitude in the buffer
    pub fn peak(&self) -> Sample {
        self.samples.iter().map(|s| s.peak()).fold(0.0, Sample::max)
    }

    /// RMS over both channels
    pub fn rms(&self) -> Sample {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .samples
            .iter()
            .map(|s| s.left * s.left + s.right * s.right)
            .sum();
        (sum / (self.samples.len() as f32 * 2.0)).sqrt()
    }
}
