//! Multi-band equalizer pipeline
//!
//! Two fixed stage banks over the summed output: a 3-band "basic" EQ
//! (bass/mid/treble) and a 5-band "pro" EQ, each followed by a master gain
//! tail. Only one bank is active at a time and activating one zeroes the
//! other's gains, so the two modes never sum. Bypass flattens every stage to
//! 0dB without removing it from the chain, which keeps the signal path stable
//! (no clicks from stages appearing or disappearing mid-stream).

use crate::types::{StereoBuffer, SAMPLE_RATE};

/// Stage gain range in dB (knobs clamp to +/- this)
pub const EQ_GAIN_RANGE_DB: f32 = 12.0;

/// Gain forced on the bass stage while "cut bass" is engaged
pub const BASS_CUT_DB: f32 = -12.0;

/// Q for peaking stages
const EQ_Q: f32 = 1.0;

/// Basic mode band centers: bass shelf, mid peak, treble shelf
pub const BASIC_BAND_HZ: [f32; 3] = [200.0, 1000.0, 3000.0];

/// Pro mode band centers; the outermost bands are shelves
pub const PRO_BAND_HZ: [f32; 5] = [60.0, 250.0, 1000.0, 2000.0, 8000.0];

/// Gain changes smaller than this (dB) collapse to a passthrough stage
const FLAT_EPSILON_DB: f32 = 0.1;

/// Which stage bank is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EqMode {
    #[default]
    Basic,
    Pro,
}

/// Callback invoked on basic-mode gain changes: (bass, mid, treble) in dB.
/// Pro-mode changes are not surfaced through this.
pub type BasicChangeFn = Box<dyn Fn(f32, f32, f32) + Send>;

/// Biquad filter coefficients (RBJ cookbook, normalized by a0)
#[derive(Debug, Clone)]
struct BiquadCoeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl BiquadCoeffs {
    /// Unity gain, no filtering
    fn passthrough() -> Self {
        Self { b0: 1.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0 }
    }

    /// Shared shelf intermediates: (A, cos_w0, alpha) with shelf slope S = 1
    fn shelf_terms(freq: f32, gain_db: f32, sample_rate: f32) -> (f32, f32, f32) {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let alpha = w0.sin() / 2.0 * std::f32::consts::SQRT_2;
        (a, w0.cos(), alpha)
    }

    /// Low shelf boosting/attenuating below `freq`
    fn low_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let (a, cos_w0, alpha) = Self::shelf_terms(freq, gain_db, sample_rate);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha;
        Self {
            b0: (a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha)) / a0,
            b1: (2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha)) / a0,
            a1: (-2.0 * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha) / a0,
        }
    }

    /// High shelf boosting/attenuating above `freq`
    fn high_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let (a, cos_w0, alpha) = Self::shelf_terms(freq, gain_db, sample_rate);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha;
        Self {
            b0: (a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha)) / a0,
            b1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha)) / a0,
            a1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha) / a0,
        }
    }

    /// Peaking EQ centered on `freq`
    fn peaking(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }
}

/// Biquad state (direct form I, per channel)
#[derive(Debug, Clone, Default)]
struct BiquadState {
    x1_l: f32, x2_l: f32, y1_l: f32, y2_l: f32,
    x1_r: f32, x2_r: f32, y1_r: f32, y2_r: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input_l: f32, input_r: f32, c: &BiquadCoeffs) -> (f32, f32) {
        let out_l = c.b0 * input_l + c.b1 * self.x1_l + c.b2 * self.x2_l
            - c.a1 * self.y1_l - c.a2 * self.y2_l;
        self.x2_l = self.x1_l;
        self.x1_l = input_l;
        self.y2_l = self.y1_l;
        self.y1_l = out_l;

        let out_r = c.b0 * input_r + c.b1 * self.x1_r + c.b2 * self.x2_r
            - c.a1 * self.y1_r - c.a2 * self.y2_r;
        self.x2_r = self.x1_r;
        self.x1_r = input_r;
        self.y2_r = self.y1_r;
        self.y1_r = out_r;

        (out_l, out_r)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Filter shape of one EQ stage
#[derive(Debug, Clone, Copy)]
enum StageShape {
    LowShelf,
    Peaking,
    HighShelf,
}

/// One gain stage in a bank: fixed center and shape, variable gain
struct EqStage {
    freq: f32,
    shape: StageShape,
    coeffs: BiquadCoeffs,
    state: BiquadState,
}

impl EqStage {
    fn new(freq: f32, shape: StageShape) -> Self {
        Self {
            freq,
            shape,
            coeffs: BiquadCoeffs::passthrough(),
            state: BiquadState::default(),
        }
    }

    fn update_gain(&mut self, gain_db: f32, sample_rate: f32) {
        self.coeffs = if gain_db.abs() < FLAT_EPSILON_DB {
            BiquadCoeffs::passthrough()
        } else {
            match self.shape {
                StageShape::LowShelf => BiquadCoeffs::low_shelf(self.freq, gain_db, sample_rate),
                StageShape::Peaking => BiquadCoeffs::peaking(self.freq, gain_db, EQ_Q, sample_rate),
                StageShape::HighShelf => BiquadCoeffs::high_shelf(self.freq, gain_db, sample_rate),
            }
        };
    }
}

fn build_bank(freqs: &[f32]) -> Vec<EqStage> {
    let last = freqs.len() - 1;
    freqs
        .iter()
        .enumerate()
        .map(|(i, &freq)| {
            let shape = if i == 0 {
                StageShape::LowShelf
            } else if i == last {
                StageShape::HighShelf
            } else {
                StageShape::Peaking
            };
            EqStage::new(freq, shape)
        })
        .collect()
}

/// The EQ pipeline applied to the summed output
///
/// Both stage banks are built once and live for the whole session; switching
/// modes only changes which bank processes and zeroes the other's gains.
pub struct EqPipeline {
    mode: EqMode,
    basic_gains: [f32; 3],
    pro_gains: [f32; 5],
    basic_stages: Vec<EqStage>,
    pro_stages: Vec<EqStage>,
    /// Master gain tail (linear, after the stages)
    master_gain: f32,
    bypass: bool,
    cut_bass: bool,
    sample_rate: f32,
    coeffs_dirty: bool,
    on_basic_change: Option<BasicChangeFn>,
}

impl EqPipeline {
    /// Build the pipeline with both banks at 0dB, basic mode active
    pub fn new(sample_rate: u32) -> Self {
        Self {
            mode: EqMode::Basic,
            basic_gains: [0.0; 3],
            pro_gains: [0.0; 5],
            basic_stages: build_bank(&BASIC_BAND_HZ),
            pro_stages: build_bank(&PRO_BAND_HZ),
            master_gain: 1.0,
            bypass: false,
            cut_bass: false,
            sample_rate: sample_rate as f32,
            coeffs_dirty: true,
            on_basic_change: None,
        }
    }

    /// Active mode
    pub fn mode(&self) -> EqMode {
        self.mode
    }

    /// Switch the active bank; the deactivated bank's gains reset to 0dB so
    /// its contribution never lingers under the new mode
    pub fn set_mode(&mut self, mode: EqMode) {
        if self.mode == mode {
            return;
        }
        match self.mode {
            EqMode::Basic => self.basic_gains = [0.0; 3],
            EqMode::Pro => self.pro_gains = [0.0; 5],
        }
        self.mode = mode;
        self.coeffs_dirty = true;
        log::debug!("eq mode switched to {:?}", mode);
    }

    /// Set the active mode's stage gains in dB (clamped to +/-12)
    ///
    /// `gains` must carry one value per band of the active mode; extra values
    /// are ignored and missing values leave their band untouched.
    pub fn set_gains(&mut self, gains: &[f32]) {
        match self.mode {
            EqMode::Basic => {
                let mut next = self.basic_gains;
                for (slot, &db) in next.iter_mut().zip(gains) {
                    *slot = clamp_db(db);
                }
                self.basic_gains = next;
                self.coeffs_dirty = true;
                self.fire_basic_change();
            }
            EqMode::Pro => {
                for (slot, &db) in self.pro_gains.iter_mut().zip(gains) {
                    *slot = clamp_db(db);
                }
                self.coeffs_dirty = true;
            }
        }
    }

    /// Set the basic bass/mid/treble gains in dB (clamped to +/-12)
    pub fn set_basic_gains(&mut self, bass_db: f32, mid_db: f32, treble_db: f32) {
        self.basic_gains = [clamp_db(bass_db), clamp_db(mid_db), clamp_db(treble_db)];
        self.coeffs_dirty = true;
        self.fire_basic_change();
    }

    pub fn basic_gains(&self) -> [f32; 3] {
        self.basic_gains
    }

    pub fn pro_gains(&self) -> [f32; 5] {
        self.pro_gains
    }

    /// Flatten every stage to 0dB without removing it from the chain
    pub fn set_bypass(&mut self, bypass: bool) {
        if self.bypass != bypass {
            self.bypass = bypass;
            self.coeffs_dirty = true;
        }
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    /// Force the active mode's bass stage to -12dB, independent of its knob.
    /// The knob value is preserved and restored on release.
    pub fn set_cut_bass(&mut self, cut: bool) {
        if self.cut_bass != cut {
            self.cut_bass = cut;
            self.coeffs_dirty = true;
        }
    }

    pub fn is_bass_cut(&self) -> bool {
        self.cut_bass
    }

    /// Set the master gain tail (linear, clamped to [0, 1])
    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain.clamp(0.0, 1.0);
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    /// Register the basic-mode change callback (fires with bass/mid/treble dB
    /// on every basic gain change; pro changes are not surfaced)
    pub fn set_on_basic_change(&mut self, callback: BasicChangeFn) {
        self.on_basic_change = Some(callback);
    }

    fn fire_basic_change(&self) {
        if let Some(callback) = &self.on_basic_change {
            let [bass, mid, treble] = self.basic_gains;
            callback(bass, mid, treble);
        }
    }

    /// Effective gain for stage `index` of the active mode, after bypass and
    /// bass-cut overrides
    fn effective_gain(&self, index: usize) -> f32 {
        if self.bypass {
            return 0.0;
        }
        if self.cut_bass && index == 0 {
            return BASS_CUT_DB;
        }
        match self.mode {
            EqMode::Basic => self.basic_gains[index],
            EqMode::Pro => self.pro_gains[index],
        }
    }

    fn update_coeffs(&mut self) {
        if !self.coeffs_dirty {
            return;
        }
        let sample_rate = self.sample_rate;
        let gains: Vec<f32> = (0..self.active_len()).map(|i| self.effective_gain(i)).collect();
        let stages = match self.mode {
            EqMode::Basic => &mut self.basic_stages,
            EqMode::Pro => &mut self.pro_stages,
        };
        for (stage, db) in stages.iter_mut().zip(gains) {
            stage.update_gain(db, sample_rate);
        }
        self.coeffs_dirty = false;
    }

    fn active_len(&self) -> usize {
        match self.mode {
            EqMode::Basic => self.basic_stages.len(),
            EqMode::Pro => self.pro_stages.len(),
        }
    }

    /// Run the summed signal through the active stage bank and master gain
    pub fn process(&mut self, buffer: &mut StereoBuffer) {
        self.update_coeffs();

        let stages = match self.mode {
            EqMode::Basic => &mut self.basic_stages,
            EqMode::Pro => &mut self.pro_stages,
        };

        for sample in buffer.iter_mut() {
            let mut left = sample.left;
            let mut right = sample.right;
            for stage in stages.iter_mut() {
                (left, right) = stage.state.process(left, right, &stage.coeffs);
            }
            sample.left = left * self.master_gain;
            sample.right = right * self.master_gain;
        }
    }

    /// Clear all filter states (call on transport stop/seek to avoid tails)
    pub fn reset(&mut self) {
        for stage in self.basic_stages.iter_mut().chain(self.pro_stages.iter_mut()) {
            stage.state.reset();
        }
    }
}

impl Default for EqPipeline {
    fn default() -> Self {
        Self::new(SAMPLE_RATE)
    }
}

fn clamp_db(db: f32) -> f32 {
    db.clamp(-EQ_GAIN_RANGE_DB, EQ_GAIN_RANGE_DB)
}
