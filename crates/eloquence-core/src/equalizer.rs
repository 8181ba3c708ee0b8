//! Multi-band parametric equalizer applied to synthesized speech.
//!
//! Every configured band becomes one peaking biquad (RBJ cookbook form). The
//! sections run one after another over the whole chunk and keep their history
//! between chunks, so the engine behaves as one continuous streaming filter.
//! A final gain stage keeps stacked boosts from clipping.

use crate::pcm;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lowest gain a band may apply
pub const MIN_GAIN_DB: f64 = -24.0;

/// Highest gain a band may apply
pub const MAX_GAIN_DB: f64 = 12.0;

/// Bands quieter than this are not worth a filter section
const NEUTRAL_GAIN_DB: f64 = 0.05;

const MIN_Q: f64 = 0.1;
const MAX_Q: f64 = 50.0;

/// Peak level the gain stage scales down to when filtered audio would clip
pub const HEADROOM_LIMIT: f64 = 32_760.0;

/// One band of the equalizer, in Hz and dB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqBandConfig {
    /// Lower edge of the band
    pub low_hz: f64,
    /// Upper edge of the band
    pub high_hz: f64,
    /// Boost (positive) or cut (negative)
    pub gain_db: f64,
}

impl EqBandConfig {
    /// Create a band without validation; see [`EqBandConfig::clamped`]
    #[must_use]
    pub const fn new(low_hz: f64, high_hz: f64, gain_db: f64) -> Self {
        Self {
            low_hz,
            high_hz,
            gain_db,
        }
    }

    /// Fit the band to a sample rate.
    ///
    /// Returns `None` for bands with a non-positive or non-finite edge, or
    /// bands that collapse once the upper edge is pulled under Nyquist.
    #[must_use]
    pub fn clamped(&self, sample_rate: u32) -> Option<Self> {
        let finite = self.low_hz.is_finite() && self.high_hz.is_finite() && self.gain_db.is_finite();
        if !finite || self.low_hz <= 0.0 || self.high_hz <= 0.0 {
            return None;
        }
        let nyquist = f64::from(sample_rate) / 2.0;
        let high_hz = self.high_hz.min(nyquist);
        let low_hz = self.low_hz.min(high_hz - 1.0);
        if low_hz <= 0.0 {
            return None;
        }
        Some(Self {
            low_hz,
            high_hz,
            gain_db: self.gain_db.clamp(MIN_GAIN_DB, MAX_GAIN_DB),
        })
    }

    /// Geometric centre of the band
    #[must_use]
    pub fn center_hz(&self) -> f64 {
        (self.low_hz * self.high_hz).sqrt()
    }

    /// Quality factor derived from the bandwidth, clamped to a stable range
    #[must_use]
    pub fn q(&self) -> f64 {
        let width = self.high_hz - self.low_hz;
        if width <= 0.0 {
            return MAX_Q;
        }
        (self.center_hz() / width).clamp(MIN_Q, MAX_Q)
    }

    fn is_neutral(&self) -> bool {
        self.gain_db.abs() < NEUTRAL_GAIN_DB
    }
}

/// Direct-form-II peaking section.
#[derive(Debug, Clone)]
struct PeakingBiquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl PeakingBiquad {
    fn design(band: &EqBandConfig, sample_rate: u32) -> Self {
        let amplitude = 10f64.powf(band.gain_db / 40.0);
        let omega = 2.0 * PI * band.center_hz() / f64::from(sample_rate);
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * band.q());

        let b0 = 1.0 + alpha * amplitude;
        let b1 = -2.0 * cos_omega;
        let b2 = 1.0 - alpha * amplitude;
        let a0 = 1.0 + alpha / amplitude;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha / amplitude;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    fn run(&mut self, buffer: &mut [f64]) {
        for sample in buffer.iter_mut() {
            let w = *sample - self.a1 * self.z1 - self.a2 * self.z2;
            *sample = self.b0 * w + self.b1 * self.z1 + self.b2 * self.z2;
            self.z2 = self.z1;
            self.z1 = w;
        }
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// Streaming parametric equalizer for mono i16 PCM.
#[derive(Debug, Clone)]
pub struct ParametricEq {
    sample_rate: u32,
    bands: Vec<EqBandConfig>,
    sections: Vec<PeakingBiquad>,
    boosting: usize,
}

impl ParametricEq {
    /// Build an equalizer for `sample_rate` from the configured bands
    #[must_use]
    pub fn new(sample_rate: u32, bands: Vec<EqBandConfig>) -> Self {
        let mut eq = Self {
            sample_rate: sample_rate.max(1),
            bands,
            sections: Vec::new(),
            boosting: 0,
        };
        eq.rebuild();
        eq
    }

    /// Rate the coefficients were derived for
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Bands as configured, before clamping
    #[must_use]
    pub fn bands(&self) -> &[EqBandConfig] {
        &self.bands
    }

    /// Number of filter sections actually running
    #[must_use]
    pub fn active_band_count(&self) -> usize {
        self.sections.len()
    }

    /// Whether any band changes the signal
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.sections.is_empty()
    }

    /// Re-derive coefficients for a new rate; filter history is discarded
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
        self.rebuild();
    }

    /// Replace the band list; filter history is discarded
    pub fn set_bands(&mut self, bands: Vec<EqBandConfig>) {
        self.bands = bands;
        self.rebuild();
    }

    fn rebuild(&mut self) {
        let usable: Vec<EqBandConfig> = self
            .bands
            .iter()
            .filter_map(|band| band.clamped(self.sample_rate))
            .filter(|band| !band.is_neutral())
            .collect();
        self.boosting = usable.iter().filter(|band| band.gain_db > 0.0).count();
        self.sections = usable
            .iter()
            .map(|band| PeakingBiquad::design(band, self.sample_rate))
            .collect();
        debug!(
            "Equalizer rebuilt at {} Hz: {} of {} bands active, {} boosting",
            self.sample_rate,
            self.sections.len(),
            self.bands.len(),
            self.boosting
        );
    }

    /// Filter one chunk of PCM and return the processed copy
    #[must_use]
    pub fn process(&mut self, pcm_bytes: &[u8]) -> Vec<u8> {
        if self.sections.is_empty() || pcm_bytes.len() < pcm::BYTES_PER_SAMPLE {
            return pcm_bytes.to_vec();
        }

        let mut buffer: Vec<f64> = pcm::decode(pcm_bytes).into_iter().map(f64::from).collect();
        for section in &mut self.sections {
            section.run(&mut buffer);
        }

        let peak = buffer.iter().fold(0.0_f64, |peak, sample| peak.max(sample.abs()));
        if !peak.is_finite() {
            warn!("Equalizer produced non-finite samples, resetting filter history");
            self.sections.iter_mut().for_each(PeakingBiquad::reset);
            return pcm_bytes.to_vec();
        }

        #[allow(clippy::cast_precision_loss)]
        let mut scale = 1.0 / (self.boosting.max(1) as f64).sqrt();
        if peak * scale > HEADROOM_LIMIT {
            scale = HEADROOM_LIMIT / peak;
        }

        let samples: Vec<i16> = buffer.iter().map(|sample| pcm::quantize(sample * scale)).collect();
        pcm::encode(&samples)
    }
}

/// Equalizer shared between the engine thread and configuration callers.
///
/// A single lock guards the instance: reconfiguration swaps in a freshly built
/// equalizer, and a chunk already inside [`SharedEqualizer::process`] finishes
/// with the one it started on.
#[derive(Debug, Clone)]
pub struct SharedEqualizer {
    inner: Arc<Mutex<ParametricEq>>,
}

impl SharedEqualizer {
    /// Wrap a new equalizer
    #[must_use]
    pub fn new(sample_rate: u32, bands: Vec<EqBandConfig>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ParametricEq::new(sample_rate, bands))),
        }
    }

    /// Equalizer with no bands, passing audio through untouched
    #[must_use]
    pub fn flat(sample_rate: u32) -> Self {
        Self::new(sample_rate, Vec::new())
    }

    /// Rebuild for a new sample rate if it changed
    pub fn set_sample_rate(&self, sample_rate: u32) {
        let mut guard = self.inner.lock();
        if guard.sample_rate() != sample_rate {
            let bands = guard.bands().to_vec();
            *guard = ParametricEq::new(sample_rate, bands);
        }
    }

    /// Replace the configured bands
    pub fn set_bands(&self, bands: Vec<EqBandConfig>) {
        let mut guard = self.inner.lock();
        let sample_rate = guard.sample_rate();
        *guard = ParametricEq::new(sample_rate, bands);
    }

    /// Filter one chunk
    #[must_use]
    pub fn process(&self, pcm_bytes: &[u8]) -> Vec<u8> {
        self.inner.lock().process(pcm_bytes)
    }

    /// Current sample rate
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.inner.lock().sample_rate()
    }

    /// Copy of the configured bands
    #[must_use]
    pub fn bands(&self) -> Vec<EqBandConfig> {
        self.inner.lock().bands().to_vec()
    }

    /// Whether any band is currently shaping the signal
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.lock().is_active()
    }
}
