//! Sample-rate bookkeeping between the engine, the resampler and the device.
//!
//! The native engine renders at one of a handful of fixed rates selected by a
//! small integer code. Callers ask for any rate in [`MIN_SAMPLE_RATE`,
//! `MAX_SAMPLE_RATE`]; the engine is switched to the nearest supported rate and
//! the resampler covers the difference to the output rate.

use crate::error::{EloquenceError, EloquenceResult};

/// Lowest sample rate accepted from configuration
pub const MIN_SAMPLE_RATE: u32 = 8_000;

/// Highest sample rate accepted from configuration
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Sample rate used when nothing else is configured
pub const DEFAULT_SAMPLE_RATE: u32 = 22_050;

/// Rates the native engine can render at, indexed by their engine code
const ENGINE_RATES: [(i32, u32); 3] = [(0, 8_000), (1, 11_025), (2, 22_050)];

/// A sample-rate code understood by the native engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineSampleCode(i32);

impl EngineSampleCode {
    /// Code for 8 kHz rendering
    pub const HZ_8000: Self = Self(0);
    /// Code for 11.025 kHz rendering
    pub const HZ_11025: Self = Self(1);
    /// Code for 22.05 kHz rendering
    pub const HZ_22050: Self = Self(2);

    /// Raw code value passed to the engine
    #[must_use]
    pub const fn code(self) -> i32 {
        self.0
    }

    /// Rendering rate selected by this code
    #[must_use]
    pub fn hz(self) -> u32 {
        ENGINE_RATES
            .iter()
            .find(|(code, _)| *code == self.0)
            .map_or(DEFAULT_SAMPLE_RATE, |(_, hz)| *hz)
    }

    /// All codes the engine supports, lowest rate first
    #[must_use]
    pub fn all() -> impl Iterator<Item = Self> {
        ENGINE_RATES.iter().map(|(code, _)| Self(*code))
    }
}

impl TryFrom<i32> for EngineSampleCode {
    type Error = EloquenceError;

    fn try_from(code: i32) -> EloquenceResult<Self> {
        if ENGINE_RATES.iter().any(|(known, _)| *known == code) {
            Ok(Self(code))
        } else {
            Err(EloquenceError::invalid_sample_rate_code(code))
        }
    }
}

impl std::fmt::Display for EngineSampleCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} Hz)", self.0, self.hz())
    }
}

/// Clamp a requested rate into the supported configuration range
#[must_use]
pub fn clamp_sample_rate(hz: u32) -> u32 {
    hz.clamp(MIN_SAMPLE_RATE, MAX_SAMPLE_RATE)
}

/// Pick the engine code whose rate is nearest to `target_hz` after clamping.
///
/// Ties resolve to the lower rate.
#[must_use]
pub fn choose_engine_sample_code(target_hz: u32) -> EngineSampleCode {
    let target = clamp_sample_rate(target_hz);
    EngineSampleCode::all()
        .min_by_key(|code| code.hz().abs_diff(target))
        .unwrap_or(EngineSampleCode::HZ_22050)
}

/// Everything the pipeline knows about the current rates.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRateState {
    /// Rate requested by configuration, already clamped
    pub requested_hz: u32,
    /// Native mix rate of the output device, if it could be queried
    pub device_hz: Option<u32>,
    /// Engine code nearest to `requested_hz`
    pub engine_code: EngineSampleCode,
    /// Rate the engine renders at
    pub engine_hz: u32,
}

impl SampleRateState {
    /// Build the state for a requested rate and an optional device rate
    #[must_use]
    pub fn new(requested_hz: u32, device_hz: Option<u32>) -> Self {
        let requested_hz = clamp_sample_rate(requested_hz);
        let engine_code = choose_engine_sample_code(requested_hz);
        Self {
            requested_hz,
            device_hz,
            engine_code,
            engine_hz: engine_code.hz(),
        }
    }

    /// Rate the device is fed at: its mix rate when known, otherwise the request
    #[must_use]
    pub fn output_hz(&self) -> u32 {
        self.device_hz.unwrap_or(self.requested_hz)
    }

    /// Apply a new requested rate.
    ///
    /// Returns `true` if the engine code changed.
    pub fn set_requested(&mut self, hz: u32) -> bool {
        let requested = clamp_sample_rate(hz);
        let code = choose_engine_sample_code(requested);
        let code_changed = code != self.engine_code;
        if requested != self.requested_hz || code_changed {
            self.requested_hz = requested;
            self.engine_code = code;
            self.engine_hz = code.hz();
        }
        code_changed
    }

    /// Force a specific engine code, keeping the request untouched
    pub fn set_engine_code(&mut self, code: EngineSampleCode) {
        if code != self.engine_code {
            self.engine_code = code;
            self.engine_hz = code.hz();
        }
    }

    /// Whether audio would be converted differently under `other`
    #[must_use]
    pub fn conversion_differs(&self, other: &Self) -> bool {
        self.engine_code != other.engine_code || self.output_hz() != other.output_hz()
    }

    /// Record a freshly negotiated device rate.
    ///
    /// A failed query (`None`) keeps the last known device rate.
    pub fn set_device(&mut self, device_hz: Option<u32>) {
        if let Some(hz) = device_hz {
            self.device_hz = Some(hz);
        }
    }
}

impl Default for SampleRateState {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, None)
    }
}
