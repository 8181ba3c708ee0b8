//! Streaming sample-rate conversion from the engine rate to the output rate.
//!
//! Conversion is done by `rubato` with linear interpolation over fixed input
//! blocks. Input that does not fill a block is held back until the next chunk,
//! so a stream split at arbitrary points converts exactly like the whole. The
//! end of an utterance drains the held-back tail and the interpolator delay.

use crate::equalizer::SharedEqualizer;
use crate::error::EloquenceResult;
use crate::pcm;
use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};
use tracing::debug;

/// Input frames handed to the interpolator per block
pub const STREAM_BLOCK_FRAMES: usize = 128;

/// Upper bound on drain calls at the end of an utterance
const MAX_DRAIN_ROUNDS: usize = 4;

/// Conversion state for one rate pair, carried from chunk to chunk.
pub struct ResamplerState {
    from_hz: u32,
    to_hz: u32,
    stream: FastFixedIn<f64>,
    pending: Vec<f64>,
    delay_left: usize,
    frames_in: u64,
    frames_out: u64,
}

impl ResamplerState {
    /// Fresh state for a rate pair
    ///
    /// # Errors
    ///
    /// Returns an audio processing error if `rubato` rejects the ratio
    pub fn for_rates(from_hz: u32, to_hz: u32) -> EloquenceResult<Self> {
        let ratio = f64::from(to_hz.max(1)) / f64::from(from_hz.max(1));
        let stream = FastFixedIn::<f64>::new(
            ratio,
            1.0,
            PolynomialDegree::Linear,
            STREAM_BLOCK_FRAMES,
            1,
        )?;
        let delay_left = stream.output_delay();
        Ok(Self {
            from_hz,
            to_hz,
            stream,
            pending: Vec::with_capacity(STREAM_BLOCK_FRAMES),
            delay_left,
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Whether this state was built for the given rate pair
    #[must_use]
    pub const fn matches(&self, from_hz: u32, to_hz: u32) -> bool {
        self.from_hz == from_hz && self.to_hz == to_hz
    }

    /// Input frames waiting for a full block
    #[must_use]
    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    fn push(&mut self, samples: &[i16], out: &mut Vec<f64>) -> EloquenceResult<()> {
        self.frames_in += samples.len() as u64;
        self.pending.extend(samples.iter().map(|s| f64::from(*s)));
        loop {
            let needed = self.stream.input_frames_next();
            if self.pending.len() < needed {
                return Ok(());
            }
            let block: Vec<f64> = self.pending.drain(..needed).collect();
            let produced = self.stream.process(&[block], None)?;
            self.emit(&produced[0], out);
        }
    }

    fn emit(&mut self, frames: &[f64], out: &mut Vec<f64>) {
        let skip = self.delay_left.min(frames.len());
        self.delay_left -= skip;
        out.extend_from_slice(&frames[skip..]);
        self.frames_out += (frames.len() - skip) as u64;
    }

    fn expected_frames(&self) -> u64 {
        let from = u64::from(self.from_hz.max(1));
        (self.frames_in * u64::from(self.to_hz) + from / 2) / from
    }

    /// Flush the held-back tail and the interpolator delay, trimming the
    /// result to the length the input calls for.
    fn drain(&mut self, out: &mut Vec<f64>) -> EloquenceResult<()> {
        let expected = self.expected_frames();
        let mut tail = std::mem::take(&mut self.pending);
        for _ in 0..MAX_DRAIN_ROUNDS {
            if self.frames_out >= expected {
                break;
            }
            let produced = if tail.is_empty() {
                self.stream.process_partial(None::<&[Vec<f64>]>, None)?
            } else {
                let block = [std::mem::take(&mut tail)];
                self.stream.process_partial(Some(&block[..]), None)?
            };
            self.emit(&produced[0], out);
        }
        #[allow(clippy::cast_possible_truncation)]
        let overshoot = self.frames_out.saturating_sub(expected) as usize;
        out.truncate(out.len().saturating_sub(overshoot));
        Ok(())
    }
}

impl std::fmt::Debug for ResamplerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResamplerState")
            .field("from_hz", &self.from_hz)
            .field("to_hz", &self.to_hz)
            .field("pending", &self.pending.len())
            .field("frames_in", &self.frames_in)
            .field("frames_out", &self.frames_out)
            .finish_non_exhaustive()
    }
}

/// Rate converter that always finishes with the shared equalizer.
#[derive(Debug)]
pub struct Resampler {
    equalizer: SharedEqualizer,
    state: Option<ResamplerState>,
}

impl Resampler {
    /// Create a resampler feeding into `equalizer`
    #[must_use]
    pub const fn new(equalizer: SharedEqualizer) -> Self {
        Self {
            equalizer,
            state: None,
        }
    }

    /// Equalizer applied after conversion
    #[must_use]
    pub const fn equalizer(&self) -> &SharedEqualizer {
        &self.equalizer
    }

    /// Input frames held back for the next block
    #[must_use]
    pub fn pending_frames(&self) -> usize {
        self.state.as_ref().map_or(0, ResamplerState::pending_frames)
    }

    /// Convert a chunk in the middle of a stream and equalize it.
    ///
    /// Equal rates skip conversion. A partial block stays queued until more
    /// input arrives or [`Resampler::finish`] is called.
    ///
    /// # Errors
    ///
    /// Returns an audio processing error if conversion fails
    pub fn convert(&mut self, pcm_bytes: &[u8], from_hz: u32, to_hz: u32) -> EloquenceResult<Vec<u8>> {
        self.run(pcm_bytes, from_hz, to_hz, false)
    }

    /// Convert the last chunk of a stream, draining everything held back.
    ///
    /// The next chunk starts a fresh stream.
    ///
    /// # Errors
    ///
    /// Returns an audio processing error if conversion fails
    pub fn finish(&mut self, pcm_bytes: &[u8], from_hz: u32, to_hz: u32) -> EloquenceResult<Vec<u8>> {
        let result = self.run(pcm_bytes, from_hz, to_hz, true);
        self.state = None;
        result
    }

    /// Discard the conversion state and anything held back
    pub fn reset(&mut self) {
        if let Some(state) = self.state.take() {
            if !state.pending.is_empty() {
                debug!("Discarding {} resampler frames", state.pending.len());
            }
        }
    }

    fn run(&mut self, pcm_bytes: &[u8], from_hz: u32, to_hz: u32, last: bool) -> EloquenceResult<Vec<u8>> {
        if from_hz == to_hz {
            self.reset();
            return Ok(self.equalizer.process(pcm_bytes));
        }

        if !self.state.as_ref().is_some_and(|s| s.matches(from_hz, to_hz)) {
            self.reset();
            self.state = Some(ResamplerState::for_rates(from_hz, to_hz)?);
        }
        let Some(state) = self.state.as_mut() else {
            return Ok(Vec::new());
        };

        let mut converted = Vec::new();
        state.push(&pcm::decode(pcm_bytes), &mut converted)?;
        if last {
            state.drain(&mut converted)?;
        }
        let samples: Vec<i16> = converted.into_iter().map(pcm::quantize).collect();
        Ok(self.equalizer.process(&pcm::encode(&samples)))
    }
}
