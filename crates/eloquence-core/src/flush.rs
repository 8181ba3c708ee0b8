//! Native callback entry point and the accumulator that decides when audio
//! reaches the device.

use crate::audio_sink::CompletionCallback;
use crate::engine::{CallbackKind, CallbackReturn, END_OF_UTTERANCE_INDEX};
use crate::engine_thread::EngineMessage;
use crate::pcm::{BYTES_PER_SAMPLE, SILENT_SENTINEL};
use crate::resampler::Resampler;
use crate::sample_rate::SampleRateState;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Receives the index of each marker once its audio has played; `None` means
/// the utterance finished
pub type IndexCallback = Arc<dyn Fn(Option<u32>) + Send + Sync>;

/// What the native engine reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeEvent {
    /// Rendered PCM, copied out of the engine's buffer
    Audio(Vec<u8>),
    /// An index marker (or the end-of-utterance value) was reached
    Index(u32),
}

/// Handle given to the native engine through
/// [`crate::SynthesisEngine::register_callback`].
///
/// Calls are turned into messages on the engine thread's own queue, so they
/// are handled in order with everything else the thread does. Each message
/// carries the silence epoch it was posted in; the engine thread drops
/// messages from before its latest silence.
#[derive(Clone)]
pub struct NativeCallback {
    sender: Sender<EngineMessage>,
    speaking: Arc<AtomicBool>,
    epoch: Arc<AtomicU64>,
}

impl NativeCallback {
    pub(crate) const fn new(
        sender: Sender<EngineMessage>,
        speaking: Arc<AtomicBool>,
        epoch: Arc<AtomicU64>,
    ) -> Self {
        Self {
            sender,
            speaking,
            epoch,
        }
    }

    /// Whether synthesis output is currently wanted
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    /// Raw entry point: `lparam` is the sample count for waveform messages
    /// and the marker value for index messages. `output_buffer` is the
    /// engine's render buffer.
    #[must_use]
    pub fn dispatch(&self, kind: u32, lparam: u32, output_buffer: &[u8]) -> CallbackReturn {
        match CallbackKind::from_raw(kind) {
            Some(CallbackKind::Waveform) => {
                let len = (lparam as usize * BYTES_PER_SAMPLE).min(output_buffer.len());
                self.audio(&output_buffer[..len])
            }
            Some(CallbackKind::IndexReply) => self.index(lparam),
            Some(CallbackKind::Phoneme) | None => self.acknowledge(),
        }
    }

    /// Rendered audio is available
    #[must_use]
    pub fn audio(&self, pcm: &[u8]) -> CallbackReturn {
        self.post(NativeEvent::Audio(pcm.to_vec()))
    }

    /// An index marker was reached
    #[must_use]
    pub fn index(&self, value: u32) -> CallbackReturn {
        self.post(NativeEvent::Index(value))
    }

    fn acknowledge(&self) -> CallbackReturn {
        if self.is_speaking() {
            CallbackReturn::DataProcessed
        } else {
            CallbackReturn::DataAbort
        }
    }

    fn post(&self, event: NativeEvent) -> CallbackReturn {
        if !self.is_speaking() {
            return CallbackReturn::DataAbort;
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        match self.sender.send(EngineMessage::Callback { epoch, event }) {
            Ok(()) => CallbackReturn::DataProcessed,
            Err(_) => CallbackReturn::DataAbort,
        }
    }
}

impl std::fmt::Debug for NativeCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeCallback")
            .field("speaking", &self.is_speaking())
            .field("epoch", &self.epoch.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// A position in the text whose completion is reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexMarker {
    /// Raw value from the engine
    pub value: u32,
    /// Whether this is the end-of-utterance marker
    pub is_end_of_utterance: bool,
}

impl IndexMarker {
    /// Classify a raw value
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self {
            value,
            is_end_of_utterance: value == END_OF_UTTERANCE_INDEX,
        }
    }

    /// Value handed to the host: `None` for end of utterance
    #[must_use]
    pub const fn reported(&self) -> Option<u32> {
        if self.is_end_of_utterance {
            None
        } else {
            Some(self.value)
        }
    }
}

/// Where flushed chunks go; the feed worker in production.
pub trait FlushTarget {
    /// Queue a processed chunk
    fn play(&mut self, pcm: Vec<u8>, marker: Option<IndexMarker>, on_done: Option<CompletionCallback>);

    /// Queue an idle request behind the chunks already queued
    fn idle(&mut self);

    /// Discard everything queued and stop output
    fn cancel(&mut self);
}

/// Accumulates engine audio and flushes it through the resampler.
pub struct FlushController<T: FlushTarget> {
    target: T,
    resampler: Resampler,
    rates: SampleRateState,
    accumulated: Vec<u8>,
    threshold: usize,
    on_index: Option<IndexCallback>,
}

impl<T: FlushTarget> FlushController<T> {
    /// Create a controller flushing at `threshold` bytes
    pub fn new(
        target: T,
        resampler: Resampler,
        rates: SampleRateState,
        threshold: usize,
        on_index: Option<IndexCallback>,
    ) -> Self {
        Self {
            target,
            resampler,
            rates,
            accumulated: Vec::with_capacity(threshold),
            threshold: threshold.max(BYTES_PER_SAMPLE),
            on_index,
        }
    }

    /// Append engine audio, flushing once the threshold is reached
    pub fn on_audio(&mut self, pcm: &[u8]) {
        self.accumulated.extend_from_slice(pcm);
        if self.accumulated.len() >= self.threshold {
            self.flush(None);
        }
    }

    /// Flush with the marker attached; end of utterance also queues an idle
    pub fn on_index(&mut self, value: u32) {
        let marker = IndexMarker::new(value);
        self.flush(Some(marker));
        if marker.is_end_of_utterance {
            self.target.idle();
        }
    }

    /// Hand everything accumulated to the target.
    ///
    /// The end-of-utterance marker also drains the resampler. A flush that
    /// produces no audio sends one silent sample so the marker's completion
    /// still fires in order.
    pub fn flush(&mut self, marker: Option<IndexMarker>) {
        let chunk = std::mem::take(&mut self.accumulated);
        let (from_hz, to_hz) = (self.rates.engine_hz, self.rates.output_hz());
        let converted = if marker.is_some_and(|m| m.is_end_of_utterance) {
            self.resampler.finish(&chunk, from_hz, to_hz)
        } else {
            self.resampler.convert(&chunk, from_hz, to_hz)
        };
        let mut pcm = converted.unwrap_or_else(|e| {
            warn!("Dropping {} bytes of engine audio: {}", chunk.len(), e);
            Vec::new()
        });
        if pcm.is_empty() {
            pcm = SILENT_SENTINEL.to_vec();
        }

        let on_done = match (marker, &self.on_index) {
            (Some(marker), Some(callback)) => {
                let callback = Arc::clone(callback);
                let reported = marker.reported();
                Some(Arc::new(move || callback(reported)) as CompletionCallback)
            }
            _ => None,
        };
        trace!("Flushing {} bytes with marker {:?}", pcm.len(), marker);
        self.target.play(pcm, marker, on_done);
    }

    /// Drop accumulated audio and the resampler's held-back frames
    pub fn clear(&mut self) {
        if !self.accumulated.is_empty() {
            debug!("Discarding {} accumulated bytes", self.accumulated.len());
        }
        self.accumulated.clear();
        self.resampler.reset();
    }

    /// Bytes waiting for the next flush
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.accumulated.len()
    }

    /// Rates currently in effect
    #[must_use]
    pub const fn rates(&self) -> &SampleRateState {
        &self.rates
    }

    /// Switch to new rates; conversion state restarts only if the pair changed
    pub fn set_rates(&mut self, rates: SampleRateState) {
        if self.rates.conversion_differs(&rates) {
            self.resampler.reset();
        }
        self.rates = rates;
    }

    /// The resampler between engine and output rate
    #[must_use]
    pub const fn resampler(&self) -> &Resampler {
        &self.resampler
    }

    /// Flush destination
    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }
}
