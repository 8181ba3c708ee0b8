//! The audio pipeline as the host sees it.
//!
//! [`AudioPipeline`] owns the two worker threads and the shared equalizer.
//! Everything the host can do (speak, stop, tune the voice, change rates or
//! devices) goes through it; there is no global state.

use crate::audio_feed::{AudioFeedHandle, AudioFeedWorker, Clock, SystemClock};
use crate::audio_sink::AudioOutput;
use crate::config::{OutputDevice, PipelineConfig};
use crate::device::SampleRateNegotiator;
use crate::engine::{EngineFactory, EngineParam, VoiceParam};
use crate::engine_thread::{
    EngineStartup, EngineState, EngineThread, ParameterTable, SpeechCommand,
};
use crate::equalizer::{EqBandConfig, SharedEqualizer};
use crate::error::{EloquenceError, EloquenceResult};
use crate::flush::{FlushController, IndexCallback};
use crate::resampler::Resampler;
use crate::sample_rate::{EngineSampleCode, SampleRateState};
use crate::voice_resources::{language_by_code, resolve_voice, Language, VoiceResources};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Collects what [`AudioPipeline::initialize`] needs.
pub struct PipelineBuilder {
    config: PipelineConfig,
    factory: Option<Box<dyn EngineFactory>>,
    output: Option<Box<dyn AudioOutput>>,
    negotiator: SampleRateNegotiator,
    on_index: Option<IndexCallback>,
    clock: Arc<dyn Clock>,
}

impl PipelineBuilder {
    /// Start from a configuration
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            factory: None,
            output: None,
            negotiator: SampleRateNegotiator::system(),
            on_index: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Native engine factory (required)
    #[must_use]
    pub fn with_engine<F: EngineFactory + 'static>(mut self, factory: F) -> Self {
        self.factory = Some(Box::new(factory));
        self
    }

    /// Audio output (required)
    #[must_use]
    pub fn with_output<O: AudioOutput + 'static>(mut self, output: O) -> Self {
        self.output = Some(Box::new(output));
        self
    }

    /// Device rate negotiator; defaults to the platform's
    #[must_use]
    pub fn with_negotiator(mut self, negotiator: SampleRateNegotiator) -> Self {
        self.negotiator = negotiator;
        self
    }

    /// Receives index completions
    #[must_use]
    pub fn with_index_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Option<u32>) + Send + Sync + 'static,
    {
        self.on_index = Some(Arc::new(callback));
        self
    }

    /// Clock used between feed retries
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bring the pipeline up
    ///
    /// # Errors
    ///
    /// See [`AudioPipeline::initialize`]
    pub fn initialize(self) -> EloquenceResult<AudioPipeline> {
        AudioPipeline::initialize(self)
    }
}

/// Running audio pipeline.
pub struct AudioPipeline {
    device: Mutex<OutputDevice>,
    rates: Mutex<SampleRateState>,
    negotiator: SampleRateNegotiator,
    equalizer: SharedEqualizer,
    feed: AudioFeedHandle,
    engine: EngineThread,
    feed_worker: AudioFeedWorker,
    terminated: bool,
}

impl AudioPipeline {
    /// Builder for a pipeline
    #[must_use]
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Negotiate rates, open the output, start the feed worker, then start
    /// the engine thread and wait for it to report ready.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid settings or a missing engine
    /// or output, the output's open error, or the engine's startup error
    pub fn initialize(builder: PipelineBuilder) -> EloquenceResult<Self> {
        let PipelineBuilder {
            config,
            factory,
            output,
            negotiator,
            on_index,
            clock,
        } = builder;
        config.validate()?;
        let factory =
            factory.ok_or_else(|| EloquenceError::configuration("No engine factory configured"))?;
        let output =
            output.ok_or_else(|| EloquenceError::configuration("No audio output configured"))?;
        let language = language_by_code(&config.language)
            .ok_or_else(|| EloquenceError::voice_not_found(config.language.clone()))?;

        let device_hz = negotiator.resolve(&config.output_device);
        let rates = SampleRateState::new(config.sample_rate, device_hz);
        info!(
            "Initializing audio pipeline: requested {} Hz, device {:?} Hz, engine {}",
            rates.requested_hz, device_hz, rates.engine_code
        );

        let equalizer = SharedEqualizer::new(rates.output_hz(), config.eq_bands.clone());
        let feed_worker = AudioFeedWorker::spawn(
            output,
            rates.output_hz(),
            &config.output_device,
            config.retry_policy(),
            clock,
        )?;
        let feed = feed_worker.handle();

        let flush = FlushController::new(
            feed.clone(),
            Resampler::new(equalizer.clone()),
            rates.clone(),
            config.flush_threshold_bytes,
            on_index,
        );
        let startup = EngineStartup {
            factory,
            dialect: language.dialect,
            buffer_samples: config.engine_buffer_samples,
            sample_code: rates.engine_code,
            voice_params: config.initial_voice_params()?,
            resources: VoiceResources::new(config.voice_dirs.iter().cloned()),
        };
        let engine = EngineThread::spawn(startup, flush)?;

        Ok(Self {
            device: Mutex::new(config.output_device),
            rates: Mutex::new(rates),
            negotiator,
            equalizer,
            feed,
            engine,
            feed_worker,
            terminated: false,
        })
    }

    /// Queue a batch of speech commands
    pub fn process(&self, batch: Vec<SpeechCommand>) {
        self.engine.process(batch);
    }

    /// Queue text
    pub fn speak<S: Into<String>>(&self, text: S) {
        self.process(vec![SpeechCommand::Speak(text.into())]);
    }

    /// Queue an index marker
    pub fn index(&self, value: u32) {
        self.process(vec![SpeechCommand::Index(value)]);
    }

    /// Start synthesizing what has been queued
    pub fn synth(&self) {
        self.process(vec![SpeechCommand::Synth]);
    }

    /// Stop speech immediately and drop everything queued
    pub fn stop(&self) {
        self.engine.silence();
    }

    /// Hold or resume playback
    pub fn pause(&self, paused: bool) {
        self.feed.pause(paused);
    }

    /// Set a voice parameter and wait until the engine has applied it.
    ///
    /// # Panics
    ///
    /// Temporary values only exist inside a speech batch (see
    /// [`SpeechCommand::Prosody`]); passing `temporary = true` here is a
    /// programming error.
    ///
    /// # Errors
    ///
    /// Returns a concurrency error if the engine thread is gone
    pub fn set_voice_param(&self, param: VoiceParam, value: i32, temporary: bool) -> EloquenceResult<()> {
        assert!(
            !temporary,
            "temporary voice parameters can only be applied on the engine thread"
        );
        self.engine.set_voice_param(param, value)
    }

    /// Permanent value of a voice parameter, if it has been set or read
    ///
    /// # Errors
    ///
    /// Returns a concurrency error if the engine thread is gone
    pub fn voice_param(&self, param: VoiceParam) -> EloquenceResult<Option<i32>> {
        Ok(self.engine.snapshot()?.voice(param))
    }

    /// Snapshot of every parameter the engine thread knows
    ///
    /// # Errors
    ///
    /// Returns a concurrency error if the engine thread is gone
    pub fn parameters(&self) -> EloquenceResult<ParameterTable> {
        self.engine.snapshot()
    }

    /// Switch to a preset voice variant
    ///
    /// # Errors
    ///
    /// Returns a concurrency error if the engine thread is gone
    pub fn set_variant(&self, variant: u32) -> EloquenceResult<()> {
        self.engine.copy_voice(variant)
    }

    /// Switch language, given as a code (`"deu"`) or a dialect id (`"262144"`)
    ///
    /// # Errors
    ///
    /// Returns [`EloquenceError::VoiceNotFound`] for an unknown voice
    pub fn set_voice(&self, voice: &str) -> EloquenceResult<&'static Language> {
        let language = resolve_voice(voice)?;
        self.engine
            .set_param(EngineParam::LanguageDialect, language.dialect)?;
        info!("Voice set to {} ({})", language.name, language.dialect);
        Ok(language)
    }

    /// Change the requested output rate
    ///
    /// # Errors
    ///
    /// Returns an error if the engine thread is gone
    pub fn set_sample_rate(&self, hz: u32) -> EloquenceResult<()> {
        let mut rates = self.rates.lock();
        let previous = rates.clone();
        rates.set_requested(hz);
        self.apply_rates(&rates, &previous)
    }

    /// Force the engine's sample-rate code
    ///
    /// # Errors
    ///
    /// Returns [`EloquenceError::InvalidSampleRateCode`] for codes other than 0, 1 and 2
    pub fn set_engine_sample_code(&self, code: i32) -> EloquenceResult<()> {
        let code = EngineSampleCode::try_from(code)?;
        let mut rates = self.rates.lock();
        let previous = rates.clone();
        rates.set_engine_code(code);
        self.apply_rates(&rates, &previous)
    }

    /// Current rates
    #[must_use]
    pub fn sample_rate_state(&self) -> SampleRateState {
        self.rates.lock().clone()
    }

    /// Replace the equalizer bands; takes effect with the next chunk
    pub fn set_eq_bands(&self, bands: Vec<EqBandConfig>) {
        self.equalizer.set_bands(bands);
    }

    /// Bands currently configured
    #[must_use]
    pub fn eq_bands(&self) -> Vec<EqBandConfig> {
        self.equalizer.bands()
    }

    /// Re-query the device (optionally a new one) and follow its mix rate
    ///
    /// # Errors
    ///
    /// Returns an error if the engine thread is gone
    pub fn refresh_output_device(&self, device: Option<OutputDevice>) -> EloquenceResult<()> {
        let (target, device_changed) = {
            let mut current = self.device.lock();
            let changed = device.as_ref().is_some_and(|d| *d != *current);
            if let Some(device) = device {
                *current = device;
            }
            (current.clone(), changed)
        };
        let device_hz = self.negotiator.resolve(&target);

        let mut rates = self.rates.lock();
        let previous = rates.clone();
        rates.set_device(device_hz);
        if device_changed && rates.output_hz() == previous.output_hz() {
            self.reopen(&rates, &target);
        }
        self.apply_rates(&rates, &previous)
    }

    /// Index of the most recent marker whose audio reached the device
    #[must_use]
    pub fn last_index(&self) -> Option<u32> {
        self.feed.last_index()
    }

    /// Engine lifecycle state
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.engine.state()
    }

    /// Block until the feed worker has handled everything queued so far
    pub fn wait_for_feed(&self) {
        self.feed.wait_idle();
    }

    fn apply_rates(&self, rates: &SampleRateState, previous: &SampleRateState) -> EloquenceResult<()> {
        if !rates.conversion_differs(previous) {
            debug!("Sample rates unchanged at {} Hz", rates.output_hz());
            return Ok(());
        }
        let output_hz = rates.output_hz();
        if output_hz != previous.output_hz() {
            self.equalizer.set_sample_rate(output_hz);
            let device = self.device.lock().clone();
            self.reopen(rates, &device);
        }
        self.engine.set_sample_rate(rates.clone())
    }

    fn reopen(&self, rates: &SampleRateState, device: &OutputDevice) {
        if let Err(e) = self.feed.reopen(rates.output_hz(), device.clone()) {
            warn!("Keeping previous audio output: {}", e);
        }
    }

    /// Stop speech, delete the engine and close the device
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.engine.silence();
        self.engine.kill();
        self.feed_worker.shutdown();
        debug!("Audio pipeline terminated");
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.terminate();
    }
}
