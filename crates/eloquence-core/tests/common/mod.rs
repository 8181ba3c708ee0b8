//! Fakes shared by the integration tests.
#![allow(dead_code)]

use crossbeam_channel::{Receiver, Sender};
use eloquence_core::audio_sink::{AudioOutput, AudioSink, CompletionCallback};
use eloquence_core::device::{AudioClient, ComInit, DeviceApi, DeviceEnumerator, Endpoint};
use eloquence_core::engine::DictionaryVolume;
use eloquence_core::{
    EloquenceError, EloquenceResult, EngineParam, NativeCallback, OutputDevice, SynthesisEngine,
    VoiceParam,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything the fake engine was asked to do
#[derive(Debug, Default)]
pub struct EngineLog {
    pub dialect: Option<i32>,
    pub output_buffer: Option<usize>,
    pub texts: Vec<String>,
    pub params: HashMap<EngineParam, i32>,
    pub param_writes: Vec<(EngineParam, i32)>,
    pub voice_writes: Vec<(VoiceParam, i32)>,
    pub dictionaries: Vec<(DictionaryVolume, PathBuf)>,
    pub copied_variants: Vec<u32>,
    pub stops: usize,
    pub synths: usize,
}

/// Pause point inside the first synthesis: signals `stalled`, then waits
/// until `resume` is dropped
struct Stall {
    stalled: Sender<()>,
    resume: Receiver<()>,
}

enum Queued {
    Text,
    Index(u32),
}

/// Scripted engine: each queued text renders `samples_per_text` samples whose
/// value is 100 times the text's sequence number.
pub struct FakeEngine {
    log: Arc<Mutex<EngineLog>>,
    callback: Option<NativeCallback>,
    voice: HashMap<VoiceParam, i32>,
    queued: Vec<Queued>,
    samples_per_text: usize,
    buffer_samples: usize,
    texts_rendered: i16,
    stall: Option<Stall>,
}

impl FakeEngine {
    fn new(log: Arc<Mutex<EngineLog>>, samples_per_text: usize) -> Self {
        let voice = HashMap::from([
            (VoiceParam::Gender, 0),
            (VoiceParam::HeadSize, 50),
            (VoiceParam::Pitch, 65),
            (VoiceParam::Fluctuation, 30),
            (VoiceParam::Roughness, 0),
            (VoiceParam::Breathiness, 0),
            (VoiceParam::Rate, 50),
            (VoiceParam::Volume, 92),
        ]);
        Self {
            log,
            callback: None,
            voice,
            queued: Vec::new(),
            samples_per_text,
            buffer_samples: 3300,
            texts_rendered: 0,
            stall: None,
        }
    }

    fn emit_audio(&mut self, callback: &NativeCallback) {
        self.texts_rendered += 1;
        let samples = vec![self.texts_rendered * 100; self.samples_per_text];
        for chunk in samples.chunks(self.buffer_samples.max(1)) {
            let bytes = eloquence_core::pcm::encode(chunk);
            let _ = callback.dispatch(0, chunk.len() as u32, &bytes);
            if let Some(stall) = self.stall.take() {
                let _ = stall.stalled.send(());
                let _ = stall.resume.recv();
            }
        }
    }
}

impl SynthesisEngine for FakeEngine {
    fn register_callback(&mut self, callback: NativeCallback) {
        self.callback = Some(callback);
    }

    fn set_output_buffer(&mut self, samples: usize) {
        self.buffer_samples = samples;
        self.log.lock().output_buffer = Some(samples);
    }

    fn add_text(&mut self, text: &str) {
        self.log.lock().texts.push(text.to_string());
        self.queued.push(Queued::Text);
    }

    fn insert_index(&mut self, index: u32) {
        self.queued.push(Queued::Index(index));
    }

    fn synthesize(&mut self) {
        self.log.lock().synths += 1;
        let Some(callback) = self.callback.clone() else {
            return;
        };
        for item in std::mem::take(&mut self.queued) {
            match item {
                Queued::Text => self.emit_audio(&callback),
                Queued::Index(value) => {
                    let _ = callback.dispatch(2, value, &[]);
                }
            }
        }
    }

    fn stop(&mut self) {
        self.queued.clear();
        self.log.lock().stops += 1;
    }

    fn set_param(&mut self, param: EngineParam, value: i32) {
        let mut log = self.log.lock();
        log.params.insert(param, value);
        log.param_writes.push((param, value));
    }

    fn param(&self, param: EngineParam) -> i32 {
        let log = self.log.lock();
        match param {
            EngineParam::LanguageDialect => log
                .params
                .get(&param)
                .copied()
                .or(log.dialect)
                .unwrap_or_default(),
            _ => log.params.get(&param).copied().unwrap_or_default(),
        }
    }

    fn set_voice_param(&mut self, _voice: u32, param: VoiceParam, value: i32) {
        self.voice.insert(param, value);
        self.log.lock().voice_writes.push((param, value));
    }

    fn voice_param(&self, _voice: u32, param: VoiceParam) -> i32 {
        self.voice.get(&param).copied().unwrap_or_default()
    }

    fn copy_voice(&mut self, from: u32, _to: u32) {
        let preset = i32::try_from(from).unwrap_or_default();
        for param in VoiceParam::VARIANT_CONTROLLED {
            self.voice.insert(param, 10 * preset + param.id());
        }
        self.log.lock().copied_variants.push(from);
    }

    fn load_dictionary(&mut self, volume: DictionaryVolume, path: &Path) -> anyhow::Result<()> {
        self.log.lock().dictionaries.push((volume, path.to_path_buf()));
        Ok(())
    }
}

/// Factory producing fake engines that share one log
pub fn fake_engine_factory(
    samples_per_text: usize,
) -> (
    impl FnMut(i32) -> anyhow::Result<Box<dyn SynthesisEngine>> + Send + 'static,
    Arc<Mutex<EngineLog>>,
) {
    let log = Arc::new(Mutex::new(EngineLog::default()));
    let shared = Arc::clone(&log);
    let factory = move |dialect: i32| -> anyhow::Result<Box<dyn SynthesisEngine>> {
        shared.lock().dialect = Some(dialect);
        Ok(Box::new(FakeEngine::new(Arc::clone(&shared), samples_per_text)))
    };
    (factory, log)
}

/// Like [`fake_engine_factory`], but the first engine stops after its first
/// audio chunk. The returned receiver fires once it is stuck there; dropping
/// the returned sender lets it carry on.
pub fn stalling_engine_factory(
    samples_per_text: usize,
) -> (
    impl FnMut(i32) -> anyhow::Result<Box<dyn SynthesisEngine>> + Send + 'static,
    Arc<Mutex<EngineLog>>,
    Receiver<()>,
    Sender<()>,
) {
    let log = Arc::new(Mutex::new(EngineLog::default()));
    let shared = Arc::clone(&log);
    let (stalled_tx, stalled_rx) = crossbeam_channel::bounded(1);
    let (resume_tx, resume_rx) = crossbeam_channel::bounded::<()>(0);
    let mut stall = Some(Stall {
        stalled: stalled_tx,
        resume: resume_rx,
    });
    let factory = move |dialect: i32| -> anyhow::Result<Box<dyn SynthesisEngine>> {
        shared.lock().dialect = Some(dialect);
        let mut engine = FakeEngine::new(Arc::clone(&shared), samples_per_text);
        engine.stall = stall.take();
        Ok(Box::new(engine))
    };
    (factory, log, stalled_rx, resume_tx)
}

/// Everything the recording output saw
#[derive(Debug, Default)]
pub struct Recording {
    pub opened_at: Vec<u32>,
    pub chunks: Vec<Vec<i16>>,
    pub events: Vec<String>,
    pub feeds_entered: usize,
    pub failures_left: usize,
}

impl Recording {
    pub fn samples(&self) -> Vec<i16> {
        self.chunks.concat()
    }
}

/// Output whose sinks record everything and complete chunks immediately
#[derive(Clone, Default)]
pub struct RecordingOutput {
    pub recording: Arc<Mutex<Recording>>,
    gate: Arc<Mutex<Option<Receiver<()>>>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` feeds fail as busy
    pub fn fail_next(&self, count: usize) {
        self.recording.lock().failures_left = count;
    }

    /// Block feeds until the returned sender is dropped
    pub fn hold_feeds(&self) -> crossbeam_channel::Sender<()> {
        let (release, gate) = crossbeam_channel::bounded(0);
        *self.gate.lock() = Some(gate);
        release
    }
}

impl AudioOutput for RecordingOutput {
    fn open(&mut self, sample_rate: u32, _device: &OutputDevice) -> EloquenceResult<Box<dyn AudioSink>> {
        self.recording.lock().opened_at.push(sample_rate);
        Ok(Box::new(RecordingSink {
            recording: Arc::clone(&self.recording),
            gate: Arc::clone(&self.gate),
        }))
    }
}

struct RecordingSink {
    recording: Arc<Mutex<Recording>>,
    gate: Arc<Mutex<Option<Receiver<()>>>>,
}

impl AudioSink for RecordingSink {
    fn feed(&mut self, pcm: &[u8], on_done: Option<CompletionCallback>) -> EloquenceResult<()> {
        {
            let mut recording = self.recording.lock();
            if recording.failures_left > 0 {
                recording.failures_left -= 1;
                recording.events.push("busy".to_string());
                return Err(EloquenceError::device_busy("device queue full"));
            }
            recording.feeds_entered += 1;
        }
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        {
            let mut recording = self.recording.lock();
            recording.chunks.push(eloquence_core::pcm::decode(pcm));
            recording.events.push("feed".to_string());
        }
        if let Some(done) = on_done {
            done();
        }
        Ok(())
    }

    fn idle(&mut self) -> EloquenceResult<()> {
        self.recording.lock().events.push("idle".to_string());
        Ok(())
    }

    fn stop(&mut self) -> EloquenceResult<()> {
        self.recording.lock().events.push("stop".to_string());
        Ok(())
    }

    fn pause(&mut self, paused: bool) -> EloquenceResult<()> {
        self.recording.lock().events.push(format!("pause:{paused}"));
        Ok(())
    }

    fn close(&mut self) -> EloquenceResult<()> {
        self.recording.lock().events.push("close".to_string());
        Ok(())
    }
}

/// Device API reporting a fixed mix rate for every endpoint
pub struct FixedRateDevice(pub u32);

struct FixedEnumerator(u32);
struct FixedEndpoint(u32);
struct FixedClient(u32);

impl DeviceApi for FixedRateDevice {
    fn initialize(&self) -> EloquenceResult<ComInit> {
        Ok(ComInit::AlreadyInitialized)
    }

    fn uninitialize(&self) {}

    fn enumerator(&self) -> EloquenceResult<Box<dyn DeviceEnumerator>> {
        Ok(Box::new(FixedEnumerator(self.0)))
    }
}

impl DeviceEnumerator for FixedEnumerator {
    fn default_endpoint(&self) -> EloquenceResult<Box<dyn Endpoint>> {
        Ok(Box::new(FixedEndpoint(self.0)))
    }

    fn endpoint(&self, _id: &str) -> EloquenceResult<Box<dyn Endpoint>> {
        Ok(Box::new(FixedEndpoint(self.0)))
    }

    fn endpoint_by_name(&self, _name: &str) -> EloquenceResult<Box<dyn Endpoint>> {
        Ok(Box::new(FixedEndpoint(self.0)))
    }
}

impl Endpoint for FixedEndpoint {
    fn activate(&self) -> EloquenceResult<Box<dyn AudioClient>> {
        Ok(Box::new(FixedClient(self.0)))
    }
}

impl AudioClient for FixedClient {
    fn mix_sample_rate(&self) -> EloquenceResult<u32> {
        Ok(self.0)
    }
}

/// Collects index completions
pub fn index_recorder() -> (
    impl Fn(Option<u32>) + Send + Sync + 'static,
    Arc<Mutex<Vec<Option<u32>>>>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (move |index| sink.lock().push(index), seen)
}

/// Poll `condition` until it holds or five seconds pass
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
