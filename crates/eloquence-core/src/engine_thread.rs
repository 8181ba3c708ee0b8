//! The dedicated thread that owns the native engine.
//!
//! Every engine call happens here. Callers post [`EngineMessage`]s; parameter
//! changes carry a reply channel so the caller blocks until the engine has
//! applied them. Native callback events arrive on the same queue, which keeps
//! audio, index markers and control messages in one order. Every silence
//! starts a new epoch, and callback events posted in an earlier epoch are
//! dropped, so a cancelled utterance can never leak into the next one.

use crate::engine::{
    DictionaryVolume, EngineFactory, EngineParam, SynthesisEngine, VoiceParam, ACTIVE_VOICE,
    END_OF_UTTERANCE_INDEX,
};
use crate::error::{EloquenceError, EloquenceResult};
use crate::flush::{FlushController, FlushTarget, NativeCallback, NativeEvent};
use crate::sample_rate::{EngineSampleCode, SampleRateState};
use crate::voice_resources::{language_by_dialect, VoiceResources};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use tracing::{debug, error, info, warn};

/// One entry of a speech batch
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechCommand {
    /// Queue text; the current rate is asserted in front of it
    Speak(String),
    /// Queue an index marker
    Index(u32),
    /// Start synthesizing everything queued
    Synth,
    /// Scale a voice parameter for the text that follows; `None` restores it
    Prosody {
        /// Parameter to change
        param: VoiceParam,
        /// Factor applied to the permanent value
        multiplier: Option<f64>,
    },
}

/// Builder for a batch ending in the end-of-utterance marker and a synth.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeechBatch {
    commands: Vec<SpeechCommand>,
}

impl SpeechBatch {
    /// Empty batch
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text
    #[must_use]
    pub fn speak<S: Into<String>>(mut self, text: S) -> Self {
        self.commands.push(SpeechCommand::Speak(text.into()));
        self
    }

    /// Append an index marker
    #[must_use]
    pub fn index(mut self, value: u32) -> Self {
        self.commands.push(SpeechCommand::Index(value));
        self
    }

    /// Append a prosody change
    #[must_use]
    pub fn prosody(mut self, param: VoiceParam, multiplier: Option<f64>) -> Self {
        self.commands.push(SpeechCommand::Prosody { param, multiplier });
        self
    }

    /// Close the utterance: end-of-utterance marker, then synth
    #[must_use]
    pub fn finish(mut self) -> Vec<SpeechCommand> {
        self.commands.push(SpeechCommand::Index(END_OF_UTTERANCE_INDEX));
        self.commands.push(SpeechCommand::Synth);
        self.commands
    }
}

/// Lifecycle of the engine thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Creating the native engine
    Starting,
    /// Ready, nothing being synthesized
    Idle,
    /// At least one utterance is being synthesized
    Speaking,
    /// Kill received
    Terminating,
    /// Thread finished
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "Starting"),
            Self::Idle => write!(f, "Idle"),
            Self::Speaking => write!(f, "Speaking"),
            Self::Terminating => write!(f, "Terminating"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Parameters as the engine thread last set or read them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterTable {
    params: BTreeMap<EngineParam, i32>,
    voice: BTreeMap<VoiceParam, i32>,
}

impl ParameterTable {
    /// Engine-wide parameter
    #[must_use]
    pub fn param(&self, param: EngineParam) -> Option<i32> {
        self.params.get(&param).copied()
    }

    /// Permanent value of a voice parameter
    #[must_use]
    pub fn voice(&self, param: VoiceParam) -> Option<i32> {
        self.voice.get(&param).copied()
    }

    fn set_param(&mut self, param: EngineParam, value: i32) {
        self.params.insert(param, value);
    }

    fn set_voice(&mut self, param: VoiceParam, value: i32) {
        self.voice.insert(param, value);
    }
}

/// Messages processed by the engine thread, one at a time
pub(crate) enum EngineMessage {
    Process(Vec<SpeechCommand>),
    Silence,
    SetParam {
        param: EngineParam,
        value: i32,
        reply: Sender<()>,
    },
    SetVoiceParam {
        param: VoiceParam,
        value: i32,
        reply: Sender<()>,
    },
    CopyVoice {
        variant: u32,
        reply: Sender<()>,
    },
    SetSampleRate {
        rates: SampleRateState,
        reply: Sender<()>,
    },
    Snapshot(Sender<ParameterTable>),
    Callback {
        epoch: u64,
        event: NativeEvent,
    },
    Kill,
}

/// What the engine thread needs to bring the native engine up
pub struct EngineStartup {
    /// Creates the native engine
    pub factory: Box<dyn EngineFactory>,
    /// Initial language dialect
    pub dialect: i32,
    /// Render buffer size in samples
    pub buffer_samples: usize,
    /// Initial sample-rate code
    pub sample_code: EngineSampleCode,
    /// Voice parameters applied after creation
    pub voice_params: Vec<(VoiceParam, i32)>,
    /// Where dictionaries are found
    pub resources: VoiceResources,
}

struct EngineWorker<T: FlushTarget> {
    engine: Box<dyn SynthesisEngine>,
    params: ParameterTable,
    flush: FlushController<T>,
    speaking: Arc<AtomicBool>,
    epoch: Arc<AtomicU64>,
    state: Arc<Mutex<EngineState>>,
    pending_utterances: usize,
}

impl<T: FlushTarget> EngineWorker<T> {
    fn start(
        mut startup: EngineStartup,
        flush: FlushController<T>,
        callback: NativeCallback,
        speaking: Arc<AtomicBool>,
        epoch: Arc<AtomicU64>,
        state: Arc<Mutex<EngineState>>,
    ) -> EloquenceResult<Self> {
        let mut engine = startup.factory.create(startup.dialect)?;
        let mut params = ParameterTable::default();
        for param in [
            VoiceParam::Rate,
            VoiceParam::Pitch,
            VoiceParam::Volume,
            VoiceParam::Fluctuation,
        ] {
            params.set_voice(param, engine.voice_param(ACTIVE_VOICE, param));
        }

        engine.register_callback(callback);
        engine.set_output_buffer(startup.buffer_samples);
        engine.set_param(EngineParam::InputType, 1);
        params.set_param(EngineParam::InputType, 1);
        engine.set_param(EngineParam::SampleRate, startup.sample_code.code());
        params.set_param(EngineParam::SampleRate, startup.sample_code.code());

        for (param, value) in &startup.voice_params {
            engine.set_voice_param(ACTIVE_VOICE, *param, *value);
            params.set_voice(*param, *value);
        }

        let language = language_by_dialect(startup.dialect).map_or("enu", |lang| lang.code);
        for volume in DictionaryVolume::ALL {
            match startup.resources.dictionary(language, volume) {
                Some(path) => match engine.load_dictionary(volume, &path) {
                    Ok(()) => debug!("Loaded {:?} dictionary from {}", volume, path.display()),
                    Err(e) => warn!("Failed to load dictionary {}: {:#}", path.display(), e),
                },
                None => debug!("No {:?} dictionary for {}", volume, language),
            }
        }

        params.set_param(
            EngineParam::LanguageDialect,
            engine.param(EngineParam::LanguageDialect),
        );
        info!(
            "Synthesis engine started: dialect {} at {}",
            startup.dialect, startup.sample_code
        );

        Ok(Self {
            engine,
            params,
            flush,
            speaking,
            epoch,
            state,
            pending_utterances: 0,
        })
    }

    fn run(mut self, receiver: &Receiver<EngineMessage>) {
        self.set_state(EngineState::Idle);
        while let Ok(message) = receiver.recv() {
            match message {
                EngineMessage::Process(batch) => self.process(batch),
                EngineMessage::Silence => self.silence(),
                EngineMessage::SetParam {
                    param,
                    value,
                    reply,
                } => {
                    self.engine.set_param(param, value);
                    self.params.set_param(param, value);
                    let _ = reply.send(());
                }
                EngineMessage::SetVoiceParam {
                    param,
                    value,
                    reply,
                } => {
                    self.engine.set_voice_param(ACTIVE_VOICE, param, value);
                    self.params.set_voice(param, value);
                    let _ = reply.send(());
                }
                EngineMessage::CopyVoice { variant, reply } => {
                    self.copy_voice(variant);
                    let _ = reply.send(());
                }
                EngineMessage::SetSampleRate { rates, reply } => {
                    let code = rates.engine_code.code();
                    self.engine.set_param(EngineParam::SampleRate, code);
                    self.params.set_param(EngineParam::SampleRate, code);
                    self.flush.set_rates(rates);
                    let _ = reply.send(());
                }
                EngineMessage::Snapshot(reply) => {
                    let _ = reply.send(self.params.clone());
                }
                EngineMessage::Callback { epoch, event } => self.handle_event(epoch, event),
                EngineMessage::Kill => {
                    self.set_state(EngineState::Terminating);
                    break;
                }
            }
        }
        self.speaking.store(false, Ordering::SeqCst);
        drop(self.engine);
        *self.state.lock() = EngineState::Stopped;
        debug!("Engine thread stopped");
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock() = state;
    }

    fn process(&mut self, batch: Vec<SpeechCommand>) {
        for command in batch {
            match command {
                SpeechCommand::Speak(text) => {
                    let text = match self.params.voice(VoiceParam::Rate) {
                        Some(rate) => format!("`vs{rate}{text}"),
                        None => text,
                    };
                    self.engine.add_text(&text);
                }
                SpeechCommand::Index(value) => self.engine.insert_index(value),
                SpeechCommand::Prosody { param, multiplier } => self.prosody(param, multiplier),
                SpeechCommand::Synth => {
                    self.speaking.store(true, Ordering::SeqCst);
                    self.pending_utterances += 1;
                    self.set_state(EngineState::Speaking);
                    self.engine.synthesize();
                }
            }
        }
    }

    fn prosody(&mut self, param: VoiceParam, multiplier: Option<f64>) {
        let Some(base) = self.params.voice(param) else {
            debug!("Ignoring prosody change for unread parameter {}", param);
            return;
        };
        #[allow(clippy::cast_possible_truncation)]
        let value = multiplier.map_or(base, |factor| (f64::from(base) * factor) as i32);
        self.engine.set_voice_param(ACTIVE_VOICE, param, value);
    }

    fn copy_voice(&mut self, variant: u32) {
        self.engine.copy_voice(variant, ACTIVE_VOICE);
        for param in VoiceParam::VARIANT_CONTROLLED {
            let value = self.engine.voice_param(ACTIVE_VOICE, param);
            self.params.set_voice(param, value);
        }
        debug!("Switched to voice variant {}", variant);
    }

    fn silence(&mut self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Silencing engine, now in epoch {}", epoch);
        self.speaking.store(false, Ordering::SeqCst);
        self.flush.clear();
        self.engine.stop();
        self.flush.target_mut().cancel();
        self.pending_utterances = 0;
        self.set_state(EngineState::Idle);
    }

    fn handle_event(&mut self, epoch: u64, event: NativeEvent) {
        if epoch != self.epoch.load(Ordering::SeqCst) {
            debug!("Discarding native event from before the last silence");
            return;
        }
        if !self.speaking.load(Ordering::SeqCst) {
            debug!("Discarding native event received while silent");
            return;
        }
        match event {
            NativeEvent::Audio(pcm) => self.flush.on_audio(&pcm),
            NativeEvent::Index(value) => {
                self.flush.on_index(value);
                if value == END_OF_UTTERANCE_INDEX {
                    self.pending_utterances = self.pending_utterances.saturating_sub(1);
                    if self.pending_utterances == 0 {
                        self.set_state(EngineState::Idle);
                    }
                }
            }
        }
    }
}

/// Handle to the running engine thread.
pub struct EngineThread {
    sender: Sender<EngineMessage>,
    state: Arc<Mutex<EngineState>>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl EngineThread {
    /// Start the thread and wait until the native engine is up
    ///
    /// # Errors
    ///
    /// Returns the startup error from the engine factory, or a concurrency
    /// error if the thread cannot be started
    pub fn spawn<T>(startup: EngineStartup, flush: FlushController<T>) -> EloquenceResult<Self>
    where
        T: FlushTarget + Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let state = Arc::new(Mutex::new(EngineState::Starting));
        let speaking = Arc::new(AtomicBool::new(false));
        let epoch = Arc::new(AtomicU64::new(0));

        let callback = NativeCallback::new(sender.clone(), Arc::clone(&speaking), Arc::clone(&epoch));
        let worker_state = Arc::clone(&state);
        let thread = std::thread::Builder::new()
            .name("eloquence-engine".to_string())
            .spawn(move || {
                match EngineWorker::start(startup, flush, callback, speaking, epoch, worker_state) {
                    Ok(worker) => {
                        let _ = started_tx.send(Ok(()));
                        worker.run(&receiver);
                    }
                    Err(e) => {
                        let _ = started_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| EloquenceError::concurrency(format!("Failed to start engine thread: {e}")))?;

        let thread_id = thread.thread().id();
        let started = started_rx
            .recv()
            .map_err(|_| EloquenceError::concurrency("Engine thread exited during startup"));
        match started.and_then(|result| result) {
            Ok(()) => Ok(Self {
                sender,
                state,
                thread: Some(thread),
                thread_id,
            }),
            Err(e) => {
                error!("Engine startup failed: {}", e);
                *state.lock() = EngineState::Stopped;
                let _ = thread.join();
                Err(e)
            }
        }
    }

    fn post(&self, message: EngineMessage) {
        if self.sender.send(message).is_err() {
            debug!("Engine thread has exited; message discarded");
        }
    }

    fn request<R>(&self, build: impl FnOnce(Sender<R>) -> EngineMessage) -> EloquenceResult<R> {
        if self.is_engine_thread() {
            return Err(EloquenceError::concurrency(
                "Synchronous engine request issued from the engine thread",
            ));
        }
        let (reply, answer) = crossbeam_channel::bounded(1);
        self.sender
            .send(build(reply))
            .map_err(|_| EloquenceError::concurrency("Engine thread has exited"))?;
        answer
            .recv()
            .map_err(|_| EloquenceError::concurrency("Engine thread exited before replying"))
    }

    /// Queue a speech batch
    pub fn process(&self, batch: Vec<SpeechCommand>) {
        self.post(EngineMessage::Process(batch));
    }

    /// Stop speech and discard queued audio
    pub fn silence(&self) {
        self.post(EngineMessage::Silence);
    }

    /// Set an engine-wide parameter and wait for it to apply
    ///
    /// # Errors
    ///
    /// Returns a concurrency error if the engine thread is gone
    pub fn set_param(&self, param: EngineParam, value: i32) -> EloquenceResult<()> {
        self.request(|reply| EngineMessage::SetParam {
            param,
            value,
            reply,
        })
    }

    /// Permanently set a voice parameter and wait for it to apply
    ///
    /// # Errors
    ///
    /// Returns a concurrency error if the engine thread is gone
    pub fn set_voice_param(&self, param: VoiceParam, value: i32) -> EloquenceResult<()> {
        self.request(|reply| EngineMessage::SetVoiceParam {
            param,
            value,
            reply,
        })
    }

    /// Copy a preset voice into the active slot
    ///
    /// # Errors
    ///
    /// Returns a concurrency error if the engine thread is gone
    pub fn copy_voice(&self, variant: u32) -> EloquenceResult<()> {
        self.request(|reply| EngineMessage::CopyVoice { variant, reply })
    }

    /// Apply new rates to the engine and the flush path
    ///
    /// # Errors
    ///
    /// Returns a concurrency error if the engine thread is gone
    pub fn set_sample_rate(&self, rates: SampleRateState) -> EloquenceResult<()> {
        self.request(|reply| EngineMessage::SetSampleRate { rates, reply })
    }

    /// Copy of the parameter table
    ///
    /// # Errors
    ///
    /// Returns a concurrency error if the engine thread is gone
    pub fn snapshot(&self) -> EloquenceResult<ParameterTable> {
        self.request(EngineMessage::Snapshot)
    }

    /// Whether the caller is the engine thread itself
    #[must_use]
    pub fn is_engine_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Delete the native engine and join the thread
    pub fn kill(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.post(EngineMessage::Kill);
            if thread.join().is_err() {
                error!("Engine thread panicked");
                *self.state.lock() = EngineState::Stopped;
            }
        }
    }
}

impl Drop for EngineThread {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_closes_utterance() {
        let batch = SpeechBatch::new()
            .speak("hello")
            .index(1)
            .prosody(VoiceParam::Pitch, Some(1.5))
            .finish();
        assert_eq!(
            batch,
            vec![
                SpeechCommand::Speak("hello".to_string()),
                SpeechCommand::Index(1),
                SpeechCommand::Prosody {
                    param: VoiceParam::Pitch,
                    multiplier: Some(1.5)
                },
                SpeechCommand::Index(END_OF_UTTERANCE_INDEX),
                SpeechCommand::Synth,
            ]
        );
    }

    #[test]
    fn test_parameter_table() {
        let mut table = ParameterTable::default();
        assert_eq!(table.voice(VoiceParam::Rate), None);
        table.set_voice(VoiceParam::Rate, 50);
        table.set_param(EngineParam::SampleRate, 2);
        assert_eq!(table.voice(VoiceParam::Rate), Some(50));
        assert_eq!(table.param(EngineParam::SampleRate), Some(2));
    }

    #[test]
    fn test_engine_state_display() {
        assert_eq!(EngineState::Speaking.to_string(), "Speaking");
    }
}
