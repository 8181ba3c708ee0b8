//! Background worker that owns the audio sink and feeds it with retries.
//!
//! Every sink operation (feeding, idling, stopping, pausing, reopening,
//! closing) is a command on one queue, executed in order by one thread. Audio
//! jobs carry the generation they were queued in; [`AudioFeedHandle::cancel`]
//! bumps the generation and the worker skips every job from an older one.
//! Nothing is ever re-queued, so control commands keep the order they were
//! sent in.

use crate::audio_sink::{AudioOutput, AudioSink, CompletionCallback};
use crate::config::OutputDevice;
use crate::error::{EloquenceError, EloquenceResult};
use crate::flush::{FlushTarget, IndexMarker};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often a rejected buffer is offered again before it is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(20),
        }
    }
}

/// Source of delays, replaceable in tests.
pub trait Clock: Send + Sync {
    /// Block the calling thread for `duration`
    fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeping
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Result of feeding one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The sink accepted the buffer after `retries` failed attempts
    Delivered {
        /// Failed attempts before success
        retries: u32,
    },
    /// Every attempt failed and the buffer was discarded
    Dropped {
        /// Attempts made
        attempts: u32,
    },
}

/// Feed one buffer, idling the sink and pausing between failed attempts.
///
/// Never fails: exhaustion is logged and reported as [`FeedOutcome::Dropped`].
pub fn feed_with_retry(
    sink: &mut dyn AudioSink,
    pcm: &[u8],
    on_done: Option<&CompletionCallback>,
    policy: &RetryPolicy,
    clock: &dyn Clock,
) -> FeedOutcome {
    let attempts = policy.max_attempts.max(1);
    for attempt in 0..attempts {
        match sink.feed(pcm, on_done.cloned()) {
            Ok(()) => {
                if attempt > 0 {
                    warn!("Audio buffer accepted after {} retries", attempt);
                }
                return FeedOutcome::Delivered { retries: attempt };
            }
            Err(e) => {
                debug!("Feed attempt {} failed: {}", attempt + 1, e);
                if let Err(e) = sink.idle() {
                    debug!("Idle between feed attempts failed: {}", e);
                }
                if attempt + 1 < attempts {
                    clock.sleep(policy.delay);
                }
            }
        }
    }
    error!(
        "Dropped one audio buffer after {} failed feed attempts",
        attempts
    );
    FeedOutcome::Dropped { attempts }
}

enum FeedCommand {
    Play {
        pcm: Vec<u8>,
        on_done: Option<CompletionCallback>,
        index: Option<u32>,
        generation: u64,
    },
    Idle {
        generation: u64,
    },
    Stop,
    Pause(bool),
    Reopen {
        sample_rate: u32,
        device: OutputDevice,
        reply: Sender<EloquenceResult<()>>,
    },
    Sync(Sender<()>),
    Shutdown,
}

/// Cloneable sender side of the feed worker.
#[derive(Clone)]
pub struct AudioFeedHandle {
    sender: Sender<FeedCommand>,
    generation: Arc<AtomicU64>,
    last_index: Arc<Mutex<Option<u32>>>,
}

impl AudioFeedHandle {
    fn send(&self, command: FeedCommand) {
        if self.sender.send(command).is_err() {
            debug!("Audio feed worker has exited; command discarded");
        }
    }

    /// Queue a chunk; `on_done` fires once it has played
    pub fn play(&self, pcm: Vec<u8>, on_done: Option<CompletionCallback>) {
        self.play_indexed(pcm, on_done, None);
    }

    /// Queue a chunk that completes the given index marker
    pub fn play_indexed(&self, pcm: Vec<u8>, on_done: Option<CompletionCallback>, index: Option<u32>) {
        let generation = self.generation.load(Ordering::SeqCst);
        self.send(FeedCommand::Play {
            pcm,
            on_done,
            index,
            generation,
        });
    }

    /// Queue an idle request after the audio queued so far
    pub fn idle(&self) {
        let generation = self.generation.load(Ordering::SeqCst);
        self.send(FeedCommand::Idle { generation });
    }

    /// Stop the device
    pub fn stop(&self) {
        self.send(FeedCommand::Stop);
    }

    /// Hold or resume playback
    pub fn pause(&self, paused: bool) {
        self.send(FeedCommand::Pause(paused));
    }

    /// Invalidate queued audio and stop the device. Never blocks.
    ///
    /// Returns the new generation.
    pub fn cancel(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.stop();
        debug!("Cancelled audio feed, now in generation {}", generation);
        generation
    }

    /// Reopen the sink at a new rate or on a new device, waiting for the result
    ///
    /// # Errors
    ///
    /// Returns the open error; the previous sink stays in use
    pub fn reopen(&self, sample_rate: u32, device: OutputDevice) -> EloquenceResult<()> {
        let (reply, result) = crossbeam_channel::bounded(1);
        self.sender
            .send(FeedCommand::Reopen {
                sample_rate,
                device,
                reply,
            })
            .map_err(|_| EloquenceError::concurrency("Audio feed worker has exited"))?;
        result
            .recv()
            .map_err(|_| EloquenceError::concurrency("Audio feed worker exited during reopen"))?
    }

    /// Block until every command queued before this call has been handled
    pub fn wait_idle(&self) {
        let (reply, done) = crossbeam_channel::bounded(1);
        self.send(FeedCommand::Sync(reply));
        let _ = done.recv();
    }

    /// Index of the most recent marker whose audio was fed
    #[must_use]
    pub fn last_index(&self) -> Option<u32> {
        *self.last_index.lock()
    }

    /// Current cancellation generation
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl FlushTarget for AudioFeedHandle {
    fn play(&mut self, pcm: Vec<u8>, marker: Option<IndexMarker>, on_done: Option<CompletionCallback>) {
        let index = marker.and_then(|m| m.reported());
        self.play_indexed(pcm, on_done, index);
    }

    fn idle(&mut self) {
        AudioFeedHandle::idle(self);
    }

    fn cancel(&mut self) {
        AudioFeedHandle::cancel(self);
    }
}

struct FeedLoop {
    sink: Box<dyn AudioSink>,
    output: Box<dyn AudioOutput>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    generation: Arc<AtomicU64>,
    last_index: Arc<Mutex<Option<u32>>>,
}

impl FeedLoop {
    fn run(mut self, receiver: &Receiver<FeedCommand>) {
        while let Ok(command) = receiver.recv() {
            match command {
                FeedCommand::Play {
                    pcm,
                    on_done,
                    index,
                    generation,
                } => self.play(&pcm, on_done.as_ref(), index, generation),
                FeedCommand::Idle { generation } => {
                    if self.is_current(generation) {
                        log_failure("idle", self.sink.idle());
                    }
                }
                FeedCommand::Stop => {
                    log_failure("stop", self.sink.stop());
                }
                FeedCommand::Pause(paused) => {
                    log_failure("pause", self.sink.pause(paused));
                }
                FeedCommand::Reopen {
                    sample_rate,
                    device,
                    reply,
                } => {
                    let result = self.reopen(sample_rate, &device);
                    let _ = reply.send(result);
                }
                FeedCommand::Sync(reply) => {
                    let _ = reply.send(());
                }
                FeedCommand::Shutdown => break,
            }
        }
        log_failure("close", self.sink.close());
        debug!("Audio feed worker stopped");
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation.load(Ordering::SeqCst)
    }

    fn play(&mut self, pcm: &[u8], on_done: Option<&CompletionCallback>, index: Option<u32>, generation: u64) {
        if !self.is_current(generation) {
            debug!("Skipping {} bytes queued before a cancel", pcm.len());
            return;
        }
        let outcome = feed_with_retry(self.sink.as_mut(), pcm, on_done, &self.policy, self.clock.as_ref());
        if let (FeedOutcome::Delivered { .. }, Some(index)) = (outcome, index) {
            *self.last_index.lock() = Some(index);
        }
    }

    fn reopen(&mut self, sample_rate: u32, device: &OutputDevice) -> EloquenceResult<()> {
        let sink = self.output.open(sample_rate, device)?;
        let mut previous = std::mem::replace(&mut self.sink, sink);
        log_failure("close", previous.close());
        info!("Audio output reopened at {} Hz on {:?}", sample_rate, device);
        Ok(())
    }
}

fn log_failure(operation: &str, result: EloquenceResult<()>) {
    if let Err(e) = result {
        warn!("Audio sink {} failed: {}", operation, e);
    }
}

/// Owner of the feed thread.
pub struct AudioFeedWorker {
    handle: AudioFeedHandle,
    thread: Option<JoinHandle<()>>,
}

impl AudioFeedWorker {
    /// Open the first sink on the calling thread, then start the worker
    ///
    /// # Errors
    ///
    /// Returns the open error, or a concurrency error if the thread cannot start
    pub fn spawn(
        mut output: Box<dyn AudioOutput>,
        sample_rate: u32,
        device: &OutputDevice,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> EloquenceResult<Self> {
        let sink = output.open(sample_rate, device)?;
        let (sender, receiver) = crossbeam_channel::unbounded();
        let handle = AudioFeedHandle {
            sender,
            generation: Arc::new(AtomicU64::new(0)),
            last_index: Arc::new(Mutex::new(None)),
        };
        let feed_loop = FeedLoop {
            sink,
            output,
            policy,
            clock,
            generation: Arc::clone(&handle.generation),
            last_index: Arc::clone(&handle.last_index),
        };
        let thread = std::thread::Builder::new()
            .name("eloquence-audio-feed".to_string())
            .spawn(move || feed_loop.run(&receiver))
            .map_err(|e| EloquenceError::concurrency(format!("Failed to start audio feed thread: {e}")))?;
        info!("Audio feed worker started at {} Hz", sample_rate);
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Sender side shared with the engine thread
    #[must_use]
    pub fn handle(&self) -> AudioFeedHandle {
        self.handle.clone()
    }

    /// Finish queued commands, close the sink and join the thread
    pub fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.handle.send(FeedCommand::Shutdown);
            if thread.join().is_err() {
                error!("Audio feed thread panicked");
            }
        }
    }
}

impl Drop for AudioFeedWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
