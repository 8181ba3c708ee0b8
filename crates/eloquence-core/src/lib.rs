//! # Eloquence Core
//!
//! Audio delivery for the Eloquence speech synthesizer: the engine thread,
//! rate negotiation, resampling, equalization and device feeding that sit
//! between the native engine and the sound card.
//!
//! ## Features
//!
//! - Dedicated engine thread owning the native synthesizer
//! - Output rate follows the device's native mix rate
//! - Streaming linear resampler and parametric equalizer with headroom control
//! - Index markers reported after their audio has played
//! - Immediate silencing: once a stop is handled, nothing more of the cancelled
//!   utterance reaches the device, even when new speech is queued right behind it
//!
//! ## Example
//!
//! ```rust,no_run
//! use eloquence_core::{AudioPipeline, PipelineConfig, SpeechBatch, WavFileOutput};
//! # fn engine(_dialect: i32) -> anyhow::Result<Box<dyn eloquence_core::SynthesisEngine>> {
//! #     unimplemented!()
//! # }
//!
//! fn main() -> anyhow::Result<()> {
//!     let pipeline = AudioPipeline::builder(PipelineConfig::default())
//!         .with_engine(engine)
//!         .with_output(WavFileOutput::new("speech.wav"))
//!         .with_index_callback(|index| println!("reached {index:?}"))
//!         .initialize()?;
//!
//!     pipeline.process(SpeechBatch::new().speak("Hello, world!").index(1).finish());
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod audio_feed;
pub mod audio_sink;
pub mod config;
pub mod device;
pub mod engine;
pub mod engine_thread;
pub mod equalizer;
pub mod error;
pub mod flush;
pub mod pcm;
pub mod pipeline;
pub mod resampler;
pub mod sample_rate;
pub mod voice_resources;

// Re-export main types for convenience
pub use audio_feed::{Clock, FeedOutcome, RetryPolicy, SystemClock};
pub use audio_sink::{AudioOutput, AudioSink, CompletionCallback, PlaybackState, WavFileOutput};
pub use config::{OutputDevice, PipelineConfig};
pub use device::{SampleRateNegotiator, UnsupportedDeviceApi};
pub use engine::{
    CallbackReturn, EngineFactory, EngineParam, SynthesisEngine, VoiceParam,
    END_OF_UTTERANCE_INDEX,
};
pub use engine_thread::{EngineState, ParameterTable, SpeechBatch, SpeechCommand};
pub use equalizer::{EqBandConfig, SharedEqualizer};
pub use error::{EloquenceError, EloquenceResult};
pub use flush::{IndexCallback, NativeCallback};
pub use pipeline::{AudioPipeline, PipelineBuilder};
pub use sample_rate::{EngineSampleCode, SampleRateState};
pub use voice_resources::{Language, VoiceResources, LANGUAGES};

/// Version information for the eloquence-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
