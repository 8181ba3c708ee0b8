//! Boundary to the native synthesis engine.
//!
//! The engine is an opaque library driven through a handful of calls: queue
//! text and index markers, start or stop synthesis, read and write numeric
//! parameters, load dictionaries. It reports progress through one registered
//! callback (see [`crate::flush::NativeCallback`]). Implementations live in
//! the host; this crate only defines the contract and drives it from the
//! engine thread.

use crate::flush::NativeCallback;
use std::path::Path;

/// Index value the engine reports when it reaches the end of queued text
pub const END_OF_UTTERANCE_INDEX: u32 = 0xFFFF;

/// Voice slot that holds the active voice
pub const ACTIVE_VOICE: u32 = 0;

/// Per-voice parameters, numbered as the engine numbers them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VoiceParam {
    /// Male or female voice
    Gender = 0,
    /// Head size
    HeadSize = 1,
    /// Base pitch
    Pitch = 2,
    /// Pitch fluctuation (inflection)
    Fluctuation = 3,
    /// Roughness
    Roughness = 4,
    /// Breathiness
    Breathiness = 5,
    /// Speaking rate
    Rate = 6,
    /// Volume
    Volume = 7,
}

impl VoiceParam {
    /// Every voice parameter in engine order
    pub const ALL: [Self; 8] = [
        Self::Gender,
        Self::HeadSize,
        Self::Pitch,
        Self::Fluctuation,
        Self::Roughness,
        Self::Breathiness,
        Self::Rate,
        Self::Volume,
    ];

    /// Parameters refreshed after a variant is copied into the active slot
    pub const VARIANT_CONTROLLED: [Self; 7] = [
        Self::Rate,
        Self::Pitch,
        Self::Volume,
        Self::Fluctuation,
        Self::HeadSize,
        Self::Roughness,
        Self::Breathiness,
    ];

    /// Numeric id used by the engine
    #[must_use]
    pub const fn id(self) -> i32 {
        self as i32
    }

    /// Look a parameter up by its engine id
    #[must_use]
    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|param| param.id() == id)
    }

    /// Look a parameter up by its configuration name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|param| param.name() == name)
    }

    /// Configuration name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gender => "gender",
            Self::HeadSize => "head_size",
            Self::Pitch => "pitch",
            Self::Fluctuation => "fluctuation",
            Self::Roughness => "roughness",
            Self::Breathiness => "breathiness",
            Self::Rate => "rate",
            Self::Volume => "volume",
        }
    }
}

impl std::fmt::Display for VoiceParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Engine-wide parameters the pipeline touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EngineParam {
    /// Whether inline annotations in text are honoured
    InputType = 1,
    /// Rendering sample-rate code
    SampleRate = 5,
    /// Active language dialect
    LanguageDialect = 9,
}

impl EngineParam {
    /// Numeric id used by the engine
    #[must_use]
    pub const fn id(self) -> i32 {
        self as i32
    }
}

/// Kinds of message the native callback receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// PCM samples are waiting in the output buffer
    Waveform,
    /// Phoneme data (ignored)
    Phoneme,
    /// An index marker was reached
    IndexReply,
}

impl CallbackKind {
    /// Map the raw message number
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Waveform),
            1 => Some(Self::Phoneme),
            2 => Some(Self::IndexReply),
            _ => None,
        }
    }
}

/// Value the native callback hands back to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CallbackReturn {
    /// The data was not consumed; the engine should offer it again
    DataNotProcessed = 0,
    /// The data was consumed
    DataProcessed = 1,
    /// Synthesis is no longer wanted; the engine should halt output
    DataAbort = 2,
}

/// Dictionary volumes loaded at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DictionaryVolume {
    /// Whole-word dictionary
    Main = 0,
    /// Root-form dictionary
    Root = 1,
    /// Abbreviation dictionary
    Abbreviation = 2,
}

impl DictionaryVolume {
    /// Volumes in load order
    pub const ALL: [Self; 3] = [Self::Main, Self::Root, Self::Abbreviation];

    /// File stem shared by every language, e.g. `main` in `enumain.dic`
    #[must_use]
    pub const fn stem(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Root => "root",
            Self::Abbreviation => "abbr",
        }
    }
}

/// The native synthesis engine.
///
/// Only the engine thread ever holds an instance, so implementations need not
/// be `Send`. Dropping the instance deletes the native handle.
pub trait SynthesisEngine {
    /// Register the callback that receives audio and index events
    fn register_callback(&mut self, callback: NativeCallback);

    /// Size, in samples, of the buffer audio is rendered into
    fn set_output_buffer(&mut self, samples: usize);

    /// Queue text (with inline annotations) for synthesis
    fn add_text(&mut self, text: &str);

    /// Queue an index marker after the text queued so far
    fn insert_index(&mut self, index: u32);

    /// Start synthesizing everything queued
    fn synthesize(&mut self);

    /// Abort synthesis and discard queued text
    fn stop(&mut self);

    /// Write an engine-wide parameter
    fn set_param(&mut self, param: EngineParam, value: i32);

    /// Read an engine-wide parameter
    fn param(&self, param: EngineParam) -> i32;

    /// Write a parameter of the voice in `voice` slot
    fn set_voice_param(&mut self, voice: u32, param: VoiceParam, value: i32);

    /// Read a parameter of the voice in `voice` slot
    fn voice_param(&self, voice: u32, param: VoiceParam) -> i32;

    /// Copy the preset voice `from` into slot `to`
    fn copy_voice(&mut self, from: u32, to: u32);

    /// Load one dictionary volume from a file
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the file
    fn load_dictionary(&mut self, volume: DictionaryVolume, path: &Path) -> anyhow::Result<()>;
}

/// Creates the native engine on the engine thread.
pub trait EngineFactory: Send {
    /// Create an engine for a language dialect
    ///
    /// # Errors
    ///
    /// Returns an error if the engine library is missing or refuses the dialect
    fn create(&mut self, dialect: i32) -> anyhow::Result<Box<dyn SynthesisEngine>>;
}

impl<F> EngineFactory for F
where
    F: FnMut(i32) -> anyhow::Result<Box<dyn SynthesisEngine>> + Send,
{
    fn create(&mut self, dialect: i32) -> anyhow::Result<Box<dyn SynthesisEngine>> {
        self(dialect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_param_ids() {
        assert_eq!(VoiceParam::Rate.id(), 6);
        assert_eq!(VoiceParam::from_id(7), Some(VoiceParam::Volume));
        assert_eq!(VoiceParam::from_id(8), None);
        assert_eq!(VoiceParam::from_name("head_size"), Some(VoiceParam::HeadSize));
    }

    #[test]
    fn test_callback_kind_from_raw() {
        assert_eq!(CallbackKind::from_raw(0), Some(CallbackKind::Waveform));
        assert_eq!(CallbackKind::from_raw(2), Some(CallbackKind::IndexReply));
        assert_eq!(CallbackKind::from_raw(9), None);
    }

    #[test]
    fn test_dictionary_stems() {
        let stems: Vec<_> = DictionaryVolume::ALL.iter().map(|v| v.stem()).collect();
        assert_eq!(stems, vec!["main", "root", "abbr"]);
    }
}
