//! Pipeline configuration, loadable from TOML.

use crate::audio_feed::RetryPolicy;
use crate::engine::VoiceParam;
use crate::equalizer::EqBandConfig;
use crate::error::{EloquenceError, EloquenceResult};
use crate::pcm::BYTES_PER_SAMPLE;
use crate::sample_rate::DEFAULT_SAMPLE_RATE;
use crate::voice_resources::{language_by_code, DEFAULT_LANGUAGE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Samples the engine renders per callback
pub const DEFAULT_ENGINE_BUFFER_SAMPLES: usize = 3300;

/// Output device selection.
///
/// Serialized as a plain string; an empty string or `"default"` selects the
/// system default device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OutputDevice {
    /// Whatever the OS considers the default render device
    #[default]
    SystemDefault,
    /// A device by its endpoint identifier
    Named(String),
}

impl OutputDevice {
    /// Endpoint identifier, if a specific device is selected
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::SystemDefault => None,
            Self::Named(id) => Some(id),
        }
    }
}

impl From<String> for OutputDevice {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("default") {
            Self::SystemDefault
        } else {
            Self::Named(trimmed.to_string())
        }
    }
}

impl From<OutputDevice> for String {
    fn from(value: OutputDevice) -> Self {
        match value {
            OutputDevice::SystemDefault => "default".to_string(),
            OutputDevice::Named(id) => id,
        }
    }
}

/// Everything needed to bring an [`crate::AudioPipeline`] up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Requested output rate in Hz, clamped to [8000, 384000]
    pub sample_rate: u32,
    /// Device to play on
    pub output_device: OutputDevice,
    /// Language code of the initial voice
    pub language: String,
    /// Directories searched for voice data and dictionaries
    pub voice_dirs: Vec<PathBuf>,
    /// Accumulated bytes that trigger a flush to the device
    pub flush_threshold_bytes: usize,
    /// Size of the engine's render buffer, in samples
    pub engine_buffer_samples: usize,
    /// Attempts per buffer before it is dropped
    pub feed_max_attempts: u32,
    /// Pause between feed attempts, in milliseconds
    pub feed_retry_delay_ms: u64,
    /// Voice parameters applied at startup, keyed by name (`rate`, `pitch`, ...)
    pub voice_params: BTreeMap<String, i32>,
    /// Ordered equalizer bands
    pub eq_bands: Vec<EqBandConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            output_device: OutputDevice::SystemDefault,
            language: DEFAULT_LANGUAGE.to_string(),
            voice_dirs: Vec::new(),
            flush_threshold_bytes: DEFAULT_ENGINE_BUFFER_SAMPLES * BYTES_PER_SAMPLE,
            engine_buffer_samples: DEFAULT_ENGINE_BUFFER_SAMPLES,
            feed_max_attempts: 10,
            feed_retry_delay_ms: 20,
            voice_params: BTreeMap::new(),
            eq_bands: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document; missing keys take their defaults
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed TOML or invalid values
    pub fn from_toml_str(text: &str) -> EloquenceResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    ///
    /// Returns a file error if the file cannot be read, otherwise as [`Self::from_toml_str`]
    pub fn from_file<P: AsRef<Path>>(path: P) -> EloquenceResult<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EloquenceError::file(format!(
                "Failed to read config {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_toml_str(&text)
    }

    /// Serialize back to TOML
    ///
    /// # Errors
    ///
    /// Returns a configuration error if serialization fails
    pub fn to_toml_string(&self) -> EloquenceResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| EloquenceError::configuration(format!("Failed to serialize config: {e}")))
    }

    /// Check values that would otherwise fail later on a worker thread
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid field
    pub fn validate(&self) -> EloquenceResult<()> {
        if self.flush_threshold_bytes == 0 {
            return Err(EloquenceError::configuration(
                "flush_threshold_bytes must be greater than zero",
            ));
        }
        if self.engine_buffer_samples == 0 {
            return Err(EloquenceError::configuration(
                "engine_buffer_samples must be greater than zero",
            ));
        }
        if self.feed_max_attempts == 0 {
            return Err(EloquenceError::configuration(
                "feed_max_attempts must be at least 1",
            ));
        }
        if language_by_code(&self.language).is_none() {
            return Err(EloquenceError::configuration(format!(
                "Unknown language: {}",
                self.language
            )));
        }
        self.initial_voice_params()?;
        Ok(())
    }

    /// Startup voice parameters in engine order
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown parameter name
    pub fn initial_voice_params(&self) -> EloquenceResult<Vec<(VoiceParam, i32)>> {
        let mut params = self
            .voice_params
            .iter()
            .map(|(name, value)| {
                VoiceParam::from_name(name)
                    .map(|param| (param, *value))
                    .ok_or_else(|| {
                        EloquenceError::configuration(format!("Unknown voice parameter: {name}"))
                    })
            })
            .collect::<EloquenceResult<Vec<_>>>()?;
        params.sort_by_key(|(param, _)| *param);
        Ok(params)
    }

    /// Retry policy for feeding the device
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.feed_max_attempts,
            delay: Duration::from_millis(self.feed_retry_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.sample_rate, 22_050);
        assert_eq!(config.flush_threshold_bytes, 6_600);
        assert_eq!(config.output_device, OutputDevice::SystemDefault);
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_from_toml_str_partial() {
        let config = PipelineConfig::from_toml_str(
            r#"
            sample_rate = 44100
            output_device = "{0.0.0.00000000}.{abc}"
            language = "deu"

            [voice_params]
            rate = 70
            pitch = 55

            [[eq_bands]]
            low_hz = 100.0
            high_hz = 400.0
            gain_db = 3.0
            "#,
        )
        .unwrap();

        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.output_device.id(), Some("{0.0.0.00000000}.{abc}"));
        assert_eq!(config.eq_bands.len(), 1);
        assert_eq!(config.flush_threshold_bytes, 6_600);
        assert_eq!(
            config.initial_voice_params().unwrap(),
            vec![(VoiceParam::Pitch, 55), (VoiceParam::Rate, 70)]
        );
    }

    #[test]
    fn test_default_device_strings() {
        assert_eq!(OutputDevice::from(String::new()), OutputDevice::SystemDefault);
        assert_eq!(OutputDevice::from("Default".to_string()), OutputDevice::SystemDefault);
        assert_eq!(
            OutputDevice::from(" speakers ".to_string()),
            OutputDevice::Named("speakers".to_string())
        );
    }

    #[test]
    fn test_malformed_toml_is_configuration_error() {
        let err = PipelineConfig::from_toml_str("sample_rate = \"fast\"").unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig {
            flush_threshold_bytes: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());

        config.flush_threshold_bytes = 100;
        config.language = "xx".to_string();
        assert!(config.validate().is_err());

        config.language = "enu".to_string();
        config.voice_params.insert("warp".to_string(), 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_and_back() {
        let config = PipelineConfig {
            sample_rate: 16_000,
            output_device: OutputDevice::Named("usb".to_string()),
            ..PipelineConfig::default()
        };
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes()).unwrap();

        let loaded = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_from_missing_file() {
        let err = PipelineConfig::from_file("/nonexistent/eloquence.toml").unwrap_err();
        assert_eq!(err.category(), "file");
    }
}
