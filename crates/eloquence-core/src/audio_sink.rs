//! OS audio boundary: a sink that accepts PCM chunks, and the output that opens it.

use crate::config::OutputDevice;
use crate::error::{EloquenceError, EloquenceResult};
use crate::pcm;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Invoked once the chunk it was attached to has finished playing
pub type CompletionCallback = Arc<dyn Fn() + Send + Sync>;

/// Playback state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing queued
    Stopped,
    /// Accepting and playing audio
    Playing,
    /// Playback held
    Paused,
    /// The sink was closed
    Closed,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Playing => write!(f, "Playing"),
            Self::Paused => write!(f, "Paused"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// A device accepting mono 16-bit PCM.
///
/// Only the feed worker thread touches a sink.
#[cfg_attr(test, mockall::automock)]
pub trait AudioSink: Send {
    /// Queue a chunk. `on_done` fires after the chunk has played.
    ///
    /// # Errors
    ///
    /// Returns [`EloquenceError::DeviceBusy`] when the device cannot take more
    /// audio right now; the caller may retry
    fn feed(&mut self, pcm: &[u8], on_done: Option<CompletionCallback>) -> EloquenceResult<()>;

    /// Let queued audio drain and release the device until more arrives
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the request
    fn idle(&mut self) -> EloquenceResult<()>;

    /// Drop everything queued without firing completions
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the request
    fn stop(&mut self) -> EloquenceResult<()>;

    /// Hold or resume playback
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the request
    fn pause(&mut self, paused: bool) -> EloquenceResult<()>;

    /// Release the device for good
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails
    fn close(&mut self) -> EloquenceResult<()>;
}

/// Opens sinks; called again whenever the output rate or device changes.
pub trait AudioOutput: Send {
    /// Open a mono 16-bit sink at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns an audio device error if the device cannot be opened
    fn open(&mut self, sample_rate: u32, device: &OutputDevice) -> EloquenceResult<Box<dyn AudioSink>>;
}

/// Renders pipeline output into a WAV file instead of a device.
///
/// Each [`AudioOutput::open`] truncates the file, so a rate change restarts
/// the recording at the new rate.
#[derive(Debug, Clone)]
pub struct WavFileOutput {
    path: PathBuf,
}

impl WavFileOutput {
    /// Write to `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Target file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioOutput for WavFileOutput {
    fn open(&mut self, sample_rate: u32, device: &OutputDevice) -> EloquenceResult<Box<dyn AudioSink>> {
        debug!("Ignoring device {:?} for WAV output", device);
        Ok(Box::new(WavFileSink::create(&self.path, sample_rate)?))
    }
}

/// Sink writing 16-bit mono samples with `hound`.
pub struct WavFileSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    state: PlaybackState,
    samples_written: u64,
}

impl WavFileSink {
    /// Create (or truncate) a WAV file at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns a file error if the file cannot be created
    pub fn create<P: AsRef<Path>>(path: P, sample_rate: u32) -> EloquenceResult<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path.as_ref(), spec).map_err(|e| {
            EloquenceError::file(format!(
                "Failed to create WAV file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        info!("Writing audio to {} at {} Hz", path.as_ref().display(), sample_rate);
        Ok(Self {
            writer: Some(writer),
            state: PlaybackState::Stopped,
            samples_written: 0,
        })
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> PlaybackState {
        self.state
    }

    /// Samples written so far
    #[must_use]
    pub const fn samples_written(&self) -> u64 {
        self.samples_written
    }

    fn writer(&mut self) -> EloquenceResult<&mut hound::WavWriter<BufWriter<File>>> {
        self.writer
            .as_mut()
            .ok_or_else(|| EloquenceError::audio_device("WAV sink is closed"))
    }
}

impl AudioSink for WavFileSink {
    fn feed(&mut self, pcm_bytes: &[u8], on_done: Option<CompletionCallback>) -> EloquenceResult<()> {
        if self.state == PlaybackState::Paused {
            return Err(EloquenceError::device_busy("WAV sink is paused"));
        }
        let samples = pcm::decode(pcm_bytes);
        let writer = self.writer()?;
        for sample in &samples {
            writer.write_sample(*sample)?;
        }
        self.samples_written += samples.len() as u64;
        self.state = PlaybackState::Playing;
        if let Some(done) = on_done {
            done();
        }
        Ok(())
    }

    fn idle(&mut self) -> EloquenceResult<()> {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Stopped;
        }
        self.writer()?.flush()?;
        Ok(())
    }

    fn stop(&mut self) -> EloquenceResult<()> {
        if self.state != PlaybackState::Closed {
            self.state = PlaybackState::Stopped;
        }
        Ok(())
    }

    fn pause(&mut self, paused: bool) -> EloquenceResult<()> {
        self.state = match (paused, self.state) {
            (_, PlaybackState::Closed) => PlaybackState::Closed,
            (true, _) => PlaybackState::Paused,
            (false, PlaybackState::Paused) => PlaybackState::Stopped,
            (false, state) => state,
        };
        Ok(())
    }

    fn close(&mut self) -> EloquenceResult<()> {
        self.state = PlaybackState::Closed;
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            debug!("Closed WAV sink after {} samples", self.samples_written);
        }
        Ok(())
    }
}

impl Drop for WavFileSink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn test_playback_state_display() {
        assert_eq!(PlaybackState::Playing.to_string(), "Playing");
        assert_eq!(PlaybackState::Closed.to_string(), "Closed");
    }

    #[test]
    fn test_wav_sink_writes_samples_and_completes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.wav");
        let mut output = WavFileOutput::new(&path);
        let mut sink = output.open(16_000, &OutputDevice::SystemDefault).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let done: CompletionCallback = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sink.feed(&pcm::encode(&[1, 2, 3]), Some(done)).unwrap();
        sink.feed(&pcm::encode(&[4]), None).unwrap();
        sink.idle().unwrap();
        sink.close().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_paused_sink_reports_busy() {
        let dir = TempDir::new().unwrap();
        let mut sink = WavFileSink::create(dir.path().join("p.wav"), 8_000).unwrap();
        sink.pause(true).unwrap();
        assert_eq!(sink.state(), PlaybackState::Paused);

        let err = sink.feed(&pcm::encode(&[1]), None).unwrap_err();
        assert!(err.is_retriable());

        sink.pause(false).unwrap();
        sink.feed(&pcm::encode(&[1]), None).unwrap();
        assert_eq!(sink.samples_written(), 1);
    }

    #[test]
    fn test_closed_sink_rejects_audio() {
        let dir = TempDir::new().unwrap();
        let mut sink = WavFileSink::create(dir.path().join("c.wav"), 8_000).unwrap();
        sink.close().unwrap();
        assert_eq!(sink.state(), PlaybackState::Closed);
        assert!(sink.feed(&pcm::encode(&[1]), None).is_err());
        assert!(sink.close().is_ok());
    }
}
