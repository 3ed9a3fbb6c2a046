//! Microphone capture and the energy gate behind barge-in detection.
//!
//! Audio is captured via CPAL, downmixed to mono, and resampled to 16kHz
//! (Whisper's expected format). The `Microphone` trait is the seam the capture
//! worker talks through; tests substitute scripted microphones.

/// Target sample rate for Whisper STT.
pub const TARGET_RATE: u32 = 16_000;

mod meter;
mod mic;
#[cfg(test)]
mod tests;

pub use meter::rms_db;
pub use mic::CpalMicrophone;

use std::fmt;
use std::time::Duration;

/// Mono PCM captured from the microphone.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Why a listen call returned without audio.
#[derive(Debug)]
pub enum ListenError {
    /// No speech onset within the requested window. Benign; callers retry.
    Timeout,
    /// The audio stack failed (device lost, stream error).
    Device(anyhow::Error),
}

impl fmt::Display for ListenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenError::Timeout => write!(f, "no speech within the listen window"),
            ListenError::Device(err) => write!(f, "audio device error: {err:#}"),
        }
    }
}

/// Parameters for one listen call.
///
/// `on_speech_start` fires the moment the energy gate opens, before the phrase
/// finishes recording. Barge-in cancellation hangs off this callback so stop
/// latency is not gated on end-of-phrase or transcription.
pub struct ListenOptions<'a> {
    pub timeout: Duration,
    pub max_phrase: Duration,
    pub on_speech_start: Option<&'a (dyn Fn() + Sync)>,
}

impl<'a> ListenOptions<'a> {
    pub fn new(timeout: Duration, max_phrase: Duration) -> Self {
        Self {
            timeout,
            max_phrase,
            on_speech_start: None,
        }
    }

    pub fn with_onset(mut self, callback: &'a (dyn Fn() + Sync)) -> Self {
        self.on_speech_start = Some(callback);
        self
    }
}

/// Exclusive owner of the input device. Exactly one capture worker holds this
/// per engine session.
pub trait Microphone: Send + Sync {
    /// Sample ambient noise and derive the speech energy threshold.
    fn calibrate(&self, duration: Duration) -> anyhow::Result<()>;

    /// Wait for speech onset, then record until silence or the phrase cap.
    fn listen(&self, options: &ListenOptions<'_>) -> Result<AudioClip, ListenError>;
}
