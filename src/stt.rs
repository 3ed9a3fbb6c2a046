//! Speech-to-text: the `Recognizer` seam, the Whisper implementation, and the
//! gateway that folds service failures into a benign no-match.
//!
//! The model is loaded once and reused across captures to avoid repeated
//! initialization overhead.

use crate::audio::AudioClip;
use crate::{log_debug, log_debug_content};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Why a recognition attempt produced no text.
#[derive(Debug)]
pub enum RecognizeError {
    /// The audio did not contain intelligible speech. Benign; discard and
    /// move on.
    NoMatch,
    /// The recognizer itself failed (model error, resource exhaustion).
    Service(anyhow::Error),
}

impl fmt::Display for RecognizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognizeError::NoMatch => write!(f, "no intelligible speech"),
            RecognizeError::Service(err) => write!(f, "recognizer failure: {err:#}"),
        }
    }
}

/// A speech-to-text engine. Implementations must be callable from the capture
/// worker and its transcription helper thread.
pub trait Recognizer: Send + Sync {
    fn name(&self) -> &'static str;
    fn recognize(&self, clip: &AudioClip, lang: &str) -> Result<String, RecognizeError>;
}

/// Primary/fallback recognizer pair with the error policy from the engine's
/// contract: a single failed recognition is never fatal, and a failed fallback
/// looks exactly like a no-match to the caller.
pub struct RecognitionGateway {
    primary: Box<dyn Recognizer>,
    fallback: Option<Box<dyn Recognizer>>,
    lang: String,
}

impl RecognitionGateway {
    pub fn new(primary: Box<dyn Recognizer>, fallback: Option<Box<dyn Recognizer>>, lang: String) -> Self {
        Self {
            primary,
            fallback,
            lang,
        }
    }

    /// Transcribe a clip, returning sanitized text or `None` when nothing
    /// usable came back.
    pub fn transcribe(&self, clip: &AudioClip) -> Option<String> {
        match self.primary.recognize(clip, &self.lang) {
            Ok(text) => non_empty(sanitize_transcript(&text)),
            Err(RecognizeError::NoMatch) => None,
            Err(RecognizeError::Service(err)) => {
                log_debug(&format!(
                    "recognizer '{}' failed: {err:#}",
                    self.primary.name()
                ));
                let fallback = self.fallback.as_ref()?;
                match fallback.recognize(clip, &self.lang) {
                    Ok(text) => non_empty(sanitize_transcript(&text)),
                    Err(RecognizeError::NoMatch) => None,
                    Err(RecognizeError::Service(err)) => {
                        log_debug(&format!(
                            "fallback recognizer '{}' failed: {err:#}",
                            fallback.name()
                        ));
                        None
                    }
                }
            }
        }
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        log_debug_content(&format!("transcript: {text}"));
        Some(text)
    }
}

/// Strip non-speech markers the model emits for silence/noise and collapse
/// whitespace.
pub fn sanitize_transcript(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    static NON_SPEECH_RE: OnceLock<Regex> = OnceLock::new();
    let re = NON_SPEECH_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\[\s*\]|\(\s*\)|\[(?:\s*(?:silence|noise|inaudible|blank_audio|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background)\s*)\]|\((?:\s*(?:silence|noise|inaudible|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background|wind blowing)\s*)\)",
        )
        .expect("non-speech regex should compile")
    });
    let without_markers = re.replace_all(trimmed, " ");
    without_markers
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(unix)]
mod whisper {
    use super::{RecognizeError, Recognizer};
    use crate::audio::AudioClip;
    use crate::log_debug;
    use anyhow::{anyhow, Context, Result};
    use std::io;
    use std::os::raw::{c_char, c_uint, c_void};
    use std::os::unix::io::AsRawFd;
    use std::sync::Once;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    /// Whisper model context for speech-to-text.
    ///
    /// Holds the loaded GGML model in memory. Create once at startup and reuse
    /// for all recognition requests.
    pub struct WhisperRecognizer {
        ctx: WhisperContext,
    }

    impl WhisperRecognizer {
        /// Loads the Whisper model from disk.
        ///
        /// Temporarily redirects stderr to `/dev/null` during loading because
        /// whisper.cpp emits verbose initialization messages.
        pub fn new(model_path: &str) -> Result<Self> {
            install_whisper_log_silencer();

            let null = std::fs::OpenOptions::new()
                .write(true)
                .open("/dev/null")
                .context("failed to open /dev/null")?;
            let null_fd = null.as_raw_fd();

            // SAFETY: dup(2) duplicates the stderr file descriptor. We restore
            // it after model loading completes; we hold the only reference.
            let orig_stderr = unsafe { libc::dup(2) };
            if orig_stderr < 0 {
                return Err(anyhow!(
                    "failed to dup stderr: {}",
                    io::Error::last_os_error()
                ));
            }

            let dup_result = unsafe { libc::dup2(null_fd, 2) };
            if dup_result < 0 {
                unsafe {
                    libc::close(orig_stderr);
                }
                return Err(anyhow!(
                    "failed to redirect stderr: {}",
                    io::Error::last_os_error()
                ));
            }

            let ctx_result =
                WhisperContext::new_with_params(model_path, WhisperContextParameters::default());

            let restore_result = unsafe { libc::dup2(orig_stderr, 2) };
            unsafe {
                libc::close(orig_stderr);
            }
            if restore_result < 0 {
                return Err(anyhow!(
                    "failed to restore stderr: {}",
                    io::Error::last_os_error()
                ));
            }

            let ctx = ctx_result.context("failed to load whisper model")?;
            Ok(Self { ctx })
        }
    }

    impl Recognizer for WhisperRecognizer {
        fn name(&self) -> &'static str {
            "whisper"
        }

        fn recognize(&self, clip: &AudioClip, lang: &str) -> Result<String, RecognizeError> {
            let mut state = self
                .ctx
                .create_state()
                .context("failed to create whisper state")
                .map_err(RecognizeError::Service)?;
            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            if lang.eq_ignore_ascii_case("auto") {
                params.set_language(None);
                params.set_detect_language(true);
            } else {
                params.set_language(Some(lang));
                params.set_detect_language(false);
            }
            // Limit CPU usage so laptops don't max out all cores.
            params.set_n_threads(num_cpus::get().min(8) as i32);
            params.set_print_progress(false);
            params.set_print_timestamps(false);
            params.set_print_special(false);
            params.set_print_realtime(false);
            params.set_translate(false);
            params.set_token_timestamps(false);
            state
                .full(params, &clip.samples)
                .map_err(|err| RecognizeError::Service(anyhow!("whisper inference failed: {err}")))?;

            let mut transcript = String::new();
            let num_segments = match state.full_n_segments() {
                Ok(count) => count,
                Err(err) => {
                    log_debug(&format!("Whisper failed to read segment count: {err}"));
                    return Err(RecognizeError::NoMatch);
                }
            };
            if num_segments <= 0 {
                return Err(RecognizeError::NoMatch);
            }
            // Whisper splits output into small segments; stitch them together.
            for i in 0..num_segments {
                match state.full_get_segment_text_lossy(i) {
                    Ok(text) => transcript.push_str(&text),
                    Err(err) => log_debug(&format!("Failed to read whisper segment {i}: {err}")),
                }
            }
            let filtered = transcript.replace("[BLANK_AUDIO]", "");
            if filtered.trim().is_empty() {
                Err(RecognizeError::NoMatch)
            } else {
                Ok(filtered)
            }
        }
    }

    fn install_whisper_log_silencer() {
        static INSTALL_LOG_CALLBACK: Once = Once::new();
        INSTALL_LOG_CALLBACK.call_once(|| unsafe {
            whisper_rs::set_log_callback(Some(whisper_log_callback), std::ptr::null_mut());
        });
    }

    #[allow(unused_variables)]
    unsafe extern "C" fn whisper_log_callback(
        _level: c_uint,
        _text: *const c_char,
        _user_data: *mut c_void,
    ) {
        // Silence the default whisper.cpp logger so it does not pollute stdout.
    }
}

#[cfg(unix)]
pub use whisper::WhisperRecognizer;

#[cfg(not(unix))]
mod whisper {
    use super::{RecognizeError, Recognizer};
    use crate::audio::AudioClip;
    use anyhow::{anyhow, Result};

    /// Stub implementation for unsupported targets such as Windows.
    pub struct WhisperRecognizer;

    impl WhisperRecognizer {
        pub fn new(_: &str) -> Result<Self> {
            Err(anyhow!(
                "Whisper transcription is currently supported only on Unix-like platforms"
            ))
        }
    }

    impl Recognizer for WhisperRecognizer {
        fn name(&self) -> &'static str {
            "whisper"
        }

        fn recognize(&self, _: &AudioClip, _: &str) -> Result<String, RecognizeError> {
            Err(RecognizeError::Service(anyhow!(
                "Whisper transcription is currently supported only on Unix-like platforms"
            )))
        }
    }
}

#[cfg(not(unix))]
pub use whisper::WhisperRecognizer;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::TARGET_RATE;
    use anyhow::anyhow;

    fn clip() -> AudioClip {
        AudioClip {
            samples: vec![0.0; 160],
            sample_rate: TARGET_RATE,
        }
    }

    struct ScriptedRecognizer {
        result: fn() -> Result<String, RecognizeError>,
    }

    impl Recognizer for ScriptedRecognizer {
        fn name(&self) -> &'static str {
            "scripted"
        }
        fn recognize(&self, _: &AudioClip, _: &str) -> Result<String, RecognizeError> {
            (self.result)()
        }
    }

    #[cfg(unix)]
    #[test]
    fn whisper_rejects_missing_model() {
        assert!(WhisperRecognizer::new("/no/such/model.bin").is_err());
    }

    #[test]
    fn sanitize_strips_non_speech_markers() {
        assert_eq!(sanitize_transcript("  [silence] hello   there (noise) "), "hello there");
        assert_eq!(sanitize_transcript("[BLANK_AUDIO]"), "");
    }

    #[test]
    fn sanitize_collapses_whitespace() {
        assert_eq!(sanitize_transcript("one \n two\t three"), "one two three");
    }

    #[test]
    fn gateway_returns_sanitized_primary_text() {
        let gateway = RecognitionGateway::new(
            Box::new(ScriptedRecognizer {
                result: || Ok("  hello   world ".to_string()),
            }),
            None,
            "en".to_string(),
        );
        assert_eq!(gateway.transcribe(&clip()), Some("hello world".to_string()));
    }

    #[test]
    fn gateway_no_match_yields_none() {
        let gateway = RecognitionGateway::new(
            Box::new(ScriptedRecognizer {
                result: || Err(RecognizeError::NoMatch),
            }),
            None,
            "en".to_string(),
        );
        assert_eq!(gateway.transcribe(&clip()), None);
    }

    #[test]
    fn gateway_service_error_without_fallback_is_none() {
        let gateway = RecognitionGateway::new(
            Box::new(ScriptedRecognizer {
                result: || Err(RecognizeError::Service(anyhow!("model exploded"))),
            }),
            None,
            "en".to_string(),
        );
        assert_eq!(gateway.transcribe(&clip()), None);
    }

    #[test]
    fn gateway_falls_back_on_service_error() {
        let gateway = RecognitionGateway::new(
            Box::new(ScriptedRecognizer {
                result: || Err(RecognizeError::Service(anyhow!("model exploded"))),
            }),
            Some(Box::new(ScriptedRecognizer {
                result: || Ok("backup heard you".to_string()),
            })),
            "en".to_string(),
        );
        assert_eq!(
            gateway.transcribe(&clip()),
            Some("backup heard you".to_string())
        );
    }

    #[test]
    fn gateway_double_failure_looks_like_no_match() {
        let gateway = RecognitionGateway::new(
            Box::new(ScriptedRecognizer {
                result: || Err(RecognizeError::Service(anyhow!("primary down"))),
            }),
            Some(Box::new(ScriptedRecognizer {
                result: || Err(RecognizeError::Service(anyhow!("fallback down"))),
            })),
            "en".to_string(),
        );
        assert_eq!(gateway.transcribe(&clip()), None);
    }
}
