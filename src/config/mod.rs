//! Command-line parsing and validation helpers.

mod defaults;
mod validation;

use clap::Parser;
use std::time::Duration;

use defaults::default_tts_cmd;
pub use defaults::{
    DEFAULT_CALIBRATION_MARGIN_DB, DEFAULT_CALIBRATION_MS, DEFAULT_CANCEL_POLL_MS,
    DEFAULT_CHAT_MODEL, DEFAULT_CHAT_TIMEOUT_MS, DEFAULT_HISTORY_PAIRS, DEFAULT_LISTEN_TIMEOUT_MS,
    DEFAULT_LOOKBACK_MS, DEFAULT_MAX_PHRASE_MS, DEFAULT_MIN_WORDS, DEFAULT_OLLAMA_URL,
    DEFAULT_PROBE_MAX_PHRASE_MS, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_SENTENCE_PAUSE_MS,
    DEFAULT_SILENCE_TAIL_MS, DEFAULT_SYSTEM_PROMPT, DEFAULT_TTS_RATE_WPM, DEFAULT_TTS_VOLUME,
    MAX_DURATION_HARD_LIMIT_MS,
};

/// CLI options for the voicechat engine. Validated values keep the audio loop
/// and downstream subprocesses safe.
#[derive(Debug, Parser, Clone)]
#[command(about = "voicechat - spoken dialogue with barge-in", author, version)]
pub struct AppConfig {
    /// Preferred audio input device name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Transcription language (ISO-639-1 code, or 'auto')
    #[arg(long, default_value = "en")]
    pub lang: String,

    /// Whisper model path (ggml format) for the primary recognizer
    #[arg(long = "whisper-model-path", env = "VOICECHAT_WHISPER_MODEL")]
    pub whisper_model_path: Option<String>,

    /// Optional second Whisper model used when the primary recognizer errors
    #[arg(long = "whisper-fallback-model-path")]
    pub whisper_fallback_model_path: Option<String>,

    /// Ollama base URL
    #[arg(long = "ollama-url", env = "VOICECHAT_OLLAMA_URL", default_value = DEFAULT_OLLAMA_URL)]
    pub ollama_url: String,

    /// Chat model name
    #[arg(long, default_value = DEFAULT_CHAT_MODEL)]
    pub model: String,

    /// Dialogue backend request timeout (milliseconds)
    #[arg(long = "chat-timeout-ms", default_value_t = DEFAULT_CHAT_TIMEOUT_MS)]
    pub chat_timeout_ms: u64,

    /// System prompt sent with every backend call
    #[arg(long = "system-prompt", default_value = DEFAULT_SYSTEM_PROMPT)]
    pub system_prompt: String,

    /// System TTS command (say, espeak-ng, espeak, flite, or a path)
    #[arg(long = "tts-cmd", default_value_t = default_tts_cmd())]
    pub tts_cmd: String,

    /// Voice name passed to the TTS engine
    #[arg(long = "tts-voice")]
    pub tts_voice: Option<String>,

    /// Speaking rate in words per minute
    #[arg(long = "tts-rate", default_value_t = DEFAULT_TTS_RATE_WPM)]
    pub tts_rate: u32,

    /// Output volume (0.0 to 1.0)
    #[arg(long = "tts-volume", default_value_t = DEFAULT_TTS_VOLUME)]
    pub tts_volume: f32,

    /// Ambient-noise calibration duration (milliseconds)
    #[arg(long = "calibration-ms", default_value_t = DEFAULT_CALIBRATION_MS)]
    pub calibration_ms: u64,

    /// dB margin above the ambient floor that counts as speech
    #[arg(long = "calibration-margin-db", default_value_t = DEFAULT_CALIBRATION_MARGIN_DB)]
    pub calibration_margin_db: f32,

    /// Normal-mode wait for speech onset before retrying (milliseconds)
    #[arg(long = "listen-timeout-ms", default_value_t = DEFAULT_LISTEN_TIMEOUT_MS)]
    pub listen_timeout_ms: u64,

    /// Maximum captured phrase duration (milliseconds)
    #[arg(long = "max-phrase-ms", default_value_t = DEFAULT_MAX_PHRASE_MS)]
    pub max_phrase_ms: u64,

    /// Barge-in probe window while the assistant is speaking (milliseconds)
    #[arg(long = "probe-timeout-ms", default_value_t = DEFAULT_PROBE_TIMEOUT_MS)]
    pub probe_timeout_ms: u64,

    /// Maximum interrupt fragment duration (milliseconds)
    #[arg(long = "probe-max-phrase-ms", default_value_t = DEFAULT_PROBE_MAX_PHRASE_MS)]
    pub probe_max_phrase_ms: u64,

    /// Silence run that ends a phrase (milliseconds)
    #[arg(long = "silence-tail-ms", default_value_t = DEFAULT_SILENCE_TAIL_MS)]
    pub silence_tail_ms: u64,

    /// Pre-onset audio retained at the start of a phrase (milliseconds)
    #[arg(long = "lookback-ms", default_value_t = DEFAULT_LOOKBACK_MS)]
    pub lookback_ms: u64,

    /// Minimum word count for an utterance to start a turn
    #[arg(long = "min-words", default_value_t = DEFAULT_MIN_WORDS)]
    pub min_words: usize,

    /// User/assistant exchange pairs kept as context
    #[arg(long = "history-pairs", default_value_t = DEFAULT_HISTORY_PAIRS)]
    pub history_pairs: usize,

    /// Pause between spoken sentences (milliseconds)
    #[arg(long = "sentence-pause-ms", default_value_t = DEFAULT_SENTENCE_PAUSE_MS)]
    pub sentence_pause_ms: u64,

    /// TTS subprocess poll interval (milliseconds)
    #[arg(long = "cancel-poll-ms", default_value_t = DEFAULT_CANCEL_POLL_MS)]
    pub cancel_poll_ms: u64,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "VOICECHAT_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "VOICECHAT_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging transcript/reply snippets (debug log only)
    #[arg(
        long = "log-content",
        env = "VOICECHAT_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,

    /// Enable verbose timing logs
    #[arg(long)]
    pub log_timings: bool,
}

/// Snapshot of the capture-side tunables handed to the worker thread.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub calibration: Duration,
    pub calibration_margin_db: f32,
    pub listen_timeout: Duration,
    pub max_phrase: Duration,
    pub probe_timeout: Duration,
    pub probe_max_phrase: Duration,
    pub silence_tail: Duration,
    pub lookback: Duration,
}

/// Snapshot of the speech-output tunables handed to the driver.
#[derive(Debug, Clone, Copy)]
pub struct SpeechConfig {
    pub sentence_pause: Duration,
    pub cancel_poll: Duration,
}

impl AppConfig {
    /// Capture-side settings for the worker and microphone.
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            calibration: Duration::from_millis(self.calibration_ms),
            calibration_margin_db: self.calibration_margin_db,
            listen_timeout: Duration::from_millis(self.listen_timeout_ms),
            max_phrase: Duration::from_millis(self.max_phrase_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            probe_max_phrase: Duration::from_millis(self.probe_max_phrase_ms),
            silence_tail: Duration::from_millis(self.silence_tail_ms),
            lookback: Duration::from_millis(self.lookback_ms),
        }
    }

    /// Output-side settings for the speech driver.
    pub fn speech_config(&self) -> SpeechConfig {
        SpeechConfig {
            sentence_pause: Duration::from_millis(self.sentence_pause_ms),
            cancel_poll: Duration::from_millis(self.cancel_poll_ms),
        }
    }
}
