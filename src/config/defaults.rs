//! Named defaults for the CLI so tuning constants live in one place.

/// Ambient-noise calibration window at startup (milliseconds).
pub const DEFAULT_CALIBRATION_MS: u64 = 1_500;

/// dB headroom added to the measured ambient floor to form the speech gate.
pub const DEFAULT_CALIBRATION_MARGIN_DB: f32 = 9.0;

/// How long a normal-mode listen waits for speech onset before retrying.
pub const DEFAULT_LISTEN_TIMEOUT_MS: u64 = 5_000;

/// Hard cap on a single captured phrase.
pub const DEFAULT_MAX_PHRASE_MS: u64 = 10_000;

/// Barge-in probe window while the assistant is speaking.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 500;

/// Cap on an interrupt fragment; barge-ins are short by nature.
pub const DEFAULT_PROBE_MAX_PHRASE_MS: u64 = 3_000;

/// Silence run that ends a phrase once speech has started.
pub const DEFAULT_SILENCE_TAIL_MS: u64 = 600;

/// Audio retained from just before speech onset so leading syllables survive.
pub const DEFAULT_LOOKBACK_MS: u64 = 300;

/// Utterances shorter than this many words are treated as noise.
pub const DEFAULT_MIN_WORDS: usize = 2;

/// User/assistant exchange pairs retained as dialogue context.
pub const DEFAULT_HISTORY_PAIRS: usize = 8;

/// Pause inserted between spoken sentences.
pub const DEFAULT_SENTENCE_PAUSE_MS: u64 = 300;

/// Poll interval for the TTS subprocess while a chunk is playing.
pub const DEFAULT_CANCEL_POLL_MS: u64 = 50;

/// Speaking rate handed to the system TTS engine (words per minute).
pub const DEFAULT_TTS_RATE_WPM: u32 = 155;

/// TTS output volume in the 0.0..=1.0 range.
pub const DEFAULT_TTS_VOLUME: f32 = 0.85;

/// Dialogue backend request timeout.
pub const DEFAULT_CHAT_TIMEOUT_MS: u64 = 60_000;

/// Local ollama daemon.
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Model the original bot shipped with; override with --model.
pub const DEFAULT_CHAT_MODEL: &str = "gemma3:latest";

/// Validation ceiling for any single duration flag.
pub const MAX_DURATION_HARD_LIMIT_MS: u64 = 120_000;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly voice assistant having a spoken \
conversation. Keep replies conversational, concrete, and under 120 words; they will be read \
aloud sentence by sentence.";

/// Platform-appropriate system TTS command.
pub fn default_tts_cmd() -> String {
    #[cfg(target_os = "macos")]
    {
        "say".to_string()
    }
    #[cfg(not(target_os = "macos"))]
    {
        "espeak-ng".to_string()
    }
}

/// Binaries we accept for --tts-cmd without a full path.
pub const TTS_CMD_ALLOWLIST: &[&str] = &["say", "espeak-ng", "espeak", "flite"];

/// ISO-639-1 primary language codes accepted by --lang.
pub const ISO_639_1_CODES: &[&str] = &[
    "aa", "ab", "ae", "af", "ak", "am", "an", "ar", "as", "av", "ay", "az", "ba", "be", "bg",
    "bh", "bi", "bm", "bn", "bo", "br", "bs", "ca", "ce", "ch", "co", "cr", "cs", "cu", "cv",
    "cy", "da", "de", "dv", "dz", "ee", "el", "en", "eo", "es", "et", "eu", "fa", "ff", "fi",
    "fj", "fo", "fr", "fy", "ga", "gd", "gl", "gn", "gu", "gv", "ha", "he", "hi", "ho", "hr",
    "ht", "hu", "hy", "hz", "ia", "id", "ie", "ig", "ii", "ik", "io", "is", "it", "iu", "ja",
    "jv", "ka", "kg", "ki", "kj", "kk", "kl", "km", "kn", "ko", "kr", "ks", "ku", "kv", "kw",
    "ky", "la", "lb", "lg", "li", "ln", "lo", "lt", "lu", "lv", "mg", "mh", "mi", "mk", "ml",
    "mn", "mr", "ms", "mt", "my", "na", "nb", "nd", "ne", "ng", "nl", "nn", "no", "nr", "nv",
    "ny", "oc", "oj", "om", "or", "os", "pa", "pi", "pl", "ps", "pt", "qu", "rm", "rn", "ro",
    "ru", "rw", "sa", "sc", "sd", "se", "sg", "si", "sk", "sl", "sm", "sn", "so", "sq", "sr",
    "ss", "st", "su", "sv", "sw", "ta", "te", "tg", "th", "ti", "tk", "tl", "tn", "to", "tr",
    "ts", "tt", "tw", "ty", "ug", "uk", "ur", "uz", "ve", "vi", "vo", "wa", "wo", "xh", "yi",
    "yo", "za", "zh", "zu",
];
