use super::defaults::{ISO_639_1_CODES, MAX_DURATION_HARD_LIMIT_MS, TTS_CMD_ALLOWLIST};
use super::AppConfig;
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::{fs, path::Path};

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize paths.
    pub fn validate(&mut self) -> Result<()> {
        if self.calibration_ms == 0 || self.calibration_ms > MAX_DURATION_HARD_LIMIT_MS {
            bail!(
                "--calibration-ms must be between 1 and {MAX_DURATION_HARD_LIMIT_MS} ms, got {}",
                self.calibration_ms
            );
        }
        if !(1.0..=40.0).contains(&self.calibration_margin_db) {
            bail!(
                "--calibration-margin-db must be between 1.0 and 40.0 dB, got {}",
                self.calibration_margin_db
            );
        }
        if self.listen_timeout_ms == 0 || self.listen_timeout_ms > MAX_DURATION_HARD_LIMIT_MS {
            bail!(
                "--listen-timeout-ms must be between 1 and {MAX_DURATION_HARD_LIMIT_MS} ms, got {}",
                self.listen_timeout_ms
            );
        }
        if self.max_phrase_ms < 500 || self.max_phrase_ms > MAX_DURATION_HARD_LIMIT_MS {
            bail!(
                "--max-phrase-ms must be between 500 and {MAX_DURATION_HARD_LIMIT_MS} ms, got {}",
                self.max_phrase_ms
            );
        }
        if !(100..=5_000).contains(&self.probe_timeout_ms) {
            bail!(
                "--probe-timeout-ms must be between 100 and 5000 ms, got {}",
                self.probe_timeout_ms
            );
        }
        if self.probe_max_phrase_ms < 500 || self.probe_max_phrase_ms > self.max_phrase_ms {
            bail!(
                "--probe-max-phrase-ms must be between 500 and --max-phrase-ms ({})",
                self.max_phrase_ms
            );
        }
        if self.silence_tail_ms < 200 || self.silence_tail_ms > self.max_phrase_ms {
            bail!(
                "--silence-tail-ms must be >=200 and <= --max-phrase-ms ({})",
                self.max_phrase_ms
            );
        }
        if self.lookback_ms > self.max_phrase_ms {
            bail!(
                "--lookback-ms ({}) cannot exceed --max-phrase-ms ({})",
                self.lookback_ms,
                self.max_phrase_ms
            );
        }
        if !(1..=20).contains(&self.min_words) {
            bail!("--min-words must be between 1 and 20, got {}", self.min_words);
        }
        if !(1..=64).contains(&self.history_pairs) {
            bail!(
                "--history-pairs must be between 1 and 64, got {}",
                self.history_pairs
            );
        }
        if self.sentence_pause_ms > 5_000 {
            bail!(
                "--sentence-pause-ms must be at most 5000 ms, got {}",
                self.sentence_pause_ms
            );
        }
        if !(10..=1_000).contains(&self.cancel_poll_ms) {
            bail!(
                "--cancel-poll-ms must be between 10 and 1000 ms, got {}",
                self.cancel_poll_ms
            );
        }
        if self.chat_timeout_ms == 0 || self.chat_timeout_ms > MAX_DURATION_HARD_LIMIT_MS {
            bail!(
                "--chat-timeout-ms must be between 1 and {MAX_DURATION_HARD_LIMIT_MS} ms, got {}",
                self.chat_timeout_ms
            );
        }
        if !(40..=600).contains(&self.tts_rate) {
            bail!("--tts-rate must be between 40 and 600 wpm, got {}", self.tts_rate);
        }
        if !(0.0..=1.0).contains(&self.tts_volume) {
            bail!(
                "--tts-volume must be between 0.0 and 1.0, got {}",
                self.tts_volume
            );
        }
        if self.model.trim().is_empty() {
            bail!("--model must not be empty");
        }
        if !self.ollama_url.starts_with("http://") && !self.ollama_url.starts_with("https://") {
            bail!("--ollama-url must start with http:// or https://");
        }

        self.tts_cmd = sanitize_binary(&self.tts_cmd, "--tts-cmd", TTS_CMD_ALLOWLIST)?;

        for (path, flag) in [
            (&self.whisper_model_path, "--whisper-model-path"),
            (
                &self.whisper_fallback_model_path,
                "--whisper-fallback-model-path",
            ),
        ] {
            if let Some(model) = path {
                let model_path = Path::new(model);
                if !model_path.exists() {
                    bail!("{flag} '{}' does not exist", model_path.display());
                }
            }
        }
        for model in [
            &mut self.whisper_model_path,
            &mut self.whisper_fallback_model_path,
        ]
        .into_iter()
        .flatten()
        {
            // Store a canonical absolute path; the model loads once at startup.
            let canonical = Path::new(model)
                .canonicalize()
                .with_context(|| format!("failed to canonicalize whisper model path '{model}'"))?;
            *model = canonical
                .to_str()
                .map(|s| s.to_string())
                .ok_or_else(|| anyhow!("whisper model path must be valid UTF-8"))?;
        }

        if self.lang.trim().is_empty() {
            bail!("--lang must not be empty");
        }
        if !self.lang.eq_ignore_ascii_case("auto") {
            if !self
                .lang
                .chars()
                .all(|ch| ch.is_ascii_alphabetic() || ch == '-' || ch == '_')
            {
                bail!("--lang must contain only alphabetic characters or '-'/'_' separators");
            }
            // Allow locale-style values but only check the leading ISO-639-1 code.
            let lang_primary = self
                .lang
                .split(['-', '_'])
                .next()
                .unwrap_or("")
                .to_ascii_lowercase();
            if !ISO_639_1_CODES.contains(&lang_primary.as_str()) {
                bail!(
                    "--lang must start with a valid ISO-639-1 code or be 'auto', got '{}'",
                    self.lang
                );
            }
        }

        Ok(())
    }
}

/// Allow either a known binary name or an existing executable path.
pub(super) fn sanitize_binary(value: &str, flag: &str, allowlist: &[&str]) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("{flag} cannot be empty");
    }
    if let Some(allowed) = allowlist
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(trimmed))
    {
        return Ok((*allowed).to_string());
    }

    let path = Path::new(trimmed);
    if path.is_absolute() || trimmed.contains(std::path::MAIN_SEPARATOR) {
        let canonical = path
            .canonicalize()
            .with_context(|| format!("failed to canonicalize {flag} '{trimmed}'"))?;
        let metadata = fs::metadata(&canonical)
            .with_context(|| format!("failed to inspect {flag} '{}'", canonical.display()))?;
        if !metadata.is_file() {
            bail!("{flag} '{}' is not a file", canonical.display());
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = metadata.permissions().mode();
            if mode & 0o111 == 0 {
                bail!(
                    "{flag} '{}' exists but is not executable (mode {:o})",
                    canonical.display(),
                    mode
                );
            }
        }
        return canonical
            .to_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("{flag} must be valid UTF-8"));
    }

    bail!("{flag} must be one of {allowlist:?} or an existing binary path");
}
