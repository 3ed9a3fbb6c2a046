//! Text-to-speech output via a system TTS subprocess.
//!
//! One process per sentence chunk keeps `stop()` trivial and fast: killing the
//! child halts audio within the poll interval, independent of how much text
//! remained. The `TtsEngine` trait is the seam the speech driver talks
//! through; tests substitute scripted engines.

use crate::log_debug;
use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Speaker-side engine. `speak` blocks until the chunk finishes playing or
/// `stop` kills it; `stop` may be called from another thread.
pub trait TtsEngine: Send + Sync {
    fn name(&self) -> &'static str;
    fn speak(&self, chunk: &str) -> Result<()>;
    fn stop(&self);
}

/// Voice parameters applied once at startup.
#[derive(Debug, Clone)]
pub struct VoiceSettings {
    pub voice: Option<String>,
    pub rate_wpm: u32,
    pub volume: f32,
}

/// Which argument dialect the configured binary speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TtsDialect {
    Say,
    ESpeak,
    Flite,
    Other,
}

impl TtsDialect {
    fn from_cmd(cmd: &str) -> Self {
        let base = Path::new(cmd)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(cmd);
        match base {
            "say" => TtsDialect::Say,
            "espeak" | "espeak-ng" => TtsDialect::ESpeak,
            "flite" => TtsDialect::Flite,
            _ => TtsDialect::Other,
        }
    }
}

/// Drives a system TTS command (`say`, `espeak-ng`, ...) one chunk at a time.
pub struct ProcessTts {
    cmd: String,
    args: Vec<String>,
    poll: Duration,
    active: Mutex<Option<std::process::Child>>,
    stopped: AtomicBool,
}

impl ProcessTts {
    pub fn new(cmd: &str, settings: &VoiceSettings, poll: Duration) -> Self {
        let args = dialect_args(TtsDialect::from_cmd(cmd), settings);
        Self {
            cmd: cmd.to_string(),
            args,
            poll,
            active: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }
}

impl TtsEngine for ProcessTts {
    fn name(&self) -> &'static str {
        "process"
    }

    fn speak(&self, chunk: &str) -> Result<()> {
        self.stopped.store(false, Ordering::SeqCst);
        let mut cmd = Command::new(&self.cmd);
        cmd.args(&self.args);
        cmd.arg(chunk);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn TTS command '{}'", self.cmd))?;
        {
            let mut active = self
                .active
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *active = Some(child);
        }

        let status = loop {
            {
                let mut active = self
                    .active
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let Some(child) = active.as_mut() else {
                    // stop() reaped the child out from under us.
                    return Ok(());
                };
                match child.try_wait() {
                    Ok(Some(status)) => {
                        active.take();
                        break status;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        active.take();
                        return Err(anyhow!("TTS process wait failed: {err}"));
                    }
                }
            }
            thread::sleep(self.poll);
        };

        if status.success() || self.stopped.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow!("TTS command '{}' exited with {status}", self.cmd))
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(child) = active.as_mut() {
            if let Err(err) = child.kill() {
                log_debug(&format!("failed to kill TTS process: {err}"));
            }
            if let Some(mut child) = active.take() {
                let _ = child.wait();
            }
        }
    }
}

/// Map voice settings onto the binary's flag dialect.
fn dialect_args(dialect: TtsDialect, settings: &VoiceSettings) -> Vec<String> {
    let mut args = Vec::new();
    match dialect {
        TtsDialect::Say => {
            if let Some(voice) = &settings.voice {
                args.push("-v".to_string());
                args.push(voice.clone());
            }
            args.push("-r".to_string());
            args.push(settings.rate_wpm.to_string());
        }
        TtsDialect::ESpeak => {
            if let Some(voice) = &settings.voice {
                args.push("-v".to_string());
                args.push(voice.clone());
            }
            args.push("-s".to_string());
            args.push(settings.rate_wpm.to_string());
            // espeak amplitude runs 0..=200 with 100 as the default.
            let amplitude = (settings.volume.clamp(0.0, 1.0) * 200.0).round() as u32;
            args.push("-a".to_string());
            args.push(amplitude.to_string());
        }
        TtsDialect::Flite => {
            if let Some(voice) = &settings.voice {
                args.push("-voice".to_string());
                args.push(voice.clone());
            }
            args.push("-t".to_string());
        }
        TtsDialect::Other => {}
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn settings() -> VoiceSettings {
        VoiceSettings {
            voice: Some("daniel".to_string()),
            rate_wpm: 155,
            volume: 0.85,
        }
    }

    #[test]
    fn dialect_detection_uses_basename() {
        assert_eq!(TtsDialect::from_cmd("/usr/bin/espeak-ng"), TtsDialect::ESpeak);
        assert_eq!(TtsDialect::from_cmd("say"), TtsDialect::Say);
        assert_eq!(TtsDialect::from_cmd("flite"), TtsDialect::Flite);
        assert_eq!(TtsDialect::from_cmd("custom-tts"), TtsDialect::Other);
    }

    #[test]
    fn espeak_args_include_rate_voice_and_amplitude() {
        let args = dialect_args(TtsDialect::ESpeak, &settings());
        assert_eq!(args, vec!["-v", "daniel", "-s", "155", "-a", "170"]);
    }

    #[test]
    fn say_args_skip_missing_voice() {
        let mut cfg = settings();
        cfg.voice = None;
        let args = dialect_args(TtsDialect::Say, &cfg);
        assert_eq!(args, vec!["-r", "155"]);
    }

    #[cfg(unix)]
    #[test]
    fn speak_runs_a_fast_command_to_completion() {
        let tts = ProcessTts::new("/bin/echo", &settings(), Duration::from_millis(10));
        assert!(tts.speak("hello").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn stop_kills_a_long_running_chunk_quickly() {
        let tts = Arc::new(ProcessTts::new(
            "/bin/sleep",
            &VoiceSettings {
                voice: None,
                rate_wpm: 155,
                volume: 0.85,
            },
            Duration::from_millis(10),
        ));
        let speaker = tts.clone();
        let handle = thread::spawn(move || speaker.speak("5"));

        // Give the child a moment to spawn before stopping it.
        thread::sleep(Duration::from_millis(100));
        let start = Instant::now();
        tts.stop();
        let result = handle.join().expect("speak thread");
        assert!(result.is_ok(), "stopped chunk should not error: {result:?}");
        assert!(
            start.elapsed() < Duration::from_secs(1),
            "stop should return well before the chunk would have finished"
        );
    }

    #[cfg(unix)]
    #[test]
    fn speak_reports_spawn_failure() {
        let tts = ProcessTts::new("/no/such/tts-binary", &settings(), Duration::from_millis(10));
        assert!(tts.speak("hello").is_err());
    }
}
