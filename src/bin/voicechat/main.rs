//! voicechat entrypoint: wires the microphone, recognizers, dialogue backend,
//! and speech output into one conversation loop.
//!
//! # Architecture
//!
//! - Capture worker: background audio capture, barge-in probes, STT
//! - Interrupt transcription thread: turns barge-in fragments into text
//! - Main thread: turn controller (commands, backend calls, speech output)

use anyhow::{anyhow, Context, Result};
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use voicechat::audio::{CpalMicrophone, Microphone};
use voicechat::backend::{DialogueBackend, OllamaBackend};
use voicechat::capture::spawn_capture_worker;
use voicechat::config::AppConfig;
use voicechat::engine::{EngineOptions, TurnController};
use voicechat::speech::{InterruptHandle, PlaybackControl, SpeechDriver};
use voicechat::stt::{RecognitionGateway, Recognizer, WhisperRecognizer};
use voicechat::tts::{ProcessTts, TtsEngine, VoiceSettings};
use voicechat::{init_logging, init_tracing, log_debug, log_file_path, log_panic};

static SHUTDOWN_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

fn main() {
    let config = match AppConfig::parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("voicechat: {err:#}");
            std::process::exit(2);
        }
    };

    init_logging(&config);
    init_tracing(&config);
    panic::set_hook(Box::new(|info| log_panic(info)));
    if config.logs {
        eprintln!("voicechat: logging to {}", log_file_path().display());
    }

    if config.list_input_devices {
        match CpalMicrophone::list_devices() {
            Ok(devices) if devices.is_empty() => println!("No audio input devices detected."),
            Ok(devices) => {
                for device in devices {
                    println!("{device}");
                }
            }
            Err(err) => {
                eprintln!("voicechat: failed to enumerate input devices: {err:#}");
                std::process::exit(1);
            }
        }
        return;
    }

    if let Err(err) = run(&config) {
        log_debug(&format!("fatal: {err:#}"));
        eprintln!("voicechat: {err:#}");
        std::process::exit(1);
    }
}

fn run(config: &AppConfig) -> Result<()> {
    let capture_config = config.capture_config();
    let speech_config = config.speech_config();

    let mic = Arc::new(
        CpalMicrophone::new(config.input_device.as_deref(), &capture_config)
            .context("failed to open audio input device")?,
    );
    eprintln!("voicechat: input device '{}'", mic.device_name());

    let model_path = config.whisper_model_path.as_deref().ok_or_else(|| {
        anyhow!("--whisper-model-path (or VOICECHAT_WHISPER_MODEL) is required")
    })?;
    let primary = WhisperRecognizer::new(model_path)
        .with_context(|| format!("failed to load whisper model '{model_path}'"))?;
    let fallback: Option<Box<dyn Recognizer>> = match &config.whisper_fallback_model_path {
        Some(path) => Some(Box::new(WhisperRecognizer::new(path).with_context(|| {
            format!("failed to load fallback whisper model '{path}'")
        })?)),
        None => None,
    };
    let gateway = Arc::new(RecognitionGateway::new(
        Box::new(primary),
        fallback,
        config.lang.clone(),
    ));

    let backend = OllamaBackend::new(
        &config.ollama_url,
        &config.model,
        Duration::from_millis(config.chat_timeout_ms),
    )
    .map_err(|err| anyhow!("{err}"))?;
    backend
        .check_ready()
        .map_err(|err| anyhow!("Ollama is not ready at {}: {err}", config.ollama_url))?;
    let backend: Arc<dyn DialogueBackend> = Arc::new(backend);

    let tts: Arc<dyn TtsEngine> = Arc::new(ProcessTts::new(
        &config.tts_cmd,
        &VoiceSettings {
            voice: config.tts_voice.clone(),
            rate_wpm: config.tts_rate,
            volume: config.tts_volume,
        },
        speech_config.cancel_poll,
    ));
    let control = Arc::new(PlaybackControl::new());
    let driver = SpeechDriver::new(tts.clone(), control.clone(), speech_config);
    let interrupt = InterruptHandle::new(control, tts);

    eprintln!(
        "voicechat: calibrating ambient noise ({} ms), please stay quiet...",
        config.calibration_ms
    );
    mic.calibrate(capture_config.calibration)
        .context("microphone calibration failed")?;
    log_debug(&format!(
        "calibrated speech gate at {:.1} dB",
        mic.gate_db()
    ));

    let running = Arc::new(AtomicBool::new(true));
    install_sigint_handler(running.clone());

    let (worker, channels) = spawn_capture_worker(
        mic,
        gateway,
        interrupt,
        running.clone(),
        capture_config,
    );
    let mut controller = TurnController::new(
        backend,
        driver,
        channels,
        running.clone(),
        EngineOptions {
            system_prompt: config.system_prompt.clone(),
            min_words: config.min_words,
            history_pairs: config.history_pairs,
        },
    );
    controller.run();

    running.store(false, Ordering::SeqCst);
    worker.join();
    Ok(())
}

#[cfg(unix)]
fn install_sigint_handler(running: Arc<AtomicBool>) {
    let _ = SHUTDOWN_FLAG.set(running);
    // SAFETY: the handler only performs an atomic store.
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
    }
}

#[cfg(unix)]
extern "C" fn handle_sigint(_: libc::c_int) {
    if let Some(flag) = SHUTDOWN_FLAG.get() {
        flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(not(unix))]
fn install_sigint_handler(_running: Arc<AtomicBool>) {}
