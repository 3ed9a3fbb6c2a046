//! Background capture worker.
//!
//! The worker owns the microphone and switches behavior on the playback
//! state: while the engine is quiet it runs full listen windows and
//! transcribes inline; while the engine is speaking it runs short probe
//! windows whose speech-onset callback cancels playback immediately, before
//! any transcription happens. Barge-in fragments are transcribed on a
//! separate thread through a single-slot channel so the worker can keep
//! probing; a fragment that arrives while one is still pending is dropped.

use crate::audio::{AudioClip, ListenError, ListenOptions, Microphone};
use crate::config::CaptureConfig;
use crate::log_debug;
use crate::speech::InterruptHandle;
use crate::stt::RecognitionGateway;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const DEVICE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Where an utterance came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceOrigin {
    /// Captured during a quiet listening window.
    Normal,
    /// Captured while the engine was speaking (barge-in).
    Interrupt,
}

/// A transcribed piece of user speech, ready for the turn controller.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub text: String,
    pub origin: UtteranceOrigin,
    pub captured_at: Instant,
}

/// Receiving ends handed to the turn controller. Interrupt utterances must
/// be drained before normal ones.
pub struct CaptureChannels {
    pub normal: Receiver<Utterance>,
    pub interrupt: Receiver<Utterance>,
}

/// Join handles for the capture threads.
pub struct CaptureWorker {
    listener: JoinHandle<()>,
    transcriber: JoinHandle<()>,
}

impl CaptureWorker {
    /// Wait for both threads to exit. Call after clearing the running flag.
    pub fn join(self) {
        if self.listener.join().is_err() {
            log_debug("capture listener thread panicked");
        }
        if self.transcriber.join().is_err() {
            log_debug("interrupt transcription thread panicked");
        }
    }
}

/// Spawn the capture worker and its transcription helper.
pub fn spawn_capture_worker(
    mic: Arc<dyn Microphone>,
    gateway: Arc<RecognitionGateway>,
    interrupt: InterruptHandle,
    running: Arc<AtomicBool>,
    config: CaptureConfig,
) -> (CaptureWorker, CaptureChannels) {
    let (normal_tx, normal_rx) = unbounded();
    let (interrupt_tx, interrupt_rx) = unbounded();
    // Single slot: at most one barge-in fragment in flight at a time.
    let (clip_tx, clip_rx) = bounded::<(AudioClip, Instant)>(1);

    let transcriber = {
        let gateway = gateway.clone();
        thread::spawn(move || transcribe_fragments(gateway, clip_rx, interrupt_tx))
    };

    let listener = thread::spawn(move || {
        listen_loop(mic, gateway, interrupt, running, config, normal_tx, clip_tx);
    });

    (
        CaptureWorker {
            listener,
            transcriber,
        },
        CaptureChannels {
            normal: normal_rx,
            interrupt: interrupt_rx,
        },
    )
}

fn listen_loop(
    mic: Arc<dyn Microphone>,
    gateway: Arc<RecognitionGateway>,
    interrupt: InterruptHandle,
    running: Arc<AtomicBool>,
    config: CaptureConfig,
    normal_tx: Sender<Utterance>,
    clip_tx: Sender<(AudioClip, Instant)>,
) {
    while running.load(Ordering::SeqCst) {
        if interrupt.is_speaking() {
            probe_once(&*mic, &interrupt, &config, &clip_tx);
        } else {
            listen_once(&*mic, &gateway, &config, &normal_tx);
        }
    }
    log_debug("capture worker stopped");
}

/// One quiet-mode listen window: capture, transcribe inline, forward.
fn listen_once(
    mic: &dyn Microphone,
    gateway: &RecognitionGateway,
    config: &CaptureConfig,
    normal_tx: &Sender<Utterance>,
) {
    let options = ListenOptions::new(config.listen_timeout, config.max_phrase);
    match mic.listen(&options) {
        Ok(clip) => {
            let captured_at = Instant::now();
            if let Some(text) = gateway.transcribe(&clip) {
                let _ = normal_tx.send(Utterance {
                    text,
                    origin: UtteranceOrigin::Normal,
                    captured_at,
                });
            }
        }
        Err(ListenError::Timeout) => {}
        Err(ListenError::Device(err)) => {
            log_debug(&format!("microphone error during listen: {err:#}"));
            thread::sleep(DEVICE_ERROR_BACKOFF);
        }
    }
}

/// One speaking-mode probe window. The onset callback fires the interrupt as
/// soon as speech energy appears; the captured fragment is shipped to the
/// transcription thread afterwards.
fn probe_once(
    mic: &dyn Microphone,
    interrupt: &InterruptHandle,
    config: &CaptureConfig,
    clip_tx: &Sender<(AudioClip, Instant)>,
) {
    let onset = || {
        interrupt.interrupt();
    };
    let options =
        ListenOptions::new(config.probe_timeout, config.probe_max_phrase).with_onset(&onset);
    match mic.listen(&options) {
        Ok(clip) => match clip_tx.try_send((clip, Instant::now())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log_debug("interrupt fragment dropped: transcription busy");
            }
            Err(TrySendError::Disconnected(_)) => {}
        },
        Err(ListenError::Timeout) => {}
        Err(ListenError::Device(err)) => {
            log_debug(&format!("microphone error during probe: {err:#}"));
            thread::sleep(DEVICE_ERROR_BACKOFF);
        }
    }
}

/// Helper thread: turn barge-in fragments into interrupt utterances. Exits
/// when the worker drops its clip sender.
fn transcribe_fragments(
    gateway: Arc<RecognitionGateway>,
    clip_rx: Receiver<(AudioClip, Instant)>,
    interrupt_tx: Sender<Utterance>,
) {
    for (clip, captured_at) in clip_rx.iter() {
        match gateway.transcribe(&clip) {
            Some(text) => {
                let _ = interrupt_tx.send(Utterance {
                    text,
                    origin: UtteranceOrigin::Interrupt,
                    captured_at,
                });
            }
            None => log_debug("interrupt fragment had no intelligible speech"),
        }
    }
}
