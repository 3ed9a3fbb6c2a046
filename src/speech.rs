//! Sentence-by-sentence speech playback with cross-thread cancellation.
//!
//! A reply is split into sentence chunks and spoken one at a time so that an
//! interruption lands between chunks at worst. Cancellation is keyed by a
//! monotonically increasing session id: a cancel aimed at a session that has
//! already ended is a no-op instead of killing the next reply.

use crate::config::SpeechConfig;
use crate::log_debug;
use crate::tts::TtsEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// How a speaking session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Interrupted,
}

/// Split reply text into speakable chunks on terminal punctuation.
///
/// Punctuation stays attached to its sentence. Text without any terminal
/// punctuation becomes a single chunk.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let trimmed = current.trim();
            // Punctuation-only segments (ellipses, stray periods) are not
            // worth a TTS round trip.
            if trimmed.chars().any(char::is_alphanumeric) {
                chunks.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let tail = current.trim();
    if tail.chars().any(char::is_alphanumeric) {
        chunks.push(tail.to_string());
    }
    chunks
}

/// One reply being spoken: its session id and the chunk cursor.
struct SpeakingSession {
    id: u64,
    sentences: Vec<String>,
    cursor: usize,
}

impl SpeakingSession {
    fn current(&self) -> Option<&str> {
        self.sentences.get(self.cursor).map(String::as_str)
    }

    fn advance(&mut self) {
        self.cursor += 1;
    }

    fn has_more(&self) -> bool {
        self.cursor < self.sentences.len()
    }
}

#[derive(Debug)]
struct ActiveSession {
    id: u64,
    cancelled: bool,
}

#[derive(Debug)]
struct ControlInner {
    active: Option<ActiveSession>,
    next_id: u64,
}

/// Shared playback state between the speech driver and the capture worker.
///
/// The `speaking` flag is the cheap cross-thread signal the capture worker
/// polls to pick its listening mode; the mutex-guarded session state backs
/// the actual cancel handshake.
pub struct PlaybackControl {
    inner: Mutex<ControlInner>,
    cond: Condvar,
    speaking: AtomicBool,
}

impl PlaybackControl {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ControlInner {
                active: None,
                next_id: 1,
            }),
            cond: Condvar::new(),
            speaking: AtomicBool::new(false),
        }
    }

    /// Whether a speaking session is currently active.
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    /// Id of the active session, if any.
    pub fn active_session(&self) -> Option<u64> {
        let inner = self.lock_inner();
        inner.active.as_ref().map(|session| session.id)
    }

    pub(crate) fn begin_session(&self) -> u64 {
        let mut inner = self.lock_inner();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.active = Some(ActiveSession {
            id,
            cancelled: false,
        });
        self.speaking.store(true, Ordering::SeqCst);
        id
    }

    pub(crate) fn end_session(&self, id: u64) {
        let mut inner = self.lock_inner();
        if inner.active.as_ref().is_some_and(|s| s.id == id) {
            inner.active = None;
            self.speaking.store(false, Ordering::SeqCst);
            self.cond.notify_all();
        }
    }

    /// Request cancellation of session `id`. Returns true if the session was
    /// active and not already cancelled; a stale id is ignored.
    pub fn cancel(&self, id: u64) -> bool {
        let mut inner = self.lock_inner();
        match inner.active.as_mut() {
            Some(session) if session.id == id && !session.cancelled => {
                session.cancelled = true;
                self.cond.notify_all();
                true
            }
            _ => false,
        }
    }

    fn is_cancelled(&self, id: u64) -> bool {
        let inner = self.lock_inner();
        inner
            .active
            .as_ref()
            .is_some_and(|s| s.id == id && s.cancelled)
    }

    /// Sleep for `timeout` between chunks, waking early if the session is
    /// cancelled. Returns true when cancellation cut the wait short.
    fn wait_cancelled(&self, id: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock_inner();
        loop {
            let cancelled = inner
                .active
                .as_ref()
                .is_some_and(|s| s.id == id && s.cancelled);
            if cancelled {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            inner = guard;
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, ControlInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for PlaybackControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Capture-worker-side handle for interrupting the active speaking session.
#[derive(Clone)]
pub struct InterruptHandle {
    control: Arc<PlaybackControl>,
    tts: Arc<dyn TtsEngine>,
}

impl InterruptHandle {
    pub fn new(control: Arc<PlaybackControl>, tts: Arc<dyn TtsEngine>) -> Self {
        Self { control, tts }
    }

    pub fn is_speaking(&self) -> bool {
        self.control.is_speaking()
    }

    /// Cancel the active session and kill the in-flight TTS chunk. Returns
    /// false when nothing was speaking or the session had already ended.
    pub fn interrupt(&self) -> bool {
        let Some(id) = self.control.active_session() else {
            return false;
        };
        if !self.control.cancel(id) {
            return false;
        }
        self.tts.stop();
        log_debug("playback interrupted by speech onset");
        true
    }
}

/// Speaks reply text chunk by chunk, honoring cancellation between and
/// during chunks.
pub struct SpeechDriver {
    tts: Arc<dyn TtsEngine>,
    control: Arc<PlaybackControl>,
    config: SpeechConfig,
}

impl SpeechDriver {
    pub fn new(tts: Arc<dyn TtsEngine>, control: Arc<PlaybackControl>, config: SpeechConfig) -> Self {
        Self {
            tts,
            control,
            config,
        }
    }

    pub fn control(&self) -> Arc<PlaybackControl> {
        self.control.clone()
    }

    /// Speak `text` as one session. Blocks until the last chunk finishes or
    /// the session is interrupted.
    pub fn speak(&self, text: &str) -> SessionOutcome {
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return SessionOutcome::Completed;
        }

        let mut session = SpeakingSession {
            id: self.control.begin_session(),
            sentences,
            cursor: 0,
        };
        let mut outcome = SessionOutcome::Completed;
        while let Some(chunk) = session.current() {
            if self.control.is_cancelled(session.id) {
                outcome = SessionOutcome::Interrupted;
                break;
            }
            if let Err(err) = self.tts.speak(chunk) {
                // A broken TTS chunk should not take the whole reply down.
                log_debug(&format!("TTS chunk failed: {err:#}"));
            }
            session.advance();
            if self.control.is_cancelled(session.id) {
                outcome = SessionOutcome::Interrupted;
                break;
            }
            if session.has_more()
                && self
                    .control
                    .wait_cancelled(session.id, self.config.sentence_pause)
            {
                outcome = SessionOutcome::Interrupted;
                break;
            }
        }
        self.control.end_session(session.id);
        log_debug(&format!(
            "speaking session {} {}: {}/{} chunks",
            session.id,
            match outcome {
                SessionOutcome::Completed => "completed",
                SessionOutcome::Interrupted => "interrupted",
            },
            session.cursor,
            session.sentences.len()
        ));
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use crossbeam_channel::{bounded, Receiver, Sender};
    use std::sync::Mutex as StdMutex;
    use std::thread;

    fn speech_config() -> SpeechConfig {
        SpeechConfig {
            sentence_pause: Duration::from_millis(20),
            cancel_poll: Duration::from_millis(10),
        }
    }

    /// Records spoken chunks; optionally blocks on one chunk until stop().
    struct ScriptedTts {
        spoken: StdMutex<Vec<String>>,
        block_on: Option<usize>,
        release: (Sender<()>, Receiver<()>),
    }

    impl ScriptedTts {
        fn new() -> Self {
            Self {
                spoken: StdMutex::new(Vec::new()),
                block_on: None,
                release: bounded(1),
            }
        }

        fn blocking_on(index: usize) -> Self {
            Self {
                block_on: Some(index),
                ..Self::new()
            }
        }

        fn spoken(&self) -> Vec<String> {
            self.spoken.lock().unwrap().clone()
        }
    }

    impl TtsEngine for ScriptedTts {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn speak(&self, chunk: &str) -> Result<()> {
            let index = {
                let mut spoken = self.spoken.lock().unwrap();
                spoken.push(chunk.to_string());
                spoken.len() - 1
            };
            if self.block_on == Some(index) {
                // Simulate a chunk that keeps playing until killed.
                let _ = self.release.1.recv_timeout(Duration::from_secs(5));
            }
            Ok(())
        }

        fn stop(&self) {
            let _ = self.release.0.try_send(());
        }
    }

    #[test]
    fn split_keeps_terminal_punctuation() {
        let chunks = split_sentences("Hello there! How are you today? I am fine.");
        assert_eq!(
            chunks,
            vec!["Hello there!", "How are you today?", "I am fine."]
        );
    }

    #[test]
    fn split_without_punctuation_is_one_chunk() {
        assert_eq!(split_sentences("just a fragment"), vec!["just a fragment"]);
    }

    #[test]
    fn split_ignores_blank_segments() {
        assert_eq!(split_sentences("  Okay. . "), vec!["Okay."]);
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn uninterrupted_reply_speaks_every_chunk_in_order() {
        let tts = Arc::new(ScriptedTts::new());
        let control = Arc::new(PlaybackControl::new());
        let driver = SpeechDriver::new(tts.clone(), control.clone(), speech_config());

        let outcome = driver.speak("First one. Second one. Third one.");
        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(
            tts.spoken(),
            vec!["First one.", "Second one.", "Third one."]
        );
        assert!(!control.is_speaking());
    }

    #[test]
    fn interrupt_mid_chunk_stops_remaining_chunks() {
        let tts = Arc::new(ScriptedTts::blocking_on(1));
        let control = Arc::new(PlaybackControl::new());
        let handle = InterruptHandle::new(control.clone(), tts.clone());

        let speaker = thread::spawn({
            let driver = SpeechDriver::new(tts.clone(), control.clone(), speech_config());
            move || driver.speak("One. Two. Three.")
        });

        // Wait for the second chunk to start playing, then barge in.
        let deadline = Instant::now() + Duration::from_secs(2);
        while tts.spoken().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(handle.interrupt());

        let outcome = speaker.join().expect("speaker thread");
        assert_eq!(outcome, SessionOutcome::Interrupted);
        assert_eq!(tts.spoken(), vec!["One.", "Two."]);
        assert!(!control.is_speaking());
    }

    #[test]
    fn interrupt_without_active_session_is_noop() {
        let tts = Arc::new(ScriptedTts::new());
        let control = Arc::new(PlaybackControl::new());
        let handle = InterruptHandle::new(control.clone(), tts.clone());
        assert!(!handle.interrupt());
        assert!(tts.spoken().is_empty());
    }

    #[test]
    fn stale_cancel_does_not_touch_next_session() {
        let tts = Arc::new(ScriptedTts::new());
        let control = Arc::new(PlaybackControl::new());
        let driver = SpeechDriver::new(tts.clone(), control.clone(), speech_config());

        assert_eq!(driver.speak("First reply."), SessionOutcome::Completed);
        // The first session is over; cancelling its id must not bleed into
        // the reply that follows.
        assert!(!control.cancel(1));
        assert_eq!(driver.speak("Second reply."), SessionOutcome::Completed);
        assert_eq!(tts.spoken(), vec!["First reply.", "Second reply."]);
    }

    #[test]
    fn cancel_same_session_twice_reports_false_second_time() {
        let control = PlaybackControl::new();
        let id = control.begin_session();
        assert!(control.cancel(id));
        assert!(!control.cancel(id));
        control.end_session(id);
    }

    #[test]
    fn pause_wait_wakes_early_on_cancel() {
        let control = Arc::new(PlaybackControl::new());
        let id = control.begin_session();

        let waiter = thread::spawn({
            let control = control.clone();
            move || {
                let start = Instant::now();
                let cancelled = control.wait_cancelled(id, Duration::from_secs(5));
                (cancelled, start.elapsed())
            }
        });

        thread::sleep(Duration::from_millis(50));
        assert!(control.cancel(id));
        let (cancelled, elapsed) = waiter.join().expect("waiter thread");
        assert!(cancelled);
        assert!(elapsed < Duration::from_secs(1));
        control.end_session(id);
    }
}
