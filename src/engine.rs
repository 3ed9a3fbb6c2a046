//! Turn controller: the single flow that owns the conversation.
//!
//! One loop takes the next utterance (interrupts first), decides whether it
//! is a command or a chat turn, talks to the backend, and speaks the reply.
//! Everything stateful about the dialogue (history, engine state) lives
//! here; the capture worker and speech driver only move audio and text.

use crate::backend::{BackendError, DialogueBackend};
use crate::capture::{CaptureChannels, Utterance, UtteranceOrigin};
use crate::history::{ChatTurn, ConversationHistory};
use crate::log_debug;
use crate::speech::{SessionOutcome, SpeechDriver};
use crossbeam_channel::{select, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const GREETING: &str = "Hi there, I'm listening.";
const FAREWELL: &str = "Goodbye!";
const RESET_ACK: &str = "Okay, I've cleared our conversation.";
const HELP_TEXT: &str =
    "Just talk to me. Say clear history to start over, or say exit to stop.";
const APOLOGY: &str = "Sorry, I'm having trouble thinking right now. Please try again.";

const EXIT_COMMANDS: &[&str] = &["exit", "quit", "goodbye", "stop", "end"];
const RESET_COMMANDS: &[&str] = &["clear history", "reset conversation"];

/// How long the wait loop parks before re-checking the normal queue.
const WAIT_TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl EngineState {
    fn label(self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Listening => "listening",
            EngineState::Thinking => "thinking",
            EngineState::Speaking => "speaking",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub system_prompt: String,
    pub min_words: usize,
    pub history_pairs: usize,
}

pub struct TurnController {
    backend: Arc<dyn DialogueBackend>,
    driver: SpeechDriver,
    channels: CaptureChannels,
    running: Arc<AtomicBool>,
    history: ConversationHistory,
    options: EngineOptions,
    state: EngineState,
}

impl TurnController {
    pub fn new(
        backend: Arc<dyn DialogueBackend>,
        driver: SpeechDriver,
        channels: CaptureChannels,
        running: Arc<AtomicBool>,
        options: EngineOptions,
    ) -> Self {
        let history = ConversationHistory::new(options.history_pairs);
        Self {
            backend,
            driver,
            channels,
            running,
            history,
            options,
            state: EngineState::Idle,
        }
    }

    /// Run the conversation until an exit command, a shutdown signal, or a
    /// dead capture worker ends it.
    pub fn run(&mut self) {
        tracing::info!(backend = self.backend.name(), "conversation started");
        self.say(GREETING);
        self.set_state(EngineState::Listening);
        while self.running.load(Ordering::SeqCst) {
            let Some(utterance) = self.next_utterance() else {
                break;
            };
            self.handle_utterance(utterance);
        }
        self.set_state(EngineState::Idle);
        tracing::info!("conversation ended");
    }

    /// Next utterance to act on. Interrupt utterances win over normal ones
    /// whenever both are queued. Returns None on shutdown or when the
    /// capture worker has gone away.
    fn next_utterance(&self) -> Option<Utterance> {
        while self.running.load(Ordering::SeqCst) {
            if let Ok(utterance) = self.channels.interrupt.try_recv() {
                return Some(utterance);
            }
            match self.channels.normal.try_recv() {
                Ok(utterance) => return Some(utterance),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {}
            }
            select! {
                recv(self.channels.interrupt) -> utterance => {
                    match utterance {
                        Ok(utterance) => return Some(utterance),
                        Err(_) => return None,
                    }
                }
                default(WAIT_TICK) => {}
            }
        }
        None
    }

    fn handle_utterance(&mut self, utterance: Utterance) {
        let text = utterance.text.trim();
        if utterance.origin == UtteranceOrigin::Interrupt {
            log_debug("handling barge-in utterance");
        }
        let words = text.split_whitespace().count();
        if words == 0 || (words < self.options.min_words && !is_command(text)) {
            log_debug(&format!("discarded short utterance ({words} words)"));
            return;
        }

        let normalized = normalize_command(text);
        if EXIT_COMMANDS.contains(&normalized.as_str()) {
            tracing::info!("exit command");
            self.say(FAREWELL);
            self.running.store(false, Ordering::SeqCst);
            return;
        }
        if RESET_COMMANDS.contains(&normalized.as_str()) {
            tracing::info!("history cleared");
            self.history.clear();
            self.say(RESET_ACK);
            self.set_state(EngineState::Listening);
            return;
        }
        if normalized == "help" {
            self.say(HELP_TEXT);
            self.set_state(EngineState::Listening);
            return;
        }

        self.chat_turn(text, utterance.origin);
    }

    fn chat_turn(&mut self, text: &str, origin: UtteranceOrigin) {
        self.set_state(EngineState::Thinking);
        tracing::info!(origin = ?origin, words = text.split_whitespace().count(), "chat turn");
        println!("You: {text}");
        let reply = match self
            .backend
            .chat(&self.options.system_prompt, &self.history, text)
        {
            Ok(reply) => reply,
            Err(err) => {
                log_debug(&format!("backend chat failed: {err}"));
                if matches!(err, BackendError::Unavailable(_)) {
                    tracing::warn!("backend unavailable");
                }
                // The apology still becomes the assistant turn so the
                // recorded exchange stays user/assistant balanced.
                APOLOGY.to_string()
            }
        };
        println!("Assistant: {reply}");
        self.history.push(ChatTurn::user(text));
        self.history.push(ChatTurn::assistant(reply.clone()));
        if self.say(&reply) == SessionOutcome::Interrupted {
            tracing::info!("reply interrupted");
        }
        self.set_state(EngineState::Listening);
    }

    fn say(&mut self, text: &str) -> SessionOutcome {
        self.set_state(EngineState::Speaking);
        self.driver.speak(text)
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state != state {
            tracing::debug!(from = self.state.label(), to = state.label(), "state");
            self.state = state;
        }
    }
}

/// Lowercase and strip punctuation so "Clear history." matches the command.
fn normalize_command(text: &str) -> String {
    let lowered = text.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || ch.is_whitespace() {
                ch
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Single-word commands bypass the minimum word count.
fn is_command(text: &str) -> bool {
    let normalized = normalize_command(text);
    EXIT_COMMANDS.contains(&normalized.as_str())
        || RESET_COMMANDS.contains(&normalized.as_str())
        || normalized == "help"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpeechConfig;
    use crate::speech::PlaybackControl;
    use crate::tts::TtsEngine;
    use anyhow::Result;
    use crossbeam_channel::{unbounded, Sender};
    use std::sync::Mutex;
    use std::time::Instant;

    struct RecordingTts {
        spoken: Mutex<Vec<String>>,
    }

    impl RecordingTts {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                spoken: Mutex::new(Vec::new()),
            })
        }

        fn spoken(&self) -> Vec<String> {
            self.spoken.lock().unwrap().clone()
        }
    }

    impl TtsEngine for RecordingTts {
        fn name(&self) -> &'static str {
            "recording"
        }
        fn speak(&self, chunk: &str) -> Result<()> {
            self.spoken.lock().unwrap().push(chunk.to_string());
            Ok(())
        }
        fn stop(&self) {}
    }

    #[derive(Debug, Clone)]
    struct SeenChat {
        user_text: String,
        history_len: usize,
    }

    struct ScriptedBackend {
        seen: Mutex<Vec<SeenChat>>,
        fail: bool,
    }

    impl ScriptedBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                fail: true,
            })
        }

        fn seen(&self) -> Vec<SeenChat> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl DialogueBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn check_ready(&self) -> Result<(), BackendError> {
            Ok(())
        }

        fn chat(
            &self,
            _system_prompt: &str,
            history: &ConversationHistory,
            user_text: &str,
        ) -> Result<String, BackendError> {
            self.seen.lock().unwrap().push(SeenChat {
                user_text: user_text.to_string(),
                history_len: history.len(),
            });
            if self.fail {
                Err(BackendError::Unavailable("scripted outage".to_string()))
            } else {
                Ok(format!("reply to {user_text}."))
            }
        }
    }

    struct Harness {
        controller: TurnController,
        tts: Arc<RecordingTts>,
        normal_tx: Sender<Utterance>,
        interrupt_tx: Sender<Utterance>,
    }

    fn harness(backend: Arc<dyn DialogueBackend>, min_words: usize) -> Harness {
        let tts = RecordingTts::new();
        let control = Arc::new(PlaybackControl::new());
        let driver = SpeechDriver::new(
            tts.clone(),
            control,
            SpeechConfig {
                sentence_pause: Duration::from_millis(1),
                cancel_poll: Duration::from_millis(10),
            },
        );
        let (normal_tx, normal_rx) = unbounded();
        let (interrupt_tx, interrupt_rx) = unbounded();
        let controller = TurnController::new(
            backend,
            driver,
            CaptureChannels {
                normal: normal_rx,
                interrupt: interrupt_rx,
            },
            Arc::new(AtomicBool::new(true)),
            EngineOptions {
                system_prompt: "be brief".to_string(),
                min_words,
                history_pairs: 8,
            },
        );
        Harness {
            controller,
            tts,
            normal_tx,
            interrupt_tx,
        }
    }

    fn normal(text: &str) -> Utterance {
        Utterance {
            text: text.to_string(),
            origin: UtteranceOrigin::Normal,
            captured_at: Instant::now(),
        }
    }

    fn interrupt(text: &str) -> Utterance {
        Utterance {
            text: text.to_string(),
            origin: UtteranceOrigin::Interrupt,
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn exit_command_speaks_farewell_and_stops() {
        let mut h = harness(ScriptedBackend::new(), 2);
        h.normal_tx.send(normal("Goodbye.")).unwrap();
        h.controller.run();
        let spoken = h.tts.spoken();
        assert_eq!(spoken.first().map(String::as_str), Some(GREETING));
        assert_eq!(spoken.last().map(String::as_str), Some(FAREWELL));
        assert!(!h.controller.running.load(Ordering::SeqCst));
    }

    #[test]
    fn chat_turn_speaks_reply_and_grows_history() {
        let backend = ScriptedBackend::new();
        let mut h = harness(backend.clone(), 2);
        h.normal_tx.send(normal("what is rust")).unwrap();
        h.normal_tx.send(normal("tell me more")).unwrap();
        h.normal_tx.send(normal("exit")).unwrap();
        h.controller.run();

        let seen = backend.seen();
        assert_eq!(seen.len(), 2);
        // History is passed without the in-flight user turn.
        assert_eq!(seen[0].history_len, 0);
        assert_eq!(seen[1].history_len, 2);
        assert!(h
            .tts
            .spoken()
            .iter()
            .any(|chunk| chunk == "reply to what is rust."));
    }

    #[test]
    fn reset_command_clears_history_without_backend_call() {
        let backend = ScriptedBackend::new();
        let mut h = harness(backend.clone(), 2);
        h.normal_tx.send(normal("what is rust")).unwrap();
        h.normal_tx.send(normal("Clear history.")).unwrap();
        h.normal_tx.send(normal("tell me more")).unwrap();
        h.normal_tx.send(normal("exit")).unwrap();
        h.controller.run();

        let seen = backend.seen();
        assert_eq!(seen.len(), 2);
        // The turn after the reset starts from an empty window.
        assert_eq!(seen[1].history_len, 0);
        assert!(h.tts.spoken().iter().any(|chunk| chunk == RESET_ACK));
    }

    #[test]
    fn backend_failure_speaks_apology_and_records_the_exchange() {
        let backend = ScriptedBackend::failing();
        let mut h = harness(backend.clone(), 2);
        h.normal_tx.send(normal("what is rust")).unwrap();
        h.normal_tx.send(normal("are you there")).unwrap();
        h.normal_tx.send(normal("exit")).unwrap();
        h.controller.run();

        let seen = backend.seen();
        assert_eq!(seen.len(), 2);
        // The apology stands in for the assistant turn.
        assert_eq!(seen[1].history_len, 2);
        assert!(h
            .tts
            .spoken()
            .iter()
            .any(|chunk| chunk.starts_with("Sorry,")));
    }

    #[test]
    fn short_utterances_are_discarded() {
        let backend = ScriptedBackend::new();
        let mut h = harness(backend.clone(), 2);
        h.normal_tx.send(normal("hm")).unwrap();
        h.normal_tx.send(normal("exit")).unwrap();
        h.controller.run();
        assert!(backend.seen().is_empty());
    }

    #[test]
    fn single_word_exit_survives_min_words() {
        let backend = ScriptedBackend::new();
        let mut h = harness(backend.clone(), 3);
        h.normal_tx.send(normal("stop")).unwrap();
        h.controller.run();
        assert_eq!(h.tts.spoken().last().map(String::as_str), Some(FAREWELL));
    }

    #[test]
    fn queued_interrupt_wins_over_queued_normal() {
        let backend = ScriptedBackend::new();
        let mut h = harness(backend.clone(), 2);
        h.normal_tx.send(normal("normal question here")).unwrap();
        h.interrupt_tx.send(interrupt("urgent correction here")).unwrap();
        h.normal_tx.send(normal("exit")).unwrap();
        h.controller.run();

        let seen = backend.seen();
        assert_eq!(seen[0].user_text, "urgent correction here");
        assert_eq!(seen[1].user_text, "normal question here");
    }

    #[test]
    fn help_command_speaks_usage() {
        let backend = ScriptedBackend::new();
        let mut h = harness(backend.clone(), 2);
        h.normal_tx.send(normal("Help!")).unwrap();
        h.normal_tx.send(normal("exit")).unwrap();
        h.controller.run();
        assert!(backend.seen().is_empty());
        assert!(h.tts.spoken().iter().any(|chunk| chunk.contains("clear history")));
    }

    #[test]
    fn worker_disconnect_ends_the_loop() {
        let mut h = harness(ScriptedBackend::new(), 2);
        drop(h.normal_tx);
        drop(h.interrupt_tx);
        h.controller.run();
        assert_eq!(h.tts.spoken().first().map(String::as_str), Some(GREETING));
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize_command("  Clear History!  "), "clear history");
        assert_eq!(normalize_command("Goodbye."), "goodbye");
        assert_eq!(normalize_command("reset,   conversation"), "reset conversation");
    }
}
