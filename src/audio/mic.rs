//! System microphone capture via CPAL with a calibrated RMS energy gate.
//!
//! A listen call waits for frame energy to cross the gate, fires the onset
//! callback, then records until a silence tail or the phrase cap. The gate
//! threshold comes from ambient calibration at startup.

use super::meter::{rms_db, METER_FLOOR_DB};
use super::{AudioClip, ListenError, ListenOptions, TARGET_RATE};
use crate::config::CaptureConfig;
use crate::log_debug;
use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const FRAME_MS: u64 = 20;
const FRAME_CHANNEL_CAPACITY: usize = 64;
/// Gate used before calibration has run.
const DEFAULT_GATE_DB: f32 = -40.0;
const MAX_DOWNSAMPLING_TAPS: usize = 129;

/// Audio input device wrapper implementing the `Microphone` seam.
pub struct CpalMicrophone {
    device: cpal::Device,
    silence_tail: Duration,
    lookback: Duration,
    margin_db: f32,
    gate_bits: AtomicU32,
}

impl CpalMicrophone {
    /// List microphone names so the CLI can expose a human-friendly selector.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices().context("no input devices available")?;
        let mut names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Create a microphone, optionally forcing a specific device so users can
    /// pick the right input when a laptop exposes several.
    pub fn new(preferred_device: Option<&str>, capture: &CaptureConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = match preferred_device {
            Some(name) => {
                let mut devices = host.input_devices().context("no input devices available")?;
                devices
                    .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    .ok_or_else(|| anyhow!("input device '{name}' not found"))?
            }
            None => host
                .default_input_device()
                .context("no default input device available")?,
        };
        Ok(Self {
            device,
            silence_tail: capture.silence_tail,
            lookback: capture.lookback,
            margin_db: capture.calibration_margin_db,
            gate_bits: AtomicU32::new(DEFAULT_GATE_DB.to_bits()),
        })
    }

    /// Get the name of the active input device.
    pub fn device_name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "Unknown Device".to_string())
    }

    /// Current speech energy threshold in dBFS.
    pub fn gate_db(&self) -> f32 {
        f32::from_bits(self.gate_bits.load(Ordering::Relaxed))
    }

    fn set_gate_db(&self, db: f32) {
        self.gate_bits.store(db.to_bits(), Ordering::Relaxed);
    }

    fn open_frame_stream(&self) -> Result<FrameStream> {
        let default_config = self.device.default_input_config()?;
        let format = default_config.sample_format();
        let device_config: StreamConfig = default_config.clone().into();
        let device_rate = device_config.sample_rate.0;
        let channels = usize::from(device_config.channels.max(1));
        let frame_samples = ((device_rate as u64 * FRAME_MS) / 1000).max(1) as usize;

        let (sender, receiver) = bounded::<Vec<f32>>(FRAME_CHANNEL_CAPACITY);
        let dropped = Arc::new(AtomicUsize::new(0));
        let assembler = Arc::new(Mutex::new(FrameAssembler::new(
            frame_samples,
            sender,
            dropped.clone(),
        )));

        let err_fn = |err| log_debug(&format!("audio_stream_error: {err}"));
        let stream = match format {
            SampleFormat::F32 => {
                let assembler = assembler.clone();
                let dropped = dropped.clone();
                self.device.build_input_stream(
                    &device_config,
                    move |data: &[f32], _| {
                        if let Ok(mut pump) = assembler.try_lock() {
                            pump.push(data, channels, |sample| sample);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )?
            }
            SampleFormat::I16 => {
                let assembler = assembler.clone();
                let dropped = dropped.clone();
                self.device.build_input_stream(
                    &device_config,
                    move |data: &[i16], _| {
                        if let Ok(mut pump) = assembler.try_lock() {
                            pump.push(data, channels, |sample| sample as f32 / 32_768.0);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )?
            }
            SampleFormat::U16 => {
                let assembler = assembler.clone();
                let dropped = dropped.clone();
                self.device.build_input_stream(
                    &device_config,
                    move |data: &[u16], _| {
                        if let Ok(mut pump) = assembler.try_lock() {
                            pump.push(data, channels, |sample| {
                                (sample as f32 - 32_768.0) / 32_768.0
                            });
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )?
            }
            other => return Err(anyhow!("unsupported sample format: {other:?}")),
        };
        stream.play()?;

        Ok(FrameStream {
            stream,
            receiver,
            device_rate,
            dropped,
        })
    }
}

struct FrameStream {
    stream: cpal::Stream,
    receiver: Receiver<Vec<f32>>,
    device_rate: u32,
    dropped: Arc<AtomicUsize>,
}

impl FrameStream {
    fn shut_down(self) {
        if let Err(err) = self.stream.pause() {
            log_debug(&format!("failed to pause audio stream: {err}"));
        }
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            log_debug(&format!("audio capture dropped {dropped} callback buffers"));
        }
    }
}

impl super::Microphone for CpalMicrophone {
    /// Sample ambient noise and set the gate to the mean frame energy plus the
    /// configured margin.
    fn calibrate(&self, duration: Duration) -> Result<()> {
        let frames = self.open_frame_stream()?;
        let deadline = Instant::now() + duration;
        let wait = Duration::from_millis(FRAME_MS);
        let mut db_sum = 0.0f64;
        let mut frame_count = 0usize;

        while Instant::now() < deadline {
            match frames.receiver.recv_timeout(wait) {
                Ok(frame) => {
                    db_sum += f64::from(rms_db(&frame));
                    frame_count += 1;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        frames.shut_down();

        if frame_count == 0 {
            return Err(anyhow!(
                "no samples captured from '{}' during calibration; check microphone permissions. {}",
                self.device_name(),
                mic_permission_hint()
            ));
        }
        let ambient_db = (db_sum / frame_count as f64) as f32;
        let gate = (ambient_db + self.margin_db).max(METER_FLOOR_DB + self.margin_db);
        self.set_gate_db(gate);
        log_debug(&format!(
            "calibration|ambient_db={ambient_db:.1}|gate_db={gate:.1}|frames={frame_count}"
        ));
        Ok(())
    }

    fn listen(&self, options: &ListenOptions<'_>) -> Result<AudioClip, ListenError> {
        let frames = self.open_frame_stream().map_err(ListenError::Device)?;
        let gate = self.gate_db();
        let wait = Duration::from_millis(FRAME_MS);
        let onset_deadline = Instant::now() + options.timeout;

        // Ring of pre-onset frames so leading syllables survive the gate delay.
        let lookback_frames = (self.lookback.as_millis() as u64 / FRAME_MS) as usize;
        let mut lookback: VecDeque<Vec<f32>> = VecDeque::with_capacity(lookback_frames + 1);
        let mut captured: Vec<f32> = Vec::new();
        let mut triggered_at: Option<Instant> = None;
        let mut silence_run = Duration::ZERO;

        let outcome = loop {
            if let Some(started) = triggered_at {
                if started.elapsed() >= options.max_phrase {
                    break Ok(());
                }
            } else if Instant::now() >= onset_deadline {
                break Err(ListenError::Timeout);
            }

            match frames.receiver.recv_timeout(wait) {
                Ok(frame) => {
                    let db = rms_db(&frame);
                    if triggered_at.is_none() {
                        if db >= gate {
                            triggered_at = Some(Instant::now());
                            if let Some(onset) = options.on_speech_start {
                                onset();
                            }
                            captured.extend(lookback.drain(..).flatten());
                            captured.extend_from_slice(&frame);
                        } else {
                            lookback.push_back(frame);
                            while lookback.len() > lookback_frames {
                                lookback.pop_front();
                            }
                        }
                    } else {
                        captured.extend_from_slice(&frame);
                        if db >= gate {
                            silence_run = Duration::ZERO;
                        } else {
                            silence_run += wait;
                            if silence_run >= self.silence_tail {
                                break Ok(());
                            }
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    if captured.is_empty() {
                        break Err(ListenError::Device(anyhow!("audio stream disconnected")));
                    }
                    break Ok(());
                }
            }
        };

        let device_rate = frames.device_rate;
        frames.shut_down();
        outcome?;

        let samples = resample_to_target_rate(&captured, device_rate);
        Ok(AudioClip {
            samples,
            sample_rate: TARGET_RATE,
        })
    }
}

fn mic_permission_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: System Settings > Privacy & Security > Microphone (enable your terminal)."
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: check PipeWire/PulseAudio permissions and ensure the device is not muted."
    }
    #[cfg(target_os = "windows")]
    {
        "Windows: Settings > Privacy & Security > Microphone (allow access for your terminal)."
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "Check OS microphone permissions."
    }
}

/// Slices the callback firehose into fixed-duration mono frames.
pub(super) struct FrameAssembler {
    frame_samples: usize,
    pending: Vec<f32>,
    scratch: Vec<f32>,
    sender: Sender<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
}

impl FrameAssembler {
    pub(super) fn new(
        frame_samples: usize,
        sender: Sender<Vec<f32>>,
        dropped: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            frame_samples: frame_samples.max(1),
            pending: Vec::with_capacity(frame_samples),
            scratch: Vec::new(),
            sender,
            dropped,
        }
    }

    pub(super) fn push<T, F>(&mut self, data: &[T], channels: usize, convert: F)
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        self.scratch.clear();
        append_downmixed_samples(&mut self.scratch, data, channels, convert);
        self.pending.extend_from_slice(&self.scratch);

        while self.pending.len() >= self.frame_samples {
            let frame: Vec<f32> = self.pending.drain(..self.frame_samples).collect();
            if let Err(err) = self.sender.try_send(frame) {
                match err {
                    TrySendError::Full(_) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    TrySendError::Disconnected(_) => break,
                }
            }
        }
    }
}

/// Downmix multi-channel input to mono while applying the provided converter
/// so the rest of the pipeline stays single-channel.
pub(super) fn append_downmixed_samples<T, F>(
    buf: &mut Vec<f32>,
    data: &[T],
    channels: usize,
    mut convert: F,
) where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    let mut acc = 0.0f32;
    let mut count = 0usize;
    for sample in data.iter().copied() {
        acc += convert(sample);
        count += 1;
        if count == channels {
            buf.push(acc / channels as f32);
            acc = 0.0;
            count = 0;
        }
    }
    if count > 0 {
        buf.push(acc / count as f32);
    }
}

/// Convert device-rate audio to 16 kHz. Decimation runs a small FIR low-pass
/// first so 44.1/48 kHz microphones do not alias.
pub(super) fn resample_to_target_rate(input: &[f32], device_rate: u32) -> Vec<f32> {
    if device_rate == 0 || input.is_empty() || device_rate == TARGET_RATE {
        return input.to_vec();
    }

    let ratio = TARGET_RATE as f32 / device_rate as f32;
    let filtered = if device_rate > TARGET_RATE {
        let taps = downsampling_tap_count(device_rate);
        low_pass_fir(input, device_rate, taps)
    } else {
        input.to_vec()
    };
    resample_linear(&filtered, ratio)
}

/// Lightweight linear resampler; good enough for short speech snippets where
/// latency matters more than phase accuracy.
pub(super) fn resample_linear(input: &[f32], ratio: f32) -> Vec<f32> {
    let input_len = input.len();
    let output_len = (input_len as f32 * ratio).round() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f32 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = src_idx - idx as f32;

        if idx + 1 < input_len {
            let sample = input[idx] * (1.0 - frac) + input[idx + 1] * frac;
            output.push(sample);
        } else {
            let pad = input.last().copied().unwrap_or(0.0);
            output.push(pad);
        }
    }

    output
}

/// Tap count scales with the decimation ratio, stays odd, and is capped so the
/// filter remains cheap.
pub(super) fn downsampling_tap_count(device_rate: u32) -> usize {
    let decimation_ratio = device_rate as f32 / TARGET_RATE as f32;
    let mut taps = (decimation_ratio * 4.0).ceil().max(11.0) as usize;
    if taps % 2 == 0 {
        taps += 1;
    }
    taps.min(MAX_DOWNSAMPLING_TAPS)
}

/// Hamming-windowed sinc low-pass applied before decimation.
pub(super) fn low_pass_fir(input: &[f32], device_rate: u32, taps: usize) -> Vec<f32> {
    if input.is_empty() || taps <= 1 {
        return input.to_vec();
    }

    let normalized_cutoff = (TARGET_RATE as f32 * 0.5 / device_rate as f32).min(0.499);
    let coeffs = design_low_pass(normalized_cutoff, taps);
    let half = taps / 2;
    let mut output = Vec::with_capacity(input.len());

    for n in 0..input.len() {
        let mut acc = 0.0;
        for (k, coeff) in coeffs.iter().enumerate() {
            if let Some(idx) = n.checked_add(k).and_then(|sum| sum.checked_sub(half)) {
                if let Some(sample) = input.get(idx) {
                    acc += *sample * coeff;
                }
            }
        }
        output.push(acc);
    }

    output
}

fn design_low_pass(normalized_cutoff: f32, taps: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    let mut coeffs = Vec::with_capacity(taps);
    let m = (taps - 1) as f32;

    for n in 0..taps {
        let centered = n as f32 - m / 2.0;
        let x = 2.0 * PI * normalized_cutoff * centered;
        let sinc = if centered == 0.0 {
            2.0 * normalized_cutoff
        } else {
            (2.0 * normalized_cutoff * x.sin()) / x
        };
        let window = if taps <= 1 {
            1.0
        } else {
            0.54 - 0.46 * ((2.0 * PI * n as f32) / m).cos()
        };
        coeffs.push(sinc * window);
    }

    let sum: f32 = coeffs.iter().sum();
    if sum != 0.0 {
        for coeff in coeffs.iter_mut() {
            *coeff /= sum;
        }
    }

    coeffs
}
