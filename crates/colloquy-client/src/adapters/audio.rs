//! Dedicated audio I/O thread — isolates `!Send` audio resources from
//! the async runtime.
//!
//! `cpal::Stream` (capture) and `rodio::OutputStream` (playback) are
//! `!Send` on some platforms. Both are confined to a single OS thread;
//! the [`AudioThread`] handle is the `Send + Sync` proxy implementing
//! the microphone-source and playback-sink ports by routing every call
//! through a command channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use colloquy_core::config::RecordingConfig;
use colloquy_core::ports::{AudioError, MicrophoneSource, PcmBuffer, PlaybackClock, PlaybackSink};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use tokio::sync::mpsc;

/// Capture frames buffered between the audio callback and the pipeline.
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Monotonic media clock shared by the playback sink and the player.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for MonotonicClock {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

type EndHook = Box<dyn FnOnce() + Send + 'static>;

enum AudioCommand {
    StartCapture {
        config: RecordingConfig,
        frames: mpsc::Sender<Vec<f32>>,
        reply: std_mpsc::Sender<Result<(), AudioError>>,
    },
    StopCapture,
    Schedule {
        buffer: PcmBuffer,
        end_at: f64,
        on_ended: Option<EndHook>,
        reply: std_mpsc::Sender<Result<(), AudioError>>,
    },
    CancelAll,
    Pause,
    Resume,
    SetVolume(f32),
    Shutdown,
}

/// `Send + Sync` handle to the dedicated audio thread, implementing
/// both audio ports.
pub struct AudioThread {
    cmd_tx: std_mpsc::Sender<AudioCommand>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
    clock: MonotonicClock,
    capturing: AtomicBool,

    /// Bumped on `cancel_all`; invalidates pending end hooks.
    generation: Arc<AtomicU64>,
}

impl AudioThread {
    /// Spawn the audio thread and initialize the output device on it.
    pub fn spawn() -> Result<Self, AudioError> {
        let (cmd_tx, cmd_rx) = std_mpsc::channel::<AudioCommand>();
        let (init_tx, init_rx) = std_mpsc::channel::<Result<(), AudioError>>();

        let clock = MonotonicClock::new();
        let generation = Arc::new(AtomicU64::new(0));
        let actor_clock = clock.clone();
        let actor_generation = Arc::clone(&generation);

        let thread = thread::Builder::new()
            .name("colloquy-audio".into())
            .spawn(move || run_actor(&cmd_rx, &init_tx, &actor_clock, &actor_generation))
            .map_err(|e| AudioError::Output(format!("failed to spawn audio thread: {e}")))?;

        init_rx
            .recv()
            .map_err(|_| AudioError::Output("audio thread died during init".into()))??;

        Ok(Self {
            cmd_tx,
            thread: Mutex::new(Some(thread)),
            clock,
            capturing: AtomicBool::new(false),
            generation,
        })
    }

    /// The media clock backing this thread's playback scheduling.
    #[must_use]
    pub fn clock(&self) -> MonotonicClock {
        self.clock.clone()
    }

    fn send_and_recv(
        &self,
        build: impl FnOnce(std_mpsc::Sender<Result<(), AudioError>>) -> AudioCommand,
    ) -> Result<(), AudioError> {
        let (tx, rx) = std_mpsc::channel();
        self.cmd_tx
            .send(build(tx))
            .map_err(|_| AudioError::Output("audio thread is gone".into()))?;
        rx.recv()
            .map_err(|_| AudioError::Output("audio thread is gone".into()))?
    }
}

impl MicrophoneSource for AudioThread {
    fn start(&self, config: &RecordingConfig) -> Result<mpsc::Receiver<Vec<f32>>, AudioError> {
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        self.send_and_recv(|reply| AudioCommand::StartCapture {
            config: *config,
            frames: frames_tx,
            reply,
        })?;
        self.capturing.store(true, Ordering::SeqCst);
        Ok(frames_rx)
    }

    fn stop(&self) {
        let _ = self.cmd_tx.send(AudioCommand::StopCapture);
        self.capturing.store(false, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }
}

impl PlaybackSink for AudioThread {
    fn schedule(
        &self,
        buffer: PcmBuffer,
        at: f64,
        on_ended: Option<EndHook>,
    ) -> Result<(), AudioError> {
        let end_at = at + buffer.duration().as_secs_f64();
        self.send_and_recv(|reply| AudioCommand::Schedule {
            buffer,
            end_at,
            on_ended,
            reply,
        })
    }

    fn cancel_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let _ = self.cmd_tx.send(AudioCommand::CancelAll);
    }

    fn pause(&self) {
        let _ = self.cmd_tx.send(AudioCommand::Pause);
    }

    fn resume(&self) {
        let _ = self.cmd_tx.send(AudioCommand::Resume);
    }

    fn set_volume(&self, volume: f32) {
        let _ = self.cmd_tx.send(AudioCommand::SetVolume(volume));
    }
}

impl Drop for AudioThread {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(AudioCommand::Shutdown);
        if let Ok(mut slot) = self.thread.lock() {
            if let Some(handle) = slot.take() {
                let _ = handle.join();
            }
        }
    }
}

// ── Actor thread ───────────────────────────────────────────────────

fn run_actor(
    cmd_rx: &std_mpsc::Receiver<AudioCommand>,
    init_tx: &std_mpsc::Sender<Result<(), AudioError>>,
    clock: &MonotonicClock,
    generation: &Arc<AtomicU64>,
) {
    let (_output_stream, output_handle) = match rodio::OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = init_tx.send(Err(AudioError::Output(e.to_string())));
            return;
        }
    };
    if init_tx.send(Ok(())).is_err() {
        return;
    }

    // Held only to keep the device open.
    let mut _capture_stream: Option<cpal::Stream> = None;
    let mut sink: Option<rodio::Sink> = None;
    let mut volume = 1.0f32;

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            AudioCommand::StartCapture {
                config,
                frames,
                reply,
            } => {
                let result = build_capture_stream(&config, frames);
                match result {
                    Ok(stream) => {
                        _capture_stream = Some(stream);
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }

            AudioCommand::StopCapture => {
                _capture_stream = None;
            }

            AudioCommand::Schedule {
                buffer,
                end_at,
                on_ended,
                reply,
            } => {
                if sink.is_none() {
                    match rodio::Sink::try_new(&output_handle) {
                        Ok(fresh) => {
                            fresh.set_volume(volume);
                            sink = Some(fresh);
                        }
                        Err(e) => {
                            let _ = reply.send(Err(AudioError::Output(e.to_string())));
                            continue;
                        }
                    }
                }
                if let Some(active) = &sink {
                    active.append(rodio::buffer::SamplesBuffer::new(
                        buffer.channels,
                        buffer.sample_rate,
                        buffer.samples,
                    ));
                    if let Some(hook) = on_ended {
                        spawn_end_watcher(clock.clone(), end_at, generation, hook);
                    }
                    let _ = reply.send(Ok(()));
                }
            }

            AudioCommand::CancelAll => {
                if let Some(sink) = sink.take() {
                    sink.stop();
                }
            }

            AudioCommand::Pause => {
                if let Some(sink) = &sink {
                    sink.pause();
                }
            }

            AudioCommand::Resume => {
                if let Some(sink) = &sink {
                    sink.play();
                }
            }

            AudioCommand::SetVolume(v) => {
                volume = v.clamp(0.0, 1.0);
                if let Some(sink) = &sink {
                    sink.set_volume(volume);
                }
            }

            AudioCommand::Shutdown => break,
        }
    }

    tracing::debug!("audio thread shutting down");
}

/// Fire the end hook when the media clock passes the buffer's end,
/// unless the cycle was cancelled in the meantime.
fn spawn_end_watcher(
    clock: MonotonicClock,
    end_at: f64,
    generation: &Arc<AtomicU64>,
    hook: EndHook,
) {
    let generation = Arc::clone(generation);
    let armed_at = generation.load(Ordering::SeqCst);
    thread::spawn(move || {
        let remaining = end_at - clock.now();
        if remaining > 0.0 {
            thread::sleep(Duration::from_secs_f64(remaining));
        }
        if generation.load(Ordering::SeqCst) == armed_at {
            hook();
        }
    });
}

/// Build a cpal input stream forwarding mono f32 frames.
fn build_capture_stream(
    config: &RecordingConfig,
    frames: mpsc::Sender<Vec<f32>>,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AudioError::InputUnavailable("no default input device".into()))?;

    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::InputUnavailable(e.to_string()))?;
    let sample_format = supported.sample_format();

    // Prefer the requested constraints; fall back to the device default.
    let requested = StreamConfig {
        channels: config.channels,
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let (stream_config, channels) =
        if supports(&device, &requested, sample_format) {
            (requested, config.channels)
        } else {
            tracing::warn!(
                requested_rate = config.sample_rate,
                fallback_rate = supported.sample_rate().0,
                "input device rejected requested format, using default"
            );
            (supported.config(), supported.channels())
        };

    tracing::info!(
        device = %device.name().unwrap_or_default(),
        sample_rate = stream_config.sample_rate.0,
        channels,
        "audio capture initialized"
    );

    let err_fn = |err: cpal::StreamError| {
        tracing::error!(%err, "audio input stream error");
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                forward_frame(&frames, data, channels);
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let floats: Vec<f32> = data.iter().map(|&s| f32::from(s) / 32_768.0).collect();
                forward_frame(&frames, &floats, channels);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(AudioError::InputUnavailable(format!(
                "unsupported sample format: {other:?}"
            )));
        }
    }
    .map_err(|e| AudioError::InputUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::InputUnavailable(e.to_string()))?;
    Ok(stream)
}

fn supports(device: &cpal::Device, wanted: &StreamConfig, format: SampleFormat) -> bool {
    let Ok(mut configs) = device.supported_input_configs() else {
        return false;
    };
    configs.any(|range| {
        range.sample_format() == format
            && range.channels() == wanted.channels
            && range.min_sample_rate() <= wanted.sample_rate
            && wanted.sample_rate <= range.max_sample_rate()
    })
}

/// Average interleaved channels to mono and forward without blocking
/// the audio callback.
fn forward_frame(frames: &mpsc::Sender<Vec<f32>>, data: &[f32], channels: u16) {
    let mono: Vec<f32> = if channels > 1 {
        let channels = usize::from(channels);
        data.chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        data.to_vec()
    };

    if frames.try_send(mono).is_err() {
        // The pipeline is behind; dropping is better than blocking the
        // realtime callback.
        tracing::trace!("capture frame dropped");
    }
}
