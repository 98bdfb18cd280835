//! Audio platform ports: microphone input, decoded playback, clock.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::RecordingConfig;

/// Errors surfaced by the audio ports.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    /// No usable input device, or the device refused the requested
    /// constraints.
    #[error("no usable audio input device: {0}")]
    InputUnavailable(String),

    /// The platform denied access to the microphone.
    #[error("microphone permission denied")]
    PermissionDenied,

    /// The output device rejected a scheduled buffer.
    #[error("audio output error: {0}")]
    Output(String),

    /// The decoder could not produce PCM from the given bytes.
    #[error("audio decode failed: {0}")]
    Decode(String),
}

/// A decoded PCM buffer ready for scheduling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PcmBuffer {
    /// Interleaved samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,

    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Interleaved channel count.
    pub channels: u16,
}

impl PcmBuffer {
    /// Audible duration of this buffer.
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as u64 / u64::from(self.channels);
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }
}

/// A microphone delivering raw f32 frames over a channel.
///
/// `start` acquires the device under the given constraints and returns a
/// receiver of capture frames; dropping the receiver or calling `stop`
/// releases the device. Both the capture converter and the voice
/// activity detector consume the same frame stream.
pub trait MicrophoneSource: Send + Sync {
    /// Acquire the device and begin producing frames.
    fn start(&self, config: &RecordingConfig) -> Result<mpsc::Receiver<Vec<f32>>, AudioError>;

    /// Release the device and stop producing frames.
    fn stop(&self);

    /// Whether the device is currently held.
    fn is_capturing(&self) -> bool;
}

/// A monotonic media clock in seconds.
///
/// Playback scheduling is expressed against this clock so that buffers
/// can be placed back-to-back without gaps.
pub trait PlaybackClock: Send + Sync {
    /// Current media time in seconds. Never decreases.
    fn now(&self) -> f64;
}

/// An audio output that plays scheduled PCM buffers.
pub trait PlaybackSink: Send + Sync {
    /// Schedule a buffer to start at media time `at` (seconds on the
    /// companion [`PlaybackClock`]).
    ///
    /// `on_ended` is attached only to the last buffer of a scheduling
    /// pass; the sink must invoke it exactly once when that buffer
    /// finishes playing, unless the buffer is cancelled first.
    fn schedule(
        &self,
        buffer: PcmBuffer,
        at: f64,
        on_ended: Option<Box<dyn FnOnce() + Send + 'static>>,
    ) -> Result<(), AudioError>;

    /// Cancel everything scheduled and drop pending `on_ended` hooks.
    fn cancel_all(&self);

    /// Suspend output; scheduled buffers hold their position.
    fn pause(&self);

    /// Resume output after `pause`.
    fn resume(&self);

    /// Output gain, clamped to `[0.0, 1.0]`.
    fn set_volume(&self, volume: f32);
}

/// Decodes a compressed audio blob into PCM.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<PcmBuffer, AudioError>;
}
