//! Microphone capture framing — fixed-size PCM16 chunks with an
//! orchestrated buffering mode.
//!
//! Raw f32 frames from the microphone port are clamped and converted to
//! 16-bit little-endian PCM, re-framed into fixed 4096-sample chunks,
//! and either emitted for immediate transmission or diverted into an
//! in-memory queue while buffering mode is on (armed just before the
//! assistant finishes speaking, so barge-in audio is not lost).

use std::collections::VecDeque;

use bytes::Bytes;

/// Samples per emitted chunk.
pub const FRAME_SAMPLES: usize = 4096;

/// Converts raw capture frames into wire-ready chunks.
#[derive(Debug, Default)]
pub struct AudioCapture {
    recording: bool,
    buffering: bool,

    /// Converted samples awaiting a full chunk.
    pending: Vec<i16>,

    /// Chunks diverted while buffering mode is on, in capture order.
    buffered: VecDeque<Bytes>,
}

impl AudioCapture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin producing chunks. Clears any partial chunk from a previous
    /// run.
    pub fn start(&mut self) {
        self.recording = true;
        self.pending.clear();
        tracing::debug!("audio capture started");
    }

    /// Stop producing chunks and discard the partial tail.
    pub fn stop(&mut self) {
        self.recording = false;
        self.pending.clear();
        tracing::debug!("audio capture stopped");
    }

    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.recording
    }

    /// Divert produced chunks into the in-memory buffer instead of
    /// emitting them.
    pub fn enable_buffering(&mut self) {
        self.buffering = true;
        tracing::debug!("capture buffering enabled");
    }

    /// Emit produced chunks directly again.
    pub fn disable_buffering(&mut self) {
        self.buffering = false;
        tracing::debug!("capture buffering disabled");
    }

    #[must_use]
    pub const fn is_buffering(&self) -> bool {
        self.buffering
    }

    /// Drain the buffered chunks in capture order.
    pub fn take_buffered(&mut self) -> Vec<Bytes> {
        self.buffered.drain(..).collect()
    }

    /// Discard all buffered chunks.
    pub fn clear_buffer(&mut self) {
        self.buffered.clear();
    }

    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Consume one raw capture frame and return the chunks to transmit.
    ///
    /// Returns an empty vec while stopped or while buffering mode is
    /// diverting chunks. All-silent chunks are dropped entirely, and
    /// leading silent samples of a chunk are trimmed so the encoder does
    /// not see a long zero run at stream start.
    pub fn push_samples(&mut self, samples: &[f32]) -> Vec<Bytes> {
        if !self.recording {
            return Vec::new();
        }

        self.pending.reserve(samples.len());
        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            self.pending
                .push((sample.clamp(-1.0, 1.0) * 32_767.0) as i16);
        }

        let mut emitted = Vec::new();
        while self.pending.len() >= FRAME_SAMPLES {
            let chunk: Vec<i16> = self.pending.drain(..FRAME_SAMPLES).collect();
            let Some(first_audible) = chunk.iter().position(|&s| s != 0) else {
                // Entirely silent: drop.
                continue;
            };

            let mut bytes = Vec::with_capacity((FRAME_SAMPLES - first_audible) * 2);
            for &sample in &chunk[first_audible..] {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            let chunk = Bytes::from(bytes);

            if self.buffering {
                self.buffered.push_back(chunk);
            } else {
                emitted.push(chunk);
            }
        }
        emitted
    }
}
