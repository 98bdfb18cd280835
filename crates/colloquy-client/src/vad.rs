//! Voice activity detection — speech boundaries and the debounced
//! silence signal that ends a user turn.
//!
//! Detection is RMS energy thresholding with hysteresis: the 0–1
//! detection thresholds are resolved at construction into an RMS band
//! between the ambient noise floor and conversational speech level. A
//! frame must exceed the upper (onset) level to count towards speech
//! onset, and speech ends only when energy drops below the lower
//! (release) level; energies inside the band hold the current state.
//! The silence signal is clocked by accumulated frame durations; frames
//! flow continuously while the microphone is open, so this is
//! equivalent to a wall timer while staying deterministic.

/// RMS level treated as the ambient noise floor (threshold 0.0).
const NOISE_FLOOR_RMS: f32 = 0.002;

/// RMS level of loud conversational speech (threshold 1.0).
const SPEECH_RMS: f32 = 0.06;

/// VAD tuning parameters.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Silence duration after speech end before the turn is considered
    /// over, in milliseconds.
    pub silence_timeout_ms: u32,

    /// Detection threshold (0.0–1.0) a frame must exceed to count as
    /// speech onset.
    pub positive_threshold: f32,

    /// Detection threshold (0.0–1.0) below which a frame counts as
    /// silence once speaking.
    pub negative_threshold: f32,

    /// Consecutive speech frames required before `SpeechStart` fires.
    pub min_speech_frames: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_timeout_ms: 300,
            positive_threshold: 0.5,
            negative_threshold: 0.35,
            min_speech_frames: 3,
        }
    }
}

/// Current detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// Waiting for speech to start.
    Listening,

    /// Speech in progress.
    Speaking,
}

/// Events produced by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// The user started speaking.
    SpeechStart,

    /// The user stopped speaking; the silence countdown is armed.
    SpeechEnd,

    /// The debounced end-of-turn signal. Fires at most once per speech
    /// segment; a new speech start re-arms it.
    Silence,
}

/// Energy-based voice activity detector.
pub struct VoiceActivityDetector {
    config: VadConfig,
    sample_rate: u32,
    state: VadState,
    active: bool,

    /// RMS level a frame must reach to count towards speech onset.
    onset_energy: f32,

    /// RMS level below which a frame counts as silence once speaking.
    /// Always at or under `onset_energy`.
    release_energy: f32,

    /// Consecutive onset frames observed while listening.
    speech_streak: u32,

    /// Whether the silence countdown is armed (speech ended, signal not
    /// yet fired).
    silence_pending: bool,

    /// Milliseconds accumulated since the countdown was armed.
    silence_elapsed_ms: f32,

    /// One-shot latch for the current speech segment.
    silence_fired: bool,
}

impl VoiceActivityDetector {
    #[must_use]
    pub fn new(config: VadConfig, sample_rate: u32) -> Self {
        let band = SPEECH_RMS - NOISE_FLOOR_RMS;
        let onset_energy = NOISE_FLOOR_RMS + band * config.positive_threshold.clamp(0.0, 1.0);
        let release_energy = NOISE_FLOOR_RMS + band * config.negative_threshold.clamp(0.0, 1.0);

        Self {
            config,
            sample_rate,
            state: VadState::Listening,
            active: false,
            onset_energy,
            release_energy: release_energy.min(onset_energy),
            speech_streak: 0,
            silence_pending: false,
            silence_elapsed_ms: 0.0,
            silence_fired: false,
        }
    }

    /// Begin monitoring. Clears all detection state.
    pub fn start(&mut self) {
        self.active = true;
        self.reset();
        tracing::debug!("VAD started");
    }

    /// Stop monitoring.
    pub fn stop(&mut self) {
        self.active = false;
        self.reset();
        tracing::debug!("VAD stopped");
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn state(&self) -> VadState {
        self.state
    }

    /// Process one frame of mono f32 samples, returning at most one event.
    pub fn process_frame(&mut self, frame: &[f32]) -> Option<VadEvent> {
        if !self.active || frame.is_empty() {
            return None;
        }

        let sum_squares: f32 = frame.iter().map(|&s| s * s).sum();
        #[allow(clippy::cast_precision_loss)]
        let energy = (sum_squares / frame.len() as f32).sqrt();
        #[allow(clippy::cast_precision_loss)]
        let frame_ms = frame.len() as f32 / self.sample_rate as f32 * 1000.0;

        match self.state {
            VadState::Listening => {
                if energy >= self.onset_energy {
                    self.speech_streak += 1;
                    if self.speech_streak >= self.config.min_speech_frames {
                        self.state = VadState::Speaking;
                        self.speech_streak = 0;
                        // Speech start cancels a pending silence countdown
                        // and opens a fresh one-shot window.
                        self.silence_pending = false;
                        self.silence_elapsed_ms = 0.0;
                        self.silence_fired = false;
                        tracing::debug!(energy, "VAD: speech started");
                        return Some(VadEvent::SpeechStart);
                    }
                } else {
                    self.speech_streak = 0;
                }

                if self.silence_pending && !self.silence_fired {
                    self.silence_elapsed_ms += frame_ms;
                    #[allow(clippy::cast_precision_loss)]
                    if self.silence_elapsed_ms >= self.config.silence_timeout_ms as f32 {
                        self.silence_pending = false;
                        self.silence_fired = true;
                        tracing::debug!("VAD: silence timeout elapsed");
                        return Some(VadEvent::Silence);
                    }
                }
            }

            VadState::Speaking => {
                if energy < self.release_energy {
                    self.state = VadState::Listening;
                    self.speech_streak = 0;
                    // Arming while already pending is a no-op.
                    if !self.silence_pending && !self.silence_fired {
                        self.silence_pending = true;
                        self.silence_elapsed_ms = 0.0;
                    }
                    tracing::debug!(energy, "VAD: speech ended");
                    return Some(VadEvent::SpeechEnd);
                }
            }
        }

        None
    }

    /// Clear all detection state (back to listening, countdown disarmed).
    pub fn reset(&mut self) {
        self.state = VadState::Listening;
        self.speech_streak = 0;
        self.silence_pending = false;
        self.silence_elapsed_ms = 0.0;
        self.silence_fired = false;
    }
}
