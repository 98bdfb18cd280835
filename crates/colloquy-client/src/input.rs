//! Input pipeline — wires voice activity detection and capture framing
//! into the session transport.
//!
//! Microphone frames flow through both the detector and the capture
//! converter. Emitted chunks go out as detached `add_audio` requests in
//! capture order; the detector's debounced silence signal marks the end
//! of the user's input (a one-shot per turn) and triggers a `check_turn`
//! request so the server can confirm the turn boundary.

use base64::Engine as _;
use bytes::Bytes;
use colloquy_core::config::{InputCapabilities, RecordingConfig};
use colloquy_core::protocol::{AudioConfig, RequestPayload};

use crate::capture::AudioCapture;
use crate::session::SessionTransport;
use crate::vad::{VadConfig, VadEvent, VoiceActivityDetector};

/// What a processed microphone frame means for the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSignal {
    /// The user started speaking.
    UserSpeaking,

    /// The user paused; the silence countdown is running.
    UserSilence,

    /// The silence countdown elapsed: input is complete and a turn
    /// check has been issued.
    TurnEnded,
}

/// Owns the VAD + capture pair and forwards encoded audio.
pub struct InputPipeline {
    capture: AudioCapture,
    vad: VoiceActivityDetector,
    transport: Option<SessionTransport>,
    capabilities: InputCapabilities,
    audio_config: AudioConfig,
    input_complete_sent: bool,
    running: bool,
}

impl InputPipeline {
    #[must_use]
    pub fn new(recording: &RecordingConfig, capabilities: InputCapabilities) -> Self {
        Self {
            capture: AudioCapture::new(),
            vad: VoiceActivityDetector::new(VadConfig::default(), recording.sample_rate),
            transport: None,
            capabilities,
            audio_config: AudioConfig::default(),
            input_complete_sent: false,
            running: false,
        }
    }

    /// Give the pipeline a live transport to send through.
    pub fn attach_transport(&mut self, transport: SessionTransport) {
        self.transport = Some(transport);
    }

    /// Drop the transport reference (session ended).
    pub fn detach_transport(&mut self) {
        self.transport = None;
    }

    /// Start VAD analysis and capture together.
    ///
    /// Returns whether the pipeline actually transitioned to running.
    pub fn start(&mut self) -> bool {
        if self.running || !self.capabilities.audio {
            return false;
        }
        self.vad.start();
        self.capture.start();
        self.running = true;
        tracing::debug!("input pipeline started");
        true
    }

    /// Stop both components. Returns whether it transitioned.
    pub fn stop(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.vad.stop();
        self.capture.stop();
        self.running = false;
        tracing::debug!("input pipeline stopped");
        true
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub const fn capabilities(&self) -> InputCapabilities {
        self.capabilities
    }

    /// Process one microphone frame: send (or buffer) its audio and
    /// translate detector events for the orchestrator.
    pub fn handle_frame(&mut self, frame: &[f32]) -> Option<InputSignal> {
        if !self.running {
            return None;
        }

        for chunk in self.capture.push_samples(frame) {
            self.send_audio_chunk(&chunk);
        }

        match self.vad.process_frame(frame)? {
            VadEvent::SpeechStart => Some(InputSignal::UserSpeaking),
            VadEvent::SpeechEnd => Some(InputSignal::UserSilence),
            VadEvent::Silence => {
                if self.send_input_complete() {
                    Some(InputSignal::TurnEnded)
                } else {
                    None
                }
            }
        }
    }

    /// Mark the user's input complete and ask the server to confirm the
    /// turn boundary.
    ///
    /// One-shot per turn: repeat calls (including an explicit
    /// force-complete racing the silence signal) are no-ops until
    /// [`reset`](Self::reset). Returns whether this call consumed the
    /// one-shot.
    pub fn send_input_complete(&mut self) -> bool {
        if self.input_complete_sent {
            return false;
        }
        self.input_complete_sent = true;

        let Some(transport) = &self.transport else {
            tracing::debug!("input complete without transport, skipping turn check");
            return true;
        };
        tracing::debug!("input complete, issuing turn check");
        if let Err(e) = transport.send_detached(RequestPayload::CheckTurn) {
            tracing::warn!(error = %e, "failed to issue turn check");
        }
        true
    }

    /// Re-arm the input-complete one-shot for the next turn.
    pub fn reset(&mut self) {
        self.input_complete_sent = false;
    }

    /// Divert captured chunks into the in-memory buffer (barge-in
    /// pre-arming while the assistant is still speaking).
    pub fn enable_audio_buffering(&mut self) {
        self.capture.enable_buffering();
    }

    /// Send the buffered chunks in capture order, then return to live
    /// emission. The buffer drains exactly once.
    pub fn flush_buffered_audio(&mut self) {
        let chunks = self.capture.take_buffered();
        if !chunks.is_empty() {
            tracing::debug!(chunks = chunks.len(), "flushing buffered audio");
            for chunk in &chunks {
                self.send_audio_chunk(chunk);
            }
        }
        self.capture.disable_buffering();
    }

    /// Reconfigure input paths, stopping capture cleanly when audio is
    /// disabled.
    pub fn update_capabilities(&mut self, capabilities: InputCapabilities) {
        if !capabilities.audio {
            self.stop();
        }
        self.capabilities = capabilities;
        tracing::debug!(
            audio = capabilities.audio,
            text = capabilities.text,
            "input capabilities updated"
        );
    }

    fn send_audio_chunk(&self, chunk: &Bytes) {
        let Some(transport) = &self.transport else {
            tracing::debug!("dropping audio chunk: no transport");
            return;
        };
        let audio = base64::engine::general_purpose::STANDARD.encode(chunk);
        if let Err(e) = transport.send_detached(RequestPayload::AddAudio {
            audio,
            config: self.audio_config.clone(),
        }) {
            tracing::warn!(error = %e, "failed to send audio chunk");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> InputPipeline {
        InputPipeline::new(&RecordingConfig::default(), InputCapabilities::default())
    }

    #[test]
    fn start_and_stop_report_transitions() {
        let mut input = pipeline();
        assert!(input.start());
        assert!(!input.start(), "second start must be a no-op");
        assert!(input.stop());
        assert!(!input.stop(), "second stop must be a no-op");
    }

    #[test]
    fn start_refused_without_audio_capability() {
        let mut input = InputPipeline::new(
            &RecordingConfig::default(),
            InputCapabilities {
                audio: false,
                text: true,
            },
        );
        assert!(!input.start());
        assert!(!input.is_running());
    }

    #[test]
    fn frames_are_ignored_when_stopped() {
        let mut input = pipeline();
        assert_eq!(input.handle_frame(&vec![0.5; 4800]), None);
    }

    #[test]
    fn input_complete_is_one_shot_until_reset() {
        let mut input = pipeline();
        input.start();

        assert!(input.send_input_complete());
        assert!(!input.send_input_complete());

        input.reset();
        assert!(input.send_input_complete());
    }

    #[test]
    fn silence_signal_consumes_the_one_shot() {
        let mut input = pipeline();
        input.start();

        // Three loud frames start speech, one quiet frame ends it, and
        // 300 ms of silence completes the turn.
        for _ in 0..2 {
            assert_eq!(input.handle_frame(&vec![0.5; 4800]), None);
        }
        assert_eq!(
            input.handle_frame(&vec![0.5; 4800]),
            Some(InputSignal::UserSpeaking)
        );
        assert_eq!(
            input.handle_frame(&vec![0.0; 4800]),
            Some(InputSignal::UserSilence)
        );
        input.handle_frame(&vec![0.0; 4800]);
        input.handle_frame(&vec![0.0; 4800]);
        assert_eq!(
            input.handle_frame(&vec![0.0; 4800]),
            Some(InputSignal::TurnEnded)
        );

        // The one-shot is consumed: a forced completion is now a no-op.
        assert!(!input.send_input_complete());
    }

    #[test]
    fn disabling_audio_stops_capture() {
        let mut input = pipeline();
        input.start();
        input.update_capabilities(InputCapabilities {
            audio: false,
            text: true,
        });
        assert!(!input.is_running());

        // And cannot be restarted until audio is re-enabled.
        assert!(!input.start());
        input.update_capabilities(InputCapabilities {
            audio: true,
            text: true,
        });
        assert!(input.start());
    }

    #[test]
    fn buffering_mode_diverts_then_flushes_once() {
        let mut input = pipeline();
        input.start();
        input.enable_audio_buffering();

        // A loud frame big enough to produce one full chunk.
        input.handle_frame(&vec![0.5; 4800]);
        // No transport attached: flushing must still drain and disable
        // buffering without panicking.
        input.flush_buffered_audio();
        input.handle_frame(&vec![0.5; 4800]);
        // After the flush, chunks are live again (nothing accumulates).
        assert_eq!(input.capture_buffered_len_for_test(), 0);
    }

    impl InputPipeline {
        fn capture_buffered_len_for_test(&self) -> usize {
            self.capture.buffered_len()
        }
    }
}
