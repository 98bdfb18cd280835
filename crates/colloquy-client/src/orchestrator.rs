//! Conversation orchestration — the turn-taking state machine.
//!
//! The orchestrator runs as a single task consuming one serialized input
//! queue: host commands, transport events, player events, and microphone
//! frames. Every state transition goes through [`Orchestrator::set_state`],
//! which guards equality, refuses transitions outside the allowed set,
//! and emits `StateChanged` before the next input is examined.
//!
//! Barge-in works in two steps: the player's early `AboutToComplete`
//! signal pre-arms the recorder in buffering mode about a second before
//! the assistant finishes, and the idempotent end-of-turn cleanup
//! ([`Orchestrator::handle_interaction_complete`]) flushes that buffer
//! exactly once when the next turn is committed — whether the completion
//! marker arrived before or after playback drained.

use std::sync::Arc;

use colloquy_core::config::{ClientOptions, InputCapabilities};
use colloquy_core::ports::{
    AudioDecoder, Connector, MicrophoneSource, PlaybackClock, PlaybackSink, TokenProvider,
};
use colloquy_core::protocol::{
    InteractParams, InteractionEvent, RequestPayload, ServerBody, ServerEnvelope, SessionConfig,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::ClientError;
use crate::events::ClientEvent;
use crate::input::{InputPipeline, InputSignal};
use crate::player::{PlayerEvent, StreamingAudioPlayer};
use crate::session::{SessionTransport, TransportEvent};

/// The conversation state. Exactly one holds at any moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversationState {
    /// Constructed, not yet connected.
    Uninitialized,

    /// Connecting and handshaking.
    Initializing,

    /// Between turns; nothing in flight.
    Idle,

    /// Playback suspended by the host.
    Paused,

    /// Microphone open, waiting for speech.
    Listening,

    /// Speech detected.
    UserSpeaking,

    /// Input committed; waiting for the server's turn.
    Waiting,

    /// Assistant audio playing.
    Playing,

    /// The server ended the session cleanly.
    Completed,

    /// The host interrupted the assistant.
    Interrupted,

    /// A fatal fault; recovery is the host's choice.
    Error,
}

impl ConversationState {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Idle => "idle",
            Self::Paused => "paused",
            Self::Listening => "listening",
            Self::UserSpeaking => "userSpeaking",
            Self::Waiting => "waiting",
            Self::Playing => "playing",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Error => "error",
        }
    }
}

/// Platform collaborators injected at construction.
///
/// The orchestrator owns construction and teardown of every runtime
/// component; no component constructs a sibling.
pub struct ClientDeps {
    pub connector: Arc<dyn Connector>,
    pub microphone: Arc<dyn MicrophoneSource>,
    pub sink: Arc<dyn PlaybackSink>,
    pub clock: Arc<dyn PlaybackClock>,
    pub decoder: Arc<dyn AudioDecoder>,
    pub tokens: Arc<dyn TokenProvider>,
}

type Ack = oneshot::Sender<Result<(), ClientError>>;

enum Command {
    Initialize { ack: Ack },
    StartListening { ack: Ack },
    StopListening { ack: Ack },
    Interact { params: InteractParams, ack: Ack },
    Interrupt { ack: Ack },
    Pause { ack: Ack },
    Resume { ack: Ack },
    ForceInputComplete { ack: Ack },
    ToggleTextOnlyInput { enabled: bool, ack: Ack },
    Stop { ack: Ack },
    QueryState { reply: oneshot::Sender<ConversationState> },
}

/// Handle to a running conversation client.
///
/// All methods enqueue onto the orchestrator's serialized input queue
/// and await its acknowledgement.
#[derive(Clone)]
pub struct ConversationClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl ConversationClient {
    /// Spawn the orchestration task. Returns the handle and the host
    /// event channel.
    #[must_use]
    pub fn spawn(
        options: ClientOptions,
        deps: ClientDeps,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let (player, player_rx) = StreamingAudioPlayer::new(
            Arc::clone(&deps.clock),
            Arc::clone(&deps.sink),
            Arc::clone(&deps.decoder),
        );
        let input = InputPipeline::new(&options.recording, options.input_capabilities);

        let orchestrator = Orchestrator {
            state: ConversationState::Uninitialized,
            options,
            deps,
            events: events_tx,
            transport: None,
            transport_events: None,
            player,
            input,
            mic_frames: None,
            interaction_complete_pending: false,
            active_interaction: None,
        };
        tokio::spawn(orchestrator.run(cmd_rx, player_rx));

        (Self { cmd_tx }, events_rx)
    }

    /// Connect, handshake, and prime the opening assistant utterance.
    pub async fn initialize(&self) -> Result<(), ClientError> {
        self.call(|ack| Command::Initialize { ack }).await
    }

    /// Open the microphone and start listening for a user turn.
    pub async fn start_listening(&self) -> Result<(), ClientError> {
        self.call(|ack| Command::StartListening { ack }).await
    }

    /// Stop listening and release the microphone.
    pub async fn stop_listening(&self) -> Result<(), ClientError> {
        self.call(|ack| Command::StopListening { ack }).await
    }

    /// Drive a turn directly (text input or custom parameters).
    pub async fn interact(&self, params: InteractParams) -> Result<(), ClientError> {
        self.call(|ack| Command::Interact { params, ack }).await
    }

    /// Interrupt the assistant mid-utterance.
    pub async fn interrupt(&self) -> Result<(), ClientError> {
        self.call(|ack| Command::Interrupt { ack }).await
    }

    /// Pause assistant playback.
    pub async fn pause(&self) -> Result<(), ClientError> {
        self.call(|ack| Command::Pause { ack }).await
    }

    /// Resume assistant playback.
    pub async fn resume(&self) -> Result<(), ClientError> {
        self.call(|ack| Command::Resume { ack }).await
    }

    /// End the user's input turn without waiting for the silence
    /// detector (push-to-talk release).
    pub async fn force_input_complete(&self) -> Result<(), ClientError> {
        self.call(|ack| Command::ForceInputComplete { ack }).await
    }

    /// Switch between voice+text and text-only input.
    pub async fn toggle_text_only_input(&self, enabled: bool) -> Result<(), ClientError> {
        self.call(|ack| Command::ToggleTextOnlyInput { enabled, ack })
            .await
    }

    /// Stop everything: input, playback, and the session transport.
    pub async fn stop(&self) -> Result<(), ClientError> {
        self.call(|ack| Command::Stop { ack }).await
    }

    /// Current conversation state.
    pub async fn state(&self) -> Result<ConversationState, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::QueryState { reply })
            .map_err(|_| ClientError::RuntimeGone)?;
        rx.await.map_err(|_| ClientError::RuntimeGone)
    }

    async fn call(&self, build: impl FnOnce(Ack) -> Command) -> Result<(), ClientError> {
        let (ack, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(ack))
            .map_err(|_| ClientError::RuntimeGone)?;
        rx.await.map_err(|_| ClientError::RuntimeGone)?
    }
}

/// One unit of work from the serialized input queue.
enum Incoming {
    Cmd(Command),
    Transport(Option<TransportEvent>),
    Player(Option<PlayerEvent>),
    Mic(Option<Vec<f32>>),
}

struct Orchestrator {
    state: ConversationState,
    options: ClientOptions,
    deps: ClientDeps,
    events: mpsc::UnboundedSender<ClientEvent>,

    transport: Option<SessionTransport>,
    transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    player: StreamingAudioPlayer,
    input: InputPipeline,
    mic_frames: Option<mpsc::Receiver<Vec<f32>>>,

    /// `interaction_complete` arrived while playback was active and is
    /// deferred until `Finished`.
    interaction_complete_pending: bool,

    /// Uid of the interact stream currently producing output.
    active_interaction: Option<Uuid>,
}

impl Orchestrator {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut player_rx: mpsc::UnboundedReceiver<PlayerEvent>,
    ) {
        loop {
            let incoming = tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => Incoming::Cmd(cmd),
                    None => break,
                },
                event = recv_opt(&mut self.transport_events) => Incoming::Transport(event),
                event = player_rx.recv() => Incoming::Player(event),
                frame = recv_bounded_opt(&mut self.mic_frames) => Incoming::Mic(frame),
            };

            match incoming {
                Incoming::Cmd(cmd) => self.handle_command(cmd).await,
                Incoming::Transport(Some(event)) => self.handle_transport_event(event),
                Incoming::Transport(None) => self.transport_events = None,
                Incoming::Player(Some(event)) => self.handle_player_event(event),
                Incoming::Player(None) => break,
                Incoming::Mic(Some(frame)) => self.handle_mic_frame(&frame),
                Incoming::Mic(None) => self.mic_frames = None,
            }
        }
        tracing::debug!("conversation orchestrator shut down");
    }

    // ── State machine ──────────────────────────────────────────────

    /// Serialized transition point. Guards equality, refuses anything
    /// outside the allowed set, and notifies the host.
    fn set_state(&mut self, next: ConversationState) {
        if self.state == next {
            return;
        }
        if !transition_allowed(self.state, next) {
            tracing::warn!(
                from = self.state.name(),
                to = next.name(),
                "refusing invalid state transition"
            );
            return;
        }

        let old = self.state;
        self.state = next;
        tracing::debug!(from = old.name(), to = next.name(), "state transition");
        self.emit(ClientEvent::StateChanged { old, new: next });
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("host event receiver dropped");
        }
    }

    /// Record a fault: emit the classified error and enter the error
    /// state.
    fn fail(&mut self, error: &ClientError) {
        if self.state == ConversationState::Error {
            // Already failed; don't re-announce secondary faults.
            tracing::debug!(error = %error, "suppressing error while already failed");
            return;
        }
        self.emit(ClientEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
        self.set_state(ConversationState::Error);
    }

    // ── Commands ───────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Initialize { ack } => {
                let result = self.initialize().await;
                if let Err(e) = &result {
                    self.fail(e);
                }
                let _ = ack.send(result);
            }
            Command::StartListening { ack } => {
                let result = self.start_listening();
                if let Err(e) = &result {
                    // A refused microphone is fatal; a mis-timed call is
                    // just reported to the caller.
                    if matches!(e, ClientError::MicrophoneDenied { .. }) {
                        self.fail(e);
                    }
                }
                let _ = ack.send(result);
            }
            Command::StopListening { ack } => {
                self.stop_input();
                if matches!(
                    self.state,
                    ConversationState::Listening | ConversationState::UserSpeaking
                ) {
                    self.set_state(ConversationState::Idle);
                }
                let _ = ack.send(Ok(()));
            }
            Command::Interact { params, ack } => {
                let _ = ack.send(self.begin_interaction(params));
            }
            Command::Interrupt { ack } => {
                self.player.pause();
                if let (Some(transport), Some(uid)) = (&self.transport, self.active_interaction) {
                    if let Err(e) = transport.send_detached(RequestPayload::Interrupt {
                        target_uid: uid,
                        at_character: None,
                    }) {
                        tracing::warn!(error = %e, "failed to send interrupt");
                    }
                }
                self.set_state(ConversationState::Interrupted);
                let _ = ack.send(Ok(()));
            }
            Command::Pause { ack } => {
                if self.state == ConversationState::Playing {
                    self.player.pause();
                    self.set_state(ConversationState::Paused);
                    let _ = ack.send(Ok(()));
                } else {
                    let _ = ack.send(Err(self.invalid("pause")));
                }
            }
            Command::Resume { ack } => {
                if self.state == ConversationState::Paused {
                    self.player.resume();
                    self.set_state(ConversationState::Playing);
                    let _ = ack.send(Ok(()));
                } else {
                    let _ = ack.send(Err(self.invalid("resume")));
                }
            }
            Command::ForceInputComplete { ack } => {
                if self.input.send_input_complete() && self.state == ConversationState::Listening {
                    self.set_state(ConversationState::Waiting);
                }
                let _ = ack.send(Ok(()));
            }
            Command::ToggleTextOnlyInput { enabled, ack } => {
                self.toggle_text_only(enabled);
                let _ = ack.send(Ok(()));
            }
            Command::Stop { ack } => {
                self.shutdown();
                let _ = ack.send(Ok(()));
            }
            Command::QueryState { reply } => {
                let _ = reply.send(self.state);
            }
        }
    }

    /// Connect, handshake, and prime the opening utterance.
    async fn initialize(&mut self) -> Result<(), ClientError> {
        if !matches!(
            self.state,
            ConversationState::Uninitialized | ConversationState::Idle
        ) {
            return Err(self.invalid("initialize"));
        }
        self.set_state(ConversationState::Initializing);

        let token = self.deps.tokens.access_token().await?;

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let transport = SessionTransport::connect(
            self.deps.connector.as_ref(),
            &self.options.api_url,
            transport_tx,
            self.options.request_timeout,
            self.options.keepalive_interval,
        )
        .await?;

        transport
            .handshake(token, self.session_config())
            .await?;

        self.input.attach_transport(transport.clone());
        self.transport_events = Some(transport_rx);
        self.transport = Some(transport);

        // Prime the server so it produces the opening utterance.
        let trigger = self.options.greeting_trigger.clone();
        self.open_interaction(InteractParams {
            text: Some(trigger),
            audio_output: Some(self.options.capabilities.audio),
            ..InteractParams::default()
        })?;

        self.set_state(ConversationState::Waiting);
        Ok(())
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            prompt: Some(self.options.prompt.clone()),
            temperature: None,
            utilities: self.options.utilities.clone(),
            voice_profile: self
                .options
                .voice_profile
                .clone()
                .map(colloquy_core::config::VoiceProfile::clamped),
        }
    }

    fn start_listening(&mut self) -> Result<(), ClientError> {
        if self.state != ConversationState::Idle {
            return Err(self.invalid("startListening"));
        }
        self.start_input()?;
        self.set_state(ConversationState::Listening);
        Ok(())
    }

    /// Acquire the microphone (if needed) and start the input pipeline.
    fn start_input(&mut self) -> Result<(), ClientError> {
        if !self.input.capabilities().audio {
            return Ok(());
        }
        if self.mic_frames.is_none() {
            let frames = self
                .deps
                .microphone
                .start(&self.options.recording)
                .map_err(|source| ClientError::MicrophoneDenied { source })?;
            self.mic_frames = Some(frames);
        }
        self.input.start();
        Ok(())
    }

    fn stop_input(&mut self) {
        self.input.stop();
        if self.mic_frames.take().is_some() {
            self.deps.microphone.stop();
        }
    }

    /// Open an interact stream and track it as the active interaction.
    fn open_interaction(&mut self, params: InteractParams) -> Result<(), ClientError> {
        let transport = self.transport.as_ref().ok_or(ClientError::NotConnected)?;
        let (uid, done) = transport.open_stream(RequestPayload::Interact(params))?;
        self.active_interaction = Some(uid);
        tracing::debug!(%uid, "interaction opened");

        // Stream completion is observed through the message flow; the
        // opener resolution only matters for logging here.
        tokio::spawn(async move {
            match done.await {
                Ok(Ok(())) => tracing::debug!(%uid, "interaction stream closed"),
                Ok(Err(e)) => tracing::warn!(%uid, error = %e, "interaction stream failed"),
                Err(_) => {}
            }
        });
        Ok(())
    }

    /// Host-driven turn (text input, custom context).
    fn begin_interaction(&mut self, params: InteractParams) -> Result<(), ClientError> {
        if !matches!(
            self.state,
            ConversationState::Idle | ConversationState::Listening | ConversationState::Interrupted
        ) {
            return Err(self.invalid("interact"));
        }
        self.open_interaction(params)?;
        self.set_state(ConversationState::Waiting);
        Ok(())
    }

    fn toggle_text_only(&mut self, enabled: bool) {
        if enabled {
            self.stop_input();
            let caps = InputCapabilities {
                audio: false,
                text: true,
            };
            self.input.update_capabilities(caps);
            self.options.input_capabilities = caps;
        } else {
            let caps = InputCapabilities {
                audio: true,
                text: true,
            };
            self.input.update_capabilities(caps);
            self.options.input_capabilities = caps;
            if self.state == ConversationState::Idle {
                if let Err(e) = self.start_listening() {
                    tracing::warn!(error = %e, "failed to resume listening");
                }
            }
        }
    }

    /// Full teardown: input, playback, transport, state.
    fn shutdown(&mut self) {
        self.stop_input();
        self.player.pause();
        self.player.reset();
        if let Some(transport) = self.transport.take() {
            transport.disconnect();
        }
        self.transport_events = None;
        self.input.detach_transport();
        self.input.reset();
        self.active_interaction = None;
        self.interaction_complete_pending = false;
        self.set_state(ConversationState::Idle);
    }

    fn invalid(&self, operation: &'static str) -> ClientError {
        ClientError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }

    // ── Transport events ───────────────────────────────────────────

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.emit(ClientEvent::Connected),
            TransportEvent::Message(envelope) => self.handle_server_message(envelope),
            TransportEvent::TransportError { message } => {
                // Stream-level fault: surfaced, state unchanged.
                self.emit(ClientEvent::Error {
                    kind: crate::error::ErrorKind::NetworkError,
                    message,
                });
            }
            TransportEvent::RequestTimeout { uid, kind } => {
                let error = ClientError::RequestTimeout {
                    kind,
                    after: self.options.request_timeout,
                };
                tracing::warn!(%uid, kind, "request deadline expired");
                self.fail(&error);
            }
            TransportEvent::Closed { clean } => {
                self.transport = None;
                self.input.detach_transport();
                if clean {
                    self.set_state(ConversationState::Completed);
                } else {
                    self.fail(&ClientError::Channel(
                        colloquy_core::ports::ChannelError::Closed,
                    ));
                }
            }
        }
    }

    fn handle_server_message(&mut self, envelope: ServerEnvelope) {
        match envelope.body {
            ServerBody::Interact { event } => self.handle_interaction_event(event),
            ServerBody::CheckTurn {
                is_user_still_speaking,
            } => self.handle_check_turn(is_user_still_speaking),
            ServerBody::Error { error } => {
                self.fail(&ClientError::Server { message: error });
            }
            other => {
                tracing::trace!(kind = ?other, "request echo");
            }
        }
    }

    /// The server's verdict on whether the user's turn has ended.
    fn handle_check_turn(&mut self, still_speaking: bool) {
        // The assistant gets to finish before an accidental pickup acts.
        if matches!(
            self.state,
            ConversationState::Playing | ConversationState::Paused
        ) {
            tracing::debug!("ignoring turn check during playback");
            return;
        }

        if still_speaking {
            // Not a boundary after all: re-arm the one-shot and keep
            // collecting audio.
            tracing::debug!("user still speaking, re-arming input");
            self.input.reset();
            return;
        }

        // Commit the turn: the server interacts on the accumulated
        // audio, and input stops until the next cycle.
        tracing::debug!("turn confirmed, committing interaction");
        let audio_output = self.options.capabilities.audio;
        if let Err(e) = self.open_interaction(InteractParams {
            audio_output: Some(audio_output),
            ..InteractParams::default()
        }) {
            self.fail(&e);
            return;
        }
        self.stop_input();
    }

    fn handle_interaction_event(&mut self, event: InteractionEvent) {
        match event {
            InteractionEvent::InteractionStarted => {
                tracing::debug!("interaction started");
            }
            InteractionEvent::Text { text } => {
                self.emit(ClientEvent::Text { content: text });
            }
            InteractionEvent::TextComplete { .. } => {
                tracing::debug!("text complete");
            }
            InteractionEvent::Audio { audio } => {
                self.player.enqueue(&audio);
            }
            InteractionEvent::AudioComplete => {
                self.player.mark_complete();
            }
            InteractionEvent::Data { data } => {
                if let Some(data) = data {
                    self.emit(ClientEvent::Message {
                        text: data.to_string(),
                    });
                }
            }
            InteractionEvent::Image { url } => {
                if let Some(url) = url {
                    self.emit(ClientEvent::ImageChanged { url });
                }
            }
            InteractionEvent::Subtitles { subtitles } => {
                if self.options.capabilities.subtitles {
                    self.spawn_subtitle_highlights(&subtitles);
                    self.emit(ClientEvent::SubtitlesChanged { cues: subtitles });
                }
            }
            InteractionEvent::Viseme { viseme, .. } => {
                if self.options.capabilities.avatar {
                    self.emit(ClientEvent::AvatarAnimation { name: viseme });
                }
            }
            InteractionEvent::InteractionError { error } => {
                // Recoverable: the turn may still complete.
                self.emit(ClientEvent::Error {
                    kind: crate::error::ErrorKind::ServerError,
                    message: error,
                });
            }
            InteractionEvent::InteractionComplete => {
                if self.state == ConversationState::Playing {
                    tracing::debug!("deferring interaction complete until playback ends");
                    self.interaction_complete_pending = true;
                } else {
                    self.handle_interaction_complete();
                }
            }
        }
    }

    /// Schedule word-highlight events against the cue timings.
    fn spawn_subtitle_highlights(&self, cues: &[colloquy_core::protocol::SubtitleCue]) {
        let mut words: Vec<(u64, usize, usize)> = Vec::new();
        for (cue_index, cue) in cues.iter().enumerate() {
            for (word_index, word) in cue.words.iter().enumerate() {
                words.push((word.start_ms, cue_index, word_index));
            }
        }
        if words.is_empty() {
            return;
        }
        words.sort_unstable();

        let events = self.events.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            for (at_ms, cue, word) in words {
                tokio::time::sleep_until(start + std::time::Duration::from_millis(at_ms)).await;
                if events
                    .send(ClientEvent::SubtitleHighlight { cue, word })
                    .is_err()
                {
                    return;
                }
            }
        });
    }

    // ── Player events ──────────────────────────────────────────────

    fn handle_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::Ready => {
                if matches!(
                    self.state,
                    ConversationState::Waiting
                        | ConversationState::Idle
                        | ConversationState::Listening
                ) {
                    self.player.play();
                    self.set_state(ConversationState::Playing);
                } else {
                    tracing::debug!(state = self.state.name(), "audio ready outside a turn");
                }
            }
            PlayerEvent::Playing => {}
            PlayerEvent::AboutToComplete => {
                if self.state == ConversationState::Playing {
                    // Pre-arm the recorder so barge-in audio survives the
                    // tail of the assistant's utterance.
                    tracing::debug!("pre-arming capture for barge-in");
                    self.input.enable_audio_buffering();
                    if let Err(e) = self.start_input() {
                        tracing::warn!(error = %e, "failed to pre-arm microphone");
                    }
                }
            }
            PlayerEvent::Finished => {
                self.input.reset();
                if self.interaction_complete_pending {
                    self.handle_interaction_complete();
                } else {
                    self.set_state(ConversationState::Idle);
                }
            }
            PlayerEvent::Failed => {
                self.fail(&ClientError::Decode {
                    message: "no playable audio buffers could be established".to_string(),
                });
            }
        }
    }

    /// The single idempotent end-of-turn cleanup.
    ///
    /// Runs either directly (completion marker outside playback, or
    /// arriving after `Finished` on reordered streams) or deferred from
    /// `Finished`. A second invocation observes the same state.
    fn handle_interaction_complete(&mut self) {
        tracing::debug!("interaction complete");
        self.interaction_complete_pending = false;

        // The error state holds until the host recovers; a completion
        // marker trailing a failed turn must not clear it.
        if self.state == ConversationState::Error {
            return;
        }

        // Clears the playback cycle, including the about-to-complete
        // latch and timers.
        self.player.reset();
        self.input.reset();

        // Pre-buffered barge-in audio goes out now, in capture order.
        self.input.flush_buffered_audio();

        self.set_state(ConversationState::Idle);
    }

    // ── Microphone frames ──────────────────────────────────────────

    fn handle_mic_frame(&mut self, frame: &[f32]) {
        let Some(signal) = self.input.handle_frame(frame) else {
            return;
        };
        match signal {
            InputSignal::UserSpeaking => {
                if self.state == ConversationState::Listening {
                    self.set_state(ConversationState::UserSpeaking);
                }
            }
            InputSignal::UserSilence => {
                if self.state == ConversationState::UserSpeaking {
                    self.set_state(ConversationState::Listening);
                }
            }
            InputSignal::TurnEnded => {
                if self.state == ConversationState::Listening {
                    self.set_state(ConversationState::Waiting);
                }
            }
        }
    }
}

/// The allowed transition set. `error`, `interrupted`, `idle`, and
/// `completed` are reachable from anywhere (fatal faults, user
/// interrupt, stop/cleanup, server close); everything else is explicit.
fn transition_allowed(from: ConversationState, to: ConversationState) -> bool {
    use ConversationState as S;

    if matches!(to, S::Error | S::Interrupted | S::Idle | S::Completed) {
        return true;
    }

    matches!(
        (from, to),
        (S::Uninitialized | S::Idle, S::Initializing)
            | (S::Initializing, S::Waiting)
            | (S::Idle, S::Listening | S::Waiting | S::Playing)
            | (S::Listening, S::UserSpeaking | S::Waiting | S::Playing)
            | (S::UserSpeaking, S::Listening)
            | (S::Waiting, S::Playing)
            | (S::Playing, S::Paused)
            | (S::Paused, S::Playing)
            | (S::Interrupted, S::Listening | S::Waiting)
    )
}

/// Receive from an optional unbounded channel, pending forever when
/// absent.
async fn recv_opt<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Receive from an optional bounded channel, pending forever when
/// absent.
async fn recv_bounded_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_are_wire_compatible() {
        assert_eq!(ConversationState::UserSpeaking.name(), "userSpeaking");
        assert_eq!(
            serde_json::to_value(ConversationState::UserSpeaking).unwrap(),
            "userSpeaking"
        );
        assert_eq!(
            serde_json::to_value(ConversationState::Uninitialized).unwrap(),
            "uninitialized"
        );
    }

    #[test]
    fn transition_table_matches_the_design() {
        use ConversationState as S;

        // The documented rows.
        assert!(transition_allowed(S::Uninitialized, S::Initializing));
        assert!(transition_allowed(S::Initializing, S::Waiting));
        assert!(transition_allowed(S::Idle, S::Listening));
        assert!(transition_allowed(S::Listening, S::UserSpeaking));
        assert!(transition_allowed(S::UserSpeaking, S::Listening));
        assert!(transition_allowed(S::Listening, S::Waiting));
        assert!(transition_allowed(S::Waiting, S::Playing));
        assert!(transition_allowed(S::Playing, S::Paused));
        assert!(transition_allowed(S::Paused, S::Playing));

        // Reachable-from-anywhere targets.
        assert!(transition_allowed(S::Playing, S::Idle));
        assert!(transition_allowed(S::Waiting, S::Interrupted));
        assert!(transition_allowed(S::Listening, S::Error));

        // Refused.
        assert!(!transition_allowed(S::Uninitialized, S::Listening));
        assert!(!transition_allowed(S::Paused, S::Listening));
        assert!(!transition_allowed(S::Waiting, S::UserSpeaking));
        assert!(!transition_allowed(S::Playing, S::Waiting));
    }
}
