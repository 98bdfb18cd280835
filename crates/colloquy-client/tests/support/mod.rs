//! Shared test doubles: a scripted wire, mock audio ports, and fixture
//! builders. No real sockets, devices, or model files are involved.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use colloquy_client::core::config::RecordingConfig;
use colloquy_client::core::ports::{
    AudioDecoder, AudioError, ChannelError, Connector, MessageChannel, MicrophoneSource,
    PcmBuffer, PlaybackClock, PlaybackSink,
};
use colloquy_client::ClientEvent;
use serde_json::{json, Value};
use tokio::sync::mpsc;

// ── Scripted wire ──────────────────────────────────────────────────

/// Client side of the scripted wire.
pub struct ScriptedChannel {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl MessageChannel for ScriptedChannel {
    async fn send(&mut self, text: String) -> Result<(), ChannelError> {
        self.outgoing.send(text).map_err(|_| ChannelError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.incoming.close();
    }
}

/// Test side of the scripted wire: inject server messages, inspect
/// client requests.
pub struct WireHarness {
    pub to_client: mpsc::UnboundedSender<String>,
    pub from_client: mpsc::UnboundedReceiver<String>,
}

impl WireHarness {
    /// Next request the client put on the wire, parsed.
    pub async fn next_request(&mut self) -> Value {
        let raw = self
            .from_client
            .recv()
            .await
            .expect("client closed the wire");
        serde_json::from_str(&raw).expect("client sent invalid JSON")
    }

    /// Next request of the given kind, skipping interleaved audio
    /// traffic.
    pub async fn next_request_of_kind(&mut self, kind: &str) -> Value {
        loop {
            let request = self.next_request().await;
            if request["kind"] == kind {
                return request;
            }
            assert_eq!(
                request["kind"], "add_audio",
                "unexpected request while waiting for '{kind}'"
            );
        }
    }

    /// Assert nothing arrives within a short window.
    pub async fn expect_quiet(&mut self) {
        tokio::select! {
            biased;
            msg = self.from_client.recv() => {
                panic!("unexpected request on the wire: {msg:?}");
            }
            () = tokio::time::sleep(Duration::from_millis(200)) => {}
        }
    }

    /// Inject a raw server envelope.
    pub fn inject(&self, value: &Value) {
        self.to_client
            .send(value.to_string())
            .expect("client dropped the wire");
    }

    /// Echo a request with a bare success envelope.
    pub fn reply_ok(&self, request: &Value) {
        self.inject(&json!({
            "uid": request["uid"],
            "kind": request["kind"],
        }));
    }

    /// Inject one `interact` stream event for the given request uid.
    pub fn interact_event(&self, uid: &Value, event: &str, extra: Value) {
        let mut envelope = json!({
            "uid": uid,
            "kind": "interact",
            "event": event,
        });
        if let (Some(envelope), Some(extra)) = (envelope.as_object_mut(), extra.as_object()) {
            for (key, value) in extra {
                envelope.insert(key.clone(), value.clone());
            }
        }
        self.inject(&envelope);
    }
}

/// A connector that hands out pre-built scripted channels.
pub struct TestConnector {
    channels: Mutex<Vec<ScriptedChannel>>,
}

impl TestConnector {
    /// Build a connector with one connectable channel, returning the
    /// harness for its far end.
    pub fn single() -> (Arc<Self>, WireHarness) {
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            channels: Mutex::new(vec![ScriptedChannel { incoming, outgoing }]),
        });
        (
            connector,
            WireHarness {
                to_client,
                from_client,
            },
        )
    }
}

#[async_trait]
impl Connector for TestConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn MessageChannel>, ChannelError> {
        let channel = self
            .channels
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| ChannelError::Connect("no scripted channel left".into()))?;
        Ok(Box::new(channel))
    }
}

// ── Mock audio ports ───────────────────────────────────────────────

/// Microphone mock; tests push frames through [`MockMicrophone::push`].
#[derive(Default)]
pub struct MockMicrophone {
    sender: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
    started: AtomicUsize,
    stopped: AtomicUsize,
}

impl MockMicrophone {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn started_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped_count(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Push one capture frame into the live stream.
    pub async fn push(&self, frame: Vec<f32>) {
        let sender = self
            .sender
            .lock()
            .unwrap()
            .clone()
            .expect("microphone not started");
        sender.send(frame).await.expect("frame receiver dropped");
    }
}

impl MicrophoneSource for MockMicrophone {
    fn start(&self, _config: &RecordingConfig) -> Result<mpsc::Receiver<Vec<f32>>, AudioError> {
        let (tx, rx) = mpsc::channel(64);
        *self.sender.lock().unwrap() = Some(tx);
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    fn stop(&self) {
        *self.sender.lock().unwrap() = None;
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        self.sender.lock().unwrap().is_some()
    }
}

/// A microphone that refuses to start.
pub struct DeniedMicrophone;

impl MicrophoneSource for DeniedMicrophone {
    fn start(&self, _config: &RecordingConfig) -> Result<mpsc::Receiver<Vec<f32>>, AudioError> {
        Err(AudioError::PermissionDenied)
    }

    fn stop(&self) {}

    fn is_capturing(&self) -> bool {
        false
    }
}

#[derive(Default)]
pub struct SinkState {
    pub scheduled: Vec<(f64, Duration)>,
    pub on_ended: Option<Box<dyn FnOnce() + Send + 'static>>,
    pub cancelled: usize,
    pub paused: bool,
}

/// Playback sink mock; tests fire the end hook explicitly.
#[derive(Default)]
pub struct MockSink {
    pub state: Mutex<SinkState>,
}

impl MockSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scheduled_count(&self) -> usize {
        self.state.lock().unwrap().scheduled.len()
    }

    /// Simulate the last scheduled buffer finishing.
    pub fn fire_last_ended(&self) {
        let hook = self.state.lock().unwrap().on_ended.take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl PlaybackSink for MockSink {
    fn schedule(
        &self,
        buffer: PcmBuffer,
        at: f64,
        on_ended: Option<Box<dyn FnOnce() + Send + 'static>>,
    ) -> Result<(), AudioError> {
        let mut state = self.state.lock().unwrap();
        state.scheduled.push((at, buffer.duration()));
        if let Some(hook) = on_ended {
            state.on_ended = Some(hook);
        }
        Ok(())
    }

    fn cancel_all(&self) {
        let mut state = self.state.lock().unwrap();
        state.cancelled += 1;
        state.on_ended = None;
    }

    fn pause(&self) {
        self.state.lock().unwrap().paused = true;
    }

    fn resume(&self) {
        self.state.lock().unwrap().paused = false;
    }

    fn set_volume(&self, _volume: f32) {}
}

/// Fixed-time clock.
pub struct MockClock {
    t: Mutex<f64>,
}

impl MockClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { t: Mutex::new(0.0) })
    }

    pub fn set(&self, t: f64) {
        *self.t.lock().unwrap() = t;
    }
}

impl PlaybackClock for MockClock {
    fn now(&self) -> f64 {
        *self.t.lock().unwrap()
    }
}

/// Decodes N bytes into N/1000 seconds of mono PCM.
#[derive(Default)]
pub struct MockDecoder;

impl AudioDecoder for MockDecoder {
    fn decode(&self, data: &[u8]) -> Result<PcmBuffer, AudioError> {
        Ok(PcmBuffer {
            samples: vec![0.1; data.len() * 48],
            sample_rate: 48_000,
            channels: 1,
        })
    }
}

/// A decoder that rejects everything.
pub struct FailingAudioDecoder;

impl AudioDecoder for FailingAudioDecoder {
    fn decode(&self, _data: &[u8]) -> Result<PcmBuffer, AudioError> {
        Err(AudioError::Decode("unsupported bitstream".into()))
    }
}

// ── Fixtures ───────────────────────────────────────────────────────

/// A valid 417-byte MPEG1 Layer III frame, base64-encoded. Two of them
/// decode to ~0.834 s with [`MockDecoder`].
pub fn frame_b64(fill: u8) -> String {
    let mut frame = vec![fill; 417];
    frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
    base64::engine::general_purpose::STANDARD.encode(frame)
}

/// 100 ms of loud mono audio at 48 kHz.
pub fn loud_frame() -> Vec<f32> {
    vec![0.5; 4800]
}

/// 100 ms of silence at 48 kHz.
pub fn quiet_frame() -> Vec<f32> {
    vec![0.0; 4800]
}

/// Drain everything currently buffered on the host event channel.
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Give the orchestrator task a moment to process queued inputs.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
