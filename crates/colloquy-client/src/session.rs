//! Session transport — request/response and streaming exchanges
//! multiplexed over one bidirectional channel.
//!
//! A driver task owns the message channel and the pending-request map
//! (single writer); callers talk to it through a command channel and get
//! replies over oneshots. Every request carries a fresh correlation uid
//! which the server echoes on each related message:
//!
//! * `request` mode resolves on the first matching response (rejecting
//!   when that response is `kind: error`);
//! * `stream` mode forwards every matching message as a transport event
//!   and resolves only on `kind: close` (a stream-level `error` surfaces
//!   as an event but does not reject the opener).
//!
//! Each pending record has a reply deadline; expiry removes the record
//! and rejects the opener with a timeout.

use std::collections::HashMap;
use std::time::Duration;

use colloquy_core::ports::{ChannelError, Connector, MessageChannel};
use colloquy_core::protocol::{
    RequestEnvelope, RequestMode, RequestPayload, ServerBody, ServerEnvelope, SessionConfig,
};
use futures_util::StreamExt as _;
use tokio::sync::{mpsc, oneshot};
use tokio_util::time::delay_queue::{self, DelayQueue};
use uuid::Uuid;

use crate::error::ClientError;

/// Deadline for establishing the channel.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default reply deadline per request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(50);

/// Events the transport surfaces to its owner.
#[derive(Debug)]
pub enum TransportEvent {
    /// The handshake finished; the session is usable.
    Connected,

    /// A server message for the owner: resolved single replies, stream
    /// messages, and server-initiated `interact` events.
    Message(ServerEnvelope),

    /// A stream- or channel-level fault that does not reject a specific
    /// request.
    TransportError { message: String },

    /// A detached request's reply deadline expired.
    RequestTimeout { uid: Uuid, kind: &'static str },

    /// The channel closed. `clean` is false when it dropped on a fault.
    Closed { clean: bool },
}

/// How a pending record resolves.
enum PendingReply {
    /// Resolve with the first matching response.
    Single(oneshot::Sender<Result<ServerEnvelope, ClientError>>),

    /// Resolve when the stream closes.
    Stream(oneshot::Sender<Result<(), ClientError>>),

    /// Nobody is waiting (keepalives); failures surface as events.
    Discard,
}

struct Pending {
    reply: PendingReply,
    delay_key: delay_queue::Key,
    kind: &'static str,
    timeout: Duration,
}

enum Command {
    Send {
        envelope: RequestEnvelope,
        reply: PendingReply,
        timeout: Duration,
    },
    Disconnect,
}

/// Cloneable handle to the transport driver.
#[derive(Clone)]
pub struct SessionTransport {
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
    default_timeout: Duration,
}

impl SessionTransport {
    /// Establish the channel (within [`CONNECT_TIMEOUT`]) and spawn the
    /// driver task.
    pub async fn connect(
        connector: &dyn Connector,
        url: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
        default_timeout: Duration,
        keepalive: Option<Duration>,
    ) -> Result<Self, ClientError> {
        tracing::info!(url, "connecting session transport");
        let channel = tokio::time::timeout(CONNECT_TIMEOUT, connector.connect(url))
            .await
            .map_err(|_| ClientError::RequestTimeout {
                kind: "connect",
                after: CONNECT_TIMEOUT,
            })??;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let transport = Self {
            cmd_tx,
            events: events.clone(),
            default_timeout,
        };
        tokio::spawn(drive(channel, cmd_rx, events, keepalive));
        Ok(transport)
    }

    /// Authenticate and configure the session, then announce readiness.
    pub async fn handshake(
        &self,
        access_token: String,
        config: SessionConfig,
    ) -> Result<(), ClientError> {
        self.request(RequestPayload::Authenticate { access_token })
            .await?;
        self.request(RequestPayload::SetConfiguration { config })
            .await?;
        let _ = self.events.send(TransportEvent::Connected);
        tracing::info!("session handshake complete");
        Ok(())
    }

    /// Send a single-reply request and await its response.
    pub async fn request(&self, payload: RequestPayload) -> Result<ServerEnvelope, ClientError> {
        self.request_with_timeout(payload, self.default_timeout)
            .await
    }

    /// Send a single-reply request with an explicit deadline.
    pub async fn request_with_timeout(
        &self,
        payload: RequestPayload,
        timeout: Duration,
    ) -> Result<ServerEnvelope, ClientError> {
        let envelope = RequestEnvelope::new(RequestMode::Request, payload);
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send {
                envelope,
                reply: PendingReply::Single(tx),
                timeout,
            })
            .map_err(|_| ClientError::NotConnected)?;
        rx.await.map_err(|_| ClientError::NotConnected)?
    }

    /// Send a single-reply request without awaiting it; failures are
    /// logged and timeouts surface as transport events.
    ///
    /// Returns the request uid. Commands are enqueued synchronously, so
    /// consecutive detached sends keep their order on the wire.
    pub fn send_detached(&self, payload: RequestPayload) -> Result<Uuid, ClientError> {
        let envelope = RequestEnvelope::new(RequestMode::Request, payload);
        let uid = envelope.uid;
        let kind = envelope.payload.kind();
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send {
                envelope,
                reply: PendingReply::Single(tx),
                timeout: self.default_timeout,
            })
            .map_err(|_| ClientError::NotConnected)?;

        tokio::spawn(async move {
            match rx.await {
                Ok(Ok(_)) | Err(_) => {}
                Ok(Err(e)) => tracing::warn!(%uid, kind, error = %e, "detached request failed"),
            }
        });
        Ok(uid)
    }

    /// Open a stream request. Returns the uid (for interrupt targeting)
    /// and a receiver resolved when the stream closes.
    pub fn open_stream(
        &self,
        payload: RequestPayload,
    ) -> Result<(Uuid, oneshot::Receiver<Result<(), ClientError>>), ClientError> {
        let envelope = RequestEnvelope::new(RequestMode::Stream, payload);
        let uid = envelope.uid;
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send {
                envelope,
                reply: PendingReply::Stream(tx),
                timeout: self.default_timeout,
            })
            .map_err(|_| ClientError::NotConnected)?;
        Ok((uid, rx))
    }

    /// Close the channel. Pending requests are rejected.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect);
    }
}

/// The driver task: sole owner of the channel and pending map.
async fn drive(
    mut channel: Box<dyn MessageChannel>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
    keepalive: Option<Duration>,
) {
    let mut pending: HashMap<Uuid, Pending> = HashMap::new();
    let mut deadlines: DelayQueue<Uuid> = DelayQueue::new();

    let mut keepalive_timer = keepalive.map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send { envelope, reply, timeout }) => {
                    send_request(
                        &mut channel,
                        &mut pending,
                        &mut deadlines,
                        &events,
                        envelope,
                        reply,
                        timeout,
                    )
                    .await;
                }
                Some(Command::Disconnect) => {
                    channel.close().await;
                    fail_all(&mut pending, &mut deadlines);
                    let _ = events.send(TransportEvent::Closed { clean: true });
                    break;
                }
                None => {
                    // Every handle dropped: tear the channel down.
                    channel.close().await;
                    fail_all(&mut pending, &mut deadlines);
                    break;
                }
            },

            incoming = channel.recv() => match incoming {
                Some(Ok(text)) => {
                    handle_incoming(&text, &mut pending, &mut deadlines, &events);
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "session channel fault");
                    let _ = events.send(TransportEvent::TransportError {
                        message: e.to_string(),
                    });
                    fail_all(&mut pending, &mut deadlines);
                    let _ = events.send(TransportEvent::Closed { clean: false });
                    break;
                }
                None => {
                    tracing::info!("session channel closed by server");
                    fail_all(&mut pending, &mut deadlines);
                    let _ = events.send(TransportEvent::Closed { clean: true });
                    break;
                }
            },

            Some(expired) = deadlines.next() => {
                let uid = expired.into_inner();
                if let Some(record) = pending.remove(&uid) {
                    tracing::warn!(%uid, kind = record.kind, "request timed out");
                    let timed_out = || ClientError::RequestTimeout {
                        kind: record.kind,
                        after: record.timeout,
                    };
                    match record.reply {
                        PendingReply::Single(tx) => {
                            let _ = tx.send(Err(timed_out()));
                        }
                        PendingReply::Stream(tx) => {
                            let _ = tx.send(Err(timed_out()));
                        }
                        PendingReply::Discard => {}
                    }
                    let _ = events.send(TransportEvent::RequestTimeout {
                        uid,
                        kind: record.kind,
                    });
                }
            },

            _ = async { keepalive_timer.as_mut().expect("guarded").tick().await },
                if keepalive_timer.is_some() =>
            {
                let envelope = RequestEnvelope::new(RequestMode::Request, RequestPayload::Ping);
                send_request(
                    &mut channel,
                    &mut pending,
                    &mut deadlines,
                    &events,
                    envelope,
                    PendingReply::Discard,
                    DEFAULT_REQUEST_TIMEOUT,
                )
                .await;
            },
        }
    }
}

async fn send_request(
    channel: &mut Box<dyn MessageChannel>,
    pending: &mut HashMap<Uuid, Pending>,
    deadlines: &mut DelayQueue<Uuid>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    envelope: RequestEnvelope,
    reply: PendingReply,
    timeout: Duration,
) {
    let uid = envelope.uid;
    let kind = envelope.payload.kind();

    let text = match serde_json::to_string(&envelope) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(%uid, kind, error = %e, "failed to serialize envelope");
            fail_one(
                reply,
                ClientError::Channel(ChannelError::Transport(e.to_string())),
            );
            return;
        }
    };

    let delay_key = deadlines.insert(uid, timeout);
    pending.insert(
        uid,
        Pending {
            reply,
            delay_key,
            kind,
            timeout,
        },
    );
    tracing::debug!(%uid, kind, "sending request");

    if let Err(e) = channel.send(text).await {
        tracing::error!(%uid, kind, error = %e, "channel send failed");
        if let Some(record) = pending.remove(&uid) {
            deadlines.remove(&record.delay_key);
            fail_one(record.reply, ClientError::Channel(e));
        }
        let _ = events.send(TransportEvent::TransportError {
            message: format!("send failed for '{kind}'"),
        });
    }
}

fn handle_incoming(
    text: &str,
    pending: &mut HashMap<Uuid, Pending>,
    deadlines: &mut DelayQueue<Uuid>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) {
    let envelope: ServerEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(error = %e, raw = text, "unparseable server message");
            return;
        }
    };

    let matched = envelope.uid.filter(|uid| pending.contains_key(uid));
    let Some(uid) = matched else {
        // Server-initiated events for the active interaction flow
        // through; anything else is just logged.
        if matches!(envelope.body, ServerBody::Interact { .. }) {
            let _ = events.send(TransportEvent::Message(envelope));
        } else {
            tracing::debug!(uid = ?envelope.uid, "unmatched server message");
        }
        return;
    };

    let is_stream = matches!(
        pending.get(&uid).map(|p| &p.reply),
        Some(PendingReply::Stream(_))
    );

    if is_stream {
        match &envelope.body {
            ServerBody::Close => {
                if let Some(record) = pending.remove(&uid) {
                    deadlines.remove(&record.delay_key);
                    tracing::debug!(%uid, kind = record.kind, "stream closed");
                    if let PendingReply::Stream(tx) = record.reply {
                        let _ = tx.send(Ok(()));
                    }
                }
            }
            ServerBody::Error { error } => {
                // The server ended the stream; surface the fault but do
                // not reject the opener.
                tracing::warn!(%uid, error = %error, "stream error");
                let _ = events.send(TransportEvent::TransportError {
                    message: error.clone(),
                });
                if let Some(record) = pending.remove(&uid) {
                    deadlines.remove(&record.delay_key);
                    if let PendingReply::Stream(tx) = record.reply {
                        let _ = tx.send(Ok(()));
                    }
                }
            }
            _ => {
                let _ = events.send(TransportEvent::Message(envelope));
            }
        }
        return;
    }

    // Single-reply (or discard) record: consumed by the first match.
    let Some(record) = pending.remove(&uid) else {
        return;
    };
    deadlines.remove(&record.delay_key);

    let result = if let ServerBody::Error { error } = &envelope.body {
        Err(ClientError::Server {
            message: error.clone(),
        })
    } else {
        Ok(envelope.clone())
    };

    match record.reply {
        PendingReply::Single(tx) => {
            let _ = tx.send(result);
        }
        PendingReply::Stream(_) => unreachable!("stream records handled above"),
        PendingReply::Discard => {}
    }

    let _ = events.send(TransportEvent::Message(envelope));
}

fn fail_one(reply: PendingReply, error: ClientError) {
    match reply {
        PendingReply::Single(tx) => {
            let _ = tx.send(Err(error));
        }
        PendingReply::Stream(tx) => {
            let _ = tx.send(Err(error));
        }
        PendingReply::Discard => {}
    }
}

fn fail_all(pending: &mut HashMap<Uuid, Pending>, deadlines: &mut DelayQueue<Uuid>) {
    for (_, record) in pending.drain() {
        fail_one(record.reply, ClientError::Channel(ChannelError::Closed));
    }
    deadlines.clear();
}
