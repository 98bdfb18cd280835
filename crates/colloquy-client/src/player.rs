//! Streaming audio playback — batch decode, gapless scheduling, and the
//! early about-to-complete signal.
//!
//! Compressed chunks arrive base64-encoded and are staged until a small
//! batch is available (or an idle timer fires), reassembled into whole
//! frames, decoded, and scheduled back-to-back against the playback
//! clock. One cycle emits `Ready` → `Playing` → (`AboutToComplete`) →
//! `Finished`, with `Finished` fired exactly once regardless of whether
//! the last buffer ends before or after the server marks the stream
//! complete.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::Engine as _;
use colloquy_core::ports::{AudioDecoder, PcmBuffer, PlaybackClock, PlaybackSink};
use tokio::sync::mpsc;

use crate::frame::FrameExtractor;

/// Chunks staged before a batch decode is attempted.
pub const MIN_DECODE_BATCH: usize = 2;

/// Idle delay after which a short staging list is decoded anyway.
pub const STAGING_FLUSH_DELAY: Duration = Duration::from_millis(450);

/// How early `AboutToComplete` fires before the end of playback.
pub const ABOUT_TO_COMPLETE_THRESHOLD: Duration = Duration::from_millis(1000);

/// Playback lifecycle events, emitted in this order within one cycle.
/// A cycle whose audio never yields a playable buffer ends with
/// `Failed` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// The first buffer is decoded and playback can start.
    Ready,

    /// Playback has started.
    Playing,

    /// Playback will finish within [`ABOUT_TO_COMPLETE_THRESHOLD`].
    AboutToComplete,

    /// All audio of a completed stream has played out.
    Finished,

    /// The stream completed, audio arrived, but no playable buffers
    /// could be established from it.
    Failed,
}

/// Immutable collaborators shared with timers and sink callbacks.
struct Shared {
    clock: Arc<dyn PlaybackClock>,
    sink: Arc<dyn PlaybackSink>,
    decoder: Arc<dyn AudioDecoder>,
    events: mpsc::UnboundedSender<PlayerEvent>,
}

impl Shared {
    fn emit(&self, event: PlayerEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!(?event, "player event receiver dropped");
        }
    }
}

/// Mutable playback state. One cycle runs from the first enqueue to
/// `Finished` (or a reset).
struct Inner {
    staging: Vec<Vec<u8>>,
    extractor: FrameExtractor,
    queue: VecDeque<PcmBuffer>,

    /// Media time at which the next buffer will be scheduled.
    cursor: f64,

    playing: bool,
    paused: bool,

    /// A scheduled pass whose end hook has not fired yet.
    outstanding: bool,

    /// The last scheduled buffer ended while the stream was still open.
    all_played: bool,

    /// `mark_complete` has been called for this cycle.
    complete: bool,

    /// At least one buffer of this cycle decoded successfully.
    decoded_any: bool,

    /// At least one batch of this cycle failed to decode.
    decode_failed: bool,

    ready_sent: bool,
    finished_sent: bool,
    about_sent: bool,

    /// Re-entrancy latch around scheduling passes.
    scheduling: bool,

    flush_armed: bool,

    /// Invalidates timers and end hooks from earlier cycles.
    generation: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            staging: Vec::new(),
            extractor: FrameExtractor::new(),
            queue: VecDeque::new(),
            cursor: 0.0,
            playing: false,
            paused: false,
            outstanding: false,
            all_played: false,
            complete: false,
            decoded_any: false,
            decode_failed: false,
            ready_sent: false,
            finished_sent: false,
            about_sent: false,
            scheduling: false,
            flush_armed: false,
            generation: 0,
        }
    }
}

/// Decodes arriving compressed chunks and plays them gaplessly.
#[derive(Clone)]
pub struct StreamingAudioPlayer {
    shared: Arc<Shared>,
    inner: Arc<Mutex<Inner>>,
}

impl StreamingAudioPlayer {
    /// Build a player over the given platform ports. Returns the player
    /// and the receiver of its lifecycle events.
    #[must_use]
    pub fn new(
        clock: Arc<dyn PlaybackClock>,
        sink: Arc<dyn PlaybackSink>,
        decoder: Arc<dyn AudioDecoder>,
    ) -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let player = Self {
            shared: Arc::new(Shared {
                clock,
                sink,
                decoder,
                events,
            }),
            inner: Arc::new(Mutex::new(Inner::new())),
        };
        (player, events_rx)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stage one base64-encoded compressed chunk.
    ///
    /// Undecodable input is logged and dropped; occasional malformed
    /// chunks are expected and non-fatal. Must be called from within the
    /// runtime (arms the idle flush timer).
    pub fn enqueue(&self, chunk_b64: &str) {
        let bytes = match base64::engine::general_purpose::STANDARD.decode(chunk_b64) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "dropping chunk with invalid base64");
                return;
            }
        };

        let mut inner = self.lock();
        inner.staging.push(bytes);

        if inner.staging.len() >= MIN_DECODE_BATCH {
            flush_staging(&mut inner, &self.shared, &self.inner);
        } else if !inner.flush_armed {
            inner.flush_armed = true;
            let generation = inner.generation;
            let shared = Arc::clone(&self.shared);
            let inner_arc = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(STAGING_FLUSH_DELAY).await;
                let mut inner = inner_arc.lock().unwrap_or_else(PoisonError::into_inner);
                if inner.generation == generation && inner.flush_armed {
                    flush_staging(&mut inner, &shared, &inner_arc);
                }
            });
        }
    }

    /// Start playback of everything queued so far.
    pub fn play(&self) {
        let mut inner = self.lock();
        if !inner.playing {
            inner.playing = true;
            inner.paused = false;
            self.shared.emit(PlayerEvent::Playing);
        }
        schedule_pass(&mut inner, &self.shared, &self.inner);
    }

    /// Record that no more audio will arrive for this cycle.
    ///
    /// Flushes the staging list, emits `Finished` immediately when all
    /// scheduled audio has already ended, and arms the about-to-complete
    /// tracker otherwise.
    pub fn mark_complete(&self) {
        let mut inner = self.lock();
        if inner.complete {
            return;
        }
        inner.complete = true;
        flush_staging(&mut inner, &self.shared, &self.inner);

        if !inner.decoded_any && (inner.decode_failed || inner.extractor.pending() > 0) {
            // Audio arrived for this cycle but none of it was playable:
            // every batch failed, or the bytes never formed one whole
            // frame. Per-batch glitches are dropped above; a turn with
            // no established buffers at all is a surfaced fault.
            self.shared.emit(PlayerEvent::Failed);
            return;
        }

        let drained = inner.playing
            && !inner.outstanding
            && inner.queue.is_empty()
            && inner.staging.is_empty();
        if inner.all_played || drained {
            // The last end hook fired before the completion marker.
            finish(&mut inner, &self.shared);
            return;
        }

        update_about_tracker(&mut inner, &self.shared, &self.inner);
    }

    /// Suspend playback.
    pub fn pause(&self) {
        let mut inner = self.lock();
        if inner.playing && !inner.paused {
            inner.paused = true;
            self.shared.sink.pause();
            tracing::debug!("playback paused");
        }
    }

    /// Resume playback after [`pause`](Self::pause).
    pub fn resume(&self) {
        let mut inner = self.lock();
        if inner.paused {
            inner.paused = false;
            self.shared.sink.resume();
            tracing::debug!("playback resumed");
        }
    }

    /// Whether a playback cycle is active and not paused.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        let inner = self.lock();
        inner.playing && !inner.paused
    }

    /// Output gain, clamped to `[0.0, 1.0]`.
    pub fn set_volume(&self, volume: f32) {
        self.shared.sink.set_volume(volume.clamp(0.0, 1.0));
    }

    /// Stop playback and clear the cycle: queue, staging, partial
    /// frames, latches, and any pending timers.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        self.shared.sink.cancel_all();

        inner.staging.clear();
        inner.extractor.reset();
        inner.queue.clear();
        inner.cursor = 0.0;
        inner.playing = false;
        inner.paused = false;
        inner.outstanding = false;
        inner.all_played = false;
        inner.complete = false;
        inner.decoded_any = false;
        inner.decode_failed = false;
        inner.ready_sent = false;
        inner.finished_sent = false;
        inner.about_sent = false;
        inner.scheduling = false;
        inner.flush_armed = false;
        tracing::debug!("player reset");
    }

    /// Seconds of audio left to play: queued buffers plus the scheduled
    /// remainder.
    #[must_use]
    pub fn remaining_secs(&self) -> f64 {
        let inner = self.lock();
        remaining_secs(&inner, &self.shared)
    }
}

/// Decode the staged chunks as one batch and queue the result.
fn flush_staging(inner: &mut Inner, shared: &Arc<Shared>, inner_arc: &Arc<Mutex<Inner>>) {
    inner.flush_armed = false;
    if inner.staging.is_empty() {
        return;
    }

    let blob: Vec<u8> = inner.staging.drain(..).flatten().collect();
    let frames = inner.extractor.feed(&blob);
    if frames.is_empty() {
        // Nothing decodable yet; the partial tail stays in the extractor.
        return;
    }

    let bytes: Vec<u8> = frames.iter().flat_map(|f| f.as_ref()).copied().collect();
    match shared.decoder.decode(&bytes) {
        Ok(pcm) if !pcm.samples.is_empty() => {
            tracing::trace!(
                bytes = bytes.len(),
                duration_ms = pcm.duration().as_millis(),
                "decoded audio batch"
            );
            let first_into_idle = inner.queue.is_empty() && !inner.playing && !inner.ready_sent;
            inner.decoded_any = true;
            inner.queue.push_back(pcm);

            if first_into_idle {
                inner.ready_sent = true;
                shared.emit(PlayerEvent::Ready);
            }
            if inner.playing && !inner.outstanding {
                // No pass in flight: schedule directly. Otherwise the
                // current pass's end hook picks the new audio up, so the
                // hook always sits on the true last buffer.
                schedule_pass(inner, shared, inner_arc);
            }
            if inner.complete {
                // A late buffer after the completion marker shortens or
                // re-times the about-to-complete signal.
                update_about_tracker(inner, shared, inner_arc);
            }
        }
        Ok(_) => {}
        Err(e) => {
            // Malformed frames arrive occasionally; recoverable unless
            // the whole cycle ends up like this.
            inner.decode_failed = true;
            tracing::warn!(error = %e, bytes = bytes.len(), "dropping undecodable audio batch");
        }
    }
}

/// Schedule every queued buffer starting at the cursor, attaching the
/// end hook only to the last one.
fn schedule_pass(inner: &mut Inner, shared: &Arc<Shared>, inner_arc: &Arc<Mutex<Inner>>) {
    if inner.scheduling {
        return;
    }
    inner.scheduling = true;

    let now = shared.clock.now();
    if inner.cursor < now {
        // The clock slipped past the cursor during an underrun.
        inner.cursor = now;
    }

    let buffers: Vec<PcmBuffer> = inner.queue.drain(..).collect();
    let count = buffers.len();
    if count == 0 {
        inner.scheduling = false;
        return;
    }

    for (index, buffer) in buffers.into_iter().enumerate() {
        let at = inner.cursor;
        inner.cursor += buffer.duration().as_secs_f64();

        let on_ended = (index == count - 1).then(|| {
            let generation = inner.generation;
            let shared = Arc::clone(shared);
            let inner_arc = Arc::clone(inner_arc);
            let hook: Box<dyn FnOnce() + Send + 'static> = Box::new(move || {
                let mut inner = inner_arc.lock().unwrap_or_else(PoisonError::into_inner);
                if inner.generation != generation {
                    return;
                }
                on_last_ended(&mut inner, &shared, &inner_arc);
            });
            hook
        });

        if let Err(e) = shared.sink.schedule(buffer, at, on_ended) {
            tracing::warn!(error = %e, "sink rejected a scheduled buffer");
        }
    }

    inner.outstanding = true;
    inner.all_played = false;
    inner.scheduling = false;
}

/// End hook of the last scheduled buffer.
fn on_last_ended(inner: &mut Inner, shared: &Arc<Shared>, inner_arc: &Arc<Mutex<Inner>>) {
    inner.outstanding = false;

    if !inner.queue.is_empty() {
        // More audio arrived while the previous pass was playing.
        schedule_pass(inner, shared, inner_arc);
    } else if inner.complete {
        finish(inner, shared);
    } else {
        // The stream is still open; wait for the completion marker.
        inner.all_played = true;
    }
}

/// Emit `Finished` exactly once per cycle.
fn finish(inner: &mut Inner, shared: &Arc<Shared>) {
    if inner.finished_sent || inner.paused {
        return;
    }
    inner.finished_sent = true;
    inner.playing = false;
    shared.emit(PlayerEvent::Finished);
}

/// Remaining audible seconds: undispensed queue plus scheduled tail.
fn remaining_secs(inner: &Inner, shared: &Arc<Shared>) -> f64 {
    let queued: f64 = inner
        .queue
        .iter()
        .map(|b| b.duration().as_secs_f64())
        .sum();
    queued + (inner.cursor - shared.clock.now()).max(0.0)
}

/// Arm or fire the about-to-complete signal.
///
/// Evaluated when the stream is marked complete and again whenever a
/// buffer arrives afterwards. At most one signal per cycle.
fn update_about_tracker(inner: &mut Inner, shared: &Arc<Shared>, inner_arc: &Arc<Mutex<Inner>>) {
    if inner.about_sent || inner.finished_sent {
        return;
    }

    let remaining = remaining_secs(inner, shared);
    let threshold = ABOUT_TO_COMPLETE_THRESHOLD.as_secs_f64();
    if remaining <= threshold {
        inner.about_sent = true;
        shared.emit(PlayerEvent::AboutToComplete);
        return;
    }

    let generation = inner.generation;
    let delay = Duration::from_secs_f64(remaining - threshold);
    let shared = Arc::clone(shared);
    let inner_arc = Arc::clone(inner_arc);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let mut inner = inner_arc.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.generation != generation || inner.about_sent || inner.finished_sent {
            // Superseded, already signalled, or playback ended early.
            return;
        }
        inner.about_sent = true;
        shared.emit(PlayerEvent::AboutToComplete);
    });
}
