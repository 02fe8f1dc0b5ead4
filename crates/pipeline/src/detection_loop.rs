//! The detection scheduler.
//!
//! [`DetectionLoop`] owns the [`SessionContext`] and the [`TransportClient`]
//! and runs on a single task. Everything that happens to it arrives as a
//! message: commands from [`LoopHandle`]s, transport events, and the
//! completions of one-shot detection calls. At most one cycle is in
//! flight; each completion starts the next one.
//!
//! Every activation and deactivation bumps an epoch. Results from an
//! earlier epoch are dropped on arrival, so a slow response can never land
//! in a stopped or re-selected session.

use std::sync::Arc;

use chrono::Utc;
use eyesis_client::events::TransportEvent;
use eyesis_client::transport::{ReconnectGate, TransportClient, TransportConfig, TransportOutcome};
use eyesis_core::detection::{DetectionRequest, DetectionResult};
use eyesis_core::detection_log::LogOutcome;
use eyesis_core::frame::FrameSource;
use eyesis_core::person::Selection;
use eyesis_core::session::SessionContext;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::LoopConfig;
use crate::debounce::Debounce;
use crate::error::PipelineError;
use crate::events::{PipelineEvent, StopReason};
use crate::overlay::OverlayMemory;

/// Broadcast channel capacity for pipeline events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Commands accepted by the loop.
#[derive(Debug)]
pub enum LoopCommand {
    Start,
    Stop,
    /// Replace the watched persons; starts a fresh session.
    SelectPersons(Selection),
    /// The player can produce frames now.
    VideoReady,
    VideoEnded,
    /// Discard every record for a new video.
    ResetSession,
    /// Reply with a copy of the current session.
    Session(oneshot::Sender<SessionContext>),
    Shutdown,
}

/// Cloneable handle for driving a running [`DetectionLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    commands: mpsc::Sender<LoopCommand>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl LoopHandle {
    /// Subscribe to pipeline events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    pub async fn start(&self) -> Result<(), PipelineError> {
        self.send(LoopCommand::Start).await
    }

    pub async fn stop(&self) -> Result<(), PipelineError> {
        self.send(LoopCommand::Stop).await
    }

    pub async fn select_persons(&self, selection: Selection) -> Result<(), PipelineError> {
        self.send(LoopCommand::SelectPersons(selection)).await
    }

    pub async fn video_ready(&self) -> Result<(), PipelineError> {
        self.send(LoopCommand::VideoReady).await
    }

    pub async fn video_ended(&self) -> Result<(), PipelineError> {
        self.send(LoopCommand::VideoEnded).await
    }

    pub async fn reset_session(&self) -> Result<(), PipelineError> {
        self.send(LoopCommand::ResetSession).await
    }

    /// A copy of the session's records as of now.
    pub async fn session(&self) -> Result<SessionContext, PipelineError> {
        let (reply, response) = oneshot::channel();
        self.send(LoopCommand::Session(reply)).await?;
        response.await.map_err(|_| PipelineError::LoopClosed)
    }

    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        self.send(LoopCommand::Shutdown).await
    }

    // ---- private helpers ----

    async fn send(&self, command: LoopCommand) -> Result<(), PipelineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PipelineError::LoopClosed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Via {
    Stream,
    Discrete,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    epoch: u64,
    sequence: u64,
    via: Via,
}

/// Result of a one-shot call, sent back from its task.
struct Completion {
    epoch: u64,
    sequence: u64,
    result: Option<DetectionResult>,
}

pub struct DetectionLoop<F> {
    frames: Arc<F>,
    transport: TransportClient,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    commands: mpsc::Receiver<LoopCommand>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    event_tx: broadcast::Sender<PipelineEvent>,
    session: SessionContext,
    config: LoopConfig,
    active: bool,
    video_ended: bool,
    epoch: u64,
    in_flight: Option<InFlight>,
    /// When to retry a capture that produced nothing.
    retry_at: Option<Instant>,
    timeline: Debounce,
    overlay: OverlayMemory,
}

impl<F: FrameSource + 'static> DetectionLoop<F> {
    pub fn new(
        frames: Arc<F>,
        transport: TransportConfig,
        config: LoopConfig,
    ) -> (Self, LoopHandle) {
        let (commands_tx, commands) = mpsc::channel(config.command_capacity);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (transport, transport_events) = TransportClient::new(transport);

        let handle = LoopHandle {
            commands: commands_tx,
            event_tx: event_tx.clone(),
        };
        let detection_loop = Self {
            frames,
            transport,
            transport_events,
            commands,
            completions_tx,
            completions_rx,
            event_tx,
            session: SessionContext::default(),
            timeline: Debounce::new(config.timeline_debounce),
            overlay: OverlayMemory::new(config.overlay_grace),
            config,
            active: false,
            video_ended: false,
            epoch: 0,
            in_flight: None,
            retry_at: None,
        };
        (detection_loop, handle)
    }

    /// Build a loop and run it on its own task.
    pub fn spawn(
        frames: Arc<F>,
        transport: TransportConfig,
        config: LoopConfig,
    ) -> (LoopHandle, JoinHandle<()>) {
        let (detection_loop, handle) = Self::new(frames, transport, config);
        (handle, tokio::spawn(detection_loop.run()))
    }

    /// Process messages until shut down or every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!(session_id = %self.session.session_id(), "Detection loop started");

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        self.shutdown();
                        break;
                    };
                    if !self.on_command(command) {
                        break;
                    }
                }
                Some(event) = self.transport_events.recv() => {
                    let gate = self.gate();
                    if let Some(outcome) = self.transport.handle(event, gate) {
                        self.on_transport(outcome);
                    }
                }
                Some(completion) = self.completions_rx.recv() => {
                    self.on_completion(completion);
                }
                _ = sleep_until(self.retry_at) => {
                    self.retry_at = None;
                    self.try_cycle();
                }
                _ = sleep_until(self.timeline.deadline()) => {
                    if self.timeline.fire(Instant::now()) {
                        self.publish_timeline();
                    }
                }
            }
        }

        tracing::info!("Detection loop exited");
    }

    // ---- commands ----

    /// Returns `false` when the loop should exit.
    fn on_command(&mut self, command: LoopCommand) -> bool {
        match command {
            LoopCommand::Start => self.activate(),
            LoopCommand::Stop => self.deactivate(StopReason::User),
            LoopCommand::SelectPersons(selection) => self.select(selection),
            LoopCommand::VideoReady => self.try_cycle(),
            LoopCommand::VideoEnded => self.on_video_ended(),
            LoopCommand::ResetSession => self.reset_session(),
            LoopCommand::Session(reply) => {
                let _ = reply.send(self.session.clone());
            }
            LoopCommand::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    fn activate(&mut self) {
        if self.active {
            return;
        }
        if self.video_ended || self.frames.has_ended() {
            self.video_ended = true;
            tracing::info!("Video has ended, detection not started");
            return;
        }
        if self.session.selection().is_empty() {
            tracing::warn!("Detection started with no persons selected");
        }

        self.active = true;
        self.epoch += 1;
        self.in_flight = None;
        tracing::info!(
            epoch = self.epoch,
            watched = self.session.selection().len(),
            "Detection started",
        );
        self.publish(PipelineEvent::DetectionStarted { epoch: self.epoch });

        // The stream comes up in the background; cycles run on one-shot
        // calls until it is ready.
        self.transport.connect();
        self.try_cycle();
    }

    fn deactivate(&mut self, reason: StopReason) {
        if !self.active {
            return;
        }
        self.active = false;
        self.epoch += 1;
        self.in_flight = None;
        self.retry_at = None;

        let end_time = self.frames.current_time();
        for clip in self.session.close_open_clips(end_time) {
            tracing::debug!(
                clip_id = clip.id,
                person_id = %clip.person_id,
                start = clip.start_time_seconds,
                end = end_time,
                "Clip closed",
            );
            self.publish(PipelineEvent::ClipClosed(clip));
        }
        self.overlay.clear();
        self.publish(PipelineEvent::OverlayCleared);

        tracing::info!(epoch = self.epoch, ?reason, "Detection stopped");
        self.publish(PipelineEvent::DetectionStopped {
            epoch: self.epoch,
            reason,
        });
    }

    fn on_video_ended(&mut self) {
        self.video_ended = true;
        self.deactivate(StopReason::VideoEnded);
    }

    fn select(&mut self, selection: Selection) {
        self.discard_pending();
        self.session.select(selection);
        self.transport.configure(self.session.selection().ids());

        tracing::info!(
            session_id = %self.session.session_id(),
            watched = self.session.selection().len(),
            "Person selection changed",
        );
        self.publish(PipelineEvent::SessionReset {
            session_id: self.session.session_id(),
        });
        self.try_cycle();
    }

    fn reset_session(&mut self) {
        self.deactivate(StopReason::User);
        self.discard_pending();
        self.video_ended = false;
        self.session.reset();
        self.transport.reset();

        tracing::info!(session_id = %self.session.session_id(), "Session reset");
        self.publish(PipelineEvent::SessionReset {
            session_id: self.session.session_id(),
        });
    }

    fn shutdown(&mut self) {
        self.deactivate(StopReason::Shutdown);
        self.transport.shutdown();
    }

    /// Forget the in-flight cycle and any queued follow-up work.
    fn discard_pending(&mut self) {
        self.epoch += 1;
        self.in_flight = None;
        self.retry_at = None;
        self.timeline.cancel();
        self.overlay.clear();
    }

    fn gate(&self) -> ReconnectGate {
        ReconnectGate {
            detection_active: self.active,
            video_ended: self.video_ended,
        }
    }

    // ---- cycles ----

    /// Start a cycle if detection is on and nothing is in flight.
    fn try_cycle(&mut self) {
        if !self.active || self.in_flight.is_some() {
            return;
        }
        if self.frames.has_ended() {
            self.on_video_ended();
            return;
        }
        if !self.frames.is_ready() {
            // VideoReady resumes the loop.
            tracing::debug!("Video not ready, waiting");
            self.publish(PipelineEvent::WaitingForVideo);
            return;
        }
        let Some(frame) = self.frames.capture() else {
            self.retry_at = Some(Instant::now() + self.config.idle_retry);
            return;
        };

        let request = DetectionRequest {
            frame_encoding: frame.encoding,
            watched_person_ids: self.session.selection().ids(),
            sequence_number: self.session.next_sequence(),
            video_time_seconds: frame.video_time,
        };
        let sequence = request.sequence_number;

        if self.transport.submit_frame(&request) {
            self.in_flight = Some(InFlight {
                epoch: self.epoch,
                sequence,
                via: Via::Stream,
            });
            return;
        }

        self.in_flight = Some(InFlight {
            epoch: self.epoch,
            sequence,
            via: Via::Discrete,
        });
        let call = self.transport.submit_frame_discrete(&request);
        let completions = self.completions_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = call.await;
            let _ = completions.send(Completion {
                epoch,
                sequence,
                result,
            });
        });
        tracing::debug!(
            sequence,
            video_time = request.video_time_seconds,
            "Frame sent as one-shot call",
        );
    }

    fn on_completion(&mut self, completion: Completion) {
        let current = matches!(
            self.in_flight,
            Some(f) if f.via == Via::Discrete
                && f.epoch == completion.epoch
                && f.sequence == completion.sequence
        );
        if !current {
            tracing::debug!(
                sequence = completion.sequence,
                epoch = completion.epoch,
                "Discarding stale detection result",
            );
            return;
        }
        self.complete(completion.result);
    }

    fn on_transport(&mut self, outcome: TransportOutcome) {
        match outcome {
            TransportOutcome::Ready => self.publish(PipelineEvent::StreamReady),
            TransportOutcome::Detection(result) => {
                let current = matches!(
                    self.in_flight,
                    Some(f) if f.via == Via::Stream
                        && result.frame_id.map_or(true, |id| id == f.sequence)
                );
                if !current {
                    tracing::debug!(frame_id = ?result.frame_id, "Discarding stale streamed result");
                    return;
                }
                self.complete(Some(result));
            }
            TransportOutcome::ServerError(_) | TransportOutcome::Disconnected => {
                self.abandon_streamed_cycle();
            }
            TransportOutcome::Degraded => {
                self.publish(PipelineEvent::StreamDegraded);
                self.abandon_streamed_cycle();
            }
        }
    }

    /// A streamed frame will get no answer; finish its cycle empty.
    fn abandon_streamed_cycle(&mut self) {
        if matches!(self.in_flight, Some(f) if f.via == Via::Stream) {
            self.complete(None);
        }
    }

    fn complete(&mut self, result: Option<DetectionResult>) {
        self.in_flight = None;
        let now = Instant::now();
        match result {
            Some(result) => self.apply(result, now),
            None => {
                let overlay = self.overlay.on_failure(now);
                self.publish(overlay);
            }
        }
        self.try_cycle();
    }

    fn apply(&mut self, result: DetectionResult, now: Instant) {
        let outcome = self
            .session
            .apply(&result, self.frames.as_ref(), Utc::now());

        let overlay = self.overlay.show(now, result.detections, outcome.alert);
        self.publish(overlay);

        if !outcome.snapshots.is_empty() {
            self.timeline.trigger(now);
        }
        for snapshot in outcome.snapshots {
            tracing::debug!(
                snapshot_id = snapshot.id,
                person_id = %snapshot.person_id,
                video_time = snapshot.video_time_seconds,
                "Snapshot recorded",
            );
            self.publish(PipelineEvent::SnapshotAdded(snapshot));
        }

        for watched in &outcome.watched {
            let opened = self
                .session
                .clips()
                .active(&watched.person.id)
                .filter(|clip| outcome.opened_clips.contains(&clip.id))
                .cloned();
            if let Some(clip) = opened {
                tracing::info!(
                    clip_id = clip.id,
                    person_id = %clip.person_id,
                    start = clip.start_time_seconds,
                    "Clip opened",
                );
                self.publish(PipelineEvent::ClipOpened(clip));
            }
        }
        for clip in outcome.closed_clips {
            tracing::info!(
                clip_id = clip.id,
                person_id = %clip.person_id,
                start = clip.start_time_seconds,
                end = ?clip.end_time_seconds,
                "Clip closed",
            );
            self.publish(PipelineEvent::ClipClosed(clip));
        }

        match outcome.log {
            LogOutcome::Appended { entry, evicted } => {
                if let Some(evicted) = evicted {
                    tracing::debug!(entry_id = %evicted.id, "Oldest log entry evicted");
                }
                tracing::info!(
                    person_id = %entry.person_id,
                    video_time = entry.video_time_seconds,
                    confidence = entry.confidence_percent,
                    "Detection logged",
                );
                self.publish(PipelineEvent::LogAppended(entry));
            }
            LogOutcome::Idle => self.publish(PipelineEvent::LogIdle),
            other => tracing::trace!(outcome = ?other, "Log unchanged"),
        }
    }

    fn publish_timeline(&mut self) {
        let timeline = self.session.timeline(self.config.merge_threshold);
        tracing::debug!(persons = timeline.len(), "Timeline recomputed");
        self.publish(PipelineEvent::TimelineUpdated(timeline));
    }

    fn publish(&self, event: PipelineEvent) {
        // Ignore the SendError: it only means there are zero subscribers.
        let _ = self.event_tx.send(event);
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
