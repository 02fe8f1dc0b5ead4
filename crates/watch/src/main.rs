//! `eyesis-watch` -- headless person-of-interest watcher.
//!
//! Replays a directory of extracted video frames through the detection
//! backend, watching for the configured persons, and writes the session's
//! snapshots, detection log and clip list to the output directory when the
//! video ends or on Ctrl-C. See [`eyesis_watch::config`] for the
//! environment variables.

use std::sync::Arc;

use eyesis_client::api::DetectorApi;
use eyesis_client::transport::TransportConfig;
use eyesis_pipeline::config::LoopConfig;
use eyesis_pipeline::detection_loop::{DetectionLoop, LoopHandle};
use eyesis_pipeline::events::{PipelineEvent, StopReason};
use eyesis_watch::artifacts::ArtifactWriter;
use eyesis_watch::config::WatchConfig;
use eyesis_watch::frames::DirectoryFrameSource;
use eyesis_watch::selection::build_selection;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "eyesis_watch=info,eyesis_pipeline=info,eyesis_client=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WatchConfig::from_env().unwrap_or_else(|e| {
        tracing::error!("{e}");
        std::process::exit(1);
    });

    tracing::info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        persons = config.person_ids.len(),
        frames_dir = %config.frames_dir.display(),
        "Starting eyesis-watch",
    );

    let api = DetectorApi::new(config.api_url.clone());
    let directory = match api.list_persons().await {
        Ok(persons) => persons,
        Err(e) => {
            tracing::warn!(error = %e, "Person directory unavailable, watching by id only");
            Vec::new()
        }
    };
    let selection = build_selection(directory, &config.person_ids, &config.display_names);

    let frames = Arc::new(DirectoryFrameSource::open(&config.frames_dir, config.fps)?);
    tracing::info!(frames = frames.len(), duration_secs = frames.duration(), "Frames loaded");

    let transport = TransportConfig::new(config.api_url.clone(), config.ws_url.clone());
    let (handle, task) = DetectionLoop::spawn(Arc::clone(&frames), transport, LoopConfig::default());
    let mut events = handle.subscribe();

    handle.select_persons(selection).await?;
    frames.play();
    handle.video_ready().await?;
    handle.start().await?;

    let reason = tokio::select! {
        reason = watch_events(&mut events) => reason,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping detection");
            handle.stop().await?;
            StopReason::User
        }
    };
    tracing::info!(?reason, "Detection finished");

    write_artifacts(&handle, &api, &config).await?;

    handle.shutdown().await?;
    task.await?;
    Ok(())
}

/// Log pipeline events until detection stops.
async fn watch_events(events: &mut broadcast::Receiver<PipelineEvent>) -> StopReason {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event receiver lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return StopReason::Shutdown,
        };

        match event {
            PipelineEvent::DetectionStopped { reason, .. } => return reason,
            PipelineEvent::SnapshotAdded(snapshot) => tracing::info!(
                person_id = %snapshot.person_id,
                video_time = snapshot.video_time_seconds,
                confidence = snapshot.confidence_percent,
                "Snapshot recorded",
            ),
            PipelineEvent::ClipOpened(clip) => tracing::info!(
                person_id = %clip.person_id,
                start = clip.start_time_seconds,
                "Clip opened",
            ),
            PipelineEvent::ClipClosed(clip) => tracing::info!(
                person_id = %clip.person_id,
                start = clip.start_time_seconds,
                end = clip.end_time_seconds,
                "Clip closed",
            ),
            PipelineEvent::LogAppended(entry) => tracing::info!(
                person = %entry.person_name,
                classification = ?entry.classification,
                video_time = entry.video_time_seconds,
                "Detection logged",
            ),
            PipelineEvent::StreamReady => tracing::info!("Streaming detection active"),
            PipelineEvent::StreamDegraded => {
                tracing::warn!("Streaming unavailable, using one-shot detection")
            }
            PipelineEvent::WaitingForVideo => tracing::debug!("Waiting for video"),
            other => tracing::trace!(event = ?other, "Pipeline event"),
        }
    }
}

async fn write_artifacts(
    handle: &LoopHandle,
    api: &DetectorApi,
    config: &WatchConfig,
) -> anyhow::Result<()> {
    let session = handle.session().await?;
    let writer = ArtifactWriter::new(&config.output_dir)?;
    let summary = writer.write_session(&session)?;
    tracing::info!(
        out_dir = %writer.out_dir().display(),
        snapshots = summary.snapshots.len(),
        log_entries = session.log().len(),
        clips = session.clips().all().len(),
        "Artifacts written",
    );

    if let Some(video_path) = &config.video_path {
        let extracted = writer
            .extract_clips(api, video_path, &session.clips().all())
            .await?;
        tracing::info!(clips = extracted.len(), "Clips extracted");
    }
    Ok(())
}
