use std::{sync::Arc, time::Duration};

use image::RgbImage;
use tokio_util::sync::CancellationToken;

use crate::{
    db::Database,
    matching::{MatchEngine, MatchResult},
    notify::NotificationDispatcher,
    pipeline::{FramePipeline, PipelineDetection},
    plate::ValidatedDetection,
    settings::Settings,
    stream::Frame,
};

use super::stream_session::StreamSession;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Collaborators shared by every session the supervisor starts.
pub struct MonitorContext {
    pub pipeline: Arc<FramePipeline>,
    pub matcher: MatchEngine,
    pub db: Database,
    pub notifier: Arc<NotificationDispatcher>,
    pub pacing: Duration,
    pub log_every_frames: u64,
    /// `None` tolerates read failures forever.
    pub max_consecutive_read_failures: Option<u32>,
}

impl MonitorContext {
    pub fn new(
        pipeline: Arc<FramePipeline>,
        db: Database,
        notifier: Arc<NotificationDispatcher>,
        settings: &Settings,
    ) -> Self {
        Self {
            pipeline,
            matcher: MatchEngine::new(db.clone()),
            db,
            notifier,
            pacing: settings.pacing_interval(),
            log_every_frames: settings.log_every_frames,
            max_consecutive_read_failures: settings.max_consecutive_read_failures,
        }
    }
}

enum LoopExit {
    Cancelled,
    Fatal(String),
}

impl StreamSession {
    /// Drives the `Active` loop until cancelled or a fatal error, then
    /// releases both handles. Frames are handled one at a time.
    pub async fn run(&mut self, ctx: &MonitorContext, cancel: &CancellationToken) {
        let exit = monitoring_loop(self, ctx, cancel).await;
        match exit {
            LoopExit::Cancelled => self.shutdown(None).await,
            LoopExit::Fatal(reason) => self.shutdown(Some(reason)).await,
        }
    }
}

async fn monitoring_loop(
    session: &mut StreamSession,
    ctx: &MonitorContext,
    cancel: &CancellationToken,
) -> LoopExit {
    let mut consecutive_failures: u32 = 0;
    let mut frames_read: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return LoopExit::Cancelled;
        }

        let Some(source) = session.source.as_mut() else {
            return LoopExit::Fatal("input stream handle missing".into());
        };

        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return LoopExit::Cancelled,
            read = source.read_frame() => read,
        };

        match read {
            Ok(frame) => {
                consecutive_failures = 0;
                frames_read += 1;
                session.update(|snapshot| snapshot.frames_read += 1);
                if ctx.log_every_frames > 0 && frames_read % ctx.log_every_frames == 0 {
                    log_info!("Processing frame {frames_read}");
                }

                process_frame(session, ctx, frame).await;
            }
            Err(err) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                session.update(|snapshot| {
                    snapshot.read_failures += 1;
                    snapshot.last_error = Some(err.to_string());
                });
                log_warn!("Frame read failed ({consecutive_failures} in a row): {err}");

                if let Some(limit) = ctx.max_consecutive_read_failures {
                    if consecutive_failures >= limit {
                        return LoopExit::Fatal(format!(
                            "{consecutive_failures} consecutive frame read failures"
                        ));
                    }
                }
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return LoopExit::Cancelled,
            _ = tokio::time::sleep(ctx.pacing) => {}
        }
    }
}

async fn process_frame(session: &mut StreamSession, ctx: &MonitorContext, frame: Frame) {
    let pipeline = ctx.pipeline.clone();
    let render = session.sink.is_some();

    let inference = tokio::task::spawn_blocking(move || {
        let found = pipeline.process(&frame);
        let blurred = render.then(|| {
            let plates: Vec<ValidatedDetection> =
                found.iter().map(|d| d.detection.clone()).collect();
            pipeline.render_blurred(&frame.image, &plates)
        });
        (found, blurred)
    })
    .await;

    let (found, blurred) = match inference {
        Ok(result) => result,
        Err(err) => {
            log_error!("Frame inference task failed: {err}");
            return;
        }
    };

    if !found.is_empty() {
        let count = found.len() as u64;
        session.update(|snapshot| snapshot.plates_detected += count);
    }
    for detection in found {
        handle_detection(ctx, detection).await;
    }

    if let Some(blurred) = blurred {
        write_output(session, &blurred).await;
    }
}

/// Match, persist, notify. Every failure is logged and the next detection
/// still runs.
async fn handle_detection(ctx: &MonitorContext, found: PipelineDetection) {
    let PipelineDetection {
        detection,
        evidence,
    } = found;

    let result = match ctx.matcher.match_plate(&detection.plate).await {
        Ok(result) => result,
        Err(err) => {
            log_warn!("Lookup of {} failed, recording as unmatched: {err}", detection.plate);
            MatchResult::unmatched()
        }
    };

    match result.vehicle() {
        Some(vehicle) => log_info!(
            "Plate {} matched vehicle {} {} ({} appointment(s) today)",
            detection.plate,
            vehicle.brand,
            vehicle.model,
            result.appointments_today().len()
        ),
        None => log_info!("Plate {} not in registry", detection.plate),
    }

    let record = result.to_detection(
        &detection.plate,
        detection.confidence,
        evidence,
        true,
        detection.frame_timestamp,
    );
    if let Err(err) = ctx.db.insert_detection(record).await {
        log_warn!(
            "{}",
            crate::error::PersistenceError::from(err.context(format!(
                "recording detection of {}",
                detection.plate
            )))
        );
    }

    if ctx
        .notifier
        .dispatch(&result, &detection.plate, detection.frame_timestamp)
        .is_none()
    {
        log_debug!("No arrival notification for {}", detection.plate);
    }
}

async fn write_output(session: &mut StreamSession, frame: &RgbImage) {
    let Some(sink) = session.sink.as_mut() else {
        return;
    };
    if let Err(err) = sink.write_frame(frame).await {
        log_warn!("Failed to write blurred frame: {err}");
    }
}
