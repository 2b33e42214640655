//! Control surface consumed by an embedding HTTP layer or the CLI.

use chrono::{DateTime, Duration, Local, Utc};
use serde::Serialize;

use crate::{
    db::models::{Appointment, Customer, DetectionRecord, DetectionStatistics, Vehicle},
    detection::ModelReadiness,
    error::ControlError,
    matching::MatchResult,
    pipeline::EvidenceImage,
    plate::clean,
    session::{SessionSnapshot, StartOutcome, StopOutcome},
    AppState,
};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    /// `started` or `already_running`.
    pub status: &'static str,
    pub message: String,
    pub stream_ref: String,
    pub session: SessionSnapshot,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    /// `stopped` or `not_running`.
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringStatus {
    pub is_streaming: bool,
    pub is_task_running: bool,
    /// `active` while streaming or while the task is still running.
    pub status: &'static str,
    pub session: Option<SessionSnapshot>,
    pub models: ModelReadiness,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    /// `found` or `not_found`.
    pub status: &'static str,
    pub plate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<Vehicle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<Customer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointments_today: Option<Vec<Appointment>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManualDetectionResponse {
    pub license_plate: String,
    pub detected_at: DateTime<Local>,
    pub vehicle_found: bool,
    pub vehicle: Option<Vehicle>,
    pub customer: Option<Customer>,
    pub appointments: Vec<Appointment>,
    pub message: String,
    pub detection_id: i64,
    pub notified: bool,
}

fn match_message(plate: &str, result: &MatchResult) -> String {
    match result.vehicle() {
        Some(vehicle) => {
            let count = result.appointments_today().len();
            if count > 0 {
                format!(
                    "Vehicle found: {} {} - {count} appointment(s) today",
                    vehicle.brand, vehicle.model
                )
            } else {
                format!(
                    "Vehicle found: {} {} - no appointments today",
                    vehicle.brand, vehicle.model
                )
            }
        }
        None => format!("Plate {plate} not found"),
    }
}

/// A task that is still winding down counts as active.
fn activity(is_streaming: bool, is_task_running: bool) -> &'static str {
    if is_streaming || is_task_running {
        "active"
    } else {
        "inactive"
    }
}

fn normalized(plate_text: &str) -> Result<String, ControlError> {
    let plate = clean(plate_text);
    if plate.is_empty() {
        return Err(ControlError::EmptyPlate(plate_text.to_string()));
    }
    Ok(plate)
}

/// Starts monitoring `stream_ref`, or the configured default stream.
pub async fn start_monitoring(
    state: &AppState,
    stream_ref: Option<String>,
    output_ref: Option<String>,
) -> Result<StartResponse, ControlError> {
    let stream_ref = stream_ref
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| state.settings.default_stream_ref.clone());

    let outcome = state
        .supervisor
        .start(&stream_ref, output_ref.as_deref())
        .await?;

    Ok(match outcome {
        StartOutcome::Accepted(session) => StartResponse {
            status: "started",
            message: format!("Monitoring started on {stream_ref}"),
            stream_ref,
            session,
        },
        StartOutcome::AlreadyRunning(session) => StartResponse {
            status: "already_running",
            message: "Monitoring is already running".into(),
            stream_ref: session.stream_ref.clone(),
            session,
        },
    })
}

pub async fn stop_monitoring(state: &AppState) -> StopResponse {
    match state.supervisor.stop().await {
        StopOutcome::Stopped(session) => StopResponse {
            status: "stopped",
            message: format!(
                "Monitoring stopped after {} frame(s), {} plate(s)",
                session.frames_read, session.plates_detected
            ),
        },
        StopOutcome::NotRunning => StopResponse {
            status: "not_running",
            message: "Monitoring is not running".into(),
        },
    }
}

pub async fn monitoring_status(state: &AppState) -> MonitoringStatus {
    let status = state.supervisor.status().await;
    MonitoringStatus {
        is_streaming: status.is_active,
        is_task_running: status.is_task_running,
        status: activity(status.is_active, status.is_task_running),
        session: status.session,
        models: state.pipeline.models().readiness(),
    }
}

pub async fn lookup_plate(state: &AppState, plate_text: &str) -> Result<LookupResponse, ControlError> {
    let plate = normalized(plate_text)?;
    let result = state.matcher.match_plate(&plate).await?;

    if !result.is_match() {
        return Ok(LookupResponse {
            status: "not_found",
            plate,
            vehicle: None,
            customer: None,
            appointments_today: None,
        });
    }

    Ok(LookupResponse {
        status: "found",
        plate,
        vehicle: result.vehicle().cloned(),
        customer: result.customer().cloned(),
        appointments_today: Some(result.appointments_today().to_vec()),
    })
}

/// Treats typed-in text like a camera detection: match, record with
/// `is_automatic = false`, notify.
pub async fn submit_manual_detection(
    state: &AppState,
    plate_text: &str,
) -> Result<ManualDetectionResponse, ControlError> {
    let plate = normalized(plate_text)?;
    let detected_at = Local::now();
    let result = state.matcher.match_plate(&plate).await?;

    let detection_id = state
        .db
        .insert_detection(result.to_detection(&plate, 1.0, None, false, detected_at))
        .await?;
    let notified = state
        .notifier
        .dispatch(&result, &plate, detected_at)
        .is_some();

    Ok(ManualDetectionResponse {
        message: match_message(&plate, &result),
        vehicle_found: result.is_match(),
        vehicle: result.vehicle().cloned(),
        customer: result.customer().cloned(),
        appointments: result.appointments_today().to_vec(),
        license_plate: plate,
        detected_at,
        detection_id,
        notified,
    })
}

pub async fn recent_detections(
    state: &AppState,
    limit: u32,
) -> Result<Vec<DetectionRecord>, ControlError> {
    Ok(state.db.recent_detections(limit).await?)
}

pub async fn unprocessed_detections(state: &AppState) -> Result<Vec<DetectionRecord>, ControlError> {
    Ok(state.db.unprocessed_detections().await?)
}

/// Statistics over the last `days` days, ending now.
pub async fn detection_statistics(
    state: &AppState,
    days: u32,
) -> Result<DetectionStatistics, ControlError> {
    let to = Utc::now();
    let from = to - Duration::days(i64::from(days));
    Ok(state.db.detection_statistics(from, to).await?)
}

pub fn list_evidence(state: &AppState) -> Result<Vec<EvidenceImage>, ControlError> {
    Ok(state.pipeline.evidence().list()?)
}
