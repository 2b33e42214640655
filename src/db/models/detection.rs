use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit row written once per validated detection, matched or not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
    pub id: i64,
    pub license_plate: String,
    pub confidence: f64,
    pub image_path: Option<String>,
    /// True iff a vehicle was matched when the row was created.
    pub processed: bool,
    pub vehicle_id: Option<i64>,
    pub is_automatic: bool,
    /// Snapshot of the match outcome at detection time.
    pub detection_data: Option<serde_json::Value>,
    pub detected_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDetection {
    pub license_plate: String,
    pub confidence: f64,
    pub image_path: Option<PathBuf>,
    pub vehicle_id: Option<i64>,
    pub is_automatic: bool,
    pub detection_data: serde_json::Value,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionStatistics {
    pub total_detections: u64,
    pub processed_detections: u64,
    /// Percentage of detections that matched a vehicle.
    pub processing_rate: f64,
    pub average_confidence: f64,
}
