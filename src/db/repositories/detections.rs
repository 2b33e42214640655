use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{conversion_error, format_datetime, row_datetime, to_u64},
    models::{DetectionRecord, DetectionStatistics, NewDetection},
};

const DETECTION_COLUMNS: &str = "id, license_plate, confidence, image_path, processed, vehicle_id,
     is_automatic, detection_data, detected_at, created_at";

fn row_to_detection(row: &Row) -> Result<DetectionRecord, rusqlite::Error> {
    let detection_data = row
        .get::<_, Option<String>>("detection_data")?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|err| conversion_error(anyhow::Error::new(err)))?;

    Ok(DetectionRecord {
        id: row.get("id")?,
        license_plate: row.get("license_plate")?,
        confidence: row.get("confidence")?,
        image_path: row.get("image_path")?,
        processed: row.get("processed")?,
        vehicle_id: row.get("vehicle_id")?,
        is_automatic: row.get("is_automatic")?,
        detection_data,
        detected_at: row_datetime(row, "detected_at")?,
        created_at: row_datetime(row, "created_at")?,
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl Database {
    /// Appends one audit row. `processed` mirrors whether a vehicle matched.
    pub async fn insert_detection(&self, detection: NewDetection) -> Result<i64> {
        self.execute(move |conn| {
            let now = format_datetime(&Utc::now());
            conn.execute(
                "INSERT INTO detections (
                    license_plate, confidence, image_path, processed, vehicle_id,
                    is_automatic, detection_data, detected_at, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    detection.license_plate,
                    detection.confidence,
                    detection
                        .image_path
                        .as_ref()
                        .map(|path| path.to_string_lossy().into_owned()),
                    detection.vehicle_id.is_some(),
                    detection.vehicle_id,
                    detection.is_automatic,
                    detection.detection_data.to_string(),
                    format_datetime(&detection.detected_at),
                    now,
                ],
            )
            .context("failed to insert detection")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn recent_detections(&self, limit: u32) -> Result<Vec<DetectionRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DETECTION_COLUMNS} FROM detections
                 ORDER BY detected_at DESC, id DESC
                 LIMIT ?1"
            ))?;
            let records = stmt
                .query_map(params![limit], row_to_detection)?
                .collect::<Result<Vec<_>, _>>()
                .context("failed to load recent detections")?;
            Ok(records)
        })
        .await
    }

    pub async fn unprocessed_detections(&self) -> Result<Vec<DetectionRecord>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DETECTION_COLUMNS} FROM detections
                 WHERE processed = 0
                 ORDER BY detected_at DESC, id DESC"
            ))?;
            let records = stmt
                .query_map([], row_to_detection)?
                .collect::<Result<Vec<_>, _>>()
                .context("failed to load unprocessed detections")?;
            Ok(records)
        })
        .await
    }

    /// Aggregates over detections with `from <= detected_at <= to`.
    pub async fn detection_statistics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<DetectionStatistics> {
        self.execute(move |conn| {
            let (total, processed, average): (i64, Option<i64>, Option<f64>) = conn
                .query_row(
                    "SELECT COUNT(*), SUM(processed), AVG(confidence)
                     FROM detections
                     WHERE detected_at >= ?1 AND detected_at <= ?2",
                    params![format_datetime(&from), format_datetime(&to)],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .context("failed to aggregate detections")?;

            let total_detections = to_u64(total, "total_detections")?;
            let processed_detections = to_u64(processed.unwrap_or(0), "processed_detections")?;
            let processing_rate = if total_detections > 0 {
                processed_detections as f64 / total_detections as f64 * 100.0
            } else {
                0.0
            };

            Ok(DetectionStatistics {
                total_detections,
                processed_detections,
                processing_rate,
                average_confidence: round2(average.unwrap_or(0.0)),
            })
        })
        .await
    }
}
