use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

const ENV_PREFIX: &str = "GATEWATCH_";

/// Runtime configuration. Every field has a default so a partial JSON file
/// (or no file at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    pub plates_dir: PathBuf,
    pub detector_model_path: Option<PathBuf>,
    pub recognizer_model_path: Option<PathBuf>,
    /// Symbols emitted by the recognizer, in output-class order after the CTC blank.
    pub recognizer_charset: String,
    pub min_ocr_confidence: f32,
    pub min_plate_len: usize,
    pub detector_confidence: f32,
    pub blur_sigma: f32,
    pub target_fps: f32,
    pub log_every_frames: u64,
    /// `None` retries failed reads forever.
    pub max_consecutive_read_failures: Option<u32>,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub probe_timeout_secs: u64,
    pub default_stream_ref: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/gatewatch.sqlite3"),
            plates_dir: PathBuf::from("uploads/plates"),
            detector_model_path: Some(PathBuf::from("models/license_plate_detector.onnx")),
            recognizer_model_path: Some(PathBuf::from("models/plate_recognizer.onnx")),
            recognizer_charset: "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ".into(),
            min_ocr_confidence: 0.3,
            min_plate_len: 5,
            detector_confidence: 0.5,
            blur_sigma: 30.0,
            target_fps: 10.0,
            log_every_frames: 30,
            max_consecutive_read_failures: None,
            ffmpeg_path: "ffmpeg".into(),
            ffprobe_path: "ffprobe".into(),
            probe_timeout_secs: 10,
            default_stream_ref: "rtsp://127.0.0.1:8554/webcam".into(),
        }
    }
}

impl Settings {
    /// Reads the JSON file when it exists, then applies `GATEWATCH_*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings from {}", path.display()))?;
                serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse settings in {}", path.display()))?
            }
            _ => Settings::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    /// Unparseable values are ignored and the existing setting kept.
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_var("DATABASE_PATH") {
            self.database_path = PathBuf::from(value);
        }
        if let Some(value) = env_var("PLATES_DIR") {
            self.plates_dir = PathBuf::from(value);
        }
        if let Some(value) = env_var("DETECTOR_MODEL") {
            self.detector_model_path = optional_path(&value);
        }
        if let Some(value) = env_var("RECOGNIZER_MODEL") {
            self.recognizer_model_path = optional_path(&value);
        }
        if let Some(value) = parsed_env_var::<f32>("MIN_OCR_CONFIDENCE") {
            self.min_ocr_confidence = value;
        }
        if let Some(value) = parsed_env_var::<f32>("DETECTOR_CONFIDENCE") {
            self.detector_confidence = value;
        }
        if let Some(value) = parsed_env_var::<f32>("TARGET_FPS") {
            self.target_fps = value;
        }
        if let Some(value) = env_var("MAX_READ_FAILURES") {
            match value.to_lowercase().as_str() {
                "" | "none" | "unbounded" => self.max_consecutive_read_failures = None,
                other => {
                    if let Ok(limit) = other.parse::<u32>() {
                        self.max_consecutive_read_failures = Some(limit);
                    }
                }
            }
        }
        if let Some(value) = env_var("FFMPEG") {
            self.ffmpeg_path = value;
        }
        if let Some(value) = env_var("FFPROBE") {
            self.ffprobe_path = value;
        }
        if let Some(value) = env_var("STREAM") {
            self.default_stream_ref = value;
        }
    }

    /// Delay between loop iterations. Non-positive rates fall back to 10 fps.
    pub fn pacing_interval(&self) -> Duration {
        let fps = if self.target_fps.is_finite() && self.target_fps > 0.0 {
            self.target_fps
        } else {
            10.0
        };
        Duration::from_secs_f32(1.0 / fps)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}")).ok()
}

fn parsed_env_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|value| value.trim().parse().ok())
}

fn optional_path(value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}
