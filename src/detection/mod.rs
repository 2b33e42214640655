//! Plate region detection and text recognition.
//!
//! Both backends load independently. A missing region detector turns
//! [`DetectionModels::detect`] into a no-op; a missing recognizer still runs
//! region detection but every region is dropped for lack of text.

#[cfg(feature = "onnx")]
pub mod onnx;
pub mod postprocess;

use image::{imageops, RgbImage};

use crate::{
    error::{InferenceError, ModelLoadError},
    plate::{BoundingBox, PlateCandidate},
    settings::Settings,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// A region the detector believes contains a plate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionProposal {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// One text hypothesis for a crop.
#[derive(Debug, Clone, PartialEq)]
pub struct TextReading {
    pub text: String,
    pub confidence: f32,
}

pub trait RegionDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn propose(&self, frame: &RgbImage) -> Result<Vec<RegionProposal>, InferenceError>;
}

pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Zero or more `(text, confidence)` hypotheses for one plate crop.
    fn recognize(&self, crop: &RgbImage) -> Result<Vec<TextReading>, InferenceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelReadiness {
    pub detector: bool,
    pub recognizer: bool,
}

pub struct DetectionModels {
    detector: Option<Box<dyn RegionDetector>>,
    recognizer: Option<Box<dyn TextRecognizer>>,
    load_errors: Vec<ModelLoadError>,
}

impl DetectionModels {
    pub fn new(
        detector: Option<Box<dyn RegionDetector>>,
        recognizer: Option<Box<dyn TextRecognizer>>,
    ) -> Self {
        Self {
            detector,
            recognizer,
            load_errors: Vec::new(),
        }
    }

    /// Loads both backends. Failures are logged and kept in
    /// [`DetectionModels::load_errors`]; the returned value is always usable.
    pub fn load(settings: &Settings) -> Self {
        let mut load_errors = Vec::new();

        let detector = match load_detector(settings) {
            Ok(detector) => {
                log_info!("Region detector '{}' loaded", detector.name());
                Some(detector)
            }
            Err(err) => {
                log_warn!("Region detector unavailable, plate detection disabled: {err}");
                load_errors.push(err);
                None
            }
        };

        let recognizer = match load_recognizer(settings) {
            Ok(recognizer) => {
                log_info!("Text recognizer '{}' loaded", recognizer.name());
                Some(recognizer)
            }
            Err(err) => {
                log_warn!("Text recognizer unavailable, regions will carry no text: {err}");
                load_errors.push(err);
                None
            }
        };

        Self {
            detector,
            recognizer,
            load_errors,
        }
    }

    pub fn readiness(&self) -> ModelReadiness {
        ModelReadiness {
            detector: self.detector.is_some(),
            recognizer: self.recognizer.is_some(),
        }
    }

    pub fn load_errors(&self) -> &[ModelLoadError] {
        &self.load_errors
    }

    /// Region-first detection. Never fails: backend errors are logged and
    /// yield fewer (or no) candidates.
    pub fn detect(&self, frame: &RgbImage) -> Vec<PlateCandidate> {
        let Some(detector) = self.detector.as_ref() else {
            return Vec::new();
        };

        let proposals = match detector.propose(frame) {
            Ok(proposals) => proposals,
            Err(err) => {
                log_warn!("{err}");
                return Vec::new();
            }
        };

        let Some(recognizer) = self.recognizer.as_ref() else {
            if !proposals.is_empty() {
                log_debug!(
                    "Dropping {} region(s): no text recognizer loaded",
                    proposals.len()
                );
            }
            return Vec::new();
        };

        let (width, height) = frame.dimensions();
        let mut candidates = Vec::with_capacity(proposals.len());

        for proposal in proposals {
            let Some(region) = proposal.bbox.clamp_to(width, height) else {
                log_debug!("Region {:?} lies outside the frame", proposal.bbox);
                continue;
            };

            let crop = imageops::crop_imm(
                frame,
                region.x as u32,
                region.y as u32,
                region.width,
                region.height,
            )
            .to_image();

            let readings = match recognizer.recognize(&crop) {
                Ok(readings) => readings,
                Err(err) => {
                    log_warn!("{err}");
                    continue;
                }
            };

            if let Some(best) = best_reading(readings) {
                candidates.push(PlateCandidate {
                    bbox: region,
                    raw_text: best.text,
                    ocr_confidence: best.confidence,
                    detector_confidence: proposal.confidence,
                });
            }
        }

        candidates
    }
}

/// Highest-confidence hypothesis; NaN confidences never win.
fn best_reading(readings: Vec<TextReading>) -> Option<TextReading> {
    readings
        .into_iter()
        .filter(|reading| !reading.confidence.is_nan())
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

fn configured_model(
    path: Option<&std::path::PathBuf>,
    stage: &'static str,
) -> Result<std::path::PathBuf, ModelLoadError> {
    let path = path.ok_or(ModelLoadError::NotConfigured(stage))?;
    if !path.exists() {
        return Err(ModelLoadError::MissingModel(path.clone()));
    }
    Ok(path.clone())
}

fn load_detector(settings: &Settings) -> Result<Box<dyn RegionDetector>, ModelLoadError> {
    let path = configured_model(settings.detector_model_path.as_ref(), "region detector")?;

    #[cfg(feature = "onnx")]
    {
        let detector = onnx::OnnxPlateDetector::load(&path, settings.detector_confidence)?;
        Ok(Box::new(detector))
    }

    #[cfg(not(feature = "onnx"))]
    {
        let _ = path;
        Err(ModelLoadError::BackendUnavailable("onnx region detector"))
    }
}

fn load_recognizer(settings: &Settings) -> Result<Box<dyn TextRecognizer>, ModelLoadError> {
    let path = configured_model(settings.recognizer_model_path.as_ref(), "text recognizer")?;

    #[cfg(feature = "onnx")]
    {
        let recognizer = onnx::OnnxTextRecognizer::load(&path, &settings.recognizer_charset)?;
        Ok(Box::new(recognizer))
    }

    #[cfg(not(feature = "onnx"))]
    {
        let _ = path;
        Err(ModelLoadError::BackendUnavailable("onnx text recognizer"))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backends shared by the pipeline and session tests.

    use super::*;

    pub struct FixedDetector(pub Vec<RegionProposal>);

    impl RegionDetector for FixedDetector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn propose(&self, _frame: &RgbImage) -> Result<Vec<RegionProposal>, InferenceError> {
            Ok(self.0.clone())
        }
    }

    pub struct FailingDetector;

    impl RegionDetector for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn propose(&self, _frame: &RgbImage) -> Result<Vec<RegionProposal>, InferenceError> {
            Err(InferenceError::new("region detector", "scripted failure"))
        }
    }

    /// Returns the readings queued for the n-th crop, cycling when exhausted.
    pub struct ScriptedRecognizer {
        pub per_crop: Vec<Vec<TextReading>>,
        pub calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedRecognizer {
        pub fn new(per_crop: Vec<Vec<(&str, f32)>>) -> Self {
            Self {
                per_crop: per_crop
                    .into_iter()
                    .map(|readings| {
                        readings
                            .into_iter()
                            .map(|(text, confidence)| TextReading {
                                text: text.to_string(),
                                confidence,
                            })
                            .collect()
                    })
                    .collect(),
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    impl TextRecognizer for ScriptedRecognizer {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn recognize(&self, _crop: &RgbImage) -> Result<Vec<TextReading>, InferenceError> {
            let call = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.per_crop.is_empty() {
                return Ok(Vec::new());
            }
            Ok(self.per_crop[call % self.per_crop.len()].clone())
        }
    }

    pub fn proposal(x: i32, y: i32, w: u32, h: u32, confidence: f32) -> RegionProposal {
        RegionProposal {
            bbox: BoundingBox::new(x, y, w, h),
            confidence,
        }
    }
}
