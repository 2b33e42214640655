//! Per-frame processing: detect, validate, save evidence, blur.

mod blur;
mod evidence;

use std::path::PathBuf;

use image::RgbImage;

use crate::{
    detection::DetectionModels,
    plate::{PlateValidator, ValidatedDetection},
    settings::Settings,
    stream::Frame,
};

pub use blur::blur_region;
pub use evidence::{EvidenceImage, EvidenceStore};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDetection {
    pub detection: ValidatedDetection,
    /// `None` when the crop could not be written.
    pub evidence: Option<PathBuf>,
}

pub struct FramePipeline {
    models: DetectionModels,
    validator: PlateValidator,
    evidence: EvidenceStore,
    blur_sigma: f32,
}

impl FramePipeline {
    pub fn new(
        models: DetectionModels,
        validator: PlateValidator,
        evidence: EvidenceStore,
        blur_sigma: f32,
    ) -> Self {
        Self {
            models,
            validator,
            evidence,
            blur_sigma,
        }
    }

    pub fn from_settings(models: DetectionModels, settings: &Settings) -> Self {
        Self::new(
            models,
            PlateValidator::from_settings(settings),
            EvidenceStore::new(settings.plates_dir.clone()),
            settings.blur_sigma,
        )
    }

    pub fn models(&self) -> &DetectionModels {
        &self.models
    }

    pub fn evidence(&self) -> &EvidenceStore {
        &self.evidence
    }

    /// Blocking: runs model inference. Evidence failures are logged and the
    /// detection is still returned.
    pub fn process(&self, frame: &Frame) -> Vec<PipelineDetection> {
        self.models
            .detect(&frame.image)
            .iter()
            .filter_map(|candidate| self.validator.validate(candidate, frame.captured_at))
            .map(|detection| {
                log_info!(
                    "Plate {} in frame {} (detector {:.2}, ocr {:.2})",
                    detection.plate,
                    frame.index,
                    detection.confidence,
                    detection.ocr_confidence
                );

                let evidence = match self.evidence.save_crop(
                    &frame.image,
                    detection.bbox,
                    &detection.plate,
                    detection.frame_timestamp,
                ) {
                    Ok(path) => Some(path),
                    Err(err) => {
                        log_warn!("Evidence for {} not saved: {err}", detection.plate);
                        None
                    }
                };

                PipelineDetection {
                    detection,
                    evidence,
                }
            })
            .collect()
    }

    /// Copy of `frame` with every detected plate blurred. A region that
    /// cannot be blurred is left as is.
    pub fn render_blurred(&self, frame: &RgbImage, detections: &[ValidatedDetection]) -> RgbImage {
        let mut output = frame.clone();
        for detection in detections {
            if let Err(err) = blur_region(&mut output, detection.bbox, self.blur_sigma) {
                log_warn!("{err}");
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use chrono::Local;
    use image::Rgb;

    use super::*;
    use crate::{
        detection::testing::{proposal, FixedDetector, ScriptedRecognizer},
        plate::BoundingBox,
    };

    fn frame() -> Frame {
        Frame {
            image: RgbImage::from_fn(200, 100, |x, _| {
                if x % 2 == 0 {
                    Rgb([255, 255, 255])
                } else {
                    Rgb([0, 0, 0])
                }
            }),
            captured_at: Local::now(),
            index: 7,
        }
    }

    fn pipeline(dir: &std::path::Path, readings: Vec<Vec<(&str, f32)>>) -> FramePipeline {
        let models = DetectionModels::new(
            Some(Box::new(FixedDetector(vec![
                proposal(10, 10, 60, 20, 0.9),
                proposal(100, 50, 60, 20, 0.8),
            ]))),
            Some(Box::new(ScriptedRecognizer::new(readings))),
        );
        FramePipeline::new(
            models,
            PlateValidator::default(),
            EvidenceStore::new(dir.join("plates")),
            30.0,
        )
    }

    #[test]
    fn only_valid_plates_survive_and_get_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(
            dir.path(),
            vec![vec![("ab-123 cd", 0.5)], vec![("XY99", 0.95)]],
        );

        let frame = frame();
        let detections = pipeline.process(&frame);
        assert_eq!(detections.len(), 1);

        let found = &detections[0];
        assert_eq!(found.detection.plate, "AB123CD");
        assert_eq!(found.detection.bbox, BoundingBox::new(10, 10, 60, 20));
        assert_eq!(found.detection.frame_timestamp, frame.captured_at);
        let evidence = found.evidence.as_ref().expect("evidence saved");
        assert!(evidence.exists());
        assert_eq!(pipeline.evidence().list().unwrap()[0].plate, "AB123CD");
    }

    #[test]
    fn low_confidence_reading_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), vec![vec![("AB123CD", 0.2)]]);
        assert!(pipeline.process(&frame()).is_empty());
        assert!(pipeline.evidence().list().unwrap().is_empty());
    }

    #[test]
    fn render_blurred_skips_bad_regions_and_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), vec![]);
        let frame = frame();

        let inside = ValidatedDetection {
            plate: "AB123CD".into(),
            confidence: 0.9,
            ocr_confidence: 0.9,
            bbox: BoundingBox::new(10, 10, 60, 20),
            frame_timestamp: frame.captured_at,
        };
        let outside = ValidatedDetection {
            bbox: BoundingBox::new(190, 90, 60, 20),
            ..inside.clone()
        };

        let blurred = pipeline.render_blurred(&frame.image, &[outside, inside]);
        assert_ne!(blurred.get_pixel(40, 20), frame.image.get_pixel(40, 20));
        assert_eq!(blurred.get_pixel(195, 95), frame.image.get_pixel(195, 95));
        assert_eq!(frame.image.get_pixel(40, 20), &Rgb([255, 255, 255]));
    }
}
