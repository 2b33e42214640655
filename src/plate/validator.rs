//! Plate text normalisation and the Italian plate grammar (`AA123BB`).

use chrono::{DateTime, Local};

use crate::settings::Settings;

use super::types::{PlateCandidate, ValidatedDetection};

const PLATE_LEN: usize = 7;

/// Upper-cases and drops every character that is not an ASCII letter or digit.
pub fn clean(text: &str) -> String {
    text.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Exact grammar check: two letters, three digits, two letters, nothing else.
pub fn is_valid_plate(text: &str) -> bool {
    let bytes = text.as_bytes();
    if bytes.len() != PLATE_LEN {
        return false;
    }
    bytes[..2].iter().all(u8::is_ascii_uppercase)
        && bytes[2..5].iter().all(u8::is_ascii_digit)
        && bytes[5..].iter().all(u8::is_ascii_uppercase)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateValidator {
    min_ocr_confidence: f32,
    min_len: usize,
}

impl Default for PlateValidator {
    fn default() -> Self {
        Self {
            min_ocr_confidence: 0.3,
            min_len: 5,
        }
    }
}

impl PlateValidator {
    pub fn new(min_ocr_confidence: f32, min_len: usize) -> Self {
        Self {
            min_ocr_confidence,
            min_len,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.min_ocr_confidence, settings.min_plate_len)
    }

    /// Returns a detection only when the OCR confidence is strictly above the
    /// threshold and the cleaned text is long enough and grammar-conformant.
    pub fn validate(
        &self,
        candidate: &PlateCandidate,
        frame_timestamp: DateTime<Local>,
    ) -> Option<ValidatedDetection> {
        let ocr_confidence = candidate.ocr_confidence;
        if ocr_confidence.is_nan() || ocr_confidence <= self.min_ocr_confidence {
            return None;
        }

        let cleaned = clean(&candidate.raw_text);
        if cleaned.len() < self.min_len || !is_valid_plate(&cleaned) {
            return None;
        }

        Some(ValidatedDetection {
            plate: cleaned,
            confidence: candidate.detector_confidence,
            ocr_confidence: candidate.ocr_confidence,
            bbox: candidate.bbox,
            frame_timestamp,
        })
    }
}
