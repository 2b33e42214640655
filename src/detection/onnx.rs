//! ONNX Runtime backends: a YOLO plate-region detector and a CTC text
//! recognizer.

use std::{path::Path, sync::Mutex};

use image::RgbImage;
use ort::session::{builder::GraphOptimizationLevel, Session};

use crate::error::{InferenceError, ModelLoadError};

use super::{
    postprocess::{self, DETECTOR_INPUT_SIZE},
    RegionDetector, RegionProposal, TextReading, TextRecognizer,
};

const RECOGNIZER_INPUT_WIDTH: u32 = 160;
const RECOGNIZER_INPUT_HEIGHT: u32 = 48;

fn build_session(path: &Path, stage: &'static str) -> Result<Session, ModelLoadError> {
    let backend = |err: ort::Error| ModelLoadError::Backend {
        stage,
        message: err.to_string(),
    };

    Session::builder()
        .map_err(backend)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(backend)?
        .with_intra_threads(4)
        .map_err(backend)?
        .commit_from_file(path)
        .map_err(backend)
}

/// Runs a single-input model and copies the first output out of the session.
fn run_single(
    session: &Mutex<Session>,
    stage: &'static str,
    shape: [usize; 4],
    input: Vec<f32>,
) -> Result<(Vec<i64>, Vec<f32>), InferenceError> {
    let fail = |err: ort::Error| InferenceError::new(stage, err.to_string());

    let value = ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))
        .map_err(fail)?;

    let mut session = session
        .lock()
        .map_err(|_| InferenceError::new(stage, "session lock poisoned"))?;
    let input_name = session
        .inputs
        .first()
        .map(|input| input.name.clone())
        .ok_or_else(|| InferenceError::new(stage, "model declares no inputs"))?;

    let outputs = session
        .run(ort::inputs![input_name.as_str() => value])
        .map_err(fail)?;
    let (out_shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(fail)?;

    Ok((out_shape.iter().copied().collect(), data.to_vec()))
}

pub struct OnnxPlateDetector {
    session: Mutex<Session>,
    min_confidence: f32,
}

impl OnnxPlateDetector {
    pub fn load(path: &Path, min_confidence: f32) -> Result<Self, ModelLoadError> {
        let session = build_session(path, "region detector")?;
        Ok(Self {
            session: Mutex::new(session),
            min_confidence,
        })
    }
}

impl RegionDetector for OnnxPlateDetector {
    fn name(&self) -> &'static str {
        "onnx-yolo"
    }

    fn propose(&self, frame: &RgbImage) -> Result<Vec<RegionProposal>, InferenceError> {
        let (tensor, letterbox) = postprocess::letterbox(frame, DETECTOR_INPUT_SIZE);
        let size = DETECTOR_INPUT_SIZE as usize;
        let (shape, data) = run_single(
            &self.session,
            "region detector",
            [1, 3, size, size],
            tensor,
        )?;

        // [1, 4 + classes, anchors]
        let [_, channels, anchors] = shape.as_slice() else {
            return Err(InferenceError::new(
                "region detector",
                format!("unexpected output shape {shape:?}"),
            ));
        };

        Ok(postprocess::decode_yolo(
            &data,
            *channels as usize,
            *anchors as usize,
            letterbox,
            self.min_confidence,
        ))
    }
}

pub struct OnnxTextRecognizer {
    session: Mutex<Session>,
    charset: Vec<char>,
}

impl OnnxTextRecognizer {
    pub fn load(path: &Path, charset: &str) -> Result<Self, ModelLoadError> {
        let charset = postprocess::expand_charset(charset);
        if charset.is_empty() {
            return Err(ModelLoadError::Backend {
                stage: "text recognizer",
                message: "recognizer charset is empty".into(),
            });
        }
        let session = build_session(path, "text recognizer")?;
        Ok(Self {
            session: Mutex::new(session),
            charset,
        })
    }
}

impl TextRecognizer for OnnxTextRecognizer {
    fn name(&self) -> &'static str {
        "onnx-ctc"
    }

    fn recognize(&self, crop: &RgbImage) -> Result<Vec<TextReading>, InferenceError> {
        let tensor =
            postprocess::resize_to_tensor(crop, RECOGNIZER_INPUT_WIDTH, RECOGNIZER_INPUT_HEIGHT);
        let (shape, data) = run_single(
            &self.session,
            "text recognizer",
            [
                1,
                3,
                RECOGNIZER_INPUT_HEIGHT as usize,
                RECOGNIZER_INPUT_WIDTH as usize,
            ],
            tensor,
        )?;

        // [1, steps, classes]
        let [_, steps, classes] = shape.as_slice() else {
            return Err(InferenceError::new(
                "text recognizer",
                format!("unexpected output shape {shape:?}"),
            ));
        };

        Ok(postprocess::ctc_greedy_decode(
            &data,
            *steps as usize,
            *classes as usize,
            &self.charset,
        )
        .into_iter()
        .collect())
    }
}
