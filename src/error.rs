//! Error taxonomy for the monitoring core.
//!
//! Only [`StreamAcquisitionError`] is ever surfaced to a caller of
//! `start`; everything raised inside a running session is logged and
//! recovered where it happens.

use std::path::PathBuf;

use thiserror::Error;

/// A detector or recognizer backend could not be made ready.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("model file not found: {0}")]
    MissingModel(PathBuf),

    #[error("no model configured for the {0}")]
    NotConfigured(&'static str),

    #[error("{0} backend is not compiled into this build")]
    BackendUnavailable(&'static str),

    #[error("failed to initialise {stage}: {message}")]
    Backend { stage: &'static str, message: String },
}

/// A backend failed while running on one frame or crop.
#[derive(Debug, Error)]
#[error("{stage} inference failed: {message}")]
pub struct InferenceError {
    pub stage: &'static str,
    pub message: String,
}

impl InferenceError {
    pub fn new(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// The input stream could not be opened. Fatal to a `start` attempt.
#[derive(Debug, Error)]
pub enum StreamAcquisitionError {
    #[error("stream reference is empty")]
    EmptyReference,

    #[error("failed to probe stream {stream_ref}: {message}")]
    Probe { stream_ref: String, message: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no readable frames in {0}")]
    NoFrames(PathBuf),

    #[error("stream {0} could not be opened")]
    Unavailable(String),

    #[error("I/O error while opening stream: {0}")]
    Io(#[from] std::io::Error),
}

/// One frame could not be read. Transient: the loop logs it and continues.
#[derive(Debug, Error)]
pub enum FrameReadError {
    #[error("stream ended")]
    EndOfStream,

    #[error("short frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("failed to decode frame {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("stream handle is not open")]
    NotOpen,

    #[error("I/O error while reading frame: {0}")]
    Io(#[from] std::io::Error),
}

/// The blurred frame could not be handed to the output handle.
#[derive(Debug, Error)]
pub enum FrameWriteError {
    #[error("frame is {actual:?} but the output expects {expected:?}")]
    Dimensions {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),

    #[error("I/O error while writing frame: {0}")]
    Io(#[from] std::io::Error),
}

/// A read or write against the registry/detection store failed.
#[derive(Debug, Error)]
#[error("persistence failed: {0:#}")]
pub struct PersistenceError(#[from] pub anyhow::Error);

/// A notification sink rejected an arrival event. Always swallowed.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("no subscriber is listening for arrival events")]
    NoSubscribers,

    #[error("notification sink {sink} failed: {message}")]
    Sink { sink: &'static str, message: String },
}

/// An evidence crop could not be persisted.
#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("plate region {0:?} lies outside the frame")]
    OutOfBounds((i32, i32, u32, u32)),

    #[error("failed to write evidence image {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("I/O error on evidence directory: {0}")]
    Io(#[from] std::io::Error),
}

/// A plate region could not be blurred; the frame is left untouched there.
#[derive(Debug, Error)]
#[error("cannot blur region {bbox:?} in a {width}x{height} frame")]
pub struct BlurError {
    pub bbox: (i32, i32, u32, u32),
    pub width: u32,
    pub height: u32,
}

/// Failure of a control-surface call.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Acquisition(#[from] StreamAcquisitionError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("{0:?} contains no plate characters")]
    EmptyPlate(String),

    #[error("failed to list evidence images: {0}")]
    Evidence(#[from] EvidenceError),
}

impl From<anyhow::Error> for ControlError {
    fn from(err: anyhow::Error) -> Self {
        ControlError::Persistence(PersistenceError(err))
    }
}
