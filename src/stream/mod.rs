//! Frame sources and sinks.
//!
//! A session owns one [`FrameSource`] and optionally one [`FrameSink`]; both
//! must be released before the handle is dropped.

mod ffmpeg;
mod image_dir;
mod opener;

use std::{future::Future, pin::Pin};

use chrono::{DateTime, Local};
use image::RgbImage;
use serde::Serialize;

use crate::error::{FrameReadError, FrameWriteError};

pub use ffmpeg::{FfmpegConfig, FfmpegSink, FfmpegSource};
pub use image_dir::{ImageDirSink, ImageDirSource};
pub use opener::{DefaultStreamOpener, StreamOpener};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: DateTime<Local>,
    /// Position in the stream, starting at 0.
    pub index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StreamProperties {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
}

pub trait FrameSource: Send {
    fn properties(&self) -> StreamProperties;

    fn read_frame(&mut self) -> BoxFuture<'_, Result<Frame, FrameReadError>>;

    /// Idempotent. Later reads fail with [`FrameReadError::NotOpen`].
    fn release(&mut self) -> BoxFuture<'_, std::io::Result<()>>;
}

pub trait FrameSink: Send {
    fn write_frame<'a>(&'a mut self, frame: &'a RgbImage)
        -> BoxFuture<'a, Result<(), FrameWriteError>>;

    /// Idempotent. Flushes anything buffered.
    fn release(&mut self) -> BoxFuture<'_, std::io::Result<()>>;
}
