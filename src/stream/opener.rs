use std::path::Path;

use crate::{error::StreamAcquisitionError, settings::Settings};

use super::{
    BoxFuture, FfmpegConfig, FfmpegSink, FfmpegSource, FrameSink, FrameSource, ImageDirSink,
    ImageDirSource, StreamProperties,
};

/// Resolves stream references to owned handles.
pub trait StreamOpener: Send + Sync {
    fn open_source<'a>(
        &'a self,
        stream_ref: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn FrameSource>, StreamAcquisitionError>>;

    fn open_sink<'a>(
        &'a self,
        output_ref: &'a str,
        properties: StreamProperties,
    ) -> BoxFuture<'a, Result<Box<dyn FrameSink>, StreamAcquisitionError>>;
}

/// Directories are replayed or written as still images; anything else goes
/// through ffmpeg.
pub struct DefaultStreamOpener {
    ffmpeg: FfmpegConfig,
    replay_fps: f32,
}

impl DefaultStreamOpener {
    pub fn new(ffmpeg: FfmpegConfig, replay_fps: f32) -> Self {
        Self { ffmpeg, replay_fps }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(FfmpegConfig::from_settings(settings), settings.target_fps)
    }
}

impl StreamOpener for DefaultStreamOpener {
    fn open_source<'a>(
        &'a self,
        stream_ref: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn FrameSource>, StreamAcquisitionError>> {
        Box::pin(async move {
            let stream_ref = stream_ref.trim();
            if stream_ref.is_empty() {
                return Err(StreamAcquisitionError::EmptyReference);
            }

            let path = Path::new(stream_ref);
            if path.is_dir() {
                let source = ImageDirSource::open(path, self.replay_fps).await?;
                return Ok(Box::new(source) as Box<dyn FrameSource>);
            }

            let source = FfmpegSource::open(&self.ffmpeg, stream_ref).await?;
            Ok(Box::new(source) as Box<dyn FrameSource>)
        })
    }

    fn open_sink<'a>(
        &'a self,
        output_ref: &'a str,
        properties: StreamProperties,
    ) -> BoxFuture<'a, Result<Box<dyn FrameSink>, StreamAcquisitionError>> {
        Box::pin(async move {
            let output_ref = output_ref.trim();
            if output_ref.is_empty() {
                return Err(StreamAcquisitionError::EmptyReference);
            }

            let path = Path::new(output_ref);
            if path.is_dir() || output_ref.ends_with('/') {
                let sink = ImageDirSink::open(path, properties).await?;
                return Ok(Box::new(sink) as Box<dyn FrameSink>);
            }

            let sink = FfmpegSink::open(&self.ffmpeg, output_ref, properties)?;
            Ok(Box::new(sink) as Box<dyn FrameSink>)
        })
    }
}
