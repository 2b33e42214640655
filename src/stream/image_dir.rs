use std::path::{Path, PathBuf};

use chrono::Local;
use image::RgbImage;

use crate::error::{FrameReadError, FrameWriteError, StreamAcquisitionError};

use super::{BoxFuture, Frame, FrameSink, FrameSource, StreamProperties};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

async fn decode(path: PathBuf) -> Result<RgbImage, FrameReadError> {
    tokio::task::spawn_blocking(move || {
        image::open(&path)
            .map(|img| img.to_rgb8())
            .map_err(|err| FrameReadError::Decode {
                path,
                message: err.to_string(),
            })
    })
    .await
    .map_err(|err| FrameReadError::Io(std::io::Error::other(err)))?
}

/// Replays a directory of still images in file-name order, one per read.
pub struct ImageDirSource {
    files: Vec<PathBuf>,
    properties: StreamProperties,
    cursor: usize,
    open: bool,
}

impl ImageDirSource {
    pub async fn open(dir: &Path, fps: f32) -> Result<Self, StreamAcquisitionError> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_image(&path) {
                files.push(path);
            }
        }
        files.sort();

        let first = files
            .first()
            .cloned()
            .ok_or_else(|| StreamAcquisitionError::NoFrames(dir.to_path_buf()))?;
        let probe = decode(first)
            .await
            .map_err(|_| StreamAcquisitionError::NoFrames(dir.to_path_buf()))?;

        Ok(Self {
            files,
            properties: StreamProperties {
                width: probe.width(),
                height: probe.height(),
                fps,
            },
            cursor: 0,
            open: true,
        })
    }
}

impl FrameSource for ImageDirSource {
    fn properties(&self) -> StreamProperties {
        self.properties
    }

    fn read_frame(&mut self) -> BoxFuture<'_, Result<Frame, FrameReadError>> {
        Box::pin(async move {
            if !self.open {
                return Err(FrameReadError::NotOpen);
            }
            let path = self
                .files
                .get(self.cursor)
                .cloned()
                .ok_or(FrameReadError::EndOfStream)?;
            let index = self.cursor as u64;
            self.cursor += 1;

            let image = decode(path).await?;
            Ok(Frame {
                image,
                captured_at: Local::now(),
                index,
            })
        })
    }

    fn release(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move {
            self.open = false;
            Ok(())
        })
    }
}

/// Writes each frame as `frame_<NNNNNN>.jpg` into a directory.
pub struct ImageDirSink {
    dir: PathBuf,
    properties: StreamProperties,
    written: u64,
    open: bool,
}

impl ImageDirSink {
    pub async fn open(
        dir: &Path,
        properties: StreamProperties,
    ) -> Result<Self, StreamAcquisitionError> {
        tokio::fs::create_dir_all(dir).await?;
        Ok(Self {
            dir: dir.to_path_buf(),
            properties,
            written: 0,
            open: true,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl FrameSink for ImageDirSink {
    fn write_frame<'a>(
        &'a mut self,
        frame: &'a RgbImage,
    ) -> BoxFuture<'a, Result<(), FrameWriteError>> {
        Box::pin(async move {
            if !self.open {
                return Err(FrameWriteError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "output released",
                )));
            }
            let expected = (self.properties.width, self.properties.height);
            if frame.dimensions() != expected {
                return Err(FrameWriteError::Dimensions {
                    expected,
                    actual: frame.dimensions(),
                });
            }

            let path = self.dir.join(format!("frame_{:06}.jpg", self.written));
            let image = frame.clone();
            tokio::task::spawn_blocking(move || image.save(&path))
                .await
                .map_err(|err| FrameWriteError::Io(std::io::Error::other(err)))??;
            self.written += 1;
            Ok(())
        })
    }

    fn release(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move {
            self.open = false;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_frames(dir: &Path, count: usize) {
        for i in 0..count {
            RgbImage::from_pixel(32, 16, image::Rgb([i as u8 * 40, 0, 0]))
                .save(dir.join(format!("{i:03}.png")))
                .unwrap();
        }
        std::fs::write(dir.join("notes.txt"), "not an image").unwrap();
    }

    #[tokio::test]
    async fn replays_images_in_name_order_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 2);

        let mut source = ImageDirSource::open(dir.path(), 5.0).await.unwrap();
        assert_eq!(
            source.properties(),
            StreamProperties {
                width: 32,
                height: 16,
                fps: 5.0
            }
        );

        let first = source.read_frame().await.unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(first.image.get_pixel(0, 0)[0], 0);
        let second = source.read_frame().await.unwrap();
        assert_eq!(second.image.get_pixel(0, 0)[0], 40);
        assert!(matches!(
            source.read_frame().await,
            Err(FrameReadError::EndOfStream)
        ));

        source.release().await.unwrap();
        assert!(matches!(source.read_frame().await, Err(FrameReadError::NotOpen)));
    }

    #[tokio::test]
    async fn empty_directory_cannot_be_acquired() {
        let dir = tempfile::tempdir().unwrap();
        let err = ImageDirSource::open(dir.path(), 10.0).await.err().unwrap();
        assert!(matches!(err, StreamAcquisitionError::NoFrames(_)));
    }

    #[tokio::test]
    async fn sink_rejects_mismatched_frames() {
        let dir = tempfile::tempdir().unwrap();
        let props = StreamProperties {
            width: 32,
            height: 16,
            fps: 10.0,
        };
        let mut sink = ImageDirSink::open(&dir.path().join("out"), props).await.unwrap();

        sink.write_frame(&RgbImage::new(32, 16)).await.unwrap();
        assert!(matches!(
            sink.write_frame(&RgbImage::new(8, 8)).await,
            Err(FrameWriteError::Dimensions { .. })
        ));
        assert_eq!(sink.written(), 1);
        assert!(dir.path().join("out/frame_000000.jpg").exists());
    }
}
