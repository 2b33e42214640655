use std::{process::Stdio, time::Duration};

use chrono::Local;
use image::RgbImage;
use serde::Deserialize;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{Child, ChildStdin, ChildStdout, Command},
};

use crate::{
    error::{FrameReadError, FrameWriteError, StreamAcquisitionError},
    settings::Settings,
};

use super::{BoxFuture, Frame, FrameSink, FrameSource, StreamProperties};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

const FALLBACK_FPS: f32 = 25.0;

#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub probe_timeout: Duration,
}

impl FfmpegConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            ffmpeg_path: settings.ffmpeg_path.clone(),
            ffprobe_path: settings.ffprobe_path.clone(),
            probe_timeout: settings.probe_timeout(),
        }
    }
}

/// Input arguments for a stream reference: a bare device number means a
/// local V4L2 camera, RTSP is forced onto TCP.
fn input_args(stream_ref: &str) -> Vec<String> {
    let trimmed = stream_ref.trim();
    if let Ok(index) = trimmed.parse::<u32>() {
        return vec![
            "-f".into(),
            "v4l2".into(),
            "-i".into(),
            format!("/dev/video{index}"),
        ];
    }

    let mut args = Vec::new();
    if trimmed.starts_with("rtsp://") || trimmed.starts_with("rtsps://") {
        args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
    }
    args.extend(["-i".to_string(), trimmed.to_string()]);
    args
}

fn output_format(output_ref: &str) -> Option<&'static str> {
    if output_ref.starts_with("rtsp://") {
        Some("rtsp")
    } else if output_ref.starts_with("rtmp://") {
        Some("flv")
    } else {
        None
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

/// Parses ffprobe's `num/den` rate notation.
fn parse_rate(rate: &str) -> Option<f32> {
    let (num, den) = rate.split_once('/').unwrap_or((rate, "1"));
    let num: f32 = num.trim().parse().ok()?;
    let den: f32 = den.trim().parse().ok()?;
    let fps = num / den;
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn parse_probe(stream_ref: &str, json: &[u8]) -> Result<StreamProperties, StreamAcquisitionError> {
    let probe_error = |message: String| StreamAcquisitionError::Probe {
        stream_ref: stream_ref.to_string(),
        message,
    };

    let output: ProbeOutput =
        serde_json::from_slice(json).map_err(|err| probe_error(err.to_string()))?;
    let stream = output
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| probe_error("no video stream".into()))?;

    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err(probe_error("video stream has no dimensions".into()));
    };
    if width == 0 || height == 0 {
        return Err(probe_error(format!("invalid dimensions {width}x{height}")));
    }

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(FALLBACK_FPS);

    Ok(StreamProperties { width, height, fps })
}

async fn probe(
    config: &FfmpegConfig,
    stream_ref: &str,
) -> Result<StreamProperties, StreamAcquisitionError> {
    let mut command = Command::new(&config.ffprobe_path);
    command
        .args(["-v", "error", "-select_streams", "v:0"])
        .args(["-show_entries", "stream=width,height,avg_frame_rate,r_frame_rate"])
        .args(["-of", "json"])
        .args(input_args(stream_ref).into_iter().filter(|arg| arg != "-i"))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|source| StreamAcquisitionError::Spawn {
        program: config.ffprobe_path.clone(),
        source,
    })?;

    let output = match tokio::time::timeout(config.probe_timeout, child.wait_with_output()).await
    {
        Ok(result) => result?,
        Err(_) => {
            return Err(StreamAcquisitionError::Probe {
                stream_ref: stream_ref.to_string(),
                message: format!("timed out after {:?}", config.probe_timeout),
            })
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(StreamAcquisitionError::Probe {
            stream_ref: stream_ref.to_string(),
            message: stderr.trim().to_string(),
        });
    }

    parse_probe(stream_ref, &output.stdout)
}

/// Fills `buf` unless the reader hits EOF first; returns the bytes read.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn stop_child(child: &mut Child) -> std::io::Result<()> {
    if child.try_wait()?.is_none() {
        child.start_kill()?;
    }
    child.wait().await.map(|_| ())
}

/// Decodes any ffmpeg-readable input into raw RGB frames.
pub struct FfmpegSource {
    stream_ref: String,
    properties: StreamProperties,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    next_index: u64,
}

impl FfmpegSource {
    pub async fn open(
        config: &FfmpegConfig,
        stream_ref: &str,
    ) -> Result<Self, StreamAcquisitionError> {
        let properties = probe(config, stream_ref).await?;

        let mut child = Command::new(&config.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(input_args(stream_ref))
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StreamAcquisitionError::Spawn {
                program: config.ffmpeg_path.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StreamAcquisitionError::Unavailable(stream_ref.to_string()))?;

        log_debug!(
            "ffmpeg decoding {} at {}x{} @ {:.2} fps",
            stream_ref,
            properties.width,
            properties.height,
            properties.fps
        );

        Ok(Self {
            stream_ref: stream_ref.to_string(),
            properties,
            child: Some(child),
            stdout: Some(stdout),
            next_index: 0,
        })
    }

    fn frame_len(&self) -> usize {
        self.properties.width as usize * self.properties.height as usize * 3
    }
}

impl FrameSource for FfmpegSource {
    fn properties(&self) -> StreamProperties {
        self.properties
    }

    fn read_frame(&mut self) -> BoxFuture<'_, Result<Frame, FrameReadError>> {
        Box::pin(async move {
            let expected = self.frame_len();
            let stdout = self.stdout.as_mut().ok_or(FrameReadError::NotOpen)?;

            let mut buf = vec![0u8; expected];
            let actual = read_full(stdout, &mut buf).await?;
            if actual == 0 {
                return Err(FrameReadError::EndOfStream);
            }
            if actual < expected {
                return Err(FrameReadError::Truncated { expected, actual });
            }

            let image = RgbImage::from_raw(self.properties.width, self.properties.height, buf)
                .ok_or(FrameReadError::Truncated { expected, actual })?;

            let index = self.next_index;
            self.next_index += 1;
            Ok(Frame {
                image,
                captured_at: Local::now(),
                index,
            })
        })
    }

    fn release(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move {
            self.stdout = None;
            if let Some(mut child) = self.child.take() {
                log_debug!("Stopping ffmpeg decoder for {}", self.stream_ref);
                stop_child(&mut child).await?;
            }
            Ok(())
        })
    }
}

/// Encodes raw RGB frames to any ffmpeg-writable output.
pub struct FfmpegSink {
    output_ref: String,
    properties: StreamProperties,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl FfmpegSink {
    pub fn open(
        config: &FfmpegConfig,
        output_ref: &str,
        properties: StreamProperties,
    ) -> Result<Self, StreamAcquisitionError> {
        let size = format!("{}x{}", properties.width, properties.height);
        let rate = format!("{:.3}", properties.fps);

        let mut command = Command::new(&config.ffmpeg_path);
        command
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", size.as_str(), "-r", rate.as_str(), "-i", "-"])
            .args(["-pix_fmt", "yuv420p"]);
        if let Some(format) = output_format(output_ref) {
            command.args(["-f", format]);
        }
        if output_ref.starts_with("rtsp://") {
            command.args(["-rtsp_transport", "tcp"]);
        }

        let mut child = command
            .arg(output_ref)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StreamAcquisitionError::Spawn {
                program: config.ffmpeg_path.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| StreamAcquisitionError::Unavailable(output_ref.to_string()))?;

        Ok(Self {
            output_ref: output_ref.to_string(),
            properties,
            child: Some(child),
            stdin: Some(stdin),
        })
    }
}

impl FrameSink for FfmpegSink {
    fn write_frame<'a>(
        &'a mut self,
        frame: &'a RgbImage,
    ) -> BoxFuture<'a, Result<(), FrameWriteError>> {
        Box::pin(async move {
            let expected = (self.properties.width, self.properties.height);
            if frame.dimensions() != expected {
                return Err(FrameWriteError::Dimensions {
                    expected,
                    actual: frame.dimensions(),
                });
            }
            let stdin = self.stdin.as_mut().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotConnected, "encoder closed")
            })?;
            stdin.write_all(frame.as_raw()).await?;
            Ok(())
        })
    }

    fn release(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move {
            // Closing stdin lets ffmpeg finalise the container.
            if let Some(mut stdin) = self.stdin.take() {
                if let Err(err) = stdin.shutdown().await {
                    log_warn!("Failed to close encoder input for {}: {err}", self.output_ref);
                }
            }
            if let Some(mut child) = self.child.take() {
                match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
                    Ok(status) => {
                        status?;
                    }
                    Err(_) => stop_child(&mut child).await?,
                }
            }
            Ok(())
        })
    }
}
