use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use log::{debug, info, warn};

use crate::capture::{CaptureError, FrameSource, FrameSourceFactory, SourceSpec};
use crate::config::CameraConfig;
use crate::detector::Frame;

const OPEN_TIMEOUT_SECS: u64 = 10;
const READ_TIMEOUT_SECS: u64 = 10;

#[cfg(target_os = "macos")]
fn device_source(index: u32) -> String {
    format!("avfvideosrc device-index={}", index)
}

#[cfg(target_os = "windows")]
fn device_source(index: u32) -> String {
    format!("ksvideosrc device-index={}", index)
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn device_source(index: u32) -> String {
    format!("v4l2src device=/dev/video{}", index)
}

/// gst-launch description decoding `spec` to packed RGB into an appsink named `sink`
pub fn pipeline_description(spec: &SourceSpec) -> String {
    let src = match spec {
        SourceSpec::Device(index) => device_source(*index),
        SourceSpec::Uri(url) => format!("uridecodebin uri=\"{}\"", url),
        SourceSpec::TestPattern => "videotestsrc is-live=true".to_string(),
    };

    format!(
        "{} ! videoconvert ! video/x-raw,format=RGB ! appsink name=sink max-buffers=1 drop=true sync=false",
        src
    )
}

/// Capture pipeline pulling the latest decoded frame on demand
pub struct GstFrameSource {
    pipeline: gst::Pipeline,
    sink: gst_app::AppSink,
    label: String,
}

impl GstFrameSource {
    pub fn open(spec: &SourceSpec) -> Result<Self, CaptureError> {
        gst::init().map_err(|e| CaptureError::Open(format!("GStreamer init failed: {}", e)))?;

        let description = pipeline_description(spec);
        debug!("Launching capture pipeline: {}", description);

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| CaptureError::Open(format!("{}: {}", spec, e)))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| CaptureError::Open(format!("{}: not a pipeline", spec)))?;

        let sink = pipeline
            .by_name("sink")
            .and_then(|element| element.downcast::<gst_app::AppSink>().ok())
            .ok_or_else(|| CaptureError::Open(format!("{}: appsink missing", spec)))?;

        let source = Self {
            pipeline,
            sink,
            label: spec.to_string(),
        };

        if let Err(e) = source.pipeline.set_state(gst::State::Playing) {
            let reason = source.bus_error().unwrap_or_else(|| e.to_string());
            source.shutdown();
            return Err(CaptureError::Open(format!("{}: {}", spec, reason)));
        }

        let (result, _, _) = source
            .pipeline
            .state(gst::ClockTime::from_seconds(OPEN_TIMEOUT_SECS));
        if let Err(e) = result {
            let reason = source.bus_error().unwrap_or_else(|| e.to_string());
            source.shutdown();
            return Err(CaptureError::Open(format!("{}: {}", spec, reason)));
        }

        info!("Capture started on {}", source.label);
        Ok(source)
    }

    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let message = bus.pop_filtered(&[gst::MessageType::Error])?;

        match message.view() {
            gst::MessageView::Error(err) => Some(match err.debug() {
                Some(details) => format!("{} ({})", err.error(), details),
                None => err.error().to_string(),
            }),
            _ => None,
        }
    }

    fn shutdown(&self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop capture pipeline for {}: {}", self.label, e);
        }
    }
}

impl FrameSource for GstFrameSource {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        let sample = match self
            .sink
            .try_pull_sample(gst::ClockTime::from_seconds(READ_TIMEOUT_SECS))
        {
            Some(sample) => sample,
            None if self.sink.is_eos() => return Err(CaptureError::EndOfStream),
            None => {
                return Err(CaptureError::Read(self.bus_error().unwrap_or_else(|| {
                    format!("no frame from {} within {}s", self.label, READ_TIMEOUT_SECS)
                })))
            }
        };

        let caps = sample
            .caps()
            .ok_or_else(|| CaptureError::Read("sample without caps".to_string()))?;
        let info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|e| CaptureError::Read(format!("unreadable caps: {}", e)))?;
        let buffer = sample
            .buffer()
            .ok_or_else(|| CaptureError::Read("sample without buffer".to_string()))?;
        let map = buffer
            .map_readable()
            .map_err(|e| CaptureError::Read(format!("failed to map buffer: {}", e)))?;

        let stride = info.stride().first().copied().unwrap_or(0).max(0) as usize;
        pack_rows(map.as_slice(), info.width(), info.height(), stride)
    }

    fn release(&mut self) {
        self.shutdown();
        info!("Capture stopped on {}", self.label);
    }
}

/// Copy RGB rows out of a possibly padded buffer into a tight frame
pub(crate) fn pack_rows(data: &[u8], width: u32, height: u32, stride: usize) -> Result<Frame, CaptureError> {
    let row_len = width as usize * 3;
    if stride < row_len {
        return Err(CaptureError::Read(format!(
            "stride {} shorter than row of {} bytes",
            stride, row_len
        )));
    }

    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let line = data
            .get(start..start + row_len)
            .ok_or_else(|| CaptureError::Read("truncated frame buffer".to_string()))?;
        pixels.extend_from_slice(line);
    }

    Frame::from_raw(width, height, pixels)
        .ok_or_else(|| CaptureError::Read("frame buffer size mismatch".to_string()))
}

/// Opens one GStreamer capture per viewer
pub struct GstSourceFactory {
    spec: SourceSpec,
}

impl GstSourceFactory {
    pub fn new(spec: SourceSpec) -> Self {
        Self { spec }
    }

    pub fn from_config(config: &CameraConfig) -> Result<Self, CaptureError> {
        Ok(Self::new(config.source.parse()?))
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }
}

impl FrameSourceFactory for GstSourceFactory {
    fn open(&self) -> Result<Box<dyn FrameSource>, CaptureError> {
        Ok(Box::new(GstFrameSource::open(&self.spec)?))
    }
}
