//! Video capture sources.
//!
//! A [`FrameSource`] hands out decoded RGB frames one at a time; every viewer of the
//! live feed opens its own source through a [`FrameSourceFactory`]. The
//! [`CaptureSession`] guard makes sure the device is released exactly once, whether
//! the session ends normally, on a read error or because the viewer disconnected.

use std::fmt;
use std::str::FromStr;

use log::debug;
use thiserror::Error;
use url::Url;

use crate::detector::Frame;

pub mod gstreamer_source;

pub use gstreamer_source::{GstFrameSource, GstSourceFactory};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open capture source: {0}")]
    Open(String),

    #[error("Failed to read frame: {0}")]
    Read(String),

    #[error("End of stream")]
    EndOfStream,

    #[error("Invalid capture source '{0}'")]
    InvalidSource(String),
}

pub trait FrameSource: Send {
    /// Next decoded frame; blocks until one is available
    fn read(&mut self) -> Result<Frame, CaptureError>;

    /// Stop capturing and free the device
    fn release(&mut self);
}

pub trait FrameSourceFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>, CaptureError>;
}

/// Where frames come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// Local camera by index, `0` being the default device
    Device(u32),
    /// Network stream or file, e.g. `rtsp://` or `file://`
    Uri(Url),
    /// Synthetic pattern, useful without a camera attached
    TestPattern,
}

impl FromStr for SourceSpec {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.eq_ignore_ascii_case("test") {
            return Ok(SourceSpec::TestPattern);
        }

        if let Ok(index) = s.parse::<u32>() {
            return Ok(SourceSpec::Device(index));
        }

        Url::parse(s)
            .map(SourceSpec::Uri)
            .map_err(|_| CaptureError::InvalidSource(s.to_string()))
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Device(index) => write!(f, "camera {}", index),
            SourceSpec::Uri(url) => write!(f, "{}", url),
            SourceSpec::TestPattern => write!(f, "test pattern"),
        }
    }
}

/// Owns an open source and releases it exactly once
pub struct CaptureSession {
    source: Box<dyn FrameSource>,
    released: bool,
}

impl CaptureSession {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            released: false,
        }
    }

    pub fn read(&mut self) -> Result<Frame, CaptureError> {
        if self.released {
            return Err(CaptureError::EndOfStream);
        }
        self.source.read()
    }

    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.source.release();
            debug!("Capture source released");
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}
