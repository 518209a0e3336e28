//! Per-viewer frame loop: capture, detect, persist, encode, emit.
//!
//! The loop itself is blocking (camera reads block) and runs on the blocking pool;
//! detector and store calls are driven through the runtime handle. Frames flow to
//! the HTTP response over a channel of capacity one, so a slow viewer slows capture
//! down instead of queueing frames, and a closed channel ends the session.

use bytes::Bytes;
use futures::stream::{self, Stream};
use log::{debug, error, info, warn};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::capture::{CaptureError, CaptureSession, FrameSourceFactory};
use crate::db::models::detection_models::{Location, NewDetection};
use crate::db::repositories::DetectionStore;
use crate::detector::{detect_or_passthrough, DetectionRecord, Detector, Frame};

pub mod encode;

use encode::{encode_jpeg, multipart_chunk};

/// Body of the live feed response
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Bytes, Infallible>> + Send>>;

/// Counters for one viewer session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_read: u64,
    pub frames_sent: u64,
    pub frames_skipped: u64,
    pub detections: u64,
    pub persisted: u64,
    pub persist_failures: u64,
}

pub struct FramePipeline {
    detector: Arc<dyn Detector>,
    store: Arc<dyn DetectionStore>,
    location: Option<Location>,
    jpeg_quality: u8,
}

impl FramePipeline {
    pub fn new(
        detector: Arc<dyn Detector>,
        store: Arc<dyn DetectionStore>,
        location: Option<Location>,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            detector,
            store,
            location,
            jpeg_quality,
        }
    }

    /// Open a fresh capture and stream it as multipart chunks.
    ///
    /// Must be called from within the runtime. If the source cannot be opened
    /// the stream ends without yielding anything.
    pub fn start(self: Arc<Self>, factory: Arc<dyn FrameSourceFactory>) -> FrameStream {
        let (tx, rx) = mpsc::channel::<Bytes>(1);
        let pipeline = self;
        let handle = Handle::current();

        tokio::task::spawn_blocking(move || {
            let source = match factory.open() {
                Ok(source) => source,
                Err(e) => {
                    error!("Live feed unavailable: {}", e);
                    return;
                }
            };

            let mut session = CaptureSession::new(source);
            let stats = pipeline.run_session(&mut session, &handle, |chunk| {
                tx.blocking_send(chunk).is_ok()
            });
            session.release();

            info!(
                "Feed session ended: {} frames read, {} sent, {} skipped, {} detections ({} stored, {} failed)",
                stats.frames_read,
                stats.frames_sent,
                stats.frames_skipped,
                stats.detections,
                stats.persisted,
                stats.persist_failures
            );
        });

        Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok(chunk), rx))
        }))
    }

    /// Drive one session until the source ends or `emit` reports the viewer is gone.
    ///
    /// Blocking; must not be called from an async context.
    pub fn run_session<F>(&self, session: &mut CaptureSession, handle: &Handle, mut emit: F) -> SessionStats
    where
        F: FnMut(Bytes) -> bool,
    {
        let mut stats = SessionStats::default();

        loop {
            let frame = match session.read() {
                Ok(frame) => frame,
                Err(CaptureError::EndOfStream) => {
                    info!("Capture source reached end of stream");
                    break;
                }
                Err(e) => {
                    warn!("Stopping feed: {}", e);
                    break;
                }
            };
            stats.frames_read += 1;

            let detections = handle.block_on(detect_or_passthrough(self.detector.as_ref(), &frame));
            stats.detections += detections.records.len() as u64;

            handle.block_on(self.persist(&detections.records, &mut stats));

            let Some(jpeg) = self.encode(&detections.annotated, &frame) else {
                stats.frames_skipped += 1;
                continue;
            };

            if !emit(multipart_chunk(&jpeg)) {
                debug!("Viewer disconnected");
                break;
            }
            stats.frames_sent += 1;
        }

        stats
    }

    /// Store one event per record; a failed insert never stops the loop
    async fn persist(&self, records: &[DetectionRecord], stats: &mut SessionStats) {
        for record in records {
            let detection = NewDetection::now(&record.class_name_or_unknown(), record.confidence())
                .with_bbox(record.bbox())
                .with_location(self.location)
                .with_raw(record.to_value());

            match self.store.insert(&detection).await {
                Ok(_) => stats.persisted += 1,
                Err(e) => {
                    stats.persist_failures += 1;
                    warn!("Failed to store {} detection: {:#}", detection.class_name, e);
                }
            }
        }
    }

    /// Annotated frame if it encodes, otherwise the raw frame, otherwise nothing
    fn encode(&self, annotated: &Frame, raw: &Frame) -> Option<Vec<u8>> {
        match encode_jpeg(annotated, self.jpeg_quality) {
            Ok(jpeg) => return Some(jpeg),
            Err(e) => warn!("Failed to encode annotated frame: {}", e),
        }

        match encode_jpeg(raw, self.jpeg_quality) {
            Ok(jpeg) => Some(jpeg),
            Err(e) => {
                warn!("Failed to encode frame, skipping: {}", e);
                None
            }
        }
    }
}
