//! Boundary to the external object-detection model.
//!
//! A [`Detector`] turns one RGB frame into normalized [`DetectionRecord`]s plus an
//! annotated copy of the frame. Inference failures are explicit `Err`s; the frame
//! loop calls [`detect_or_passthrough`] to degrade them into an empty result.

use async_trait::async_trait;
use image::RgbImage;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::db::models::detection_models::BoundingBox;

pub mod adapter;
pub mod annotate;
pub mod remote;

pub use adapter::{ClassMap, ModelDetector, ObjectModel, RawBox};
pub use remote::RemoteModel;

/// Decoded RGB frame as delivered by the capture layer
pub type Frame = RgbImage;

/// Label stored when a record carries no usable class
pub const UNKNOWN_CLASS: &str = "unknown";

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Inference request failed: {0}")]
    Request(String),

    #[error("Invalid model response: {0}")]
    Response(String),

    #[error("Frame encoding failed: {0}")]
    Encode(String),
}

/// Output of one detector invocation
#[derive(Debug, Clone)]
pub struct Detections {
    pub records: Vec<DetectionRecord>,
    pub annotated: Frame,
}

impl Detections {
    /// No detections, frame passed through untouched
    pub fn passthrough(frame: &Frame) -> Self {
        Self {
            records: Vec::new(),
            annotated: frame.clone(),
        }
    }
}

#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Detections, DetectorError>;
}

/// Run the detector; any failure yields no records and the frame unchanged
pub async fn detect_or_passthrough(detector: &dyn Detector, frame: &Frame) -> Detections {
    match detector.detect(frame).await {
        Ok(detections) => detections,
        Err(e) => {
            warn!("Detection failed, streaming raw frame: {}", e);
            Detections::passthrough(frame)
        }
    }
}

/// One detection as produced by a detector.
///
/// Built-in detectors emit `{class, confidence, bbox}`; records from other
/// producers may use `label`, `conf` or `xyxy` instead, and the accessors
/// below accept either spelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionRecord(Map<String, Value>);

impl DetectionRecord {
    pub fn normalized(class: &str, confidence: f64, bbox: Option<BoundingBox>) -> Self {
        let mut map = Map::new();
        map.insert("class".to_string(), Value::from(class));
        map.insert("confidence".to_string(), Value::from(confidence));
        map.insert(
            "bbox".to_string(),
            bbox.map_or(Value::Null, |b| Value::from(b.0.to_vec())),
        );
        Self(map)
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// `class`, then `label`; empty or falsy values fall through to the next key
    pub fn class_name(&self) -> Option<String> {
        let value = ["class", "label"]
            .iter()
            .filter_map(|key| self.0.get(*key))
            .find(|v| truthy(v))?;

        Some(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// `class_name()` or the unknown placeholder
    pub fn class_name_or_unknown(&self) -> String {
        self.class_name()
            .unwrap_or_else(|| UNKNOWN_CLASS.to_string())
    }

    /// `confidence` when present, otherwise `conf`; unparseable values give 0.0
    pub fn confidence(&self) -> f64 {
        let value = match self.0.get("confidence") {
            Some(v) => Some(v),
            None => self.0.get("conf"),
        };

        value
            .and_then(coerce_f64)
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }

    /// `bbox`, then `xyxy`; anything other than four numbers is dropped
    pub fn bbox(&self) -> Option<BoundingBox> {
        ["bbox", "xyxy"]
            .iter()
            .filter_map(|key| self.0.get(*key))
            .find(|v| truthy(v))
            .and_then(BoundingBox::from_value)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Numeric value of a scalar or of the first element of a (nested) list
pub(crate) fn scalar(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Array(items) => items.first().and_then(scalar),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> DetectionRecord {
        serde_json::from_value(value).unwrap()
    }

    struct Failing;

    #[async_trait]
    impl Detector for Failing {
        async fn detect(&self, _frame: &Frame) -> Result<Detections, DetectorError> {
            Err(DetectorError::Request("model offline".to_string()))
        }
    }

    #[test]
    fn class_falls_back_to_label_then_unknown() {
        assert_eq!(record(json!({"class": "fire"})).class_name_or_unknown(), "fire");
        assert_eq!(record(json!({"class": "", "label": "human"})).class_name_or_unknown(), "human");
        assert_eq!(record(json!({"label": 3})).class_name_or_unknown(), "3");
        assert_eq!(record(json!({"confidence": 0.4})).class_name_or_unknown(), "unknown");
    }

    #[test]
    fn unparseable_confidence_is_zero() {
        assert_eq!(record(json!({"confidence": "0.25"})).confidence(), 0.25);
        assert_eq!(record(json!({"conf": 0.5})).confidence(), 0.5);
        assert_eq!(record(json!({"confidence": "high"})).confidence(), 0.0);
        assert_eq!(record(json!({"confidence": null, "conf": 0.9})).confidence(), 0.0);
        assert_eq!(record(json!({"confidence": [0.3]})).confidence(), 0.0);
        assert_eq!(record(json!({"confidence": "NaN"})).confidence(), 0.0);
        assert_eq!(record(json!({})).confidence(), 0.0);
    }

    #[test]
    fn bbox_accepts_either_key() {
        let b = record(json!({"xyxy": [1, 2, 3, 4]})).bbox().unwrap();
        assert_eq!(b.0, [1.0, 2.0, 3.0, 4.0]);
        assert!(record(json!({"bbox": null, "xyxy": [1, 2]})).bbox().is_none());
        assert!(record(json!({"bbox": "box"})).bbox().is_none());
    }

    #[test]
    fn normalized_record_has_fixed_shape() {
        let r = DetectionRecord::normalized("animal", 0.8, None);
        assert_eq!(r.to_value(), json!({"class": "animal", "confidence": 0.8, "bbox": null}));
    }

    #[test]
    fn scalar_unwraps_tensor_like_lists() {
        assert_eq!(scalar(&json!([[2.0]])), Some(2.0));
        assert_eq!(scalar(&json!("7")), Some(7.0));
        assert_eq!(scalar(&json!([])), None);
    }

    #[tokio::test]
    async fn test_failed_detection_passes_frame_through() {
        let frame = Frame::from_pixel(4, 3, image::Rgb([9, 9, 9]));
        let out = detect_or_passthrough(&Failing, &frame).await;
        assert!(out.records.is_empty());
        assert_eq!(out.annotated, frame);
    }
}
