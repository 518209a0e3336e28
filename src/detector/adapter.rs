use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::db::models::detection_models::BoundingBox;
use crate::detector::annotate::draw_detections;
use crate::detector::{scalar, DetectionRecord, Detections, Detector, DetectorError, Frame};

/// Class id to human label, as published by the model
pub type ClassMap = HashMap<i64, String>;

/// Keys tried, in order, for the class id of a raw box
const CLASS_ID_KEYS: [&str; 3] = ["cls", "cls_id", "class_id"];
const CONFIDENCE_KEYS: [&str; 2] = ["conf", "confidence"];

/// One box exactly as the model returned it.
///
/// Depending on the model build, ids and scores arrive as plain numbers or
/// as one-element (possibly nested) lists, and the id key varies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawBox(pub Map<String, Value>);

impl RawBox {
    pub fn class_id(&self) -> Option<i64> {
        CLASS_ID_KEYS
            .iter()
            .find_map(|key| self.0.get(*key).and_then(scalar))
            .filter(|id| id.is_finite())
            .map(|id| id.trunc() as i64)
    }

    pub fn confidence(&self) -> f64 {
        CONFIDENCE_KEYS
            .iter()
            .find_map(|key| self.0.get(*key).and_then(scalar))
            .filter(|c| c.is_finite())
            .unwrap_or(0.0)
    }

    /// Box corners; `[[x1, y1, x2, y2]]` is unwrapped to its first row
    pub fn xyxy(&self) -> Option<BoundingBox> {
        let value = self.0.get("xyxy")?;
        match value.as_array()?.first() {
            Some(first @ Value::Array(_)) => BoundingBox::from_value(first),
            _ => BoundingBox::from_value(value),
        }
    }
}

/// Anything that can run object detection on a frame
#[async_trait]
pub trait ObjectModel: Send + Sync {
    async fn predict(&self, frame: &Frame) -> Result<Vec<RawBox>, DetectorError>;

    fn class_names(&self) -> &ClassMap;
}

/// Label for a class id, `class_<id>` when the model does not name it
pub fn class_label(classes: &ClassMap, id: i64) -> String {
    classes
        .get(&id)
        .cloned()
        .unwrap_or_else(|| format!("class_{}", id))
}

/// Normalize one raw box; boxes without a usable class id are dropped
pub fn normalize_box(raw: &RawBox, classes: &ClassMap) -> Option<DetectionRecord> {
    let Some(id) = raw.class_id() else {
        debug!("Skipping box without class id: {:?}", raw);
        return None;
    };

    Some(DetectionRecord::normalized(
        &class_label(classes, id),
        raw.confidence(),
        raw.xyxy(),
    ))
}

/// Adapts an [`ObjectModel`] to the [`Detector`] contract
pub struct ModelDetector<M> {
    model: M,
}

impl<M: ObjectModel> ModelDetector<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

#[async_trait]
impl<M: ObjectModel> Detector for ModelDetector<M> {
    async fn detect(&self, frame: &Frame) -> Result<Detections, DetectorError> {
        let boxes = self.model.predict(frame).await?;
        let classes = self.model.class_names();

        let records: Vec<DetectionRecord> = boxes
            .iter()
            .filter_map(|raw| normalize_box(raw, classes))
            .collect();

        let annotated = draw_detections(frame, &records);

        Ok(Detections { records, annotated })
    }
}
