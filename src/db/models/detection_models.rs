use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Longest label the detections table stores
pub const MAX_CLASS_NAME_CHARS: usize = 64;

/// Geographic position attached to a detection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    /// Compact "lat, lng" rendering used by the admin listing
    pub fn short(location: Option<&Location>) -> String {
        match location {
            Some(loc) => format!("{:.4}, {:.4}", loc.lat, loc.lng),
            None => "-".to_string(),
        }
    }
}

/// Pixel rectangle `[x1, y1, x2, y2]` in source-frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoundingBox(pub [f64; 4]);

impl BoundingBox {
    /// Parse a JSON value into a box; anything but four finite numbers is rejected
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let items = value.as_array()?;
        if items.len() != 4 {
            return None;
        }

        let mut coords = [0.0; 4];
        for (slot, item) in coords.iter_mut().zip(items) {
            let v = item.as_f64()?;
            if !v.is_finite() {
                return None;
            }
            *slot = v;
        }

        Some(Self(coords))
    }

    pub fn x1(&self) -> f64 {
        self.0[0]
    }

    pub fn y1(&self) -> f64 {
        self.0[1]
    }

    pub fn x2(&self) -> f64 {
        self.0[2]
    }

    pub fn y2(&self) -> f64 {
        self.0[3]
    }
}

/// Detection event model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub class_name: String,
    pub confidence: f64,
    pub bbox: Option<BoundingBox>,
    pub location: Option<Location>,
    pub raw: Option<serde_json::Value>,
}

/// Detection event not yet written to the store
#[derive(Debug, Clone, PartialEq)]
pub struct NewDetection {
    pub timestamp: DateTime<Utc>,
    pub class_name: String,
    pub confidence: f64,
    pub bbox: Option<BoundingBox>,
    pub location: Option<Location>,
    pub raw: Option<serde_json::Value>,
}

impl NewDetection {
    /// Build an event stamped with the current time
    pub fn now(class_name: &str, confidence: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            class_name: truncate_class_name(class_name),
            confidence,
            bbox: None,
            location: None,
            raw: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_bbox(mut self, bbox: Option<BoundingBox>) -> Self {
        self.bbox = bbox;
        self
    }

    pub fn with_location(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }
}

fn truncate_class_name(name: &str) -> String {
    name.chars().take(MAX_CLASS_NAME_CHARS).collect()
}

/// Filters accepted by the admin listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetectionFilter {
    /// Case-insensitive exact class match
    pub class_name: Option<String>,
    /// Case-insensitive substring match on the class
    pub q: Option<String>,
    pub limit: Option<i64>,
}

/// Render a timestamp the way the dashboard expects it
pub fn iso_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Element of the recent alerts response
#[derive(Debug, Clone, Serialize)]
pub struct AlertView {
    pub timestamp: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f64,
    pub bbox: Option<BoundingBox>,
    pub location: Option<Location>,
    pub raw: Option<serde_json::Value>,
}

impl From<&DetectionEvent> for AlertView {
    fn from(event: &DetectionEvent) -> Self {
        Self {
            timestamp: iso_timestamp(&event.timestamp),
            class_name: event.class_name.clone(),
            confidence: event.confidence,
            bbox: event.bbox,
            location: event.location,
            raw: event.raw.clone(),
        }
    }
}

/// Most recent sighting inside a category summary
#[derive(Debug, Clone, Serialize)]
pub struct LatestSighting {
    pub timestamp: String,
    pub location: Option<Location>,
    pub confidence: f64,
    pub bbox: Option<BoundingBox>,
}

/// Element of the latest-per-category response
#[derive(Debug, Clone, Serialize)]
pub struct CategoryLocation {
    #[serde(rename = "_id")]
    pub category_id: String,
    pub latest: LatestSighting,
}

impl CategoryLocation {
    pub fn new(category: &str, event: &DetectionEvent) -> Self {
        Self {
            category_id: category.to_string(),
            latest: LatestSighting {
                timestamp: iso_timestamp(&event.timestamp),
                location: event.location,
                confidence: event.confidence,
                bbox: event.bbox,
            },
        }
    }
}

/// Row of the admin listing
#[derive(Debug, Clone, Serialize)]
pub struct AdminDetectionRow {
    pub id: i64,
    pub timestamp: String,
    pub class_name: String,
    pub confidence: f64,
    pub short_location: String,
    pub bbox: Option<BoundingBox>,
    pub raw: Option<serde_json::Value>,
}

impl From<&DetectionEvent> for AdminDetectionRow {
    fn from(event: &DetectionEvent) -> Self {
        Self {
            id: event.id,
            timestamp: iso_timestamp(&event.timestamp),
            class_name: event.class_name.clone(),
            confidence: event.confidence,
            short_location: Location::short(event.location.as_ref()),
            bbox: event.bbox,
            raw: event.raw.clone(),
        }
    }
}
