//! HTTP client for an inference server hosting the detection weights.
//!
//! The server exposes `GET {endpoint}/names`, returning the class map either as
//! `{"0": "human", ...}` or as a list indexed by id, and `POST {endpoint}/predict`
//! taking a multipart `image` part (JPEG) and answering `{"boxes": [...]}`.

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::config::DetectorConfig;
use crate::detector::adapter::{ClassMap, ObjectModel, RawBox};
use crate::detector::{DetectorError, Frame};
use crate::error::Error;
use crate::pipeline::encode::encode_jpeg;

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    boxes: Vec<RawBox>,
}

pub struct RemoteModel {
    client: reqwest::Client,
    predict_url: Url,
    classes: ClassMap,
    jpeg_quality: u8,
}

impl RemoteModel {
    /// Connect to the inference server and load its class names
    pub async fn connect(config: &DetectorConfig, jpeg_quality: u8) -> Result<Self> {
        let base = base_url(&config.endpoint)?;
        let names_url = base
            .join("names")
            .map_err(|e| Error::Config(format!("Invalid detector endpoint: {}", e)))?;
        let predict_url = base
            .join("predict")
            .map_err(|e| Error::Config(format!("Invalid detector endpoint: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Detection(format!("Failed to create HTTP client: {}", e)))?;

        info!("Loading class names from {}", names_url);

        let names: Value = client
            .get(names_url.clone())
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| Error::Detection(format!("Detector at {} unavailable: {}", base, e)))?
            .json()
            .await
            .map_err(|e| Error::Detection(format!("Invalid class names from {}: {}", names_url, e)))?;

        let mut classes = parse_class_names(&names);
        apply_overrides(&mut classes, &config.class_names);

        info!("Detector ready with {} classes", classes.len());

        Ok(Self {
            client,
            predict_url,
            classes,
            jpeg_quality,
        })
    }
}

#[async_trait]
impl ObjectModel for RemoteModel {
    async fn predict(&self, frame: &Frame) -> Result<Vec<RawBox>, DetectorError> {
        let jpeg = encode_jpeg(frame, self.jpeg_quality)
            .map_err(|e| DetectorError::Encode(e.to_string()))?;

        let part = Part::bytes(jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| DetectorError::Request(e.to_string()))?;
        let form = Form::new().part("image", part);

        let resp = self
            .client
            .post(self.predict_url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| DetectorError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(DetectorError::Request(format!(
                "{} returned {}",
                self.predict_url,
                resp.status()
            )));
        }

        let body: PredictResponse = resp
            .json()
            .await
            .map_err(|e| DetectorError::Response(e.to_string()))?;

        Ok(body.boxes)
    }

    fn class_names(&self) -> &ClassMap {
        &self.classes
    }
}

/// Endpoint with a trailing slash so relative joins append instead of replace
fn base_url(endpoint: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| Error::Config(format!("Invalid detector endpoint '{}': {}", endpoint, e)))?;

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

/// Class map from either `{"<id>": "<name>"}` or `["<name>", ...]`
pub fn parse_class_names(value: &Value) -> ClassMap {
    match value {
        Value::Object(map) => map
            .iter()
            .filter_map(|(id, name)| match (id.trim().parse::<i64>(), name.as_str()) {
                (Ok(id), Some(name)) => Some((id, name.to_string())),
                _ => {
                    warn!("Ignoring class name entry {}: {}", id, name);
                    None
                }
            })
            .collect(),
        Value::Array(names) => names
            .iter()
            .enumerate()
            .filter_map(|(id, name)| name.as_str().map(|n| (id as i64, n.to_string())))
            .collect(),
        other => {
            warn!("Unexpected class names payload: {}", other);
            ClassMap::new()
        }
    }
}

fn apply_overrides(classes: &mut ClassMap, overrides: &std::collections::HashMap<String, String>) {
    for (id, name) in overrides {
        match id.trim().parse::<i64>() {
            Ok(id) => {
                classes.insert(id, name.clone());
            }
            Err(_) => warn!("Ignoring class override with non-numeric id '{}'", id),
        }
    }
}
