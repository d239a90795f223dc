//! External places-lookup client.
//!
//! Build a URL, fire the request with a bounded timeout, map failures into
//! a JSON error body rather than propagating an error to the caller — a
//! `WHATSAT` reply always has a body, even when the upstream is down.

use std::time::Duration;

use serde_json::Value;

use crate::config::{MAX_INFO_LIMIT, MAX_RADIUS_KM};

const DEFAULT_BASE_URL: &str = "https://maps.googleapis.com/maps/api/place/nearbysearch/json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum PlacesError {
    #[error("places API request failed: {0}")]
    Transport(String),
    #[error("places API returned status {status}")]
    BadStatus { status: u16 },
}

pub struct PlacesClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PlacesClient {
    pub fn from_env() -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with static config always builds");
        Self {
            http,
            base_url: std::env::var("PROXYHERD_PLACES_API_BASE")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_key: std::env::var("PROXYHERD_PLACES_API_KEY").unwrap_or_default(),
        }
    }

    /// Query nearby places and return the response body already formatted
    /// per §4.5: 3-space-indented JSON, runs of ≥2 newlines collapsed to
    /// one, trailing newlines trimmed. On any failure, returns the same
    /// shape wrapping an `{"error": ..., "status": N?}` object instead
    /// (§7) — callers never need to branch on success/failure.
    pub async fn lookup(&self, lat: f64, lon: f64, radius_km: u32, max_results: u32) -> String {
        let radius_m = radius_km.min(MAX_RADIUS_KM) * 1000;
        let limit = max_results.min(MAX_INFO_LIMIT) as usize;

        match self.fetch(lat, lon, radius_m).await {
            Ok(mut body) => {
                truncate_results(&mut body, limit);
                format_body(&body)
            }
            Err(e) => format_body(&error_value(&e)),
        }
    }

    async fn fetch(&self, lat: f64, lon: f64, radius_m: u32) -> Result<Value, PlacesError> {
        let url = format!(
            "{}?location={lat},{lon}&radius={radius_m}&key={}",
            self.base_url, self.api_key
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| PlacesError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PlacesError::BadStatus {
                status: response.status().as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| PlacesError::Transport(e.to_string()))
    }
}

fn truncate_results(body: &mut Value, limit: usize) {
    if let Some(results) = body.get_mut("results").and_then(Value::as_array_mut) {
        results.truncate(limit);
    }
}

fn error_value(err: &PlacesError) -> Value {
    match err {
        PlacesError::BadStatus { status } => {
            serde_json::json!({ "error": err.to_string(), "status": status })
        }
        PlacesError::Transport(_) => serde_json::json!({ "error": err.to_string() }),
    }
}

/// 3-space indent, collapse runs of ≥2 newlines to one, trim trailing
/// newlines.
fn format_body(value: &Value) -> String {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"   ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    serde::Serialize::serialize(value, &mut ser).expect("Value always serializes");
    let indented = String::from_utf8(buf).expect("serde_json only emits valid UTF-8");

    let mut collapsed = String::with_capacity(indented.len());
    let mut newline_run = 0usize;
    for ch in indented.chars() {
        if ch == '\n' {
            newline_run += 1;
            if newline_run == 1 {
                collapsed.push(ch);
            }
        } else {
            newline_run = 0;
            collapsed.push(ch);
        }
    }
    collapsed.trim_end_matches('\n').to_string()
}
