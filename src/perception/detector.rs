use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::config::PerceptionConfig;
use crate::errors::{PilotError, PilotResult};
use crate::perception::traits::ElementDetector;
use crate::perception::types::{DetectionResult, ElementKind, Screenshot, UIElement};

/// `icon 12: {'type': 'icon', 'bbox': [x1, y1, x2, y2], 'content': 'Chrome'}`
static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\w+\s+(\d+)\s*:\s*\{(.*)\}\s*$").expect("Invalid detection line regex")
});
static TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"['"]type['"]\s*:\s*['"]([^'"]*)['"]"#).expect("Invalid type field regex"));
static BBOX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"['"]bbox['"]\s*:\s*\[([^\]]*)\]"#).expect("Invalid bbox field regex"));
static CONTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]content['"]\s*:\s*(?:'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)"|None)"#)
        .expect("Invalid content field regex")
});

/// Remote UI-element detector speaking a small JSON protocol.
///
/// Request: `{image_base64, box_threshold, iou_threshold}`. The reply may be
/// `{"elements": [...]}`, `{"parsed_content": "<lines>"}` or the raw line
/// listing itself.
pub struct HttpElementDetector {
    endpoint: String,
    box_threshold: f32,
    iou_threshold: f32,
    client: reqwest::Client,
}

impl HttpElementDetector {
    pub fn new(endpoint: String, box_threshold: f32, iou_threshold: f32, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "custom HTTP client failed to build, using defaults");
                reqwest::Client::new()
            });
        Self {
            endpoint,
            box_threshold,
            iou_threshold,
            client,
        }
    }

    /// `None` when no endpoint is configured; detection is then skipped.
    pub fn from_config(cfg: &PerceptionConfig) -> Option<Self> {
        let endpoint = cfg.endpoint.as_ref().filter(|e| !e.trim().is_empty())?;
        Some(Self::new(
            endpoint.clone(),
            cfg.box_threshold,
            cfg.iou_threshold,
            Duration::from_secs(cfg.timeout_secs),
        ))
    }
}

#[async_trait]
impl ElementDetector for HttpElementDetector {
    async fn detect(&self, shot: &Screenshot) -> PilotResult<DetectionResult> {
        tracing::info!(endpoint = %self.endpoint, width = shot.width, height = shot.height, "requesting element detection");
        let body = serde_json::json!({
            "image_base64": shot.to_base64(),
            "box_threshold": self.box_threshold,
            "iou_threshold": self.iou_threshold,
        });
        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(PilotError::Perception(format!("detector returned {status}: {text}")));
        }

        let result = parse_detection_body(&text, shot.width, shot.height)?;
        tracing::info!(elements = result.elements.len(), "element detection finished");
        Ok(result)
    }
}

/// Decode a detector reply into pixel-space elements.
pub fn parse_detection_body(body: &str, width: u32, height: u32) -> PilotResult<DetectionResult> {
    let elements = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(obj)) => {
            if let Some(Value::Array(items)) = obj.get("elements") {
                let normalized = obj.get("normalized").and_then(Value::as_bool);
                items
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, item)| element_from_json(idx, item, normalized, width, height))
                    .collect()
            } else if let Some(Value::String(lines)) = obj.get("parsed_content") {
                parse_lines(lines, width, height)
            } else if let Some(err) = obj.get("error") {
                return Err(PilotError::Perception(format!("detector error: {err}")));
            } else {
                return Err(PilotError::Perception("detector reply has no elements".into()));
            }
        }
        Ok(Value::String(lines)) => parse_lines(&lines, width, height),
        _ => parse_lines(body, width, height),
    };
    Ok(DetectionResult {
        elements,
        raw: body.to_string(),
    })
}

fn element_from_json(
    idx: usize,
    item: &Value,
    normalized: Option<bool>,
    width: u32,
    height: u32,
) -> Option<UIElement> {
    let raw = item.get("bbox")?.as_array()?;
    let coords: Vec<f64> = raw.iter().filter_map(Value::as_f64).collect();
    let fractional = raw.iter().any(|v| v.is_f64());
    let normalized = item
        .get("normalized")
        .and_then(Value::as_bool)
        .or(normalized)
        .unwrap_or_else(|| looks_normalized(&coords, fractional));
    let bbox = to_pixels(&coords, normalized, width, height)?;
    let id = item
        .get("id")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(idx as u32);
    let description = item
        .get("description")
        .or_else(|| item.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let kind = ElementKind::from_label(item.get("type").and_then(Value::as_str).unwrap_or("unknown"));
    Some(UIElement::new(id, description, kind, bbox))
}

fn parse_lines(text: &str, width: u32, height: u32) -> Vec<UIElement> {
    let mut elements = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        match parse_line(line, width, height) {
            Some(el) => elements.push(el),
            None => tracing::debug!(line = %line.chars().take(100).collect::<String>(), "skipped detection line"),
        }
    }
    elements
}

fn parse_line(line: &str, width: u32, height: u32) -> Option<UIElement> {
    let caps = LINE_RE.captures(line)?;
    let id: u32 = caps.get(1)?.as_str().parse().ok()?;
    let fields = caps.get(2)?.as_str();

    let tokens: Vec<&str> = BBOX_RE.captures(fields)?.get(1)?.as_str().split(',').map(str::trim).collect();
    let coords: Vec<f64> = tokens.iter().filter_map(|v| v.parse().ok()).collect();
    let fractional = tokens.iter().any(|v| v.contains(['.', 'e', 'E']));
    let bbox = to_pixels(&coords, looks_normalized(&coords, fractional), width, height)?;
    let kind = TYPE_RE
        .captures(fields)
        .and_then(|c| c.get(1))
        .map_or(ElementKind::Unknown, |m| ElementKind::from_label(m.as_str()));
    let description = CONTENT_RE
        .captures(fields)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map_or(String::new(), |m| m.as_str().replace("\\'", "'").trim().to_string());

    Some(UIElement::new(id, description, kind, bbox))
}

/// Integer boxes are pixels even when they fall inside the unit square.
fn looks_normalized(coords: &[f64], fractional: bool) -> bool {
    fractional && coords.iter().take(4).all(|v| (0.0..=1.0).contains(v))
}

fn to_pixels(coords: &[f64], normalized: bool, width: u32, height: u32) -> Option<[i32; 4]> {
    if coords.len() < 4 {
        return None;
    }
    let (sx, sy) = if normalized {
        (f64::from(width), f64::from(height))
    } else {
        (1.0, 1.0)
    };
    Some([
        (coords[0] * sx) as i32,
        (coords[1] * sy) as i32,
        (coords[2] * sx) as i32,
        (coords[3] * sy) as i32,
    ])
}
