use std::path::PathBuf;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Icon,
    Text,
    Button,
    Unknown,
}

impl ElementKind {
    /// Detector labels outside the known set map to `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "icon" => ElementKind::Icon,
            "text" => ElementKind::Text,
            "button" => ElementKind::Button,
            _ => ElementKind::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Icon => "icon",
            ElementKind::Text => "text",
            ElementKind::Button => "button",
            ElementKind::Unknown => "unknown",
        }
    }
}

/// One labeled screen region, in screen pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UIElement {
    pub id: u32,
    pub description: String,
    #[serde(rename = "type")]
    pub element_type: ElementKind,
    /// [x1, y1, x2, y2]
    pub bbox: [i32; 4],
    pub center: (i32, i32),
}

impl UIElement {
    pub fn new(id: u32, description: impl Into<String>, element_type: ElementKind, bbox: [i32; 4]) -> Self {
        let center = ((bbox[0] + bbox[2]) / 2, (bbox[1] + bbox[3]) / 2);
        Self {
            id,
            description: description.into(),
            element_type,
            bbox,
            center,
        }
    }

    pub fn width(&self) -> i32 {
        self.bbox[2] - self.bbox[0]
    }

    pub fn height(&self) -> i32 {
        self.bbox[3] - self.bbox[1]
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height() > 0 {
            self.width() as f64 / self.height() as f64
        } else {
            0.0
        }
    }

    /// Coarse 3x3 screen region of the element's center, e.g. "bottom-left".
    pub fn region(&self, screen_width: u32, screen_height: u32) -> &'static str {
        let third = |v: i32, extent: u32| -> usize {
            if extent == 0 {
                return 1;
            }
            let f = v as f64 / extent as f64;
            if f < 1.0 / 3.0 {
                0
            } else if f < 2.0 / 3.0 {
                1
            } else {
                2
            }
        };
        const REGIONS: [[&str; 3]; 3] = [
            ["top-left", "top-center", "top-right"],
            ["middle-left", "center", "middle-right"],
            ["bottom-left", "bottom-center", "bottom-right"],
        ];
        REGIONS[third(self.center.1, screen_height)][third(self.center.0, screen_width)]
    }

    /// One line for model prompts.
    pub fn prompt_line(&self, screen_width: u32, screen_height: u32) -> String {
        format!(
            "[{}] {} \"{}\" center=({}, {}) size={}x{} region={}",
            self.id,
            self.element_type.as_str(),
            self.description,
            self.center.0,
            self.center.1,
            self.width(),
            self.height(),
            self.region(screen_width, screen_height),
        )
    }
}

/// A captured frame. `path` is where the capture tool wrote it, when known.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub image_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub path: Option<PathBuf>,
}

impl Screenshot {
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.image_bytes)
    }

    pub fn data_url(&self) -> String {
        format!("data:image/png;base64,{}", self.to_base64())
    }
}

/// Detector output: parsed elements plus the backend's raw text for audit logs.
#[derive(Debug, Clone, Default)]
pub struct DetectionResult {
    pub elements: Vec<UIElement>,
    pub raw: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_and_geometry_follow_bbox() {
        let el = UIElement::new(4, "Chrome", ElementKind::Icon, [100, 1040, 140, 1080]);
        assert_eq!(el.center, (120, 1060));
        assert_eq!(el.width(), 40);
        assert_eq!(el.aspect_ratio(), 1.0);
        assert_eq!(el.region(1920, 1080), "bottom-left");
    }

    #[test]
    fn unknown_labels_fall_back() {
        assert_eq!(ElementKind::from_label("ICON"), ElementKind::Icon);
        assert_eq!(ElementKind::from_label("checkbox"), ElementKind::Unknown);
    }

    #[test]
    fn prompt_line_carries_position_and_size() {
        let el = UIElement::new(7, "Search", ElementKind::Text, [800, 20, 1400, 50]);
        let line = el.prompt_line(1920, 1080);
        assert!(line.starts_with("[7] text \"Search\""));
        assert!(line.contains("size=600x30"));
        assert!(line.contains("region=top-center"));
    }
}
