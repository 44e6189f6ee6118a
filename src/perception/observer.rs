use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};

use crate::errors::{PilotError, PilotResult};
use crate::llm::types::ChatMessage;
use crate::llm::LlmClient;
use crate::perception::traits::ScreenObserver;
use crate::perception::types::Screenshot;
use crate::tools::{ToolArgs, ToolRegistry};

pub const CAPTURE_TOOL: &str = "capture_screenshot";
pub const DESCRIBE_TOOL: &str = "describe_screen";

const VISION_PROMPT: &str = "Describe this screenshot for an agent that controls the computer. \
List the open windows and which one has focus, visible text fields and their contents, buttons, \
links, icons and any dialogs or error messages, with their approximate position on screen.";

static SAVED_TO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)saved[^:\n]*?to:?\s*(.+)$").expect("Invalid screenshot path regex"));

/// Observes the desktop through registered tools, optionally describing frames
/// with a vision model.
pub struct DesktopObserver {
    registry: Arc<ToolRegistry>,
    vision: Option<LlmClient>,
}

impl DesktopObserver {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry, vision: None }
    }

    pub fn with_vision(mut self, vision: LlmClient) -> Self {
        self.vision = Some(vision);
        self
    }
}

#[async_trait]
impl ScreenObserver for DesktopObserver {
    async fn capture(&self) -> PilotResult<Screenshot> {
        let output = self.registry.execute(CAPTURE_TOOL, ToolArgs::none()).await?;
        let path = screenshot_path(&output);
        let image_bytes = tokio::fs::read(&path).await?;
        let (width, height) = image::ImageReader::new(Cursor::new(&image_bytes))
            .with_guessed_format()?
            .into_dimensions()?;
        tracing::debug!(path = %path.display(), width, height, "screen captured");
        Ok(Screenshot {
            image_bytes,
            width,
            height,
            path: Some(path),
        })
    }

    async fn describe(&self, shot: &Screenshot) -> PilotResult<String> {
        if let Some(vision) = &self.vision {
            let message = ChatMessage::user_with_image(VISION_PROMPT, shot.data_url());
            let description = vision
                .complete_text(vec![message], Some(0.0))
                .await
                .map_err(|e| PilotError::Perception(format!("vision model failed: {e}")))?;
            return Ok(description);
        }

        let mut named = Map::new();
        if let Some(path) = &shot.path {
            named.insert("image_path".into(), Value::String(path.display().to_string()));
        }
        Ok(self.registry.execute(DESCRIBE_TOOL, ToolArgs::named(named)).await?)
    }
}

/// Capture tools may print "Screenshot saved to: <path>" or the bare path.
fn screenshot_path(output: &str) -> PathBuf {
    let last = output.trim().lines().last().unwrap_or_default().trim();
    let path = SAVED_TO_RE
        .captures(last)
        .and_then(|c| c.get(1))
        .map_or(last, |m| m.as_str().trim());
    PathBuf::from(path.trim_matches(|c| c == '"' || c == '\''))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{text_reply, ScriptedProvider, SpyTool};
    use crate::llm::types::MessageContent;

    fn write_png(name: &str, w: u32, h: u32) -> PathBuf {
        let path = std::env::temp_dir().join(format!("deskpilot-{}-{name}.png", uuid::Uuid::new_v4().simple()));
        image::RgbImage::new(w, h).save(&path).unwrap();
        path
    }

    #[test]
    fn path_is_extracted_from_tool_output() {
        assert_eq!(
            screenshot_path("Screenshot saved to: C:\\shots\\a.png"),
            PathBuf::from("C:\\shots\\a.png")
        );
        assert_eq!(screenshot_path("/tmp/shot.png\n"), PathBuf::from("/tmp/shot.png"));
    }

    #[tokio::test]
    async fn capture_measures_the_written_image() {
        let path = write_png("capture", 64, 48);
        let mut registry = ToolRegistry::new(false);
        registry.register(SpyTool::ok(CAPTURE_TOOL, &format!("Screenshot saved to: {}", path.display())));
        let observer = DesktopObserver::new(Arc::new(registry));

        let shot = observer.capture().await.unwrap();
        assert_eq!((shot.width, shot.height), (64, 48));
        assert_eq!(shot.path.as_deref(), Some(path.as_path()));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn missing_capture_tool_is_an_error() {
        let observer = DesktopObserver::new(Arc::new(ToolRegistry::new(false)));
        assert!(matches!(observer.capture().await, Err(PilotError::Tool(_))));
    }

    #[tokio::test]
    async fn vision_model_receives_the_frame() {
        let vision = ScriptedProvider::new(vec![text_reply("A browser with a search box")]);
        let observer = DesktopObserver::new(Arc::new(ToolRegistry::new(false))).with_vision(vision.client());
        let shot = Screenshot {
            image_bytes: vec![1, 2, 3],
            width: 1,
            height: 1,
            path: None,
        };

        assert_eq!(observer.describe(&shot).await.unwrap(), "A browser with a search box");
        let request = &vision.requests()[0];
        match &request.messages[0].content {
            MessageContent::Parts(parts) => assert_eq!(parts.len(), 2),
            other => panic!("expected image parts, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn falls_back_to_describe_tool() {
        let describe = SpyTool::ok(DESCRIBE_TOOL, "Desktop with taskbar");
        let mut registry = ToolRegistry::new(false);
        registry.register(describe.clone());
        let observer = DesktopObserver::new(Arc::new(registry));
        let shot = Screenshot {
            image_bytes: Vec::new(),
            width: 0,
            height: 0,
            path: Some(PathBuf::from("/tmp/x.png")),
        };

        assert_eq!(observer.describe(&shot).await.unwrap(), "Desktop with taskbar");
        assert_eq!(describe.calls()[0].get_str("image_path"), Some("/tmp/x.png"));
    }
}
