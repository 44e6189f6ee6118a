use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::errors::{PilotError, PilotResult};
use crate::llm::types::ChatMessage;
use crate::llm::LlmClient;
use crate::perception::types::UIElement;
use crate::planning::json::{non_empty_str, parse_object};
use crate::planning::plan::{decode_plan, RefinedRequest};
use crate::tools::ToolCatalog;

const REFINER_PROMPT: &str = include_str!("../../prompts/refiner_system.md");
const SELECTION_PROMPT: &str = include_str!("../../prompts/element_selection.md");

/// Tool every plan must start with when the request carries an image.
pub const IMAGE_TOOL: &str = "analyze_image";

const REFINE_TEMPERATURE: f64 = 0.1;

static IMAGE_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[User attached image: ([^\]]+)\]").expect("Invalid image marker regex")
});

/// Prefix a request with the attached-image marker.
pub fn attach_image(path: &str, request: &str) -> String {
    format!("[User attached image: {path}]\n\nUser request: {request}")
}

/// Path of the attached image, if the input carries the marker.
pub fn attached_image(input: &str) -> Option<&str> {
    IMAGE_MARKER_RE
        .captures(input)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// The refiner's pick among detected elements.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ElementSelection {
    pub element_id: Option<u32>,
    pub analysis: String,
    pub suggested_action: String,
    pub tool_recommendation: String,
    pub parameters: Value,
    pub reasoning: String,
}

impl ElementSelection {
    /// Hint block appended to the screen description for the decision call.
    pub fn hint(&self, elements: &[UIElement]) -> String {
        let mut out = format!(
            "REFINER ANALYSIS:\n{}\nSUGGESTED ACTION: {}\nRECOMMENDED TOOL: {}",
            self.analysis, self.suggested_action, self.tool_recommendation
        );
        if let Some(el) = self
            .element_id
            .and_then(|id| elements.iter().find(|e| e.id == id))
        {
            out.push_str(&format!(
                "\nTARGET ELEMENT: [{}] \"{}\" at ({}, {})",
                el.id, el.description, el.center.0, el.center.1
            ));
        }
        if !self.reasoning.is_empty() {
            out.push_str(&format!("\nREASONING: {}", self.reasoning));
        }
        out
    }
}

/// Turns free-form requests into execution plans, and ranks UI elements for the
/// autonomous loop.
#[derive(Clone)]
pub struct PromptRefiner {
    llm: LlmClient,
    system_prompt: String,
}

impl PromptRefiner {
    pub fn new(llm: LlmClient, catalog: &ToolCatalog) -> Self {
        let system_prompt = REFINER_PROMPT.replace("{catalog}", &catalog.render_for_prompt());
        Self { llm, system_prompt }
    }

    /// Refine one user utterance.
    ///
    /// Returns `Err` only when the model call itself fails; any malformed reply
    /// yields `{instruction: user_input, execution_plan: []}`.
    pub async fn refine(&self, user_input: &str) -> PilotResult<RefinedRequest> {
        let image = attached_image(user_input);
        let mut prompt = user_input.to_string();
        if let Some(path) = image {
            prompt.push_str(&format!(
                "\n\nAn image is attached at {path}. Step 1 of the plan must use {IMAGE_TOOL} on it."
            ));
        }

        let messages = vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(prompt),
        ];
        let raw = self.llm.complete_text(messages, Some(REFINE_TEMPERATURE)).await?;

        let refined = match decode_plan(&raw, user_input) {
            Ok(refined) => refined,
            Err(reason) => {
                tracing::warn!(%reason, "refiner reply rejected, using raw input without a plan");
                tracing::debug!(raw = %raw, "rejected refiner reply");
                return Ok(RefinedRequest::passthrough(user_input));
            }
        };

        if image.is_some() {
            match refined.execution_plan.first() {
                Some(first) if first.tool != IMAGE_TOOL => tracing::warn!(
                    first_tool = %first.tool,
                    "image attached but plan does not start with {IMAGE_TOOL}"
                ),
                _ => {}
            }
        }

        tracing::info!(
            instruction = %refined.instruction,
            steps = refined.execution_plan.len(),
            tools = ?refined.execution_plan.iter().map(|s| s.tool.as_str()).collect::<Vec<_>>(),
            "request refined"
        );
        Ok(refined)
    }

    /// Pick the best element for the next action toward `goal`.
    pub async fn select_element(
        &self,
        goal: &str,
        elements: &[UIElement],
        screen_size: (u32, u32),
        screen_description: &str,
        previous_actions: &str,
    ) -> PilotResult<ElementSelection> {
        let listing = if elements.is_empty() {
            "(no elements detected)".to_string()
        } else {
            elements
                .iter()
                .map(|e| e.prompt_line(screen_size.0, screen_size.1))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let prompt = SELECTION_PROMPT
            .replace("{goal}", goal)
            .replace("{screen}", screen_description)
            .replace("{elements}", &listing)
            .replace("{previous}", previous_actions);

        let raw = self
            .llm
            .complete_text(vec![ChatMessage::user(prompt)], Some(REFINE_TEMPERATURE))
            .await?;
        let selection = decode_selection(&raw)?;
        tracing::debug!(
            element = ?selection.element_id,
            tool = %selection.tool_recommendation,
            "element selected"
        );
        Ok(selection)
    }
}

fn decode_selection(raw: &str) -> PilotResult<ElementSelection> {
    let obj = parse_object(raw)
        .ok_or_else(|| PilotError::PlanParse("element selection is not a JSON object".into()))?;

    let element_id = match obj.get("element_id") {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(Value::String(s)) => s
            .trim()
            .trim_start_matches(|c: char| !c.is_ascii_digit())
            .parse()
            .ok(),
        _ => None,
    };
    let text = |key: &str| non_empty_str(&obj, key).unwrap_or_default().to_string();

    Ok(ElementSelection {
        element_id,
        analysis: text("analysis"),
        suggested_action: text("suggested_action"),
        tool_recommendation: text("tool_recommendation"),
        parameters: obj.get("parameters").cloned().unwrap_or(Value::Null),
        reasoning: text("reasoning"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::LlmResponse;
    use crate::perception::types::ElementKind;
    use crate::testing::{text_reply, ScriptedProvider};
    use crate::tools::catalog::CatalogEntry;

    fn catalog() -> ToolCatalog {
        ToolCatalog::new(vec![
            CatalogEntry { name: "set_volume".into(), description: "Sets master volume (0-100).".into() },
            CatalogEntry { name: IMAGE_TOOL.into(), description: "Describes an image file.".into() },
        ])
    }

    fn refiner(replies: Vec<PilotResult<LlmResponse>>) -> (PromptRefiner, std::sync::Arc<ScriptedProvider>) {
        let provider = ScriptedProvider::new(replies);
        (PromptRefiner::new(provider.client(), &catalog()), provider)
    }

    #[tokio::test]
    async fn system_prompt_lists_catalog() {
        let (refiner, provider) = refiner(vec![text_reply(
            r#"{"instruction": "Set volume to 50", "execution_plan": [{"step": 1, "tool": "set_volume", "instruction": "level 50"}]}"#,
        )]);
        let refined = refiner.refine("volume 50 pls").await.unwrap();
        assert_eq!(refined.execution_plan[0].tool, "set_volume");

        let req = &provider.requests()[0];
        assert!(req.messages[0].text().contains("- set_volume: Sets master volume (0-100)."));
        assert!(req.tools.is_empty());
    }

    #[tokio::test]
    async fn malformed_reply_falls_back_identically_every_time() {
        let garbage = "Sure! First I'll open the settings {";
        let (refiner, _) = refiner(vec![text_reply(garbage), text_reply(garbage)]);

        let first = refiner.refine("make it louder").await.unwrap();
        let second = refiner.refine("make it louder").await.unwrap();
        assert_eq!(first, RefinedRequest::passthrough("make it louder"));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn llm_failure_propagates() {
        let (refiner, _) = refiner(vec![Err(PilotError::LlmProvider("503".into()))]);
        assert!(refiner.refine("anything").await.is_err());
    }

    #[tokio::test]
    async fn image_requests_get_a_reminder() {
        let (refiner, provider) = refiner(vec![text_reply(r#"{"instruction": "x", "execution_plan": []}"#)]);
        let input = attach_image("C:/tmp/cat.png", "what is this?");
        refiner.refine(&input).await.unwrap();

        assert_eq!(attached_image(&input), Some("C:/tmp/cat.png"));
        let user = provider.requests()[0].messages[1].text();
        assert!(user.contains("Step 1 of the plan must use analyze_image"));
    }

    #[tokio::test]
    async fn selection_parses_string_ids_and_builds_hint() {
        let (refiner, provider) = refiner(vec![text_reply(
            r#"{"element_id": "icon 3", "analysis": "Chrome is on the taskbar", "suggested_action": "click Chrome", "tool_recommendation": "click_element", "parameters": {"element_description": "Chrome"}, "reasoning": "icon, bottom-left, labelled Chrome"}"#,
        )]);
        let elements = vec![UIElement::new(3, "Google Chrome", ElementKind::Icon, [100, 1040, 140, 1080])];

        let sel = refiner
            .select_element("open chrome", &elements, (1920, 1080), "Desktop", "No previous actions yet.")
            .await
            .unwrap();
        assert_eq!(sel.element_id, Some(3));
        let hint = sel.hint(&elements);
        assert!(hint.contains("RECOMMENDED TOOL: click_element"));
        assert!(hint.contains("TARGET ELEMENT: [3] \"Google Chrome\" at (120, 1060)"));

        let prompt = provider.requests()[0].messages[0].text();
        assert!(prompt.contains("[3] icon \"Google Chrome\""));
    }

    #[tokio::test]
    async fn unparseable_selection_is_an_error() {
        let (refiner, _) = refiner(vec![text_reply("the chrome icon")]);
        let err = refiner
            .select_element("open chrome", &[], (1920, 1080), "Desktop", "")
            .await
            .unwrap_err();
        assert!(matches!(err, PilotError::PlanParse(_)));
    }
}
