//! Scripted doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::errors::{PilotError, PilotResult, ToolError};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CallConfig, CompletionRequest, FunctionCall, LlmResponse, ToolCall};
use crate::llm::LlmClient;
use crate::perception::traits::{ElementDetector, ScreenObserver};
use crate::perception::types::{DetectionResult, Screenshot, UIElement};
use crate::tools::spec::{ToolArgs, ToolSpec};
use crate::tools::traits::Tool;

/// Replays queued replies in order and records every request.
pub struct ScriptedProvider {
    name: String,
    replies: Mutex<VecDeque<PilotResult<LlmResponse>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<PilotResult<LlmResponse>>) -> Arc<Self> {
        Self::named("scripted", replies)
    }

    pub fn named(name: &str, replies: Vec<PilotResult<LlmResponse>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn client(self: &Arc<Self>) -> LlmClient {
        LlmClient::new(
            self.clone(),
            CallConfig {
                model: "test-model".into(),
                stream: false,
                temperature: 0.1,
            },
        )
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: CompletionRequest) -> PilotResult<LlmResponse> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PilotError::LlmProvider("script exhausted".into())))
    }
}

pub fn text_reply(text: &str) -> PilotResult<LlmResponse> {
    Ok(LlmResponse {
        content: text.to_string(),
        ..Default::default()
    })
}

pub fn tool_call_reply(name: &str, arguments: &str) -> PilotResult<LlmResponse> {
    Ok(LlmResponse {
        tool_calls: vec![ToolCall {
            id: format!("call_{name}"),
            call_type: "function".into(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }],
        ..Default::default()
    })
}

/// Records its arguments and returns a fixed result.
pub struct SpyTool {
    spec: ToolSpec,
    result: Result<String, ToolError>,
    calls: Mutex<Vec<ToolArgs>>,
}

impl SpyTool {
    fn build(spec: ToolSpec, result: Result<String, ToolError>) -> Arc<Self> {
        Arc::new(Self {
            spec,
            result,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn ok(name: &str, output: &str) -> Arc<Self> {
        Self::build(ToolSpec::new(name, format!("{name} test tool")), Ok(output.to_string()))
    }

    pub fn failing(name: &str, message: &str) -> Arc<Self> {
        Self::build(
            ToolSpec::new(name, format!("{name} test tool")),
            Err(ToolError::Reported(message.to_string())),
        )
    }

    pub fn sensitive_ok(name: &str, output: &str) -> Arc<Self> {
        Self::build(
            ToolSpec::new(name, format!("{name} test tool")).sensitive(true),
            Ok(output.to_string()),
        )
    }

    pub fn calls(&self) -> Vec<ToolArgs> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for SpyTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, args: ToolArgs) -> Result<String, ToolError> {
        self.calls.lock().unwrap().push(args);
        self.result.clone()
    }
}

/// Serves a fixed 1920x1080 frame and cycles through canned descriptions.
pub struct FakeObserver {
    descriptions: Vec<String>,
    served: Mutex<usize>,
    fail_capture: bool,
}

impl FakeObserver {
    pub fn new(descriptions: Vec<&str>) -> Self {
        Self {
            descriptions: descriptions.into_iter().map(str::to_string).collect(),
            served: Mutex::new(0),
            fail_capture: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_capture: true,
            ..Self::new(vec![])
        }
    }
}

#[async_trait]
impl ScreenObserver for FakeObserver {
    async fn capture(&self) -> PilotResult<Screenshot> {
        if self.fail_capture {
            return Err(PilotError::Perception("no display".into()));
        }
        Ok(Screenshot {
            image_bytes: Vec::new(),
            width: 1920,
            height: 1080,
            path: None,
        })
    }

    async fn describe(&self, _shot: &Screenshot) -> PilotResult<String> {
        let mut served = self.served.lock().unwrap();
        let idx = (*served).min(self.descriptions.len().saturating_sub(1));
        *served += 1;
        Ok(self.descriptions.get(idx).cloned().unwrap_or_default())
    }
}

pub struct FakeDetector {
    elements: Option<Vec<UIElement>>,
}

impl FakeDetector {
    pub fn new(elements: Vec<UIElement>) -> Self {
        Self { elements: Some(elements) }
    }

    pub fn failing() -> Self {
        Self { elements: None }
    }
}

#[async_trait]
impl ElementDetector for FakeDetector {
    async fn detect(&self, _shot: &Screenshot) -> PilotResult<DetectionResult> {
        match &self.elements {
            Some(elements) => Ok(DetectionResult {
                elements: elements.clone(),
                raw: String::new(),
            }),
            None => Err(PilotError::Perception("detector offline".into())),
        }
    }
}
