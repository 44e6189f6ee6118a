use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::agent_engine::event_bus::{AgentEvent, EventBus};
use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::LlmProvider;
use crate::llm::sse_parser;
use crate::llm::types::{
    CompletionRequest, FunctionCall, LlmResponse, StreamChunk, StreamChunkKind, ToolCall,
};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
    events: Option<EventBus>,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "custom HTTP client failed to build, using defaults");
                reqwest::Client::new()
            });
        Self {
            id,
            api_base,
            api_key,
            client,
            events: None,
        }
    }

    /// Forward streamed chunks onto the event bus.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, chunk: StreamChunk) {
        if let Some(bus) = &self.events {
            bus.emit(AgentEvent::LlmChunk { chunk });
        }
    }

    pub(crate) fn build_body(request: &CompletionRequest) -> PilotResult<serde_json::Value> {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": &request.messages,
            "stream": request.stream,
            "temperature": request.temperature,
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::to_value(&request.tools)?;
            let choice = request
                .tool_choice
                .as_ref()
                .map(|c| c.to_value())
                .unwrap_or_else(|| serde_json::json!("auto"));
            body["tool_choice"] = choice;
        }
        Ok(body)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(&self, request: CompletionRequest) -> PilotResult<LlmResponse> {
        let body = Self::build_body(&request)?;

        tracing::debug!(
            provider = %self.id,
            model = %request.model,
            stream = request.stream,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending LLM request"
        );
        tracing::trace!(body = %sanitized_for_log(&body), "request body (base64 omitted)");

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PilotError::LlmProvider(format!("LLM API call failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::LlmProvider(format!("{}: {}", status, err_body)));
        }

        if request.stream {
            self.handle_stream(response).await
        } else {
            self.handle_json(response).await
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Handle SSE streaming response.
    /// Forwards chunks to the event bus and accumulates the full response to return.
    async fn handle_stream(&self, response: reqwest::Response) -> PilotResult<LlmResponse> {
        let mut byte_stream = response.bytes_stream();
        let mut line_buf = String::new();

        let mut resp_content = String::new();
        let mut resp_reasoning = String::new();
        // Tool call accumulator: delta index → (id, type, name, accumulated_arguments)
        let mut tc_builders: BTreeMap<usize, (String, String, String, String)> = BTreeMap::new();
        let mut done_emitted = false;

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result?;
            let text = String::from_utf8_lossy(&bytes);

            for ch in text.chars() {
                if ch != '\n' {
                    line_buf.push(ch);
                    continue;
                }
                let line = line_buf.trim().to_string();
                line_buf.clear();
                if line.is_empty() {
                    continue;
                }

                match sse_parser::parse_sse_line(&line) {
                    Ok(Some(chunk)) => {
                        let is_done = matches!(chunk.kind, StreamChunkKind::Done);
                        match &chunk.kind {
                            StreamChunkKind::Reasoning => resp_reasoning.push_str(&chunk.content),
                            StreamChunkKind::Content => resp_content.push_str(&chunk.content),
                            StreamChunkKind::ToolCall => merge_tool_call_deltas(&chunk.content, &mut tc_builders),
                            _ => {}
                        }
                        self.emit(chunk);
                        if is_done {
                            done_emitted = true;
                            break 'stream;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!("SSE parse skipped: {e}"),
                }
            }
        }

        // Fallback Done in case stream ended without [DONE] marker
        if !done_emitted {
            self.emit(StreamChunk {
                kind: StreamChunkKind::Done,
                content: String::new(),
            });
        }

        let tool_calls = build_tool_calls(tc_builders);

        tracing::info!(
            content_len = resp_content.len(),
            reasoning_len = resp_reasoning.len(),
            tool_calls = tool_calls.len(),
            tools = ?tool_calls.iter().map(|tc| tc.function.name.as_str()).collect::<Vec<_>>(),
            "LLM stream complete"
        );

        Ok(LlmResponse {
            content: resp_content,
            reasoning: resp_reasoning,
            tool_calls,
        })
    }

    /// Handle a non-streaming JSON response.
    async fn handle_json(&self, response: reqwest::Response) -> PilotResult<LlmResponse> {
        let json: serde_json::Value = response.json().await?;
        let parsed = parse_completion_json(&json)?;

        tracing::info!(
            content_len = parsed.content.len(),
            tool_calls = parsed.tool_calls.len(),
            "LLM JSON response received"
        );

        if !parsed.content.is_empty() {
            self.emit(StreamChunk {
                kind: StreamChunkKind::Content,
                content: parsed.content.clone(),
            });
        }
        self.emit(StreamChunk {
            kind: StreamChunkKind::Done,
            content: String::new(),
        });

        Ok(parsed)
    }
}

/// Extract text and tool calls from a chat-completions JSON body.
pub(crate) fn parse_completion_json(json: &serde_json::Value) -> PilotResult<LlmResponse> {
    if let Some(err) = json.get("error") {
        return Err(PilotError::LlmProvider(err.to_string()));
    }
    let message = &json["choices"][0]["message"];
    if message.is_null() {
        return Err(PilotError::LlmProvider("response carried no choices".into()));
    }

    let content = message["content"].as_str().unwrap_or("").to_string();
    let reasoning = message["reasoning_content"].as_str().unwrap_or("").to_string();

    let tool_calls: Vec<ToolCall> = message["tool_calls"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|tc| ToolCall {
                    id: tc["id"]
                        .as_str()
                        .filter(|id| !id.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(synthetic_call_id),
                    call_type: tc["type"].as_str().unwrap_or("function").to_string(),
                    function: FunctionCall {
                        name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: tc["function"]["arguments"].as_str().unwrap_or("{}").to_string(),
                    },
                })
                .filter(|tc| !tc.function.name.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        content,
        reasoning,
        tool_calls,
    })
}

fn synthetic_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Clone the body and blank out base64 image payloads so logs stay readable.
fn sanitized_for_log(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    if let Some(url) = part.get_mut("image_url").and_then(|i| i.get_mut("url")) {
                        *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                    }
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

/// Merge streaming tool-call delta fragments into the accumulator map (keyed by delta index).
fn merge_tool_call_deltas(
    chunk_content: &str,
    builders: &mut BTreeMap<usize, (String, String, String, String)>,
) {
    let Ok(deltas) = serde_json::from_str::<Vec<serde_json::Value>>(chunk_content) else {
        return;
    };
    for delta in deltas {
        let idx = delta["index"].as_u64().unwrap_or(0) as usize;
        let entry = builders.entry(idx).or_default();

        if let Some(id) = delta["id"].as_str() {
            if !id.is_empty() {
                entry.0 = id.to_string();
            }
        }
        if let Some(t) = delta["type"].as_str() {
            if !t.is_empty() {
                entry.1 = t.to_string();
            }
        }
        if let Some(name) = delta["function"]["name"].as_str() {
            if !name.is_empty() {
                entry.2.push_str(name);
            }
        }
        if let Some(args) = delta["function"]["arguments"].as_str() {
            entry.3.push_str(args);
        }
    }
}

/// Convert accumulated tool-call builders into typed `ToolCall` structs.
fn build_tool_calls(builders: BTreeMap<usize, (String, String, String, String)>) -> Vec<ToolCall> {
    builders
        .into_values()
        .filter(|(_, _, name, _)| !name.is_empty())
        .map(|(id, call_type, name, arguments)| ToolCall {
            id: if id.is_empty() { synthetic_call_id() } else { id },
            call_type: if call_type.is_empty() {
                "function".to_string()
            } else {
                call_type
            },
            function: FunctionCall { name, arguments },
        })
        .collect()
}
