use crate::errors::{PilotError, PilotResult};
use crate::llm::types::{StreamChunk, StreamChunkKind};

/// Parses a raw SSE line (OpenAI-compatible format) into a StreamChunk.
/// Returns None if the line is a keep-alive or non-data line.
pub fn parse_sse_line(line: &str) -> PilotResult<Option<StreamChunk>> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return Ok(None);
    };

    if data == "[DONE]" {
        return Ok(Some(chunk(StreamChunkKind::Done, String::new())));
    }

    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| PilotError::SseParsing(e.to_string()))?;

    if let Some(err) = json.get("error") {
        return Ok(Some(chunk(StreamChunkKind::Error, err.to_string())));
    }

    let Some(first) = json["choices"].as_array().and_then(|c| c.first()) else {
        return Ok(None);
    };
    let delta = &first["delta"];

    // Reasoning models (DeepSeek and friends) stream thoughts separately
    if let Some(reasoning) = delta["reasoning_content"].as_str().filter(|s| !s.is_empty()) {
        return Ok(Some(chunk(StreamChunkKind::Reasoning, reasoning.to_string())));
    }

    if let Some(tool_calls) = delta["tool_calls"].as_array().filter(|a| !a.is_empty()) {
        let encoded =
            serde_json::to_string(tool_calls).map_err(|e| PilotError::SseParsing(e.to_string()))?;
        return Ok(Some(chunk(StreamChunkKind::ToolCall, encoded)));
    }

    if let Some(content) = delta["content"].as_str().filter(|s| !s.is_empty()) {
        return Ok(Some(chunk(StreamChunkKind::Content, content.to_string())));
    }

    if first["finish_reason"].as_str().is_some() {
        return Ok(Some(chunk(StreamChunkKind::Done, String::new())));
    }

    Ok(None)
}

fn chunk(kind: StreamChunkKind, content: String) -> StreamChunk {
    StreamChunk { kind, content }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_alives_and_comments_are_skipped() {
        assert!(parse_sse_line(": ping").unwrap().is_none());
        assert!(parse_sse_line("event: message").unwrap().is_none());
    }

    #[test]
    fn done_marker() {
        let c = parse_sse_line("data: [DONE]").unwrap().unwrap();
        assert!(matches!(c.kind, StreamChunkKind::Done));
    }

    #[test]
    fn content_delta() {
        let c = parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Volume set"}}]}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(c.kind, StreamChunkKind::Content));
        assert_eq!(c.content, "Volume set");
    }

    #[test]
    fn tool_call_delta_is_reencoded() {
        let c = parse_sse_line(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":"get_volume"}}]}}]}"#,
        )
        .unwrap()
        .unwrap();
        assert!(matches!(c.kind, StreamChunkKind::ToolCall));
        assert!(c.content.contains("get_volume"));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(matches!(
            parse_sse_line("data: {not json"),
            Err(PilotError::SseParsing(_))
        ));
    }
}
