use async_trait::async_trait;
use futures_util::StreamExt;

use crate::errors::{SteadyhandError, SteadyhandResult};
use crate::llm::provider::LlmProvider;
use crate::llm::sse_parser::{self, LineBuffer};
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse, StreamChunkKind};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> SteadyhandResult<LlmResponse> {
        let body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "stream": cfg.stream,
            "temperature": cfg.temperature,
        });

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            "sending LLM request"
        );
        tracing::trace!(
            body = %serde_json::to_string(&sanitized_for_log(&body)).unwrap_or_default(),
            "request body (sanitized, base64 omitted)"
        );

        let mut request = self.client.post(&self.api_base).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(SteadyhandError::LlmProvider(format!("{status}: {err_body}")));
        }

        if cfg.stream {
            self.handle_stream(response).await
        } else {
            self.handle_json(response).await
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Accumulate an SSE stream into one response.
    async fn handle_stream(&self, response: reqwest::Response) -> SteadyhandResult<LlmResponse> {
        let mut byte_stream = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut out = LlmResponse::default();

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result?;
            for line in lines.push(&bytes) {
                if accumulate(&line, &mut out) {
                    break 'stream;
                }
            }
        }
        // Streams that end without a trailing newline or [DONE].
        if let Some(rest) = lines.finish() {
            accumulate(&rest, &mut out);
        }

        tracing::info!(
            provider = %self.id,
            content_len = out.content.len(),
            reasoning_len = out.reasoning.len(),
            "LLM stream complete"
        );
        Ok(out)
    }

    async fn handle_json(&self, response: reqwest::Response) -> SteadyhandResult<LlmResponse> {
        let json: serde_json::Value = response.json().await?;
        let message = &json["choices"][0]["message"];

        let out = LlmResponse {
            content: message["content"].as_str().unwrap_or("").to_string(),
            reasoning: message["reasoning_content"].as_str().unwrap_or("").to_string(),
        };
        tracing::info!(
            provider = %self.id,
            content_len = out.content.len(),
            "LLM JSON response received"
        );
        Ok(out)
    }
}

/// Fold one SSE line into `out`. Returns true once the stream signalled completion.
fn accumulate(line: &str, out: &mut LlmResponse) -> bool {
    match sse_parser::parse_sse_line(line) {
        Ok(Some(chunk)) => match chunk.kind {
            StreamChunkKind::Reasoning => {
                out.reasoning.push_str(&chunk.content);
                false
            }
            StreamChunkKind::Content => {
                out.content.push_str(&chunk.content);
                false
            }
            StreamChunkKind::Done => true,
        },
        Ok(None) => false,
        Err(e) => {
            tracing::debug!("SSE parse skipped: {e}");
            false
        }
    }
}

/// Copy of a request body with image payloads replaced, for logging only.
fn sanitized_for_log(body: &serde_json::Value) -> serde_json::Value {
    let mut log_body = body.clone();
    let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) else {
        return log_body;
    };
    for msg in msgs {
        let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
            continue;
        };
        for part in parts {
            if part.get("type").and_then(|t| t.as_str()) != Some("image_url") {
                continue;
            }
            if let Some(url) = part.get_mut("image_url").and_then(|i| i.get_mut("url")) {
                *url = serde_json::Value::String("<omitted_base64_image>".to_string());
            }
        }
    }
    log_body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_copy_drops_image_payloads() {
        let msgs = vec![
            ChatMessage::system("be precise"),
            ChatMessage::user_with_image("where?", "data:image/png;base64,AAAA".into()),
        ];
        let body = serde_json::json!({ "model": "m", "messages": msgs });
        let logged = sanitized_for_log(&body);
        assert_eq!(logged["messages"][1]["content"][1]["image_url"]["url"], "<omitted_base64_image>");
        assert_eq!(logged["messages"][1]["content"][0]["text"], "where?");
        // The real body is untouched.
        assert_eq!(body["messages"][1]["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn accumulates_until_done() {
        let mut out = LlmResponse::default();
        assert!(!accumulate(r#"data: {"choices":[{"delta":{"content":"move to "}}]}"#, &mut out));
        assert!(!accumulate(r#"data: {"choices":[{"delta":{"content":"(1, 2)"}}]}"#, &mut out));
        assert!(!accumulate("data: {broken", &mut out));
        assert!(accumulate("data: [DONE]", &mut out));
        assert_eq!(out.content, "move to (1, 2)");
    }
}
