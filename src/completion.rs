//! Completion Client
//!
//! Wraps an OpenAI-compatible /chat/completions endpoint. The agent treats
//! this as a synchronous request/response boundary; retry policy belongs to
//! the service behind it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::AgentConfig;
use crate::types::{
    AssistantTurn, ChatMessage, ChatRole, CompletionClient, TokenUsage, ToolCall,
    ToolCallFunction, ToolDefinition,
};

/// Completion client for OpenAI-compatible chat completions.
pub struct CompletionClientImpl {
    api_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    http: Client,
}

impl CompletionClientImpl {
    pub fn new(config: &AgentConfig) -> Self {
        CompletionClientImpl {
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            http: Client::new(),
        }
    }
}

#[async_trait]
impl CompletionClient for CompletionClientImpl {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<AssistantTurn> {
        let body = build_request_body(
            &self.model,
            messages,
            self.temperature,
            self.max_tokens,
            tools,
        );

        let url = format!("{}/chat/completions", self.api_url);
        let resp = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("Completion request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Completion error: {}: {}", status.as_u16(), text);
        }

        let data: Value = resp
            .json()
            .await
            .context("Failed to parse completion response")?;

        parse_completion(&data)
    }
}

/// Build the wire request. The tool list is only present when tools are
/// registered; an empty list is never sent.
fn build_request_body(
    model: &str,
    messages: &[ChatMessage],
    temperature: f64,
    max_tokens: u32,
    tools: Option<&[ToolDefinition]>,
) -> Value {
    let formatted: Vec<Value> = messages.iter().map(format_message).collect();

    let mut body = serde_json::json!({
        "model": model,
        "messages": formatted,
        "temperature": temperature,
        "stream": false,
    });

    // Newer model families (o-series, gpt-5.x, gpt-4.1) take max_completion_tokens.
    let uses_completion_tokens = regex::Regex::new(r"^(o[1-9]|gpt-5|gpt-4\.1)")
        .map(|re| re.is_match(model))
        .unwrap_or(false);
    if uses_completion_tokens {
        body["max_completion_tokens"] = serde_json::json!(max_tokens);
    } else {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }

    if let Some(defs) = tools {
        if !defs.is_empty() {
            body["tools"] = serde_json::json!(defs);
            body["tool_choice"] = serde_json::json!("auto");
        }
    }

    body
}

/// Format a ChatMessage into the JSON structure the API expects.
fn format_message(msg: &ChatMessage) -> Value {
    let mut formatted = serde_json::json!({
        "role": msg.role,
        "content": msg.content,
    });

    if let Some(ref name) = msg.name {
        formatted["name"] = serde_json::json!(name);
    }

    if let Some(ref tool_calls) = msg.tool_calls {
        let calls: Vec<Value> = tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.id,
                    "type": tc.call_type,
                    "function": {
                        "name": tc.function.name,
                        "arguments": tc.function.arguments,
                    }
                })
            })
            .collect();
        formatted["tool_calls"] = serde_json::json!(calls);
    }

    if let Some(ref tool_call_id) = msg.tool_call_id {
        formatted["tool_call_id"] = serde_json::json!(tool_call_id);
    }

    formatted
}

/// Parse a chat-completions response into one assistant turn.
fn parse_completion(data: &Value) -> Result<AssistantTurn> {
    let choice = data["choices"]
        .get(0)
        .ok_or_else(|| anyhow::anyhow!("No completion choice returned"))?;

    let message = &choice["message"];

    let tool_calls: Option<Vec<ToolCall>> = message["tool_calls"].as_array().map(|calls| {
        calls
            .iter()
            .map(|tc| ToolCall {
                id: tc["id"].as_str().unwrap_or("").to_string(),
                call_type: "function".to_string(),
                function: ToolCallFunction {
                    name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                    arguments: tc["function"]["arguments"]
                        .as_str()
                        .unwrap_or("{}")
                        .to_string(),
                },
            })
            .collect()
    });

    let usage = TokenUsage {
        prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        total_tokens: data["usage"]["total_tokens"].as_u64().unwrap_or(0),
    };

    Ok(AssistantTurn {
        message: ChatMessage {
            role: ChatRole::Assistant,
            content: message["content"].as_str().map(|s| s.to_string()),
            name: message["name"].as_str().map(|s| s.to_string()),
            tool_calls,
            tool_call_id: None,
        },
        usage,
        finish_reason: choice["finish_reason"].as_str().unwrap_or("stop").to_string(),
    })
}
