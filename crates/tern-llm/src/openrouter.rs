use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tern_core::{BlockKind, Content, ContentBlock, Message, Result, Role, TernError, Tool, ToolCall};
use tracing::debug;

use crate::provider::*;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenRouter chat-completions backend (OpenAI-shaped wire format).
///
/// Cache markers are sent as `cache_control` on content blocks, so the
/// placement chosen by the checkpoint manager reaches the upstream provider.
pub struct OpenRouterProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
}

impl OpenRouterProvider {
    pub fn new(api_key: String, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.into(),
            temperature: 0.0,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, log: &[Message], tools: &[Tool]) -> Result<RoundTrip> {
        let body = build_body(log, tools, &self.model, self.temperature);

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Title", "tern")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, text));
        }

        let data: Value = resp.json().await.map_err(transport_error)?;
        parse_response(&data)
    }
}

/// Which upstream OpenRouter should be pinned to for a model.
fn upstream_for(model: &str) -> Option<&'static str> {
    let lower = model.to_lowercase();
    let name = lower.rsplit('/').next().unwrap_or(&lower);
    if lower.contains("anthropic") || lower.contains("claude") {
        Some("Anthropic")
    } else if lower.starts_with("openai/")
        || name.starts_with("gpt")
        || ["o1", "o3", "o4"].iter().any(|p| name.starts_with(p))
    {
        Some("OpenAI")
    } else if lower.contains("gemini") {
        Some("Google AI Studio")
    } else {
        None
    }
}

fn block_to_wire(block: &ContentBlock) -> Value {
    let mut v = match &block.kind {
        BlockKind::Text { text } => json!({ "type": "text", "text": text }),
        BlockKind::Image { media_type, data } => json!({
            "type": "image_url",
            "image_url": { "url": format!("data:{media_type};base64,{data}") }
        }),
    };
    if let Some(marker) = &block.cache_control {
        v["cache_control"] = json!(marker);
    }
    v
}

/// Serialise the log into OpenAI-style messages.
pub fn to_wire_messages(log: &[Message], model: &str) -> Vec<Value> {
    let replay_reasoning = model.to_lowercase().contains("gemini");

    log.iter()
        .map(|msg| {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let content = match &msg.content {
                Content::Text(s) => json!(s),
                Content::Blocks(blocks) => {
                    Value::Array(blocks.iter().map(block_to_wire).collect())
                }
            };
            let mut out = json!({ "role": role, "content": content });

            if !msg.tool_calls.is_empty() {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.tool_name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                out["tool_calls"] = json!(calls);
            }
            if let Some(id) = &msg.tool_call_id {
                out["tool_call_id"] = json!(id);
            }
            if let Some(name) = &msg.name {
                out["name"] = json!(name);
            }
            // Gemini needs its encrypted reasoning replayed for multi-turn tool use.
            if replay_reasoning && let Some(details) = &msg.provider_metadata {
                out["reasoning_details"] = details.clone();
            }
            out
        })
        .collect()
}

/// Build the `/chat/completions` request body.
pub fn build_body(log: &[Message], tools: &[Tool], model: &str, temperature: f32) -> Value {
    // Web search is an OpenRouter model variant, not a tool.
    let search = wants_search(tools);
    let model_id = if search && !model.ends_with(":online") {
        format!("{model}:online")
    } else {
        model.to_string()
    };
    let tools: Vec<&Tool> = tools.iter().filter(|t| t.name != SEARCH_TRIGGER).collect();

    let mut body = json!({
        "model": model_id,
        "messages": to_wire_messages(log, model),
        "temperature": temperature,
        "usage": { "include": true },
        "include_reasoning": true,
        "reasoning": { "effort": "high" },
        "provider": { "allow_fallbacks": false },
    });

    if let Some(upstream) = upstream_for(model) {
        body["provider"]["order"] = json!([upstream]);
    }

    if !tools.is_empty() {
        let tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }

    body
}

/// Turn a chat-completions response into a round trip.
pub fn parse_response(data: &Value) -> Result<RoundTrip> {
    if let Some(err) = data.get("error") {
        let status = err["code"].as_u64().map(|c| c as u16).unwrap_or(502);
        let body = err["message"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| err.to_string());
        return Err(TernError::Provider { status, body });
    }

    let Some(msg) = data["choices"].as_array().and_then(|c| c.first()).map(|c| &c["message"])
    else {
        return Err(TernError::EmptyResponse("no choices in response".into()));
    };

    let calls: Vec<ToolCall> = msg["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    let name = c["function"]["name"].as_str()?;
                    let id = c["id"]
                        .as_str()
                        .map(String::from)
                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                    let arguments = c["function"]["arguments"]
                        .as_str()
                        .filter(|s| !s.trim().is_empty())
                        .and_then(|s| serde_json::from_str(s).ok())
                        .unwrap_or_else(|| json!({}));
                    Some(ToolCall::new(id, name, arguments))
                })
                .collect()
        })
        .unwrap_or_default();

    let mut reply =
        Message::assistant_with_calls(msg["content"].as_str().unwrap_or_default(), calls);
    reply.reasoning = msg["reasoning"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(String::from);
    if let Some(details) = msg.get("reasoning_details").filter(|d| !d.is_null()) {
        debug!(items = details.as_array().map(Vec::len).unwrap_or(0), "reply carries reasoning_details");
        reply.provider_metadata = Some(details.clone());
    }

    let usage = data.get("usage").filter(|u| u.is_object()).map(|u| {
        debug!(usage = %u, "openrouter usage");
        let n = |v: &Value| v.as_u64().unwrap_or(0);
        UsageSnapshot {
            prompt_tokens: n(&u["prompt_tokens"]),
            output_tokens: n(&u["completion_tokens"]),
            cached_tokens: n(&u["prompt_tokens_details"]["cached_tokens"]),
            cache_write_tokens: n(&u["cache_creation_input_tokens"])
                .max(n(&u["prompt_tokens_details"]["cache_write_tokens"])),
            cost_usd: u["cost"].as_f64().unwrap_or(0.0),
        }
    });

    Ok(RoundTrip { reply, usage })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_pinning() {
        assert_eq!(upstream_for("anthropic/claude-sonnet-4"), Some("Anthropic"));
        assert_eq!(upstream_for("openai/gpt-4o"), Some("OpenAI"));
        assert_eq!(upstream_for("openai/o3-mini"), Some("OpenAI"));
        assert_eq!(upstream_for("google/gemini-2.5-pro"), Some("Google AI Studio"));
        assert_eq!(upstream_for("meta-llama/llama-3-70b"), None);
    }

    #[test]
    fn test_markers_reach_the_wire() {
        let mut system = Message::system("rules");
        system.content.mark_last_block();
        let wire = to_wire_messages(&[system, Message::user("hi")], "anthropic/claude-sonnet-4");
        assert_eq!(wire[0]["content"][0]["cache_control"]["type"], "ephemeral");
        assert_eq!(wire[1]["content"], "hi");
    }

    #[test]
    fn test_tool_round_trip_shape() {
        let call = ToolCall::new("call_9", "read_file", json!({"path": "a.txt"}));
        let mut assistant = Message::assistant_with_calls("", vec![call.clone()]);
        assistant.provider_metadata = Some(json!([{"type": "reasoning.encrypted"}]));
        let log = vec![assistant, Message::tool_result(&call, "contents")];

        let wire = to_wire_messages(&log, "google/gemini-2.5-pro");
        assert_eq!(wire[0]["tool_calls"][0]["function"]["arguments"], "{\"path\":\"a.txt\"}");
        assert_eq!(wire[0]["reasoning_details"][0]["type"], "reasoning.encrypted");
        assert_eq!(wire[1]["tool_call_id"], "call_9");
        assert_eq!(wire[1]["name"], "read_file");

        let wire = to_wire_messages(&log, "anthropic/claude-sonnet-4");
        assert!(wire[0].get("reasoning_details").is_none());
    }

    #[test]
    fn test_body_options() {
        let tool = Tool {
            name: "bash".into(),
            description: "run".into(),
            parameters: json!({"type": "object"}),
        };
        let body = build_body(&[Message::user("x")], &[tool], "anthropic/claude-sonnet-4", 0.0);
        assert_eq!(body["usage"]["include"], true);
        assert_eq!(body["provider"]["order"], json!(["Anthropic"]));
        assert_eq!(body["provider"]["allow_fallbacks"], false);
        assert_eq!(body["tools"][0]["function"]["name"], "bash");
    }

    #[test]
    fn test_search_trigger_selects_online_variant() {
        let body = build_body(
            &[Message::user("latest tokio release")],
            &[search_trigger_tool()],
            "google/gemini-2.5-flash",
            0.0,
        );
        assert_eq!(body["model"], "google/gemini-2.5-flash:online");
        assert!(body.get("tools").is_none());

        let body = build_body(&[], &[search_trigger_tool()], "x/y:online", 0.0);
        assert_eq!(body["model"], "x/y:online");
    }

    #[test]
    fn test_parse_reply_with_usage() {
        let data = json!({
            "choices": [{ "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{ "id": "t1", "type": "function",
                    "function": { "name": "bash", "arguments": "{\"command\":\"ls\"}" } }],
                "reasoning": "thinking"
            }}],
            "usage": {
                "prompt_tokens": 1200, "completion_tokens": 30,
                "prompt_tokens_details": { "cached_tokens": 1024 },
                "cost": 0.0021
            }
        });
        let rt = parse_response(&data).unwrap();
        assert_eq!(rt.reply.text_content(), "");
        assert_eq!(rt.reply.tool_calls[0].id, "t1");
        assert_eq!(rt.reply.tool_calls[0].arguments["command"], "ls");
        assert_eq!(rt.reply.reasoning.as_deref(), Some("thinking"));
        let usage = rt.usage.unwrap();
        assert_eq!(usage.cached_tokens, 1024);
        assert!((usage.cost_usd - 0.0021).abs() < 1e-12);
    }

    #[test]
    fn test_parse_error_object_and_missing_choices() {
        let err = parse_response(&json!({"error": {"code": 503, "message": "upstream down"}}))
            .unwrap_err();
        assert!(matches!(err, TernError::Provider { status: 503, .. }));

        let err = parse_response(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, TernError::EmptyResponse(_)));
    }
}
