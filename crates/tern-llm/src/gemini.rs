use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tern_core::{BlockKind, Content, Message, Result, Role, TernError, Tool, ToolCall};
use tracing::{debug, warn};

use crate::provider::*;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Prompts above this many tokens are billed at the high-volume tier.
const HIGH_VOLUME_THRESHOLD: u64 = 200_000;

/// Native Gemini `generateContent` backend.
///
/// Gemini caches prefixes implicitly, so cache markers in the log are not
/// transmitted.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            client,
            api_key,
            model: model.into().trim_start_matches("google/").to_string(),
            base_url: DEFAULT_BASE_URL.into(),
            temperature: 0.0,
        })
    }

    /// Point at a different endpoint (proxies, test servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    async fn post(&self, body: &Value) -> Result<(reqwest::StatusCode, Option<u64>, String)> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status();
        let retry_after = retry_after_secs(resp.headers());
        let text = resp.text().await.map_err(transport_error)?;
        Ok((status, retry_after, text))
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, log: &[Message], tools: &[Tool]) -> Result<RoundTrip> {
        let mut body = build_body(log, tools, &self.model, self.temperature);

        let (mut status, mut retry_after, mut text) = self.post(&body).await?;

        if status.as_u16() == 400 && text.contains("thinkingConfig") {
            warn!(model = %self.model, "model rejected thinkingConfig, resending without it");
            if let Some(cfg) = body["generationConfig"].as_object_mut() {
                cfg.remove("thinkingConfig");
            }
            (status, retry_after, text) = self.post(&body).await?;
        }

        if !status.is_success() {
            return Err(status_error(status, retry_after, text));
        }

        let data: Value = serde_json::from_str(&text)?;
        parse_response(&data, &self.model)
    }
}

// ── Request building ───────────────────────────────────────────

/// Build the `generateContent` request body.
pub fn build_body(log: &[Message], tools: &[Tool], model: &str, temperature: f32) -> Value {
    let (contents, system_instruction) = to_contents(log);

    let mut body = json!({
        "contents": contents,
        "generationConfig": { "temperature": temperature },
    });

    if wants_search(tools) {
        body["tools"] = json!([{ "googleSearch": {} }]);
    } else if !tools.is_empty() {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": to_gemini_schema(&t.parameters),
                })
            })
            .collect();
        body["tools"] = json!([{ "function_declarations": declarations }]);
    }

    if model.to_lowercase().contains("pro") {
        body["generationConfig"]["thinkingConfig"] = json!({ "includeThoughts": true });
        body["generationConfig"]["maxOutputTokens"] = json!(64_000);
    }

    if let Some(system) = system_instruction {
        body["systemInstruction"] = system;
    }

    body
}

/// Gemini wants upper-case JSON schema type names.
pub fn to_gemini_schema(schema: &Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return schema.clone();
    };
    let mut out = obj.clone();
    if let Some(t) = obj.get("type").and_then(Value::as_str) {
        out.insert("type".into(), json!(t.to_uppercase()));
    }
    if let Some(props) = obj.get("properties").and_then(Value::as_object) {
        let converted: serde_json::Map<String, Value> = props
            .iter()
            .map(|(k, v)| (k.clone(), to_gemini_schema(v)))
            .collect();
        out.insert("properties".into(), Value::Object(converted));
    }
    if let Some(items) = obj.get("items") {
        out.insert("items".into(), to_gemini_schema(items));
    }
    Value::Object(out)
}

fn to_parts(content: &Content) -> Vec<Value> {
    match content {
        Content::Text(s) if s.is_empty() => vec![],
        Content::Text(s) => vec![json!({ "text": s })],
        Content::Blocks(blocks) => blocks
            .iter()
            .map(|b| match &b.kind {
                BlockKind::Text { text } => json!({ "text": text }),
                BlockKind::Image { media_type, data } => json!({
                    "inline_data": { "mime_type": media_type, "data": data }
                }),
            })
            .collect(),
    }
}

/// Split the log into Gemini `contents` and the `systemInstruction`.
pub fn to_contents(log: &[Message]) -> (Vec<Value>, Option<Value>) {
    let mut contents = Vec::new();
    let mut system = None;

    for msg in log {
        match msg.role {
            Role::System => {
                system = Some(json!({ "parts": to_parts(&msg.content) }));
            }
            Role::User => {
                contents.push(json!({ "role": "user", "parts": to_parts(&msg.content) }));
            }
            Role::Assistant => {
                let mut parts = to_parts(&msg.content);
                for tc in &msg.tool_calls {
                    let mut part = json!({
                        "functionCall": { "name": tc.tool_name, "args": tc.arguments }
                    });
                    if let Some(sig) = &tc.thought_signature {
                        part["thoughtSignature"] = json!(sig);
                    }
                    parts.push(part);
                }
                if !parts.is_empty() {
                    contents.push(json!({ "role": "model", "parts": parts }));
                }
            }
            Role::Tool => {
                contents.push(json!({
                    "role": "function",
                    "parts": [{
                        "functionResponse": {
                            "name": msg.name.clone().unwrap_or_default(),
                            "response": { "result": msg.content.text() },
                        }
                    }],
                }));
            }
        }
    }

    (contents, system)
}

// ── Response parsing ───────────────────────────────────────────

/// Turn a `generateContent` response into a round trip.
pub fn parse_response(data: &Value, model: &str) -> Result<RoundTrip> {
    let usage = data.get("usageMetadata").filter(|u| u.is_object()).map(|u| {
        debug!(usage = %u, "gemini usage");
        let field = |k: &str| u[k].as_u64().unwrap_or(0);
        UsageSnapshot {
            prompt_tokens: field("promptTokenCount"),
            output_tokens: field("candidatesTokenCount") + field("thoughtsTokenCount"),
            cached_tokens: field("cachedContentTokenCount"),
            cache_write_tokens: 0,
            cost_usd: calculate_cost(model, u),
        }
    });

    let Some(candidate) = data["candidates"].as_array().and_then(|c| c.first()) else {
        let feedback = data.get("promptFeedback").unwrap_or(data);
        return Err(TernError::EmptyResponse(format!("no candidates: {feedback}")));
    };

    let mut text = String::new();
    let mut reasoning = String::new();
    let mut calls = Vec::new();

    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            // `thought` is either a flag on a text part or the thought itself.
            if let Some(thought) = part["thought"].as_str().filter(|t| !t.is_empty()) {
                reasoning.push_str(thought);
                reasoning.push('\n');
            } else if part["thought"].as_bool().unwrap_or(false) {
                if let Some(t) = part["text"].as_str() {
                    reasoning.push_str(t);
                    reasoning.push('\n');
                }
            } else if let Some(t) = part["text"].as_str() {
                text.push_str(t);
            }
            if let Some(fc) = part.get("functionCall") {
                let mut call = ToolCall::new(
                    format!("call_{}", uuid::Uuid::new_v4().simple()),
                    fc["name"].as_str().unwrap_or_default(),
                    fc.get("args").cloned().unwrap_or_else(|| json!({})),
                );
                call.thought_signature = part["thoughtSignature"].as_str().map(String::from);
                calls.push(call);
            }
        }
    }

    let mut reply = Message::assistant_with_calls(text, calls);
    let reasoning = reasoning.trim();
    if !reasoning.is_empty() {
        reply.reasoning = Some(reasoning.to_string());
    }

    Ok(RoundTrip { reply, usage })
}

// ── Pricing ────────────────────────────────────────────────────

/// USD per 1M tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Pricing {
    input: f64,
    output: f64,
    cached: f64,
    /// (input, output, cached) above the high-volume threshold.
    high: Option<(f64, f64, f64)>,
}

fn pricing(model_id: &str) -> Option<Pricing> {
    let p = |input, output, cached, high| Pricing {
        input,
        output,
        cached,
        high,
    };
    Some(match model_id {
        "gemini-2.5-pro" => p(1.25, 10.00, 0.125, Some((2.50, 15.00, 0.25))),
        "gemini-3-pro" | "gemini-3-pro-preview" => p(2.00, 12.00, 0.20, Some((4.00, 18.00, 0.40))),
        "gemini-2.5-flash" => p(0.30, 2.50, 0.03, None),
        "gemini-2.5-flash-lite" => p(0.10, 0.40, 0.01, None),
        "gemini-2.0-flash" => p(0.10, 0.40, 0.025, None),
        "gemini-2.0-flash-lite" => p(0.075, 0.30, 0.0, None),
        _ => return None,
    })
}

/// Estimate the cost of one request from Gemini `usageMetadata`.
/// Unknown models cost 0.
pub fn calculate_cost(model: &str, usage: &Value) -> f64 {
    let model_id = model.to_lowercase();
    let Some(price) = pricing(model_id.trim_start_matches("google/")) else {
        return 0.0;
    };

    let field = |k: &str| usage[k].as_u64().unwrap_or(0);
    let prompt = field("promptTokenCount");
    let output = field("candidatesTokenCount") + field("thoughtsTokenCount");
    let cached = field("cachedContentTokenCount");

    let (input_rate, output_rate, cached_rate) = match price.high {
        Some(high) if prompt > HIGH_VOLUME_THRESHOLD => high,
        _ => (price.input, price.output, price.cached),
    };

    let per_m = |tokens: u64, rate: f64| tokens as f64 / 1_000_000.0 * rate;
    per_m(prompt.saturating_sub(cached), input_rate)
        + per_m(output, output_rate)
        + per_m(cached, cached_rate)
}
