use serde::{Deserialize, Serialize};

use crate::tool::ToolCall;

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
    /// Tool calls requested by the assistant, in emission order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool messages: the id of the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For tool messages: the tool that produced the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Model reasoning text, kept for display only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Provider-opaque state that must be replayed verbatim on later requests
    /// (OpenRouter `reasoning_details`, for instance).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<serde_json::Value>,
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Message content: a plain string or an ordered list of typed blocks.
///
/// A string has to be normalised into a single text block before it can
/// carry a [`CacheMarker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A typed content block, optionally annotated with a cache marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(flatten)]
    pub kind: BlockKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheMarker>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockKind {
    Text {
        text: String,
    },
    Image {
        media_type: String,
        /// Base64-encoded image bytes.
        data: String,
    },
}

/// "The provider may cache the prefix ending at this block."
///
/// Serialises as `{"type":"ephemeral"}`, the shape providers expect under
/// `cache_control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheMarker {
    Ephemeral,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Text { text: text.into() },
            cache_control: None,
        }
    }

    pub fn image(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Image {
                media_type: media_type.into(),
                data: data.into(),
            },
            cache_control: None,
        }
    }
}

/// Media type for an image path, judged by extension.
pub fn image_media_type(path: &std::path::Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

impl Content {
    /// True when there is nothing a marker could be attached to.
    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(s) => s.is_empty(),
            Content::Blocks(blocks) => blocks.is_empty(),
        }
    }

    /// All text joined with newlines; non-text blocks are skipped.
    pub fn text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match &b.kind {
                    BlockKind::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn marker_count(&self) -> usize {
        match self {
            Content::Text(_) => 0,
            Content::Blocks(blocks) => blocks.iter().filter(|b| b.cache_control.is_some()).count(),
        }
    }

    pub fn has_marker(&self) -> bool {
        self.marker_count() > 0
    }

    /// Strip every marker. String content is left as it is.
    pub fn clear_markers(&mut self) {
        if let Content::Blocks(blocks) = self {
            for block in blocks.iter_mut() {
                block.cache_control = None;
            }
        }
    }

    /// Put a marker on the last block, normalising string content first.
    ///
    /// Returns `false` and changes nothing when the content is empty.
    pub fn mark_last_block(&mut self) -> bool {
        if self.is_empty() {
            return false;
        }
        if let Content::Text(s) = self {
            let text = std::mem::take(s);
            *self = Content::Blocks(vec![ContentBlock::text(text)]);
        }
        match self {
            Content::Blocks(blocks) => match blocks.last_mut() {
                Some(last) => {
                    last.cache_control = Some(CacheMarker::Ephemeral);
                    true
                }
                None => false,
            },
            Content::Text(_) => false,
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Content::Text(String::new())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

impl From<Vec<ContentBlock>> for Content {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        Content::Blocks(blocks)
    }
}

impl Message {
    fn bare(role: Role, content: Content) -> Self {
        Self {
            role,
            content,
            tool_calls: vec![],
            tool_call_id: None,
            name: None,
            reasoning: None,
            provider_metadata: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::bare(Role::System, Content::Text(text.into()))
    }

    pub fn user(content: impl Into<Content>) -> Self {
        Self::bare(Role::User, content.into())
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::bare(Role::Assistant, Content::Text(text.into()))
    }

    /// An assistant reply that requests tool calls.
    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::assistant(text);
        msg.tool_calls = calls;
        msg
    }

    /// The tool message answering `call`.
    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        let mut msg = Self::bare(Role::Tool, Content::Text(content.into()));
        msg.tool_call_id = Some(call.id.clone());
        msg.name = Some(call.tool_name.clone());
        msg
    }

    /// Extract all text content joined together.
    pub fn text_content(&self) -> String {
        self.content.text()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
