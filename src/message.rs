use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Html,
}

/// Message body as sent by the backend: either a raw string or an object
/// already tagged as HTML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Tagged {
        content: String,
        content_format: ContentFormat,
    },
}

impl MessageContent {
    pub fn html(content: impl Into<String>) -> Self {
        MessageContent::Tagged {
            content: content.into(),
            content_format: ContentFormat::Html,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Tagged { content, .. } => content,
        }
    }

    pub fn is_tagged_html(&self) -> bool {
        matches!(
            self,
            MessageContent::Tagged {
                content_format: ContentFormat::Html,
                ..
            }
        )
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, alias = "prompt_name", skip_serializing_if = "Option::is_none")]
    pub prompt_name: Option<String>,
    #[serde(default, alias = "message_id", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
}
