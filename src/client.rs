use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{BackendConfig, ComfyConfig, Config};
use crate::message::{ChatMessage, MessageContent, Role};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    service: &'a str,
    history: u32,
    #[serde(rename = "currentPromptId")]
    current_prompt_id: &'a str,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    images: &'a [String],
}

/// One exchange as stored by the backend's history log.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryRecord {
    #[serde(default)]
    pub message_id: Option<i64>,
    pub user: HistoryTurn,
    pub assistant: HistoryTurn,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryTurn {
    pub content: MessageContent,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub prompt_name: Option<String>,
}

impl HistoryRecord {
    /// Splits the record into its user and assistant messages.
    pub fn into_messages(self) -> [ChatMessage; 2] {
        [
            ChatMessage {
                role: Role::User,
                content: self.user.content,
                images: self.user.images,
                prompt_name: self.user.prompt_name,
                message_id: self.message_id,
            },
            ChatMessage {
                role: Role::Assistant,
                content: self.assistant.content,
                images: self.assistant.images,
                prompt_name: None,
                message_id: self.message_id,
            },
        ]
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryPage {
    #[serde(default, alias = "data", alias = "history")]
    pub records: Vec<HistoryRecord>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_id: Option<i64>,
}

impl HistoryPage {
    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.records
            .into_iter()
            .flat_map(HistoryRecord::into_messages)
            .collect()
    }
}

/// Checks the backend's `{success, error}` envelope.
fn check_envelope(value: Value) -> Result<Value> {
    match value.get("success").and_then(Value::as_bool) {
        Some(true) => Ok(value),
        _ => {
            let error = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error");
            Err(anyhow!("Backend error: {}", error))
        }
    }
}

fn take_field(mut value: Value, field: &str) -> Result<Value> {
    value
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| anyhow!("Backend response is missing '{}'", field))
}

/// Client for the assistant backend and the local execution server.
pub struct AssistantClient {
    backend: BackendConfig,
    comfy: ComfyConfig,
    client: reqwest::Client,
}

impl AssistantClient {
    pub fn with_config(config: &Config) -> Self {
        AssistantClient {
            backend: config.backend.clone(),
            comfy: config.comfy.clone(),
            client: reqwest::Client::new(),
        }
    }

    pub fn service(&self) -> &str {
        &self.backend.service
    }

    pub fn set_service(&mut self, service: impl Into<String>) {
        self.backend.service = service.into();
    }

    pub fn queue_endpoint(&self) -> String {
        format!("{}/queue", self.comfy.host.trim_end_matches('/'))
    }

    async fn read_json(response: reqwest::Response) -> Result<Value> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("HTTP error ({}): {}", status, body));
        }
        let value: Value = response.json().await.context("Backend returned invalid JSON")?;
        check_envelope(value)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.backend.endpoint(path);
        debug!(component = "client", url = %url, "GET");
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        Self::read_json(response).await
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Value> {
        let url = self.backend.endpoint(path);
        debug!(component = "client", url = %url, "POST");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        Self::read_json(response).await
    }

    /// Sends a chat message and returns the assistant's reply content.
    pub async fn chat(&self, message: &str, images: &[String], prompt_id: Option<&str>) -> Result<MessageContent> {
        let request = ChatRequest {
            message,
            service: &self.backend.service,
            history: self.backend.history_turns,
            current_prompt_id: prompt_id.unwrap_or(""),
            images,
        };
        info!(
            component = "client",
            service = %self.backend.service,
            images = images.len(),
            "Sending chat message"
        );
        let value = self.post("chat", &request).await?;
        let response = take_field(value, "response")?;
        serde_json::from_value(response).context("Unexpected chat response shape")
    }

    /// Fetches one page of history, newest first. `before` continues from a
    /// previous page's `next_id`.
    pub async fn history(&self, limit: usize, before: Option<i64>) -> Result<HistoryPage> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(id) = before {
            query.push(("message_id", id.to_string()));
        }
        let value = self.get("history", &query).await?;
        serde_json::from_value(value).context("Unexpected history response shape")
    }

    pub async fn clear_history(&self) -> Result<()> {
        self.get("clear_history", &[]).await?;
        info!(component = "client", "History cleared");
        Ok(())
    }

    /// Settings are opaque to this crate and passed through as JSON.
    pub async fn get_config(&self, service: Option<&str>) -> Result<Value> {
        let query: Vec<(&str, String)> = service
            .map(|s| vec![("service", s.to_string())])
            .unwrap_or_default();
        let value = self.get("config", &query).await?;
        take_field(value, "config")
    }

    pub async fn save_config(&self, config: &Value) -> Result<()> {
        self.post("save_config", config).await?;
        Ok(())
    }

    pub async fn models(&self, service: Option<&str>) -> Result<Vec<Value>> {
        let service = service.unwrap_or(&self.backend.service).to_string();
        let value = self.get("models", &[("service", service)]).await?;
        match take_field(value, "models") {
            Ok(Value::Array(models)) => Ok(models),
            Ok(Value::Null) | Err(_) => Ok(Vec::new()),
            Ok(other) => Err(anyhow!("Unexpected models list: {}", other)),
        }
    }

    /// Queues a workflow on the execution server. Any 2xx is success.
    pub async fn queue_workflow(&self, workflow: &Value) -> Result<()> {
        let url = self.queue_endpoint();
        let response = self
            .client
            .post(&url)
            .json(workflow)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Queue request failed ({}): {}", status, body));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_request_shape() {
        let images = vec!["/view?filename=a.png".to_string()];
        let request = ChatRequest {
            message: "hi",
            service: "g4f",
            history: 4,
            current_prompt_id: "",
            images: &images,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "message": "hi",
                "service": "g4f",
                "history": 4,
                "currentPromptId": "",
                "images": ["/view?filename=a.png"]
            })
        );

        let no_images = ChatRequest { images: &[], ..request };
        assert!(serde_json::to_value(&no_images).unwrap().get("images").is_none());
    }

    #[test]
    fn test_envelope_errors() {
        assert!(check_envelope(json!({"success": true, "response": "x"})).is_ok());
        let err = check_envelope(json!({"success": false, "error": "service missing"})).unwrap_err();
        assert_eq!(err.to_string(), "Backend error: service missing");
        assert!(check_envelope(json!({"response": "x"})).is_err());
    }

    #[test]
    fn test_history_page_into_messages() {
        let page: HistoryPage = serde_json::from_value(json!({
            "success": true,
            "data": [{
                "message_id": 12,
                "type": "message",
                "user": {"content": "make it blue", "images": [], "prompt_name": "recolor"},
                "assistant": {"content": {"content": "<p>ok</p>", "content_format": "html"}}
            }],
            "has_more": true,
            "next_id": 11
        }))
        .unwrap();
        assert!(page.has_more);
        assert_eq!(page.next_id, Some(11));

        let messages = page.into_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].prompt_name.as_deref(), Some("recolor"));
        assert!(messages[1].content.is_tagged_html());
        assert_eq!(messages[1].message_id, Some(12));
    }

    #[test]
    fn test_queue_endpoint() {
        let mut config = Config::default();
        config.comfy.host = "http://10.0.0.2:8188/".to_string();
        let client = AssistantClient::with_config(&config);
        assert_eq!(client.queue_endpoint(), "http://10.0.0.2:8188/queue");
    }
}
