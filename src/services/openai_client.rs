//! Minimal OpenAI REST client for chat completions and image generation.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};

use crate::{config::Config, error::AppError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    image_model: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: i32,
    completion_tokens: i32,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

/// Text returned by a chat completion with its token accounting.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub model: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
}

impl OpenAiClient {
    /// `None` when `OPENAI_API_KEY` is not set.
    pub fn from_config(http: &Client, config: &Config) -> Option<Self> {
        let api_key = config.openai_api_key.as_deref()?.trim();
        if api_key.is_empty() {
            return None;
        }

        Some(Self {
            http: http.clone(),
            api_key: api_key.to_string(),
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            model: config.openai_model.clone(),
            image_model: config.openai_image_model.clone(),
        })
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, AppError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("OpenAI request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                })
                .unwrap_or_else(|| status.to_string());
            return Err(AppError::Upstream(format!("OpenAI {path} returned {status}: {message}")));
        }

        resp.json::<T>()
            .await
            .map_err(|e| AppError::Upstream(format!("OpenAI {path} response unreadable: {e}")))
    }

    /// Chat completion in JSON mode; the model must answer with an object.
    pub async fn chat_json(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<ChatCompletion, AppError> {
        let body = json!({
            "model": self.model,
            "messages": [
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
            "response_format": { "type": "json_object" },
        });

        let response: ChatResponse = self.post("/chat/completions", &body).await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::Upstream("OpenAI returned no completion".to_string()))?;
        let usage = response.usage.unwrap_or_default();

        Ok(ChatCompletion {
            content,
            model: self.model.clone(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }

    /// Generate one 1024x1024 illustration and return its hosted URL.
    pub async fn generate_image(&self, prompt: &str) -> Result<String, AppError> {
        let body = json!({
            "model": self.image_model,
            "prompt": prompt,
            "size": "1024x1024",
            "quality": "hd",
            "style": "vivid",
            "n": 1,
        });

        let response: ImageResponse = self.post("/images/generations", &body).await?;
        response
            .data
            .into_iter()
            .next()
            .and_then(|image| image.url)
            .ok_or_else(|| AppError::Upstream("OpenAI returned no image".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_requires_api_key() {
        let http = Client::new();
        let mut config = Config::for_tests();
        assert!(OpenAiClient::from_config(&http, &config).is_none());

        config.openai_api_key = Some("   ".to_string());
        assert!(OpenAiClient::from_config(&http, &config).is_none());

        config.openai_api_key = Some("sk-test".to_string());
        config.openai_base_url = "https://api.openai.com/v1/".to_string();
        let client = OpenAiClient::from_config(&http, &config).unwrap();
        assert_eq!(client.base_url, "https://api.openai.com/v1");
        assert_eq!(client.model, "gpt-4o");
    }
}
