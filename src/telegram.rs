use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

const API_BASE: &str = "https://api.telegram.org";

/// Thin client for the handful of Bot API methods the relay needs.
pub struct Bot {
    client: reqwest::Client,
    base: String,
}

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiReply<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

impl Bot {
    pub fn new(token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            base: format!("{API_BASE}/bot{token}"),
        })
    }

    /// Authorization check; fails when the token is not accepted.
    pub async fn get_me(&self) -> Result<User> {
        let response = self
            .client
            .get(self.method_url("getMe"))
            .send()
            .await
            .context("getMe request failed")?;
        unwrap_reply(response.json().await.context("getMe reply was not valid JSON")?)
    }

    /// Send a Markdown-formatted text message.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .context("sendMessage request failed")?;
        unwrap_reply::<serde_json::Value>(
            response
                .json()
                .await
                .context("sendMessage reply was not valid JSON")?,
        )?;
        Ok(())
    }

    /// Upload a photo, captioned with its filename. Sent without a
    /// notification; it accompanies the text message of the same mail.
    pub async fn send_photo(&self, chat_id: i64, filename: &str, bytes: Vec<u8>) -> Result<()> {
        let photo = multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", filename.to_string())
            .text("disable_notification", "true")
            .part("photo", photo);
        let response = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .context("sendPhoto request failed")?;
        unwrap_reply::<serde_json::Value>(
            response
                .json()
                .await
                .context("sendPhoto reply was not valid JSON")?,
        )?;
        Ok(())
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base, method)
    }
}

fn unwrap_reply<T: DeserializeOwned>(reply: ApiReply<T>) -> Result<T> {
    if !reply.ok {
        bail!(
            "telegram api error: {}",
            reply.description.unwrap_or_else(|| "unknown".to_string())
        );
    }
    reply.result.context("telegram api reply missing result")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_successful_reply() {
        let raw = r#"{"ok":true,"result":{"id":42,"is_bot":true,"first_name":"relay","username":"relay_bot"}}"#;
        let reply: ApiReply<User> = serde_json::from_str(raw).unwrap();
        let user = unwrap_reply(reply).unwrap();
        assert_eq!(user.id, 42);
        assert_eq!(user.username.as_deref(), Some("relay_bot"));
    }

    #[test]
    fn surfaces_api_errors() {
        let raw = r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#;
        let reply: ApiReply<User> = serde_json::from_str(raw).unwrap();
        let err = unwrap_reply(reply).unwrap_err();
        assert!(err.to_string().contains("Unauthorized"));
    }
}
