//! Splits a rendered message at rune-cap boundaries and transmits chunks
//! serially to the chat platform, honoring 429 `retry_after` with bounded
//! retries. Grounded on the teacher's retry/backoff shape in
//! `feed::fetcher::fetch_one`, generalized from feed HTTP to the
//! `sendMessage` wire call.

use crate::model::Keyboard;
use crate::render::RenderedMessage;
use crate::util;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("send failed: {0}")]
    Http(String),
    #[error("cancelled")]
    Cancelled,
}

pub struct Target {
    pub chat_id: i64,
    pub topic: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<i64>,
    text: &'a str,
    #[serde(skip_serializing_if = "is_false")]
    disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardMarkup {
    inline_keyboard: Keyboard,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    parameters: Option<ErrorParameters>,
}

#[derive(Debug, Deserialize)]
struct ErrorParameters {
    retry_after: Option<u64>,
}

pub struct Sender {
    client: reqwest::Client,
    api_base: String,
    rune_cap: usize,
    retry_limit: u32,
}

impl Sender {
    pub fn new(client: reqwest::Client, telegram_token: &str, rune_cap: usize, retry_limit: u32) -> Self {
        Self {
            client,
            api_base: format!("https://api.telegram.org/bot{telegram_token}"),
            rune_cap,
            retry_limit,
        }
    }

    /// Sends a rendered message, chunking the body if necessary. Only the
    /// first chunk carries the action keyboard and link-preview flag.
    pub async fn send(
        &self,
        target: &Target,
        message: &RenderedMessage,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        let chunks = util::split(&message.body, self.rune_cap);
        for (i, chunk) in chunks.iter().enumerate() {
            let keyboard = if i == 0 { message.keyboard.clone() } else { None };
            let suppress_preview = i == 0 && message.suppress_link_preview;
            self.send_chunk(target, chunk, keyboard, suppress_preview, cancel).await?;
        }
        Ok(())
    }

    async fn send_chunk(
        &self,
        target: &Target,
        text: &str,
        keyboard: Option<Keyboard>,
        suppress_preview: bool,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(SendError::Cancelled);
            }

            let body = SendMessageRequest {
                chat_id: target.chat_id,
                message_thread_id: target.topic,
                text,
                disable_web_page_preview: suppress_preview,
                reply_markup: keyboard.clone().map(|inline_keyboard| InlineKeyboardMarkup { inline_keyboard }),
            };

            let resp = self
                .client
                .post(format!("{}/sendMessage", self.api_base))
                .json(&body)
                .send()
                .await
                .map_err(|e| SendError::Http(e.to_string()))?;

            if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if attempt >= self.retry_limit {
                    return Err(SendError::Http("rate limited after retry limit".to_string()));
                }
                let retry_after = resp
                    .json::<ErrorResponse>()
                    .await
                    .ok()
                    .and_then(|e| e.parameters)
                    .and_then(|p| p.retry_after)
                    .unwrap_or(1);

                attempt += 1;
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(retry_after)) => continue,
                    _ = cancel.cancelled() => return Err(SendError::Cancelled),
                }
            }

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(SendError::Http(format!("status {status}: {body}")));
            }

            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Button;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message(body: &str) -> RenderedMessage {
        RenderedMessage { body: body.to_string(), keyboard: None, suppress_link_preview: false }
    }

    #[tokio::test]
    async fn sends_short_message_as_single_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sender = Sender {
            client: reqwest::Client::new(),
            api_base: format!("{}/botTOKEN", server.uri()),
            rune_cap: 4096,
            retry_limit: 3,
        };
        let target = Target { chat_id: 1, topic: None };
        let cancel = CancellationToken::new();

        sender.send(&target, &message("hi"), &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn long_message_is_sent_in_multiple_chunks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let sender = Sender {
            client: reqwest::Client::new(),
            api_base: format!("{}/botTOKEN", server.uri()),
            rune_cap: 10,
            retry_limit: 3,
        };
        let target = Target { chat_id: 1, topic: None };
        let cancel = CancellationToken::new();

        sender.send(&target, &message(&"a".repeat(15)), &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn rate_limit_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(serde_json::json!({"parameters": {"retry_after": 0}})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sender = Sender {
            client: reqwest::Client::new(),
            api_base: format!("{}/botTOKEN", server.uri()),
            rune_cap: 4096,
            retry_limit: 3,
        };
        let target = Target { chat_id: 1, topic: None };
        let cancel = CancellationToken::new();

        sender.send(&target, &message("hi"), &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn first_chunk_carries_keyboard_later_chunks_do_not() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sender = Sender {
            client: reqwest::Client::new(),
            api_base: format!("{}/botTOKEN", server.uri()),
            rune_cap: 10,
            retry_limit: 3,
        };
        let target = Target { chat_id: 1, topic: None };
        let cancel = CancellationToken::new();
        let mut msg = message(&"a".repeat(15));
        msg.keyboard = Some(vec![vec![Button { text: "x".into(), url: "https://x".into() }]]);

        sender.send(&target, &msg, &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_aborts_before_sending() {
        let sender = Sender {
            client: reqwest::Client::new(),
            api_base: "http://127.0.0.1:1".to_string(),
            rune_cap: 4096,
            retry_limit: 3,
        };
        let target = Target { chat_id: 1, topic: None };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = sender.send(&target, &message("hi"), &cancel).await;
        assert!(matches!(result, Err(SendError::Cancelled)));
    }
}
