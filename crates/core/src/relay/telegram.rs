//! Telegram Bot API uploader.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::media::{extension, mime_for_path, MediaKind};
use super::{DeliveryRef, RelayError, RelayUploader};
use crate::config::TelegramConfig;

const DEFAULT_CAPTION_TEMPLATE: &str = "<b>{file_name}</b>";

/// Uploads files to a Telegram chat through the Bot API.
pub struct TelegramUploader {
    client: Client,
    config: TelegramConfig,
}

impl TelegramUploader {
    /// Create a new Telegram uploader.
    pub fn new(config: TelegramConfig) -> Result<Self, RelayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RelayError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn method_url(&self, kind: MediaKind) -> String {
        let method = match kind {
            MediaKind::Video => "sendVideo",
            MediaKind::Audio => "sendAudio",
            MediaKind::Document => "sendDocument",
        };
        format!(
            "{}/bot{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    fn render_caption(&self, path: &Path, file_name: &str, kind: MediaKind) -> String {
        let template = self
            .config
            .caption_template
            .as_deref()
            .unwrap_or(DEFAULT_CAPTION_TEMPLATE);

        template
            .replace("{file_name}", &escape_html(file_name))
            .replace("{extension}", &escape_html(&extension(path)))
            .replace("{kind}", kind.as_str())
    }
}

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    result: Option<TelegramMessage>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
}

#[async_trait]
impl RelayUploader for TelegramUploader {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn deliver(&self, path: &Path, target: &str) -> Result<DeliveryRef, RelayError> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RelayError::FileNotFound(path.display().to_string())
            } else {
                RelayError::Io(e.to_string())
            }
        })?;

        if !metadata.is_file() {
            return Err(RelayError::NotAFile(path.display().to_string()));
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("payload")
            .to_string();
        let kind = MediaKind::from_path(path);

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| RelayError::Io(e.to_string()))?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let part = multipart::Part::stream_with_length(body, metadata.len())
            .file_name(file_name.clone())
            .mime_str(mime_for_path(path))
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let mut form = multipart::Form::new()
            .text("chat_id", target.to_string())
            .text("caption", self.render_caption(path, &file_name, kind))
            .text("parse_mode", "HTML")
            .part(kind.as_str(), part);

        if kind == MediaKind::Video {
            form = form.text("supports_streaming", "true");
        }

        debug!(
            file = %path.display(),
            kind = kind.as_str(),
            size_bytes = metadata.len(),
            "Uploading to Telegram"
        );

        let response = self
            .client
            .post(self.method_url(kind))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                // The URL carries the bot token.
                let e = e.without_url();
                if e.is_timeout() {
                    RelayError::Timeout
                } else {
                    RelayError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let envelope: TelegramResponse = response.json().await.map_err(|e| {
            RelayError::Transport(format!(
                "Invalid response (HTTP {}): {}",
                status,
                e.without_url()
            ))
        })?;

        if !envelope.ok {
            return Err(RelayError::Api {
                status: status.as_u16(),
                message: envelope
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        let message_id = envelope
            .result
            .map(|m| m.message_id)
            .ok_or_else(|| RelayError::Api {
                status: status.as_u16(),
                message: "response has no message_id".to_string(),
            })?;

        info!(
            file = %file_name,
            target = %target,
            message_id = message_id,
            "Delivered to Telegram"
        );

        Ok(DeliveryRef::new(message_id.to_string()))
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn uploader(api_url: &str, caption_template: Option<&str>) -> TelegramUploader {
        TelegramUploader::new(TelegramConfig {
            api_url: api_url.to_string(),
            bot_token: "123:secret".to_string(),
            timeout_secs: 5,
            caption_template: caption_template.map(String::from),
        })
        .unwrap()
    }

    #[test]
    fn test_render_caption() {
        let up = uploader(
            "https://api.telegram.org",
            Some("{kind}: {file_name} ({extension})"),
        );
        let caption = up.render_caption(
            Path::new("/tmp/Tom & Jerry.mkv"),
            "Tom & Jerry.mkv",
            MediaKind::Video,
        );
        assert_eq!(caption, "video: Tom &amp; Jerry.mkv (.mkv)");
    }

    #[test]
    fn test_method_url() {
        let up = uploader("https://api.telegram.org/", None);
        assert_eq!(
            up.method_url(MediaKind::Audio),
            "https://api.telegram.org/bot123:secret/sendAudio"
        );
    }

    #[tokio::test]
    async fn test_deliver_video() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:secret/sendVideo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": { "message_id": 4242 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"not really a video").unwrap();

        let delivery = uploader(&server.uri(), None)
            .deliver(&file, "-100200300")
            .await
            .unwrap();

        assert_eq!(delivery.as_str(), "4242");
    }

    #[tokio::test]
    async fn test_deliver_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:secret/sendDocument"))
            .respond_with(ResponseTemplate::new(413).set_body_json(json!({
                "ok": false,
                "description": "Request Entity Too Large"
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("archive.zip");
        std::fs::write(&file, b"zip").unwrap();

        let err = uploader(&server.uri(), None)
            .deliver(&file, "42")
            .await
            .unwrap_err();

        match err {
            RelayError::Api { status, message } => {
                assert_eq!(status, 413);
                assert_eq!(message, "Request Entity Too Large");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = uploader(&server.uri(), None)
            .deliver(Path::new("/nonexistent/file.mp3"), "42")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = uploader("http://127.0.0.1:9", None)
            .deliver(dir.path(), "42")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NotAFile(_)));
    }
}
