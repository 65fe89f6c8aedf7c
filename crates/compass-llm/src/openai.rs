use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message};
use crate::secret::Secret;

/// OpenAI-compatible provider (`/embeddings` and `/chat/completions`).
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: Secret,
    base_url: String,
    model: String,
    embedding_model: String,
    max_tokens: u32,
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &self.api_key)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiProvider {
    #[must_use]
    pub fn new(
        api_key: Secret,
        mut base_url: String,
        model: String,
        embedding_model: String,
        max_tokens: u32,
    ) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: crate::http::default_client(),
            api_key,
            base_url,
            model,
            embedding_model,
            max_tokens,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn post_json<B: Serialize + Sync>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<String, LlmError> {
        let response = self
            .client
            .post(format!("{}/{endpoint}", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.map_err(LlmError::Http)?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }

        if !status.is_success() {
            tracing::error!("OpenAI {endpoint} error {status}: {text}");
            return Err(LlmError::Status {
                provider: "openai".into(),
                status: status.as_u16(),
            });
        }

        Ok(text)
    }
}

impl LlmProvider for OpenAiProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        let api_messages: Vec<ApiMessage<'_>> = messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        let body = ChatRequest {
            model: &self.model,
            messages: &api_messages,
            max_tokens: self.max_tokens,
        };

        let text = self.post_json("chat/completions", &body).await?;
        let resp: ChatResponse = serde_json::from_str(&text)?;

        resp.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse {
                provider: "openai".into(),
            })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let body = EmbeddingRequest {
            input: text,
            model: &self.embedding_model,
        };

        let raw = self.post_json("embeddings", &body).await?;
        let resp: EmbeddingResponse = serde_json::from_str(&raw)?;

        resp.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(LlmError::EmptyResponse {
                provider: "openai".into(),
            })
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "openai"
    }
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage<'a>],
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Spawn a minimal HTTP server that answers each connection with one canned response.
    async fn spawn_mock_server(responses: Vec<String>) -> (u16, tokio::task::JoinHandle<()>) {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            for resp in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let (reader, mut writer) = stream.split();
                    let mut buf_reader = BufReader::new(reader);
                    let mut line = String::new();
                    loop {
                        line.clear();
                        buf_reader.read_line(&mut line).await.unwrap_or(0);
                        if line == "\r\n" || line == "\n" || line.is_empty() {
                            break;
                        }
                    }
                    writer.write_all(resp.as_bytes()).await.ok();
                });
            }
        });

        (port, handle)
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
    }

    fn provider_for(port: u16) -> OpenAiProvider {
        OpenAiProvider::new(
            Secret::new("key"),
            format!("http://127.0.0.1:{port}/v1/"),
            "gpt-4o-mini".into(),
            "text-embedding-3-small".into(),
            256,
        )
    }

    #[test]
    fn base_url_strips_trailing_slash() {
        let p = OpenAiProvider::new(
            Secret::new("key"),
            "https://api.openai.com/v1//".into(),
            "m".into(),
            "e".into(),
            100,
        );
        assert_eq!(p.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn debug_redacts_api_key() {
        let p = provider_for(1);
        let dbg = format!("{p:?}");
        assert!(dbg.contains("[REDACTED]"));
        assert!(!dbg.contains("\"key\""));
    }

    #[test]
    fn chat_response_empty_choices() {
        let resp: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(resp.choices.is_empty());
    }

    #[test]
    fn embedding_response_parses() {
        let resp: EmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"embedding":[0.5,-0.25]}]}"#).unwrap();
        assert_eq!(resp.data[0].embedding, vec![0.5, -0.25]);
    }

    #[tokio::test]
    async fn embed_returns_first_vector() {
        let body = r#"{"data":[{"embedding":[0.1,0.2,0.3]}]}"#;
        let (port, _h) = spawn_mock_server(vec![http_response("200 OK", body)]).await;
        let v = provider_for(port).embed("hello").await.unwrap();
        assert_eq!(v, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn chat_returns_first_choice_verbatim() {
        let body = r#"{"choices":[{"message":{"content":"first"}},{"message":{"content":"second"}}]}"#;
        let (port, _h) = spawn_mock_server(vec![http_response("200 OK", body)]).await;
        let out = provider_for(port)
            .chat(&[Message::user("q")])
            .await
            .unwrap();
        assert_eq!(out, "first");
    }

    #[tokio::test]
    async fn rate_limit_is_not_retried() {
        let (port, _h) =
            spawn_mock_server(vec![http_response("429 Too Many Requests", "{}")]).await;
        let err = provider_for(port).embed("x").await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited));
    }

    #[tokio::test]
    async fn server_error_maps_to_status() {
        let (port, _h) =
            spawn_mock_server(vec![http_response("500 Internal Server Error", "{}")]).await;
        let err = provider_for(port).chat(&[Message::user("q")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn empty_data_is_an_error() {
        let (port, _h) = spawn_mock_server(vec![http_response("200 OK", r#"{"data":[]}"#)]).await;
        let err = provider_for(port).embed("x").await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse { .. }));
    }

    #[tokio::test]
    async fn unreachable_endpoint_errors() {
        let p = provider_for(1);
        assert!(p.embed("test").await.is_err());
    }
}
