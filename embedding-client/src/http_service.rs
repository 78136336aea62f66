//! HTTP client for the embedding service.
//!
//! - `POST {endpoint}/api/v1/text_embedding` with form field `text`
//! - `POST {endpoint}/api/v1/image_embedding` with multipart field `image`
//!
//! Both answer `{"embedding": [f32; N]}`.

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::EmbeddingConfig;
use crate::error_handler::{EmbedError, Result};
use crate::{EmbedPayload, Embedder};

/// Thin client for the embedding service.
///
/// Reuses one HTTP client; every request carries the configured deadline.
pub struct HttpEmbedder {
    client: reqwest::Client,
    cfg: EmbeddingConfig,
    url_text: String,
    url_image: String,
}

impl HttpEmbedder {
    /// Creates a new client from a validated config.
    ///
    /// # Errors
    /// - [`EmbedError::Config`] if the config is invalid
    /// - [`EmbedError::Unavailable`] if the HTTP client cannot be built
    pub fn new(cfg: EmbeddingConfig) -> Result<Self> {
        cfg.validate()?;

        let client = reqwest::Client::builder()
            .connect_timeout(cfg.timeout)
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| EmbedError::Unavailable(format!("http client build: {e}")))?;

        let base = cfg.endpoint.trim().trim_end_matches('/').to_string();
        let url_text = format!("{base}/api/v1/text_embedding");
        let url_image = format!("{base}/api/v1/image_embedding");

        Ok(Self {
            client,
            cfg,
            url_text,
            url_image,
        })
    }

    #[instrument(skip_all, fields(chars = text.len()))]
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let clamped = clamp_chars(text, self.cfg.text_max_chars);

        debug!("POST {}", self.url_text);
        let request = self
            .client
            .post(&self.url_text)
            .form(&[("text", clamped.as_str())]);
        self.send(request, &self.url_text).await
    }

    #[instrument(skip_all, fields(bytes = image.len()))]
    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>> {
        if image.is_empty() {
            return Err(EmbedError::InvalidInput("empty image payload".into()));
        }

        let part = Part::bytes(image.to_vec()).file_name("image");
        let form = Form::new().part("image", part);

        debug!("POST {}", self.url_image);
        let request = self.client.post(&self.url_image).multipart(form);
        self.send(request, &self.url_image).await
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<Vec<f32>> {
        let timeout = self.cfg.timeout;
        let resp = request
            .send()
            .await
            .map_err(|e| EmbedError::from_transport(e, timeout))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let snippet = text.chars().take(240).collect::<String>();
            return Err(EmbedError::from_status(status, url, &snippet, timeout));
        }

        let out: EmbeddingResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                EmbedError::Timeout(timeout)
            } else {
                EmbedError::Unavailable(format!(
                    "failed to decode response from {url}: {e}; expected `{{ embedding: number[] }}`"
                ))
            }
        })?;

        if out.embedding.len() != self.cfg.dim {
            return Err(EmbedError::DimensionMismatch {
                got: out.embedding.len(),
                want: self.cfg.dim,
            });
        }

        Ok(out.embedding)
    }
}

impl Embedder for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.cfg.dim
    }

    fn embed<'a>(&'a self, payload: EmbedPayload<'a>) -> BoxFuture<'a, Result<Vec<f32>>> {
        match payload {
            EmbedPayload::Text(text) => self.embed_text(text).boxed(),
            EmbedPayload::Image(bytes) => self.embed_image(bytes).boxed(),
        }
    }
}

/// Response body of both embedding endpoints.
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Keeps at most `max_chars` characters (not bytes).
fn clamp_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
