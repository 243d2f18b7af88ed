//! Network source collaborator.
//!
//! A [`SourceConnector`] turns an audio id into a [`NetworkSource`], an ordered sequence
//! of byte chunks terminated by end-of-data or an error.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{StreamError, StreamResult};

/// Ordered chunk stream for one session.
#[async_trait]
pub trait NetworkSource: Send {
    /// Next chunk in arrival order, or `None` at end of data.
    async fn next_chunk(&mut self) -> StreamResult<Option<Bytes>>;

    /// Expected total size, when known.
    fn content_length(&self) -> Option<u64>;
}

/// Opens network sources by audio id.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn open(&self, audio_id: &str) -> StreamResult<Box<dyn NetworkSource>>;
}

/// HTTP connector backed by `reqwest`.
///
/// Logical ids map to `{base_url}/stream/audio/{id}` on the forwarding proxy; absolute
/// `http://` / `https://` ids are fetched as-is.
#[derive(Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
    base_url: String,
}

impl HttpConnector {
    pub fn new(base_url: impl Into<String>) -> StreamResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Source URL for `audio_id`.
    pub fn resolve_url(&self, audio_id: &str) -> StreamResult<String> {
        resolve_url(&self.base_url, audio_id)
    }
}

pub fn resolve_url(base_url: &str, audio_id: &str) -> StreamResult<String> {
    let id = audio_id.trim();
    if id.is_empty() {
        return Err(StreamError::InvalidSource("empty audio id".to_string()));
    }
    if id.starts_with("http://") || id.starts_with("https://") {
        return Ok(id.to_string());
    }
    if id.contains('/') || id.contains('?') || id.contains('#') {
        return Err(StreamError::InvalidSource(format!(
            "audio id must be a plain identifier or absolute URL: {id}"
        )));
    }
    let base = base_url.trim_end_matches('/');
    if base.is_empty() {
        return Err(StreamError::InvalidSource(
            "no base URL configured for logical audio ids".to_string(),
        ));
    }
    Ok(format!("{base}/stream/audio/{id}"))
}

#[async_trait]
impl SourceConnector for HttpConnector {
    async fn open(&self, audio_id: &str) -> StreamResult<Box<dyn NetworkSource>> {
        let url = self.resolve_url(audio_id)?;
        tracing::info!(%url, "opening audio stream");
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }
        let content_length = response.content_length();
        tracing::debug!(?content_length, "audio stream opened");
        Ok(Box::new(HttpChunkSource {
            response,
            content_length,
        }))
    }
}

/// Chunks of one HTTP response body, as delivered by the transport.
pub struct HttpChunkSource {
    response: reqwest::Response,
    content_length: Option<u64>,
}

#[async_trait]
impl NetworkSource for HttpChunkSource {
    async fn next_chunk(&mut self) -> StreamResult<Option<Bytes>> {
        Ok(self.response.chunk().await?)
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_id_maps_to_proxy_stream_path() {
        let url = resolve_url("http://localhost:8080/", "3").unwrap();
        assert_eq!(url, "http://localhost:8080/stream/audio/3");
    }

    #[test]
    fn absolute_url_is_used_verbatim() {
        let url = resolve_url("http://localhost:8080", " https://example.com/a.mp3 ").unwrap();
        assert_eq!(url, "https://example.com/a.mp3");
    }

    #[test]
    fn rejects_empty_and_path_like_ids() {
        assert!(matches!(
            resolve_url("http://localhost:8080", "  "),
            Err(StreamError::InvalidSource(_))
        ));
        assert!(matches!(
            resolve_url("http://localhost:8080", "../etc"),
            Err(StreamError::InvalidSource(_))
        ));
        assert!(matches!(
            resolve_url("", "1"),
            Err(StreamError::InvalidSource(_))
        ));
    }

    #[test]
    fn connector_trims_base_url() {
        let connector = HttpConnector::with_client(reqwest::Client::new(), "http://h:1///");
        assert_eq!(connector.base_url(), "http://h:1");
        assert_eq!(connector.resolve_url("hls").unwrap(), "http://h:1/stream/audio/hls");
    }
}
