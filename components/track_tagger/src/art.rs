use crate::TagError;
use async_trait::async_trait;

/// Adapter that fetches album-art bytes from a URL.
#[async_trait]
pub trait ArtFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TagError>;
}

/// HTTP-backed art fetcher.
pub struct HttpArtFetcher {
    client: reqwest::Client,
}

impl HttpArtFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpArtFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtFetcher for HttpArtFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TagError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TagError::ArtFetch(e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TagError::ArtFetch(e.to_string()))?;

        Ok(bytes.to_vec())
    }
}
