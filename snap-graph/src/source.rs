use std::future::Future;

use reqwest::StatusCode;
use thiserror::Error;

use crate::tiles::TileCoord;

/// What a tile source had for one tile.
#[derive(Debug)]
pub enum TileResponse {
    /// The raw payload
    Found(Vec<u8>),
    /// There's no data here, and there never will be
    Missing,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("{0}")]
    Other(String),
}

/// Somewhere to fetch graph tiles from. Failures are retried by the caller, so implementations
/// should just report them.
pub trait TileSource: Send + Sync + 'static {
    fn fetch(
        &self,
        tile: TileCoord,
    ) -> impl Future<Output = Result<TileResponse, FetchError>> + Send;
}

/// Fetches tiles over HTTP from `<endpoint>/<tileY>/<tileX>`. A 404 means the tile is empty.
pub struct HttpTileSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTileSource {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn url(&self, tile: TileCoord) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), tile)
    }
}

impl TileSource for HttpTileSource {
    fn fetch(
        &self,
        tile: TileCoord,
    ) -> impl Future<Output = Result<TileResponse, FetchError>> + Send {
        let request = self.client.get(self.url(tile));
        async move {
            let resp = request.send().await?;
            match resp.status() {
                StatusCode::NOT_FOUND => Ok(TileResponse::Missing),
                status if status.is_success() => Ok(TileResponse::Found(resp.bytes().await?.to_vec())),
                status => Err(FetchError::Status(status.as_u16())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url() {
        let tile = TileCoord { x: -38, y: 567 };
        assert_eq!(
            HttpTileSource::new("https://tiles.example.com/graph/").url(tile),
            "https://tiles.example.com/graph/567/-38"
        );
        assert_eq!(
            HttpTileSource::new("http://localhost:8080").url(tile),
            "http://localhost:8080/567/-38"
        );
    }
}
