//! HTTP side-channel of a node: latency checks and track loading.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shoal_common::{Result, ShoalError};
use tracing::debug;

use crate::protocol::ExceptionInfo;

/// Measures round-trip latency to a node.
#[async_trait]
pub trait LatencySource: Send + Sync {
    async fn latency(&self) -> Result<Duration>;
}

/// Search providers understood by `resolve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchSource {
    #[default]
    Youtube,
    YoutubeMusic,
    Soundcloud,
}

impl SearchSource {
    pub fn prefix(self) -> &'static str {
        match self {
            SearchSource::Youtube => "ytsearch",
            SearchSource::YoutubeMusic => "ytmsearch",
            SearchSource::Soundcloud => "scsearch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadType {
    TrackLoaded,
    PlaylistLoaded,
    SearchResult,
    #[default]
    NoMatches,
    LoadFailed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    pub length: u64,
    pub is_stream: bool,
    pub position: u64,
    pub title: String,
    pub uri: Option<String>,
    pub source_name: Option<String>,
}

/// An encoded track plus its decoded metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub track: String,
    #[serde(default)]
    pub info: TrackInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaylistInfo {
    pub name: Option<String>,
    /// Index into `tracks`, negative when nothing is selected.
    pub selected_track: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadTracksResponse {
    pub load_type: LoadType,
    pub playlist_info: PlaylistInfo,
    pub tracks: Vec<Track>,
    pub exception: Option<ExceptionInfo>,
}

/// REST client bound to one node.
#[derive(Clone)]
pub struct NodeRest {
    http: reqwest::Client,
    base_url: String,
    auth: String,
    user_agent: String,
    timeout: Duration,
}

impl std::fmt::Debug for NodeRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRest")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl NodeRest {
    pub fn new(
        base_url: impl Into<String>,
        auth: impl Into<String>,
        user_agent: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth: auth.into(),
            user_agent: user_agent.into(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .timeout(self.timeout)
            .header("Authorization", &self.auth)
            .header("User-Agent", &self.user_agent)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self
            .request(path)
            .query(query)
            .send()
            .await
            .map_err(|e| ShoalError::Rest(format!("GET {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ShoalError::Rest(format!("GET {path} returned {status}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ShoalError::Rest(format!("GET {path} returned invalid JSON: {e}")))
    }

    /// Load tracks for an identifier (URL or `prefix:query`).
    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadTracksResponse> {
        debug!(url = %self.base_url, identifier, "loading tracks");
        self.get_json("/loadtracks", &[("identifier", identifier)])
            .await
    }

    /// Search `source` for `query`.
    pub async fn resolve(&self, query: &str, source: SearchSource) -> Result<LoadTracksResponse> {
        let identifier = search_identifier(query, source);
        self.load_tracks(&identifier).await
    }

    /// Decode an encoded track back into its metadata.
    pub async fn decode_track(&self, track: &str) -> Result<TrackInfo> {
        self.get_json("/decodetrack", &[("track", track)]).await
    }
}

#[async_trait]
impl LatencySource for NodeRest {
    /// Time a `GET /version` round trip.
    async fn latency(&self) -> Result<Duration> {
        let started = Instant::now();
        let response = self
            .request("/version")
            .send()
            .await
            .map_err(|e| ShoalError::Rest(format!("latency check failed: {e}")))?;
        let elapsed = started.elapsed();

        if !response.status().is_success() {
            return Err(ShoalError::Rest(format!(
                "latency check returned {}",
                response.status()
            )));
        }
        Ok(elapsed)
    }
}

/// Build a search identifier. URLs pass through untouched.
pub fn search_identifier(query: &str, source: SearchSource) -> String {
    let query = query.trim();
    if query.starts_with("http://") || query.starts_with("https://") {
        query.to_string()
    } else {
        format!("{}:{}", source.prefix(), query)
    }
}
