#![forbid(unsafe_code)]

//! YouTube Data API access: resolving a video id to its title and description,
//! and listing the "most popular" chart used to seed an empty catalog.
//!
//! Calls are blocking (`ureq`); async callers run them on
//! `tokio::task::spawn_blocking`.

use serde::Deserialize;
use thiserror::Error;

const WATCH_URL_BASE: &str = "https://www.youtube.com/watch?v=";
const EMBED_URL_BASE: &str = "https://www.youtube.com/embed/";

/// Largest page the chart endpoint hands out in one call.
pub const MAX_CHART_RESULTS: u32 = 50;

/// Link users can open on the platform itself.
pub fn watch_url(videoid: &str) -> String {
    format!("{WATCH_URL_BASE}{videoid}")
}

/// Link used by the player iframe.
pub fn embed_url(videoid: &str) -> String {
    format!("{EMBED_URL_BASE}{videoid}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSnippet {
    pub id: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("video {0} not found")]
    NotFound(String),
    #[error("metadata service unavailable: {0}")]
    Unavailable(String),
}

pub trait MetadataProvider: Send + Sync {
    fn lookup(&self, videoid: &str) -> Result<VideoSnippet, LookupError>;

    /// Currently trending videos for `region` (ISO 3166-1 alpha-2).
    fn trending(&self, region: &str, count: u32) -> Result<Vec<VideoSnippet>, LookupError>;
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: String,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    title: String,
    #[serde(default)]
    description: String,
}

impl From<VideoItem> for VideoSnippet {
    fn from(item: VideoItem) -> Self {
        Self {
            id: item.id,
            title: item.snippet.title,
            description: item.snippet.description,
        }
    }
}

/// Client for `https://www.googleapis.com/youtube/v3` (or a compatible base).
pub struct YouTubeDataApi {
    agent: ureq::Agent,
    base: String,
    api_key: String,
}

impl YouTubeDataApi {
    pub fn new(base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            agent: ureq::Agent::new(),
            base: base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn fetch_videos(&self, query: &[(&str, &str)]) -> Result<VideoListResponse, LookupError> {
        let mut request = self
            .agent
            .get(&format!("{}/videos", self.base))
            .query("part", "snippet")
            .query("key", &self.api_key);
        for (key, value) in query {
            request = request.query(key, value);
        }

        match request.call() {
            Ok(response) => response
                .into_json::<VideoListResponse>()
                .map_err(|err| LookupError::Unavailable(format!("decoding response: {err}"))),
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(LookupError::Unavailable(format!("HTTP {code}: {body}")))
            }
            Err(ureq::Error::Transport(err)) => Err(LookupError::Unavailable(err.to_string())),
        }
    }
}

impl MetadataProvider for YouTubeDataApi {
    fn lookup(&self, videoid: &str) -> Result<VideoSnippet, LookupError> {
        let response = self.fetch_videos(&[("id", videoid)])?;
        // Unknown ids come back as 200 with an empty item list. `id` also
        // accepts a comma list, so only an exact match counts.
        response
            .items
            .into_iter()
            .find(|item| item.id == videoid)
            .map(VideoSnippet::from)
            .ok_or_else(|| LookupError::NotFound(videoid.to_string()))
    }

    fn trending(&self, region: &str, count: u32) -> Result<Vec<VideoSnippet>, LookupError> {
        let max_results = count.clamp(1, MAX_CHART_RESULTS).to_string();
        let response = self.fetch_videos(&[
            ("chart", "mostPopular"),
            ("regionCode", region),
            ("maxResults", &max_results),
        ])?;
        Ok(response.items.into_iter().map(VideoSnippet::from).collect())
    }
}
