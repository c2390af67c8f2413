#![forbid(unsafe_code)]

//! Turns the video links admins paste into the form into platform video ids.
//!
//! Only four link shapes are accepted:
//! - `https://youtu.be/ID`
//! - `https://www.youtube.com/watch?v=ID`
//! - `https://www.youtube.com/embed/ID`
//! - `https://www.youtube.com/v/ID`
//!
//! The `www.` prefix is optional for the last three. Nothing here touches the
//! network; whether the id actually exists is the metadata provider's job.

use thiserror::Error;
use url::Url;

const SHORT_HOST: &str = "youtu.be";
const CANONICAL_HOSTS: [&str; 2] = ["www.youtube.com", "youtube.com"];

/// Reasons a link was rejected. Callers usually collapse all of them into a
/// single "invalid URL" message, but logs keep the precise cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("not an absolute URL")]
    Malformed,
    #[error("unsupported host: {0}")]
    UnsupportedHost(String),
    #[error("unsupported path: {0}")]
    UnsupportedPath(String),
    #[error("watch link has no `v` query parameter")]
    MissingVideoParam,
    #[error("link does not contain a video id")]
    EmptyIdentifier,
}

/// Extracts the video id from `input`. First matching shape wins.
pub fn extract_video_id(input: &str) -> Result<String, ExtractError> {
    let parsed = Url::parse(input.trim()).map_err(|_| ExtractError::Malformed)?;
    let host = parsed.host_str().ok_or(ExtractError::Malformed)?;
    let path = parsed.path();

    let id = if host == SHORT_HOST {
        path.strip_prefix('/').unwrap_or(path).to_string()
    } else if CANONICAL_HOSTS.contains(&host) {
        if path == "/watch" {
            parsed
                .query_pairs()
                .find(|(key, value)| key == "v" && !value.is_empty())
                .map(|(_, value)| value.into_owned())
                .ok_or(ExtractError::MissingVideoParam)?
        } else if path.starts_with("/embed/") || path.starts_with("/v/") {
            third_segment(path)
        } else {
            return Err(ExtractError::UnsupportedPath(path.to_string()));
        }
    } else {
        return Err(ExtractError::UnsupportedHost(host.to_string()));
    };

    if id.is_empty() {
        return Err(ExtractError::EmptyIdentifier);
    }
    Ok(id)
}

// "/embed/ID/extra" splits into ["", "embed", "ID", "extra"].
fn third_segment(path: &str) -> String {
    path.split('/').nth(2).unwrap_or_default().to_string()
}
