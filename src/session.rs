#![forbid(unsafe_code)]

//! Typed view over the per-visitor session.
//!
//! Handlers never touch raw session keys; they extract a [`Viewer`], read its
//! flags, and call the mutating helpers which write straight back to the
//! session store.

use std::collections::BTreeMap;

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

pub use tower_sessions::session::Error as SessionError;

const VIEWER_KEY: &str = "viewer";
const FLASH_KEY: &str = "flash";

/// What a session remembers between requests.
///
/// `admin` reflects the allow-list as of login and is never re-checked.
/// `video_data` is the id → title snapshot taken by the last list view.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewerSession {
    pub logged_in: bool,
    pub username: String,
    pub admin: bool,
    #[serde(default)]
    pub video_data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlashLevel {
    Info,
    Error,
}

impl FlashLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Error => "error",
        }
    }
}

/// One-shot notice shown on the next rendered page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

pub struct Viewer {
    session: Session,
    state: ViewerSession,
}

impl Viewer {
    pub fn is_logged_in(&self) -> bool {
        self.state.logged_in
    }

    pub fn is_admin(&self) -> bool {
        self.state.logged_in && self.state.admin
    }

    pub fn username(&self) -> &str {
        &self.state.username
    }

    /// Title from the snapshot taken by the last list view, if any.
    pub fn cached_title(&self, videoid: &str) -> Option<&str> {
        self.state.video_data.get(videoid).map(String::as_str)
    }

    /// Starts a fresh logged-in session. The session id is rotated so a
    /// pre-login cookie cannot be reused.
    pub async fn sign_in(&mut self, username: &str, admin: bool) -> Result<(), SessionError> {
        self.session.cycle_id().await?;
        self.state = ViewerSession {
            logged_in: true,
            username: username.to_string(),
            admin,
            video_data: BTreeMap::new(),
        };
        self.save().await
    }

    /// Drops everything, including pending flash messages.
    pub async fn sign_out(&mut self) -> Result<(), SessionError> {
        self.session.flush().await?;
        self.state = ViewerSession::default();
        Ok(())
    }

    pub async fn remember_videos(
        &mut self,
        videos: BTreeMap<String, String>,
    ) -> Result<(), SessionError> {
        self.state.video_data = videos;
        self.save().await
    }

    pub async fn push_flash(
        &self,
        level: FlashLevel,
        message: impl Into<String>,
    ) -> Result<(), SessionError> {
        let mut pending: Vec<Flash> = self.session.get(FLASH_KEY).await?.unwrap_or_default();
        pending.push(Flash {
            level,
            message: message.into(),
        });
        self.session.insert(FLASH_KEY, pending).await
    }

    /// Returns and clears the pending flash messages.
    pub async fn take_flashes(&self) -> Result<Vec<Flash>, SessionError> {
        Ok(self
            .session
            .remove::<Vec<Flash>>(FLASH_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn save(&self) -> Result<(), SessionError> {
        self.session.insert(VIEWER_KEY, &self.state).await
    }
}

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session = parts.extensions.get::<Session>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "session layer missing",
        ))?;

        // Anything unreadable is treated like a visitor who never logged in.
        let state = match session.get::<ViewerSession>(VIEWER_KEY).await {
            Ok(state) => state.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(error = %err, "discarding unreadable session state");
                ViewerSession::default()
            }
        };

        Ok(Self { session, state })
    }
}
