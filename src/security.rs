#![forbid(unsafe_code)]

//! Process and cookie hardening shared by the tubeshelf binaries.

use anyhow::{Result, bail};
use nix::unistd::Uid;
use tower_sessions::{
    Expiry, MemoryStore, SessionManagerLayer,
    cookie::{SameSite, time::Duration},
};

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "tubeshelf_session";

/// Sessions expire after a day without requests.
const SESSION_INACTIVITY_SECONDS: i64 = 24 * 60 * 60;

/// Refuses to start when running as root. The server only needs to bind a
/// port and reach the catalog, neither of which needs privileges.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{process} must not be run as root; start it from an unprivileged service account");
    }
    Ok(())
}

/// In-memory session layer. The cookie is `Secure` only when the site is
/// served over https, otherwise local development over http would lose it.
pub fn session_layer(public_base_url: &str) -> SessionManagerLayer<MemoryStore> {
    SessionManagerLayer::new(MemoryStore::default())
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(Duration::seconds(
            SESSION_INACTIVITY_SECONDS,
        )))
        .with_secure(public_base_url.starts_with("https://"))
        .with_same_site(SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
}
