#![forbid(unsafe_code)]

//! Email/password verification against the hosted identity service
//! (Identity Toolkit `accounts:signInWithPassword`).

use std::fmt;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// The `email` / `pass` pair posted by the login form and by API clients.
#[derive(Default, Clone, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default, rename = "pass")]
    pub password: String,
}

impl Credentials {
    /// Display name: everything before the `@`.
    pub fn username(&self) -> &str {
        self.email.split('@').next().unwrap_or_default()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Bad password and unknown account are deliberately the same variant.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

pub trait IdentityProvider: Send + Sync {
    fn sign_in(&self, credentials: &Credentials) -> Result<(), AuthError>;
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Blocking client for the password sign-in endpoint.
pub struct PasswordSignIn {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
}

impl PasswordSignIn {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            agent: ureq::Agent::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

impl IdentityProvider for PasswordSignIn {
    fn sign_in(&self, credentials: &Credentials) -> Result<(), AuthError> {
        if credentials.email.trim().is_empty() || credentials.password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let result = self
            .agent
            .post(&format!("{}/accounts:signInWithPassword", self.endpoint))
            .query("key", &self.api_key)
            .send_json(json!({
                "email": credentials.email,
                "password": credentials.password,
                "returnSecureToken": true,
            }));

        match result {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(400, response)) => {
                let envelope: ErrorEnvelope = response.into_json().unwrap_or_default();
                Err(classify_rejection(&envelope.error.message))
            }
            Err(ureq::Error::Status(code, _)) => {
                Err(AuthError::Unavailable(format!("HTTP {code}")))
            }
            Err(ureq::Error::Transport(err)) => Err(AuthError::Unavailable(err.to_string())),
        }
    }
}

// Throttling and a misconfigured API key are reported with the same 400
// status as a wrong password, so the message decides.
const SERVICE_FAULT_PREFIXES: [&str; 3] = ["TOO_MANY_ATTEMPTS", "API key not valid", "INVALID_ARGUMENT"];

fn classify_rejection(message: &str) -> AuthError {
    if SERVICE_FAULT_PREFIXES
        .iter()
        .any(|prefix| message.starts_with(prefix))
    {
        AuthError::Unavailable(message.to_string())
    } else {
        AuthError::InvalidCredentials
    }
}
