#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_TUBESHELF_PORT: u16 = 8000;
pub const DEFAULT_TUBESHELF_HOST: &str = "127.0.0.1";
pub const DEFAULT_STATIC_ROOT: &str = "static";
pub const DEFAULT_YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_IDENTITY_ENDPOINT: &str = "https://identitytoolkit.googleapis.com/v1";

/// Everything the binaries need to reach the catalog and the two external
/// services.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub catalog_url: String,
    pub catalog_auth_token: Option<String>,
    pub youtube_api_key: String,
    pub youtube_api_base: String,
    pub identity_api_key: String,
    pub identity_endpoint: String,
    pub static_root: PathBuf,
    pub tubeshelf_port: u16,
    pub tubeshelf_host: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub catalog_url: Option<String>,
    pub static_root: Option<PathBuf>,
    pub tubeshelf_port: Option<u16>,
    pub tubeshelf_host: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_config(&file_vars, env_var_string, overrides)
}

fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeConfig> {
    let catalog_url = overrides
        .catalog_url
        .filter(|value| !value.trim().is_empty())
        .or_else(|| lookup_value("CATALOG_URL", file_vars, &env_lookup))
        .ok_or_else(|| anyhow!("CATALOG_URL not set"))?;
    let catalog_auth_token = lookup_value("CATALOG_AUTH_TOKEN", file_vars, &env_lookup);
    let youtube_api_key = lookup_value("YOUTUBE_API_KEY", file_vars, &env_lookup)
        .ok_or_else(|| anyhow!("YOUTUBE_API_KEY not set"))?;
    let identity_api_key = lookup_value("IDENTITY_API_KEY", file_vars, &env_lookup)
        .ok_or_else(|| anyhow!("IDENTITY_API_KEY not set"))?;
    let youtube_api_base = lookup_value("YOUTUBE_API_BASE", file_vars, &env_lookup)
        .unwrap_or_else(|| DEFAULT_YOUTUBE_API_BASE.to_string());
    let identity_endpoint = lookup_value("IDENTITY_ENDPOINT", file_vars, &env_lookup)
        .unwrap_or_else(|| DEFAULT_IDENTITY_ENDPOINT.to_string());
    let static_root = overrides
        .static_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("STATIC_ROOT", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_STATIC_ROOT.to_string());
    let tubeshelf_port = overrides
        .tubeshelf_port
        .or_else(|| {
            lookup_value("TUBESHELF_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_TUBESHELF_PORT);
    let tubeshelf_host = overrides
        .tubeshelf_host
        .and_then(non_blank)
        .or_else(|| lookup_value("TUBESHELF_HOST", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_TUBESHELF_HOST.to_string());
    let public_base_url = lookup_value("PUBLIC_BASE_URL", file_vars, &env_lookup)
        .map(|value| value.trim_end_matches('/').to_string())
        .unwrap_or_else(|| format!("http://{tubeshelf_host}:{tubeshelf_port}"));

    Ok(RuntimeConfig {
        catalog_url,
        catalog_auth_token,
        youtube_api_key,
        youtube_api_base,
        identity_api_key,
        identity_endpoint,
        static_root: PathBuf::from(static_root),
        tubeshelf_port,
        tubeshelf_host,
        public_base_url,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// Blank entries in the file count as unset so a half-filled template `.env`
// still falls through to the defaults.
fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .filter(|value| !value.trim().is_empty())
            .cloned()
    })
}

/// Reads `KEY=value` pairs from a dotenv-style file. A missing file is an
/// empty map.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading env file {}", path.display()))?;
    Ok(content
        .lines()
        .filter_map(parse_env_line)
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect())
}

fn parse_env_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, unquote(value.trim())))
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|quote| value.strip_prefix(*quote)?.strip_suffix(*quote))
        .unwrap_or(value)
}
