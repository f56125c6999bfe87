//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so a client can start against a local
//! development server with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use murmur_net::Backoff;
use murmur_shared::constants::{
    DEFAULT_API_URL, DEFAULT_RECONNECT_BASE_MS, DEFAULT_RECONNECT_MAX_ATTEMPTS,
    DEFAULT_RECONNECT_MAX_MS, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_WS_URL, MAX_IMAGE_SIZE,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL.
    /// Env: `MURMUR_API_URL`
    /// Default: `http://localhost:5000`
    pub api_url: String,

    /// Realtime channel endpoint.
    /// Env: `MURMUR_WS_URL`
    /// Default: derived from `api_url` (`http` becomes `ws`, path `/ws`).
    pub ws_url: String,

    /// Upper bound for validation, history and send calls.
    /// Env: `MURMUR_REQUEST_TIMEOUT_SECS`
    /// Default: `10`
    pub request_timeout: Duration,

    /// Channel reconnect policy.
    /// Env: `MURMUR_RECONNECT_BASE_MS`, `MURMUR_RECONNECT_MAX_MS`,
    /// `MURMUR_RECONNECT_MAX_ATTEMPTS`
    /// Default: 500 ms doubling up to 30 s, 8 attempts.
    pub reconnect: Backoff,

    /// Directory holding the stored credential.
    /// Env: `MURMUR_DATA_DIR`
    /// Default: none (platform data directory).
    pub data_dir: Option<PathBuf>,

    /// Largest image accepted for sending, in bytes.
    /// Env: `MURMUR_MAX_IMAGE_BYTES`
    /// Default: 5 MiB
    pub max_image_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            reconnect: Backoff::new(
                Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
                Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
                DEFAULT_RECONNECT_MAX_ATTEMPTS,
            ),
            data_dir: None,
            max_image_bytes: MAX_IMAGE_SIZE,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = var("MURMUR_API_URL") {
            match parse_url(&raw, &["http", "https"]).and_then(|url| derive_ws_url(&url)) {
                Some(ws_url) => {
                    config.api_url = raw.trim().trim_end_matches('/').to_string();
                    config.ws_url = ws_url;
                }
                None => tracing::warn!(value = %raw, "Invalid MURMUR_API_URL, using default"),
            }
        }

        if let Some(raw) = var("MURMUR_WS_URL") {
            match parse_url(&raw, &["ws", "wss"]) {
                Some(url) => config.ws_url = url.into(),
                None => tracing::warn!(value = %raw, "Invalid MURMUR_WS_URL, using derived URL"),
            }
        }

        if let Some(secs) = parse_var::<u64>(&var, "MURMUR_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(ms) = parse_var::<u64>(&var, "MURMUR_RECONNECT_BASE_MS") {
            config.reconnect.base = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var::<u64>(&var, "MURMUR_RECONNECT_MAX_MS") {
            config.reconnect.max_delay = Duration::from_millis(ms);
        }

        if let Some(n) = parse_var::<u32>(&var, "MURMUR_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = n;
        }

        if let Some(dir) = var("MURMUR_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        if let Some(n) = parse_var::<usize>(&var, "MURMUR_MAX_IMAGE_BYTES") {
            config.max_image_bytes = n;
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

fn parse_url(raw: &str, schemes: &[&str]) -> Option<Url> {
    Url::parse(raw.trim())
        .ok()
        .filter(|url| schemes.contains(&url.scheme()))
}

/// `http://host:5000` becomes `ws://host:5000/ws`.
fn derive_ws_url(api_url: &Url) -> Option<String> {
    let scheme = match api_url.scheme() {
        "https" => "wss",
        "http" => "ws",
        _ => return None,
    };
    let mut ws = api_url.clone();
    ws.set_scheme(scheme).ok()?;
    ws.path_segments_mut().ok()?.pop_if_empty().push("ws");
    Some(ws.into())
}
