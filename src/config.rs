use crate::errors::AppError;
use crate::permission::{DEFAULT_MAX_BODY_BYTES, DEFAULT_TOKEN_KEY};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_IGNORE_URLS: &str = "/lcdp/about,/api/health,/docs.*,/api-docs/.*";

/// Runtime settings read from the environment (and `.env`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub port: u16,
    pub token_key: String,
    pub ignore_urls: Vec<String>,
    pub max_body_bytes: usize,
    pub cors: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            token_key: DEFAULT_TOKEN_KEY.to_string(),
            ignore_urls: split_list(DEFAULT_IGNORE_URLS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            cors: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Settings::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(var: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = match var("APP_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| AppError::configuration("APP_PORT must be a valid port number"))?,
            None => defaults.port,
        };

        let token_key = var("PERMISSION_TOKEN_KEY")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .unwrap_or(defaults.token_key);

        let ignore_urls = var("PERMISSION_IGNORE_URLS")
            .map(|raw| split_list(&raw))
            .unwrap_or(defaults.ignore_urls);

        let max_body_bytes = match var("PERMISSION_MAX_BODY_BYTES") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| AppError::configuration("PERMISSION_MAX_BODY_BYTES must be a valid integer"))?,
            None => defaults.max_body_bytes,
        };

        let cors = var("CORS")
            .map(|raw| matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.cors);

        Ok(Self {
            port,
            token_key,
            ignore_urls,
            max_body_bytes,
            cors,
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
