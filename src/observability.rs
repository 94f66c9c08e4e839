//! Logging setup and log-safe formatting helpers.
//!
//! The library only emits `tracing` events. Applications that want them on
//! stderr can call [`init_tracing`] once at startup.

use reqwest::header::HeaderMap;
use std::collections::BTreeMap;
use tracing_subscriber::EnvFilter;

/// Output format for the `fmt` subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Subscriber configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// `EnvFilter` directive, e.g. `"llmchat=debug"`. `RUST_LOG` wins when set.
    pub filter: String,
    pub format: OutputFormat,
    pub with_target: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::development()
    }
}

impl TracingConfig {
    pub fn development() -> Self {
        Self {
            filter: "llmchat=debug".to_string(),
            format: OutputFormat::Pretty,
            with_target: true,
        }
    }

    pub fn minimal() -> Self {
        Self {
            filter: "llmchat=warn".to_string(),
            format: OutputFormat::Compact,
            with_target: false,
        }
    }

    pub fn json_production() -> Self {
        Self {
            filter: "llmchat=info".to_string(),
            format: OutputFormat::Json,
            with_target: true,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }
}

/// Install a global `fmt` subscriber. Returns an error if one is already set.
pub fn init_tracing(config: TracingConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let result = match config.format {
        OutputFormat::Pretty => builder.pretty().try_init(),
        OutputFormat::Compact => builder.compact().try_init(),
        OutputFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| format!("Failed to install tracing subscriber: {e}"))
}

/// Mask credentials so they can appear in logs.
pub fn mask_sensitive_value(value: &str) -> String {
    if let Some(token) = value.strip_prefix("Bearer ") {
        return format!("Bearer {}", mask_token(token));
    }
    mask_token(value)
}

fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Render headers as JSON with credential-bearing values masked.
pub fn format_headers_for_logging(headers: &HeaderMap) -> String {
    let map: BTreeMap<&str, String> = headers
        .iter()
        .map(|(k, v)| {
            let value = v.to_str().unwrap_or("<invalid>");
            let name = k.as_str().to_ascii_lowercase();
            let shown = if name.contains("authorization") || name.contains("key") || name.contains("token") {
                mask_sensitive_value(value)
            } else {
                value.to_string()
            };
            (k.as_str(), shown)
        })
        .collect();
    serde_json::to_string(&map).unwrap_or_else(|_| format!("{map:?}"))
}
