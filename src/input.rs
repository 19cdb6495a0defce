use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

pub const DEFAULT_MAX_ITEMS: usize = 1000;
pub const DEFAULT_CONCURRENCY: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Please provide at least one URL to scrape.")]
    NoStartUrls,
    #[error("maxItems must be at least 1")]
    ZeroMaxItems,
    #[error("maxConcurrency must be at least 1")]
    ZeroConcurrency,
    #[error("invalid sitemapPattern: {0}")]
    SitemapPattern(#[from] regex::Error),
}

/// A start URL as a plain string or as a `{ "url": ... }` request object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StartUrl {
    Plain(String),
    Request { url: String },
}

impl StartUrl {
    pub fn url(&self) -> &str {
        match self {
            StartUrl::Plain(u) => u,
            StartUrl::Request { url } => url,
        }
    }
}

/// The run input document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    #[serde(default)]
    pub start_urls: Vec<StartUrl>,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_true")]
    pub enable_analytics: bool,
    /// Accepted and logged, never interpreted.
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default)]
    pub proxy_configuration: Option<Value>,
    #[serde(default)]
    pub sitemap_urls: Vec<String>,
    #[serde(default)]
    pub sitemap_pattern: Option<String>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

fn default_max_items() -> usize {
    DEFAULT_MAX_ITEMS
}

fn default_true() -> bool {
    true
}

fn default_output_format() -> String {
    "comprehensive".to_string()
}

impl Default for Input {
    fn default() -> Self {
        Input {
            start_urls: Vec::new(),
            max_items: DEFAULT_MAX_ITEMS,
            enable_analytics: true,
            output_format: default_output_format(),
            proxy_configuration: None,
            sitemap_urls: Vec::new(),
            sitemap_pattern: None,
            max_concurrency: None,
        }
    }
}

impl Input {
    /// Read the input document. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No input file at {}, using defaults", path.display());
            return Ok(Input::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid input in {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Input::default());
        }
        Ok(serde_json::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<(), InputError> {
        if self.max_items == 0 {
            return Err(InputError::ZeroMaxItems);
        }
        if self.max_concurrency == Some(0) {
            return Err(InputError::ZeroConcurrency);
        }
        if self.normalized_start_urls().is_empty() && self.sitemap_urls.is_empty() {
            return Err(InputError::NoStartUrls);
        }
        Ok(())
    }

    pub fn normalized_start_urls(&self) -> Vec<String> {
        normalize_urls(self.start_urls.iter().map(StartUrl::url))
    }
}

/// Trim, drop blanks and collapse exact duplicates, keeping first-seen order.
pub fn normalize_urls<'a>(urls: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .filter(|u| seen.insert(u.to_string()))
        .map(String::from)
        .collect()
}

/// Process-level settings from `PULSE_*` environment variables.
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    pub db_path: Option<String>,
    pub max_concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_source(Environment::with_prefix("PULSE"))
    }

    fn from_source(env: Environment) -> Self {
        let loaded = Config::builder()
            .add_source(env.try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize());
        match loaded {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring PULSE_* settings, using defaults: {}", e);
                Settings::default()
            }
        }
    }
}
