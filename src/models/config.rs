//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{MatchStrategy, SearchOptions, TitleMode};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// CRM endpoint and HTTP behavior
    #[serde(default)]
    pub crm: CrmConfig,

    /// Card search bounds for event routing
    #[serde(default)]
    pub locator: LocatorConfig,

    /// Expiration sweep bounds
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Key-value store location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Override values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("CRM_BASE_URL") {
            self.crm.base_url = url;
        }
        if let Some(token) = var("CRM_API_TOKEN") {
            self.crm.api_token = Some(token);
        }
        if let Some(root) = var("STORAGE_ROOT") {
            self.storage.root_dir = root;
        }
        if let Some(secs) = var("CRM_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.crm.timeout_secs = secs;
        }
        if let Some(secs) = var("SWEEP_DEADLINE_SECS").and_then(|v| v.parse().ok()) {
            self.sweep.deadline_secs = secs;
        }
        if let Some(pages) = var("SWEEP_PAGE_BUDGET").and_then(|v| v.parse().ok()) {
            self.sweep.page_budget = pages;
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crm.base_url.trim().is_empty() {
            return Err(AppError::validation("crm.base_url is empty"));
        }
        url::Url::parse(&self.crm.base_url)?;
        if self.crm.cards_path.trim().is_empty() {
            return Err(AppError::validation("crm.cards_path is empty"));
        }
        if self.crm.timeout_secs == 0 {
            return Err(AppError::validation("crm.timeout_secs must be > 0"));
        }
        if self.locator.page_size == 0 || self.sweep.page_size == 0 {
            return Err(AppError::validation("page_size must be > 0"));
        }
        if self.locator.max_pages == 0 {
            return Err(AppError::validation("locator.max_pages must be > 0"));
        }
        if self.sweep.page_budget == 0 {
            return Err(AppError::validation("sweep.page_budget must be > 0"));
        }
        if self.locator.deadline_secs == 0 || self.sweep.deadline_secs == 0 {
            return Err(AppError::validation("deadline_secs must be > 0"));
        }
        if self.storage.root_dir.trim().is_empty() {
            return Err(AppError::validation("storage.root_dir is empty"));
        }
        Ok(())
    }
}

/// CRM HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    /// API root, e.g. `https://crm.example.com/api/v1/`
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Card collection path relative to `base_url`
    #[serde(default = "defaults::cards_path")]
    pub cards_path: String,

    /// Bearer token
    #[serde(default)]
    pub api_token: Option<String>,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            cards_path: defaults::cards_path(),
            api_token: None,
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Card lookup settings used when routing chat events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorConfig {
    #[serde(default = "defaults::max_pages")]
    pub max_pages: u32,

    #[serde(default = "defaults::page_size")]
    pub page_size: u32,

    #[serde(default = "defaults::locator_deadline")]
    pub deadline_secs: u64,

    #[serde(default)]
    pub strategy: MatchStrategy,

    #[serde(default)]
    pub title_mode: TitleMode,
}

impl LocatorConfig {
    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            max_pages: self.max_pages,
            page_size: self.page_size,
            strategy: self.strategy,
            title_mode: self.title_mode,
            deadline: Duration::from_secs(self.deadline_secs),
        }
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            max_pages: defaults::max_pages(),
            page_size: defaults::page_size(),
            deadline_secs: defaults::locator_deadline(),
            strategy: MatchStrategy::default(),
            title_mode: TitleMode::default(),
        }
    }
}

/// Expiration sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Pages fetched per campaign base stage
    #[serde(default = "defaults::page_budget")]
    pub page_budget: u32,

    #[serde(default = "defaults::page_size")]
    pub page_size: u32,

    /// Wall-clock budget for the whole run
    #[serde(default = "defaults::sweep_deadline")]
    pub deadline_secs: u64,

    /// Lifetime of the per-card marker taken before a move
    #[serde(default = "defaults::lock_ttl")]
    pub lock_ttl_secs: u64,
}

impl SweepConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            page_budget: defaults::page_budget(),
            page_size: defaults::page_size(),
            deadline_secs: defaults::sweep_deadline(),
            lock_ttl_secs: defaults::lock_ttl(),
        }
    }
}

/// File-backed store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::root_dir")]
    pub root_dir: String,

    /// Entries kept in the chat event log
    #[serde(default = "defaults::event_log_limit")]
    pub event_log_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: defaults::root_dir(),
            event_log_limit: defaults::event_log_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    pub fn base_url() -> String {
        "http://localhost:8080/api/v1/".into()
    }
    pub fn cards_path() -> String {
        "cards".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; campaign-sync/0.1)".into()
    }
    pub fn timeout() -> u64 {
        15
    }

    pub fn max_pages() -> u32 {
        20
    }
    pub fn page_size() -> u32 {
        50
    }
    pub fn locator_deadline() -> u64 {
        25
    }

    pub fn page_budget() -> u32 {
        40
    }
    pub fn sweep_deadline() -> u64 {
        240
    }
    pub fn lock_ttl() -> u64 {
        900
    }

    pub fn root_dir() -> String {
        "storage/kv".into()
    }
    pub fn event_log_limit() -> usize {
        500
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
