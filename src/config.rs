//! JSON configuration: keywords, group list, scroll pacing, scheduler
//! tuning, rendering backend, and notification targets.
//!
//! The file uses camelCase keys. When it is missing a commented template is
//! written in its place so a first run leaves something editable behind.

use std::error::Error;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::models::ScrollPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub keywords: Vec<String>,
    pub group_ids: Vec<String>,
    pub scroll_config: ScrollConfig,
    pub performance: PerformanceConfig,
    pub browserless: BrowserlessConfig,
    pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrollConfig {
    pub max_no_new_posts: u32,
    pub scroll_wait_min: u64,
    pub scroll_wait_max: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceConfig {
    pub max_concurrent_tabs: usize,
    pub group_cooldown_minutes: u32,
    pub max_retries: u32,
    pub batch_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserlessConfig {
    pub base_url: String,
    pub token: String,
    pub cookie_file: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationConfig {
    pub telegram: TelegramConfig,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            group_ids: Vec::new(),
            scroll_config: ScrollConfig::default(),
            performance: PerformanceConfig::default(),
            browserless: BrowserlessConfig::default(),
            notification: NotificationConfig::default(),
        }
    }
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self { max_no_new_posts: 3, scroll_wait_min: 2000, scroll_wait_max: 4000 }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tabs: 5,
            group_cooldown_minutes: 30,
            max_retries: 2,
            batch_delay_ms: 3000,
        }
    }
}

impl Default for BrowserlessConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            token: String::new(),
            cookie_file: "fb_cookies.json".to_string(),
        }
    }
}

impl Config {
    /// Load the config file, or write a default template and return `None`
    /// so the caller can tell the operator to edit it.
    pub async fn load_or_init(path: &Path) -> Result<Option<Self>, Box<dyn Error>> {
        if !path.exists() {
            let template = Config {
                keywords: vec!["mua".to_string(), "bán".to_string()],
                group_ids: vec!["1234567890".to_string()],
                ..Config::default()
            };
            tokio::fs::write(path, serde_json::to_string_pretty(&template)?).await?;
            warn!(path = %path.display(), "No config file found, wrote a template");
            return Ok(None);
        }

        let raw = tokio::fs::read_to_string(path).await?;
        let mut config: Config = serde_json::from_str(&raw)
            .map_err(|e| format!("invalid config {}: {e}", path.display()))?;
        config.normalize();
        config.validate()?;
        info!(
            path = %path.display(),
            keywords = config.keywords.len(),
            groups = config.group_ids.len(),
            "Config loaded"
        );
        Ok(Some(config))
    }

    /// Drop blank and duplicate entries while preserving order.
    fn normalize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.keywords.retain(|k| {
            let trimmed = k.trim();
            !trimmed.is_empty() && seen.insert(trimmed.to_lowercase())
        });

        let mut seen = std::collections::HashSet::new();
        self.group_ids.retain(|g| {
            let trimmed = g.trim();
            !trimmed.is_empty() && seen.insert(trimmed.to_string())
        });

        if self.performance.max_concurrent_tabs == 0 {
            self.performance.max_concurrent_tabs = 1;
        }
        if self.scroll_config.scroll_wait_max < self.scroll_config.scroll_wait_min {
            self.scroll_config.scroll_wait_max = self.scroll_config.scroll_wait_min;
        }
    }

    fn validate(&self) -> Result<(), Box<dyn Error>> {
        if self.keywords.is_empty() {
            return Err("config has no keywords; nothing would ever match".into());
        }
        if self.group_ids.is_empty() {
            return Err("config has no group ids; nothing to scan".into());
        }
        if self.notification.telegram.enabled
            && (self.notification.telegram.bot_token.is_empty()
                || self.notification.telegram.chat_id.is_empty())
        {
            return Err("telegram notification enabled but botToken/chatId missing".into());
        }
        if self.notification.webhook.enabled {
            Url::parse(&self.notification.webhook.url)
                .map_err(|e| format!("webhook url is not a valid URL: {e}"))?;
        }
        Url::parse(&self.browserless.base_url)
            .map_err(|e| format!("browserless baseUrl is not a valid URL: {e}"))?;
        Ok(())
    }

    pub fn scroll_policy(&self) -> ScrollPolicy {
        ScrollPolicy {
            max_no_new_posts: self.scroll_config.max_no_new_posts,
            scroll_wait_min_ms: self.scroll_config.scroll_wait_min,
            scroll_wait_max_ms: self.scroll_config.scroll_wait_max,
        }
    }
}
