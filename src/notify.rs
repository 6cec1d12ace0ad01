//! Delivery of newly found posts to the configured channels.
//!
//! Telegram gets an HTML-formatted message per post through the Bot API;
//! the generic webhook gets a plain-text POST body. Delivery is best-effort:
//! a channel failure is logged and the run carries on, since the post is
//! already persisted in the result store.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, info, instrument};

use crate::config::NotificationConfig;
use crate::models::PostRecord;

const MESSAGE_PREVIEW_MAX_CHARS: usize = 500;

/// Pause between consecutive messages, to stay under Bot API rate limits.
const DELIVERY_PACING: Duration = Duration::from_secs(1);

pub struct Notifier {
    client: reqwest::Client,
    config: NotificationConfig,
}

impl Notifier {
    pub fn new(config: NotificationConfig) -> Self {
        Self { client: reqwest::Client::new(), config }
    }

    pub fn enabled(&self) -> bool {
        self.config.telegram.enabled || self.config.webhook.enabled
    }

    /// Send one message per new post to every enabled channel.
    #[instrument(level = "info", skip_all, fields(posts = posts.len()))]
    pub async fn send_new_posts(&self, posts: &[PostRecord]) {
        if !self.enabled() || posts.is_empty() {
            return;
        }
        info!(posts = posts.len(), "Sending notifications");

        for (i, post) in posts.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(DELIVERY_PACING).await;
            }
            if self.config.telegram.enabled {
                if let Err(e) = self.send_telegram(post).await {
                    error!(post_id = %post.post_id, error = %e, "Telegram delivery failed");
                }
            }
            if self.config.webhook.enabled {
                if let Err(e) = self.send_webhook(post).await {
                    error!(post_id = %post.post_id, error = %e, "Webhook delivery failed");
                }
            }
        }
    }

    async fn send_telegram(&self, post: &PostRecord) -> Result<(), Box<dyn std::error::Error>> {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.config.telegram.bot_token
        );
        let body = json!({
            "chat_id": self.config.telegram.chat_id,
            "text": format_telegram_message(post),
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(format!("telegram API returned {status}: {detail}").into());
        }
        debug!(post_id = %post.post_id, "Telegram message sent");
        Ok(())
    }

    async fn send_webhook(&self, post: &PostRecord) -> Result<(), Box<dyn std::error::Error>> {
        let response = self
            .client
            .post(&self.config.webhook.url)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(format_plain_message(post))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(format!("webhook returned {}", response.status()).into());
        }
        debug!(post_id = %post.post_id, "Webhook message sent");
        Ok(())
    }
}

/// HTML message for Telegram, with user text escaped.
fn format_telegram_message(post: &PostRecord) -> String {
    format!(
        "🔔 <b>New post in group {}</b>\n\
         👤 {}\n\
         🔑 {}\n\n\
         {}\n\n\
         <a href=\"{}\">Open post</a>",
        escape_html(&post.group_id),
        escape_html(&post.author_name),
        escape_html(&post.matched_keywords.join(", ")),
        escape_html(&cap_preview(&post.text_preview)),
        post.post_url,
    )
}

fn format_plain_message(post: &PostRecord) -> String {
    format!(
        "New post in group {}\nAuthor: {}\nKeywords: {}\n\n{}\n\n{}",
        post.group_id,
        post.author_name,
        post.matched_keywords.join(", "),
        cap_preview(&post.text_preview),
        post.post_url,
    )
}

fn cap_preview(text: &str) -> String {
    if text.chars().count() <= MESSAGE_PREVIEW_MAX_CHARS {
        text.to_string()
    } else {
        let capped: String = text.chars().take(MESSAGE_PREVIEW_MAX_CHARS).collect();
        format!("{capped}...")
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn post(text: &str, author: &str) -> PostRecord {
        let now = Utc::now();
        PostRecord {
            post_url: "https://www.facebook.com/groups/1/posts/42".to_string(),
            group_id: "1".to_string(),
            post_id: "42".to_string(),
            author_name: author.to_string(),
            user_id: "100".to_string(),
            text_preview: text.to_string(),
            matched_keywords: vec!["mua".to_string()],
            origin_timestamp: None,
            first_seen: now,
            last_seen: now,
            last_updated: now,
            scan_count: 1,
        }
    }

    #[test]
    fn telegram_message_escapes_user_text() {
        let message = format_telegram_message(&post("bán <script> & stuff", "A <b> B"));
        assert!(message.contains("bán &lt;script&gt; &amp; stuff"));
        assert!(message.contains("A &lt;b&gt; B"));
        // Our own markup survives.
        assert!(message.contains("<b>New post in group 1</b>"));
        assert!(message.contains("<a href=\"https://www.facebook.com/groups/1/posts/42\">"));
    }

    #[test]
    fn long_previews_are_capped() {
        let long = "x".repeat(800);
        let message = format_plain_message(&post(&long, "A"));
        assert!(message.contains(&format!("{}...", "x".repeat(500))));
        assert!(!message.contains(&"x".repeat(501)));
    }

    #[test]
    fn multibyte_preview_cap_is_char_based() {
        let long = "ă".repeat(600);
        let capped = cap_preview(&long);
        assert_eq!(capped.chars().count(), 503);
    }

    #[test]
    fn disabled_channels_mean_disabled_notifier() {
        let notifier = Notifier::new(NotificationConfig::default());
        assert!(!notifier.enabled());
    }
}
