//! Page driver backed by a Browserless-style rendering service.
//!
//! Each scan lane gets its own [`BrowserlessDriver`], which submits a page
//! function to the service's `/function` endpoint over HTTP. The service
//! runs the function inside a real headless browser: set the session
//! cookies, load the group's chronological feed, replay the accumulated
//! scroll steps, and return the posts currently visible. The driver keeps
//! the session state — scroll depth and the URLs already handed back — on
//! this side of the wire, so each `extract_observations` call only yields
//! observations the controller has not seen in this session.
//!
//! The service endpoint and optional access token come from configuration;
//! every request carries a bounded timeout so a wedged render surfaces as a
//! retryable [`DriverError`] instead of hanging a lane.

use std::collections::HashSet;
use std::time::Duration;

use chrono::DateTime;
use serde::Deserialize;
use tracing::{debug, warn};

use super::cookies::SessionCookie;
use super::{DriverError, PageDriver};
use crate::models::RawPostObservation;
use crate::post_id::strip_query;

/// Bound on a single render request, navigation included.
const RENDER_TIMEOUT: Duration = Duration::from_secs(90);

/// Page function executed by the rendering service.
///
/// Adapted for the service's module form: sets cookies, navigates to the
/// feed, scrolls `context.scrolls` times with a stability wait after each
/// step, then extracts one entry per `[role="article"]` element with a
/// permalink, author name, profile id, and publish timestamp where present.
const PAGE_FUNCTION: &str = r#"
export default async function ({ page, context }) {
  const { url, scrolls, cookies } = context;
  if (cookies.length > 0) {
    await page.setCookie(...cookies);
  }
  await page.goto(url, { waitUntil: "networkidle2", timeout: 60000 });
  await new Promise((r) => setTimeout(r, 3000));

  const accessible = await page.evaluate(() => {
    const body = document.body.innerText;
    return (
      !body.includes("Bạn hiện không xem được nội dung này") &&
      !body.includes("This content isn't available right now")
    );
  });
  if (!accessible) {
    return { data: { accessible: false, progressed: false, posts: [] }, type: "application/json" };
  }

  let progressed = true;
  for (let i = 0; i < scrolls; i++) {
    progressed = await page.evaluate(() => {
      const before = window.pageYOffset;
      const height = document.documentElement.scrollHeight;
      const viewport = document.documentElement.clientHeight;
      window.scrollBy(0, viewport * 0.8);
      const after = window.pageYOffset;
      if (after + viewport >= height - 100) return false;
      return after !== before;
    });
    await page
      .waitForFunction(() => document.querySelectorAll('[role="progressbar"]').length === 0, { timeout: 5000 })
      .catch(() => {});
    await new Promise((r) => setTimeout(r, 1000));
    if (!progressed) break;
  }

  const posts = await page.evaluate(() => {
    const out = [];
    for (const article of document.querySelectorAll('[role="article"]')) {
      try {
        const text = article.innerText || "";
        let postUrl = "";
        for (const link of article.querySelectorAll("a[href]")) {
          const href = link.href;
          if (href.includes("/posts/") || href.includes("/permalink/") || href.includes("story_fbid=")) {
            postUrl = href.split("?")[0];
            break;
          }
        }
        if (!postUrl) continue;

        let timestamp = null;
        for (const sel of ["abbr[data-utime]", "span[data-utime]", "abbr[data-timestamp]", "time[datetime]"]) {
          const el = article.querySelector(sel);
          if (!el) continue;
          const utime = el.getAttribute("data-utime") || el.getAttribute("data-timestamp");
          if (utime && !isNaN(parseInt(utime, 10))) {
            const n = parseInt(utime, 10);
            timestamp = utime.length === 10 ? n * 1000 : n;
            break;
          }
          const datetime = el.getAttribute("datetime");
          if (datetime && !isNaN(Date.parse(datetime))) {
            timestamp = Date.parse(datetime);
            break;
          }
        }

        let authorName = "Unknown";
        for (const sel of ["h2 span.x193iq5w", "h3 span.x193iq5w", "h4 span", 'a[role="link"] strong span', "strong span"]) {
          const el = article.querySelector(sel);
          if (el && el.textContent.trim()) {
            authorName = el.textContent.trim();
            break;
          }
        }

        let userId = "unknown";
        const profile = article.querySelector('a[href*="/user/"], a[href*="/profile.php?id="]');
        if (profile) {
          const m = profile.href.match(/\/user\/(\d+)/) || profile.href.match(/id=(\d+)/);
          if (m) userId = m[1];
        }

        out.push({ text, postUrl, authorName, userId, timestamp });
      } catch (e) {
        // skip malformed article
      }
    }
    return out;
  });

  return { data: { accessible: true, progressed, posts }, type: "application/json" };
}
"#;

/// What one render round returns.
#[derive(Debug, Deserialize)]
struct RenderResult {
    accessible: bool,
    progressed: bool,
    posts: Vec<WireObservation>,
}

/// A post as serialized by the page function.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireObservation {
    text: String,
    post_url: String,
    author_name: String,
    user_id: String,
    /// Epoch milliseconds, when the page exposed a publish time.
    timestamp: Option<i64>,
}

/// One page session against the rendering service.
pub struct BrowserlessDriver {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    cookies: Vec<SessionCookie>,
    feed_url: Option<String>,
    scroll_rounds: u32,
    last_progressed: bool,
    pending: Vec<RawPostObservation>,
    seen_urls: HashSet<String>,
}

impl BrowserlessDriver {
    /// Create a fresh session. Cheap; the scheduler calls this once per lane.
    pub fn new(base_url: &str, token: Option<&str>, cookies: Vec<SessionCookie>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RENDER_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            cookies,
            feed_url: None,
            scroll_rounds: 0,
            last_progressed: true,
            pending: Vec::new(),
            seen_urls: HashSet::new(),
        }
    }

    /// The chronological feed URL for a group.
    fn feed_url_for(group_id: &str) -> String {
        format!("https://www.facebook.com/groups/{group_id}?sorting_setting=CHRONOLOGICAL")
    }

    /// Run the page function at the current scroll depth.
    async fn render(&self, url: &str) -> Result<RenderResult, DriverError> {
        let mut endpoint = format!("{}/function", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        let body = serde_json::json!({
            "code": PAGE_FUNCTION,
            "context": {
                "url": url,
                "scrolls": self.scroll_rounds,
                "cookies": self.cookies,
            },
        });

        let resp = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(DriverError::Navigation {
                url: url.to_string(),
                reason: format!("render service returned {status}: {message}"),
            });
        }

        resp.json::<RenderResult>()
            .await
            .map_err(|e| DriverError::Protocol(format!("unparseable render result: {e}")))
    }

    /// Stash a render's posts, filtering out URLs already handed back or
    /// already pending.
    ///
    /// Accumulates rather than overwrites: a post absorbed during `open` and
    /// then virtualized out of the DOM before the next render is still
    /// delivered by the next `extract_observations` call.
    fn absorb(&mut self, posts: Vec<WireObservation>) {
        for post in posts {
            let post_url = strip_query(&post.post_url).to_string();
            if self.seen_urls.contains(&post_url)
                || self.pending.iter().any(|p| p.post_url == post_url)
            {
                continue;
            }
            self.pending.push(RawPostObservation {
                origin_timestamp: post.timestamp.and_then(DateTime::from_timestamp_millis),
                post_url,
                text: post.text,
                author_name: post.author_name,
                user_id: post.user_id,
            });
        }
    }
}

impl PageDriver for BrowserlessDriver {
    async fn open(&mut self, group_id: &str) -> Result<bool, DriverError> {
        let url = Self::feed_url_for(group_id);
        self.scroll_rounds = 0;
        self.seen_urls.clear();
        self.pending.clear();

        let result = self.render(&url).await?;
        if !result.accessible {
            warn!(%group_id, "Group feed not accessible for this session");
            return Ok(false);
        }

        self.feed_url = Some(url);
        self.last_progressed = true;
        self.absorb(result.posts);
        Ok(true)
    }

    async fn scroll_step(&mut self) -> Result<bool, DriverError> {
        let Some(url) = self.feed_url.clone() else {
            return Err(DriverError::Protocol("scroll_step before open".to_string()));
        };
        if !self.last_progressed {
            return Ok(false);
        }

        self.scroll_rounds += 1;
        let result = self.render(&url).await?;
        self.last_progressed = result.progressed;
        self.absorb(result.posts);
        debug!(rounds = self.scroll_rounds, progressed = result.progressed, "Scroll step rendered");
        Ok(result.progressed)
    }

    async fn await_stable(&mut self) {
        // The page function already waits for spinners to clear after each
        // scroll; there is nothing further to await on this side.
    }

    async fn extract_observations(&mut self) -> Result<Vec<RawPostObservation>, DriverError> {
        let batch = std::mem::take(&mut self.pending);
        for obs in &batch {
            self.seen_urls.insert(obs.post_url.clone());
        }
        Ok(batch)
    }
}
