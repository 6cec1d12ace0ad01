//! Session cookie loading for the rendering service.
//!
//! Cookies are pasted by the user from a Cookie-Editor export into a JSON
//! file. Both a bare array and a `{ "cookies": [ … ] }` wrapper are
//! accepted. Loading normalizes each cookie into the shape the page script
//! feeds to `page.setCookie`, including the `sameSite` value mapping the
//! browser expects. A missing file is not an error: a template is written
//! for the user to fill in and an empty list is returned.

use std::error::Error;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A cookie as exported by Cookie Editor.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCookie {
    name: String,
    value: String,
    domain: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    expiration_date: Option<f64>,
    #[serde(default)]
    http_only: Option<bool>,
    #[serde(default)]
    secure: Option<bool>,
    #[serde(default)]
    same_site: Option<String>,
}

/// A normalized cookie, serialized into the page script's `setCookie` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Unix seconds; `-1` marks a session cookie.
    pub expires: f64,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: String,
}

/// Accept either a bare array or the `{ "cookies": [...] }` wrapper.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CookieDocument {
    Bare(Vec<RawCookie>),
    Wrapped { cookies: Vec<RawCookie> },
}

/// Map a Cookie-Editor `sameSite` value onto what the browser accepts.
fn convert_same_site(same_site: Option<&str>) -> String {
    match same_site {
        None | Some("no_restriction") => "None".to_string(),
        Some("lax") => "Lax".to_string(),
        Some("strict") => "Strict".to_string(),
        Some(_) => "Lax".to_string(),
    }
}

fn normalize(raw: RawCookie) -> SessionCookie {
    SessionCookie {
        same_site: convert_same_site(raw.same_site.as_deref()),
        name: raw.name,
        value: raw.value,
        domain: raw.domain,
        path: raw.path.unwrap_or_else(|| "/".to_string()),
        expires: raw.expiration_date.unwrap_or(-1.0),
        http_only: raw.http_only.unwrap_or(false),
        secure: raw.secure.unwrap_or(false),
    }
}

/// Load and normalize the cookie file.
///
/// Returns an empty list when the file is missing (after writing a template
/// for the user) or when the cookie array is empty; the caller decides
/// whether that is fatal.
pub async fn load_cookie_file(path: &Path) -> Result<Vec<SessionCookie>, Box<dyn Error>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(_) => {
            warn!(path = %path.display(), "Cookie file not found; writing a template");
            write_template(path).await?;
            return Ok(Vec::new());
        }
    };

    let document: CookieDocument = serde_json::from_str(&raw)?;
    let raw_cookies = match document {
        CookieDocument::Bare(cookies) => cookies,
        CookieDocument::Wrapped { cookies } => cookies,
    };

    if raw_cookies.is_empty() {
        warn!(path = %path.display(), "Cookie file has an empty cookies array");
        return Ok(Vec::new());
    }

    let cookies: Vec<SessionCookie> = raw_cookies.into_iter().map(normalize).collect();
    info!(count = cookies.len(), path = %path.display(), "Loaded session cookies");
    Ok(cookies)
}

/// Write an empty cookie file template for the user to fill in.
async fn write_template(path: &Path) -> Result<(), Box<dyn Error>> {
    let template = serde_json::json!({
        "_comment": "Paste cookies exported from Cookie Editor here",
        "cookies": [],
    });
    tokio::fs::write(path, serde_json::to_string_pretty(&template)?).await?;
    info!(path = %path.display(), "Wrote cookie file template");
    Ok(())
}
