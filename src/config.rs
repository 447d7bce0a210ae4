/// Configuration module for environment variables, credentials and cost controls
///
/// Everything the bot needs is read here once, at process start. The resulting
/// `Config` is passed into every component; nothing else touches the environment.

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_TIMEZONE: &str = "Asia/Manila";

/// A local-hour range during which posting is allowed (end exclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl PostWindow {
    pub fn contains(&self, hour: u32) -> bool {
        self.start_hour <= hour && hour < self.end_hour
    }
}

impl FromStr for PostWindow {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (start, end) = s
            .trim()
            .split_once('-')
            .with_context(|| format!("Posting window '{}' must look like 19-21", s))?;

        let start_hour: u32 = start
            .trim()
            .parse()
            .with_context(|| format!("Invalid start hour in posting window '{}'", s))?;
        let end_hour: u32 = end
            .trim()
            .parse()
            .with_context(|| format!("Invalid end hour in posting window '{}'", s))?;

        if start_hour >= end_hour || end_hour > 24 {
            bail!("Posting window '{}' must satisfy start < end <= 24", s);
        }

        Ok(PostWindow { start_hour, end_hour })
    }
}

/// Secrets required before any network call is made
#[derive(Clone)]
pub struct Credentials {
    pub openai_api_key: String,
    pub page_access_token: String,
    pub page_id: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &"[REDACTED]")
            .field("page_access_token", &"[REDACTED]")
            .field("page_id", &self.page_id)
            .finish()
    }
}

#[derive(Clone)]
pub struct Config {
    /// OpenAI API key used for image generation
    pub openai_api_key: Option<String>,

    /// Facebook page access token used for uploads and the health probe
    pub page_access_token: Option<String>,

    /// Facebook page that receives the posts
    pub page_id: Option<String>,

    /// Time zone for every date and hour decision
    pub timezone: Tz,

    /// Exercise the whole pipeline without paid calls or state mutation
    pub dry_run: bool,

    /// Directory holding the state files
    pub state_dir: PathBuf,

    pub font_path: PathBuf,
    pub watermark_font_path: PathBuf,
    pub watermark_text: String,

    /// Local hours during which a post may go out
    pub post_windows: Vec<PostWindow>,

    /// Maximum successful posts per calendar month
    pub monthly_cap: u32,

    pub quote_cooldown_days: u32,
    pub scene_cooldown_days: u32,

    /// Image model to use (e.g., "gpt-image-1")
    pub image_model: String,
    pub image_size: String,

    pub openai_base_url: String,
    pub graph_base_url: String,

    /// Timeout applied to every outbound HTTP call
    pub http_timeout_secs: u64,

    /// Where a dry run writes the composed image
    pub dry_run_output: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("page_access_token", &self.page_access_token.as_ref().map(|_| "[REDACTED]"))
            .field("page_id", &self.page_id)
            .field("timezone", &self.timezone)
            .field("dry_run", &self.dry_run)
            .field("state_dir", &self.state_dir)
            .field("font_path", &self.font_path)
            .field("post_windows", &self.post_windows)
            .field("monthly_cap", &self.monthly_cap)
            .field("quote_cooldown_days", &self.quote_cooldown_days)
            .field("scene_cooldown_days", &self.scene_cooldown_days)
            .field("image_model", &self.image_model)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a value is present but malformed (bad number,
    /// bad posting window, unknown time zone). Missing credentials are not
    /// an error here; the gatekeeper reports them after the kill switch check.
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let timezone_name = non_empty("TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone: Tz = timezone_name
            .parse()
            .map_err(|e| anyhow::anyhow!("Unknown TIMEZONE '{}': {}", timezone_name, e))?;

        let font_path = PathBuf::from(
            non_empty("FONT_PATH").unwrap_or_else(|| "fonts/quote.ttf".to_string()),
        );
        let watermark_font_path = non_empty("WATERMARK_FONT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| font_path.clone());

        let post_windows = non_empty("POST_WINDOWS")
            .unwrap_or_else(|| "19-21".to_string())
            .split(',')
            .filter(|w| !w.trim().is_empty())
            .map(|w| w.parse::<PostWindow>())
            .collect::<Result<Vec<PostWindow>>>()?;

        if post_windows.is_empty() {
            bail!("POST_WINDOWS must name at least one window");
        }

        Ok(Config {
            openai_api_key: non_empty("OPENAI_API_KEY"),
            page_access_token: non_empty("FB_PAGE_ACCESS_TOKEN"),
            page_id: non_empty("FB_PAGE_ID"),
            timezone,
            dry_run: non_empty("DRY_RUN").map(|v| parse_flag(&v)).unwrap_or(false),
            state_dir: PathBuf::from(non_empty("STATE_DIR").unwrap_or_else(|| ".".to_string())),
            font_path,
            watermark_font_path,
            watermark_text: non_empty("WATERMARK_TEXT")
                .unwrap_or_else(|| "@dailyquietlight".to_string()),
            post_windows,
            monthly_cap: parse_number(&non_empty, "MONTHLY_CAP", 30)?,
            quote_cooldown_days: parse_number(&non_empty, "QUOTE_COOLDOWN_DAYS", 35)?,
            scene_cooldown_days: parse_number(&non_empty, "SCENE_COOLDOWN_DAYS", 5)?,
            image_model: non_empty("IMAGE_MODEL").unwrap_or_else(|| "gpt-image-1".to_string()),
            image_size: non_empty("IMAGE_SIZE").unwrap_or_else(|| "1024x1536".to_string()),
            openai_base_url: non_empty("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            graph_base_url: non_empty("GRAPH_BASE_URL")
                .unwrap_or_else(|| "https://graph.facebook.com/v19.0".to_string()),
            http_timeout_secs: parse_number(&non_empty, "HTTP_TIMEOUT_SECS", 120)?,
            dry_run_output: PathBuf::from(
                non_empty("DRY_RUN_OUTPUT").unwrap_or_else(|| "dry_run_preview.jpg".to_string()),
            ),
        })
    }

    /// Return the credentials, or an error naming every missing variable
    pub fn credentials(&self) -> Result<Credentials> {
        let mut missing = Vec::new();
        if self.openai_api_key.is_none() {
            missing.push("OPENAI_API_KEY");
        }
        if self.page_access_token.is_none() {
            missing.push("FB_PAGE_ACCESS_TOKEN");
        }
        if self.page_id.is_none() {
            missing.push("FB_PAGE_ID");
        }

        match (&self.openai_api_key, &self.page_access_token, &self.page_id) {
            (Some(openai_api_key), Some(page_access_token), Some(page_id)) => Ok(Credentials {
                openai_api_key: openai_api_key.clone(),
                page_access_token: page_access_token.clone(),
                page_id: page_id.clone(),
            }),
            _ => bail!("Missing required environment variables: {}", missing.join(", ")),
        }
    }

    /// Whether the given local hour falls inside any posting window
    pub fn in_post_window(&self, hour: u32) -> bool {
        self.post_windows.iter().any(|w| w.contains(hour))
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_number<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a non-negative whole number, got '{}'", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
pub(crate) fn test_config(state_dir: &std::path::Path) -> Config {
    let state_dir = state_dir.to_string_lossy().to_string();
    Config::from_lookup(|key| match key {
        "OPENAI_API_KEY" => Some("sk-test".to_string()),
        "FB_PAGE_ACCESS_TOKEN" => Some("page-token".to_string()),
        "FB_PAGE_ID" => Some("12345".to_string()),
        "STATE_DIR" => Some(state_dir.clone()),
        "FONT_PATH" => Some(format!("{}/quote.ttf", state_dir)),
        _ => None,
    })
    .expect("test configuration is valid")
}
