/// State store module
///
/// Each record the bot remembers between runs lives in its own file under the
/// state directory:
/// - last successful post date
/// - monthly usage counters
/// - quote and scene cooldown histories
/// - holidays used per year
/// - the kill switch
/// - append-only engagement and error logs
///
/// Stores are independent; there is no transaction across files. A file that
/// is missing loads as the empty default, a file that exists but cannot be
/// parsed is an error.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// "YYYY-MM" key used by the monthly usage counter
pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// Write `contents` to a sibling temp file, then rename it over `path`
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create state directory {}", parent.display()))?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, contents)
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// A single JSON document on disk
#[derive(Debug, Clone)]
pub struct JsonStore<T> {
    path: PathBuf,
    _record: PhantomData<T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, or the default if the file does not exist
    pub fn load(&self) -> Result<T> {
        if !self.path.exists() {
            return Ok(T::default());
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;

        if raw.trim().is_empty() {
            return Ok(T::default());
        }

        serde_json::from_str(&raw).with_context(|| {
            format!(
                "State file {} is malformed; fix or remove it before the next run",
                self.path.display()
            )
        })
    }

    pub fn save(&self, record: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(record).context("Failed to serialize state")?;
        write_atomic(&self.path, &json)
    }
}

/// Last-used date per item (quote text or scene name)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CooldownHistory(BTreeMap<String, NaiveDate>);

impl CooldownHistory {
    pub fn last_used(&self, key: &str) -> Option<NaiveDate> {
        self.0.get(key).copied()
    }

    /// True when `key` was used fewer than `window_days` days before `today`
    pub fn is_cooling(&self, key: &str, today: NaiveDate, window_days: u32) -> bool {
        match self.last_used(key) {
            Some(used) => (today - used).num_days() < i64::from(window_days),
            None => false,
        }
    }

    pub fn record(&mut self, key: &str, date: NaiveDate) {
        self.0.insert(key.to_string(), date);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Successful posts per "YYYY-MM"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonthlyUsage(BTreeMap<String, u32>);

impl MonthlyUsage {
    pub fn count(&self, month: &str) -> u32 {
        self.0.get(month).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, month: &str) -> u32 {
        let count = self.0.entry(month.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

/// Holiday names already posted, per calendar year
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolidayUsage(BTreeMap<i32, BTreeSet<String>>);

impl HolidayUsage {
    pub fn is_used(&self, year: i32, name: &str) -> bool {
        self.0.get(&year).map(|used| used.contains(name)).unwrap_or(false)
    }

    pub fn mark_used(&mut self, year: i32, name: &str) {
        self.0.entry(year).or_default().insert(name.to_string());
    }
}

/// Process-wide posting switch
///
/// Tripped automatically on a failed health probe or a failed upload. Only an
/// operator clears it, by deleting the file or writing `{"state":"enabled"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum KillSwitch {
    #[default]
    Enabled,
    Disabled {
        reason: String,
        since: DateTime<Utc>,
    },
}

impl KillSwitch {
    pub fn disabled(reason: impl Into<String>, since: DateTime<Utc>) -> Self {
        KillSwitch::Disabled {
            reason: reason.into(),
            since,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, KillSwitch::Disabled { .. })
    }
}

/// Plain-text marker holding the date of the most recent successful post
#[derive(Debug, Clone)]
pub struct LastPostStore {
    path: PathBuf,
}

impl LastPostStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Option<NaiveDate>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }

        NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .map(Some)
            .with_context(|| format!("{} does not hold a YYYY-MM-DD date", self.path.display()))
    }

    pub fn save(&self, date: NaiveDate) -> Result<()> {
        write_atomic(&self.path, date.format(DATE_FORMAT).to_string().as_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostStatus {
    Success,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Success => "SUCCESS",
            PostStatus::Failed => "FAILED",
        }
    }
}

/// One row of the engagement log
#[derive(Debug, Clone)]
pub struct EngagementRecord {
    pub at: DateTime<chrono_tz::Tz>,
    pub scene: String,
    pub quote: String,
    pub status: PostStatus,
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn append_line(path: &Path, header: Option<&str>, line: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }

    let is_new = !path.exists();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    if let (true, Some(header)) = (is_new, header) {
        writeln!(file, "{}", header)?;
    }
    writeln!(file, "{}", line).with_context(|| format!("Failed to append to {}", path.display()))?;
    Ok(())
}

/// Append-only CSV of every attempted post
#[derive(Debug, Clone)]
pub struct EngagementLog {
    path: PathBuf,
}

impl EngagementLog {
    const HEADER: &'static str = "date,time,scene,quote,status";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, record: &EngagementRecord) -> Result<()> {
        let line = [
            record.at.format(DATE_FORMAT).to_string(),
            record.at.format("%H:%M:%S").to_string(),
            csv_field(&record.scene),
            csv_field(&record.quote),
            record.status.as_str().to_string(),
        ]
        .join(",");

        append_line(&self.path, Some(Self::HEADER), &line)
    }
}

/// Append-only diagnostic log
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, at: DateTime<Utc>, stage: &str, detail: &str) -> Result<()> {
        let detail = detail.replace(['\r', '\n'], " | ");
        append_line(&self.path, None, &format!("{} [{}] {}", at.to_rfc3339(), stage, detail))
    }
}

/// Every store the pipeline reads or writes, rooted in one directory
#[derive(Debug, Clone)]
pub struct StateStores {
    pub last_post: LastPostStore,
    pub monthly_usage: JsonStore<MonthlyUsage>,
    pub quote_history: JsonStore<CooldownHistory>,
    pub scene_history: JsonStore<CooldownHistory>,
    pub holiday_history: JsonStore<HolidayUsage>,
    pub kill_switch: JsonStore<KillSwitch>,
    pub engagement_log: EngagementLog,
    pub error_log: ErrorLog,
}

impl StateStores {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            last_post: LastPostStore::new(dir.join("last_post.txt")),
            monthly_usage: JsonStore::new(dir.join("monthly_usage.json")),
            quote_history: JsonStore::new(dir.join("quote_history.json")),
            scene_history: JsonStore::new(dir.join("scene_history.json")),
            holiday_history: JsonStore::new(dir.join("holiday_history.json")),
            kill_switch: JsonStore::new(dir.join("kill_switch.json")),
            engagement_log: EngagementLog::new(dir.join("engagement_log.csv")),
            error_log: ErrorLog::new(dir.join("error_log.txt")),
        }
    }

    /// Persist a disabled kill switch
    pub fn trip_kill_switch(&self, reason: &str, at: DateTime<Utc>) -> Result<()> {
        log::warn!("Tripping kill switch: {}", reason);
        self.kill_switch.save(&KillSwitch::disabled(reason, at))
    }
}
