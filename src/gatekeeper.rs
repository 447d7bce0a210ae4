/// Gatekeeper module
///
/// Pre-flight checks that decide, before any paid call, whether a run should
/// go ahead. They run in a fixed order and the first failing check wins:
/// 1. kill switch
/// 2. credentials and font files
/// 3. publishing credential health probe
/// 4. monthly cap
/// 5. posting window
/// 6. one post per day
///
/// Dry runs skip 3-6 but never 1-2.

use anyhow::{bail, Result};
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use std::fmt;

use crate::config::{Config, Credentials};
use crate::publish::Publisher;
use crate::state::{month_key, KillSwitch, StateStores};

/// Why a run stopped without posting; none of these are errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    KillSwitchActive {
        reason: String,
        since: DateTime<Utc>,
    },
    MonthlyCapReached {
        month: String,
        count: u32,
        cap: u32,
    },
    OutsidePostWindow {
        hour: u32,
    },
    AlreadyPostedToday,
}

impl fmt::Display for GateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateRejection::KillSwitchActive { reason, since } => write!(
                f,
                "kill switch active since {} ({}); clear it to resume posting",
                since.to_rfc3339(),
                reason
            ),
            GateRejection::MonthlyCapReached { month, count, cap } => {
                write!(f, "monthly cap reached for {} ({}/{})", month, count, cap)
            }
            GateRejection::OutsidePostWindow { hour } => {
                write!(f, "hour {} is outside every posting window", hour)
            }
            GateRejection::AlreadyPostedToday => write!(f, "already posted today"),
        }
    }
}

/// Result of the checks that need no network
#[derive(Debug)]
pub enum StaticGate {
    Proceed(Credentials),
    Rejected(GateRejection),
}

/// Result of the checks run once clients exist
#[derive(Debug)]
pub enum RuntimeGate {
    Proceed,
    Rejected(GateRejection),
    /// The health probe failed and the kill switch has been tripped
    HealthFailed(anyhow::Error),
}

pub fn kill_switch_rejection(stores: &StateStores) -> Result<Option<GateRejection>> {
    match stores.kill_switch.load()? {
        KillSwitch::Enabled => Ok(None),
        KillSwitch::Disabled { reason, since } => {
            Ok(Some(GateRejection::KillSwitchActive { reason, since }))
        }
    }
}

/// Kill switch, then credentials and fonts
///
/// # Errors
/// Missing credentials or font files, or an unreadable kill switch file, are
/// fatal configuration errors.
pub fn check_static(config: &Config, stores: &StateStores) -> Result<StaticGate> {
    if let Some(rejection) = kill_switch_rejection(stores)? {
        return Ok(StaticGate::Rejected(rejection));
    }

    let credentials = config.credentials()?;

    for font in [&config.font_path, &config.watermark_font_path] {
        if !font.is_file() {
            bail!("Font file not found: {}", font.display());
        }
    }

    Ok(StaticGate::Proceed(credentials))
}

/// Health probe, monthly cap, posting window and daily guard
///
/// Only the health probe has a side effect: on failure the kill switch is
/// tripped first, then the failure is written to the error log.
pub async fn check_runtime(
    config: &Config,
    stores: &StateStores,
    publisher: &dyn Publisher,
    now: DateTime<Tz>,
) -> Result<RuntimeGate> {
    if config.dry_run {
        log::info!("Dry run: skipping health, cap, window and daily checks");
        return Ok(RuntimeGate::Proceed);
    }

    if let Err(e) = publisher.check_health().await {
        let detail = format!("{:#}", e);
        log::error!("Publishing credential check failed: {}", detail);
        let at = now.with_timezone(&Utc);
        stores.trip_kill_switch(&format!("health check failed: {}", detail), at)?;
        stores.error_log.append(at, "health", &detail)?;
        return Ok(RuntimeGate::HealthFailed(e));
    }

    let today = now.date_naive();
    let month = month_key(today);
    let count = stores.monthly_usage.load()?.count(&month);
    if count >= config.monthly_cap {
        return Ok(RuntimeGate::Rejected(GateRejection::MonthlyCapReached {
            month,
            count,
            cap: config.monthly_cap,
        }));
    }

    if !config.in_post_window(now.hour()) {
        return Ok(RuntimeGate::Rejected(GateRejection::OutsidePostWindow { hour: now.hour() }));
    }

    if stores.last_post.load()? == Some(today) {
        return Ok(RuntimeGate::Rejected(GateRejection::AlreadyPostedToday));
    }

    Ok(RuntimeGate::Proceed)
}
