use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use nag_core::ReminderTimeCalculator;
use nag_engine::{EngineConfig, RetryPolicy, TokioWakeConfig};

use crate::state::ensure_nag_home;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub user: UserSection,
    pub schedule: ScheduleSection,
    pub wake: WakeSection,
    pub jobs: JobsSection,
    pub retry: RetrySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSection {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    /// IANA zone used for repeat arithmetic and for parsing local deadlines.
    pub timezone: String,
    /// Triggers closer than this to "now" are treated as past.
    pub epsilon_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeSection {
    pub exact_allowed: bool,
    pub inexact_slack_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsSection {
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for UserSection {
    fn default() -> Self {
        Self {
            id: "local".to_string(),
        }
    }
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            timezone: "America/Chicago".to_string(),
            epsilon_secs: nag_core::DEFAULT_EPSILON_SECS,
        }
    }
}

impl Default for WakeSection {
    fn default() -> Self {
        Self {
            exact_allowed: true,
            inexact_slack_secs: 60,
        }
    }
}

impl Default for JobsSection {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        let p = RetryPolicy::default();
        Self {
            max_attempts: p.max_attempts,
            base_delay_ms: u64::try_from(p.base_delay.as_millis()).unwrap_or(u64::MAX),
            max_delay_ms: u64::try_from(p.max_delay.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl Config {
    pub fn timezone(&self) -> Result<Tz> {
        self.schedule
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid timezone {:?}: {e}", self.schedule.timezone))
    }

    pub fn calculator(&self) -> Result<ReminderTimeCalculator> {
        if self.schedule.epsilon_secs < 0 {
            bail!("schedule.epsilon_secs must not be negative");
        }
        let Some(epsilon) = chrono::Duration::try_seconds(self.schedule.epsilon_secs) else {
            bail!("schedule.epsilon_secs is out of range");
        };
        Ok(ReminderTimeCalculator::new(self.timezone()?, epsilon))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn wake_config(&self) -> TokioWakeConfig {
        TokioWakeConfig {
            exact_allowed: self.wake.exact_allowed,
            inexact_slack: Duration::from_secs(self.wake.inexact_slack_secs),
        }
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        Ok(EngineConfig {
            user_id: self.user.id.clone(),
            calculator: self.calculator()?,
            retry: self.retry_policy(),
            max_concurrent_jobs: self.jobs.max_concurrent.max(1),
        })
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_nag_home()?.join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    let p = config_path()?;
    if !p.exists() {
        return Ok(Config::default());
    }
    let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
    toml::from_str(&s).with_context(|| format!("parse {}", p.display()))
}

pub fn save_config(cfg: &Config) -> Result<()> {
    let p = config_path()?;
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(&p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

pub fn init_config() -> Result<()> {
    let p = config_path()?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    save_config(&Config::default())?;
    println!("Wrote {}", p.display());
    Ok(())
}

pub fn config_check() -> Result<()> {
    let p = config_path()?;
    let cfg = load_config()?;
    let source = if p.exists() { "file" } else { "defaults" };
    println!("Config: {} ({source})", p.display());

    let tz = cfg.timezone()?;
    println!("user.id = {}", cfg.user.id);
    println!("schedule.timezone = {tz}");
    println!("schedule.epsilon_secs = {}", cfg.schedule.epsilon_secs);
    println!("wake.exact_allowed = {}", cfg.wake.exact_allowed);
    println!("wake.inexact_slack_secs = {}", cfg.wake.inexact_slack_secs);
    println!("jobs.max_concurrent = {}", cfg.jobs.max_concurrent);
    println!(
        "retry = {} attempts, {}ms base, {}ms max",
        cfg.retry.max_attempts, cfg.retry.base_delay_ms, cfg.retry.max_delay_ms
    );
    cfg.calculator()?;
    println!("OK");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: Config = toml::from_str("[schedule]\ntimezone = \"Europe/Berlin\"\n").unwrap();
        assert_eq!(cfg.schedule.timezone, "Europe/Berlin");
        assert_eq!(cfg.schedule.epsilon_secs, nag_core::DEFAULT_EPSILON_SECS);
        assert_eq!(cfg.user.id, "local");
        assert!(cfg.wake.exact_allowed);
        assert_eq!(cfg.timezone().unwrap(), chrono_tz::Europe::Berlin);
    }

    #[test]
    fn defaults_round_trip_through_toml() {
        let s = toml::to_string_pretty(&Config::default()).unwrap();
        let back: Config = toml::from_str(&s).unwrap();
        assert_eq!(back.retry_policy(), RetryPolicy::default());
        assert_eq!(back.jobs.max_concurrent, 4);
    }

    #[test]
    fn bad_timezone_is_reported() {
        let mut cfg = Config::default();
        cfg.schedule.timezone = "Mars/Olympus".into();
        assert!(cfg.engine_config().is_err());
    }

    #[test]
    fn huge_epsilon_is_reported() {
        let mut cfg = Config::default();
        cfg.schedule.epsilon_secs = i64::MAX;
        assert!(cfg.calculator().is_err());
    }
}
