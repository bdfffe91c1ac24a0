//! String forms of the task enums as stored in the document store.
//!
//! Formats:
//!   status    pending | completed | overdue | abandoned
//!   priority  urgent | high | normal | low
//!   reminder  on_time | early:<n>m | early:<n>h | early:<n>d
//!   repeat    none | daily | weekly | monthly | yearly
//!             | count:<period>:<remaining> | days:mon,wed,fri
//!
//! Parsing is case-insensitive and ignores surrounding whitespace. Anything
//! else is rejected as `InvalidState`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Duration, Weekday};
use regex::Regex;

use crate::error::ReminderError;
use crate::task::{Priority, ReminderPolicy, RepeatPeriod, RepeatRule, TaskStatus, WeekdaySet};

static EARLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^early:(?P<n>\d{1,6})(?P<unit>[mhd])$").expect("valid regex"));

static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^count:(?P<period>daily|weekly|monthly|yearly):(?P<n>\d{1,6})$")
        .expect("valid regex")
});

fn invalid(kind: &str, raw: &str) -> ReminderError {
    ReminderError::InvalidState(format!("unknown {kind} '{raw}'"))
}

fn normalize(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Overdue => "overdue",
            Self::Abandoned => "abandoned",
        })
    }
}

impl FromStr for TaskStatus {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "overdue" => Ok(Self::Overdue),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(invalid("status", s)),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        })
    }
}

impl FromStr for Priority {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "urgent" => Ok(Self::Urgent),
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            _ => Err(invalid("priority", s)),
        }
    }
}

impl fmt::Display for ReminderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnTime => f.write_str("on_time"),
            Self::EarlyOffset(d) => {
                let minutes = d.num_minutes();
                if minutes != 0 && minutes % (24 * 60) == 0 {
                    write!(f, "early:{}d", minutes / (24 * 60))
                } else if minutes != 0 && minutes % 60 == 0 {
                    write!(f, "early:{}h", minutes / 60)
                } else {
                    write!(f, "early:{}m", minutes)
                }
            }
        }
    }
}

impl FromStr for ReminderPolicy {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = normalize(s);
        if norm == "on_time" {
            return Ok(Self::OnTime);
        }
        let caps = EARLY_RE.captures(&norm).ok_or_else(|| invalid("reminder policy", s))?;
        let n: i64 = caps["n"].parse().map_err(|_| invalid("reminder policy", s))?;
        let offset = match &caps["unit"] {
            "m" => Duration::minutes(n),
            "h" => Duration::hours(n),
            _ => Duration::days(n),
        };
        if offset.is_zero() {
            // "early by nothing" is just on time
            return Ok(Self::OnTime);
        }
        Ok(Self::EarlyOffset(offset))
    }
}

impl fmt::Display for RepeatPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        })
    }
}

impl FromStr for RepeatPeriod {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            _ => Err(invalid("repeat period", s)),
        }
    }
}

fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

fn parse_weekday(code: &str) -> Option<Weekday> {
    match code.trim() {
        "mon" => Some(Weekday::Mon),
        "tue" => Some(Weekday::Tue),
        "wed" => Some(Weekday::Wed),
        "thu" => Some(Weekday::Thu),
        "fri" => Some(Weekday::Fri),
        "sat" => Some(Weekday::Sat),
        "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

impl fmt::Display for RepeatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Daily => f.write_str("daily"),
            Self::Weekly => f.write_str("weekly"),
            Self::Monthly => f.write_str("monthly"),
            Self::Yearly => f.write_str("yearly"),
            Self::CountN { period, remaining } => write!(f, "count:{period}:{remaining}"),
            Self::DaysOfWeek(days) => {
                let codes: Vec<&str> = days.iter().map(weekday_code).collect();
                write!(f, "days:{}", codes.join(","))
            }
        }
    }
}

impl FromStr for RepeatRule {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = normalize(s);
        match norm.as_str() {
            "none" => return Ok(Self::None),
            "daily" => return Ok(Self::Daily),
            "weekly" => return Ok(Self::Weekly),
            "monthly" => return Ok(Self::Monthly),
            "yearly" => return Ok(Self::Yearly),
            _ => {}
        }

        if let Some(caps) = COUNT_RE.captures(&norm) {
            let period: RepeatPeriod = caps["period"].parse()?;
            let remaining: u32 = caps["n"].parse().map_err(|_| invalid("repeat rule", s))?;
            return Ok(Self::CountN { period, remaining });
        }

        if let Some(list) = norm.strip_prefix("days:") {
            let mut set = WeekdaySet::new();
            // "days:" is an empty set, which never repeats.
            for code in list.split(',').filter(|_| !list.is_empty()) {
                set.insert(parse_weekday(code).ok_or_else(|| invalid("repeat rule", s))?);
            }
            return Ok(Self::DaysOfWeek(set));
        }

        Err(invalid("repeat rule", s))
    }
}
