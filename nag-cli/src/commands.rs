//! One-shot subcommands that work on the task file directly.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use nag_core::{Priority, ReminderPolicy, RepeatRule, Task, TaskStatus, parse_local_deadline_to_utc};
use nag_engine::TaskStore;

use crate::config::Config;
use crate::store::FileTaskStore;

/// Options shared by `nag add` and the console `add` command.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub due: Option<String>,
    pub reminder: Option<String>,
    pub repeat: Option<String>,
    pub priority: Option<String>,
}

/// `+90m`, `+2h`, `+1d` relative to now, or `YYYY-MM-DD HH:MM` local time.
pub fn parse_when(s: &str, tz: Tz, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let s = s.trim();
    let Some(rel) = s.strip_prefix('+') else {
        return parse_local_deadline_to_utc(s, tz.name());
    };
    let Some((split, _)) = rel.char_indices().last() else {
        bail!("bad relative time '{s}'");
    };
    let (n, unit) = rel.split_at(split);
    let n: i64 = n.parse().with_context(|| format!("bad relative time '{s}'"))?;
    let offset = match unit {
        "m" => Duration::try_minutes(n),
        "h" => Duration::try_hours(n),
        "d" => Duration::try_days(n),
        _ => bail!("bad relative time '{s}' (use +<n>m, +<n>h or +<n>d)"),
    };
    match offset.and_then(|o| now.checked_add_signed(o)) {
        Some(at) => Ok(at),
        None => bail!("relative time '{s}' is out of range"),
    }
}

pub fn build_task(input: &NewTask, tz: Tz, now: DateTime<Utc>) -> Result<Task> {
    let title = input.title.trim();
    if title.is_empty() {
        bail!("task title is empty");
    }
    let mut task = Task::draft(title);
    if let Some(due) = &input.due {
        task = task.with_due_date(parse_when(due, tz, now)?);
    }
    if let Some(r) = &input.reminder {
        task = task.with_reminder(r.parse::<ReminderPolicy>()?);
    }
    if let Some(r) = &input.repeat {
        task = task.with_repeat(r.parse::<RepeatRule>()?);
    }
    if let Some(p) = &input.priority {
        task = task.with_priority(p.parse::<Priority>()?);
    }
    if task.repeat.is_repeating() && task.due_date.is_none() {
        bail!("a repeating task needs a due date");
    }
    Ok(task)
}

pub fn format_local(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%a %Y-%m-%d %H:%M %Z").to_string()
}

pub fn describe(task: &Task, tz: Tz) -> String {
    let due = task
        .due_date
        .map(|d| format_local(d, tz))
        .unwrap_or_else(|| "no due date".to_string());
    let mut line = format!(
        "{} [{}] {} | due {} | {}",
        task.id().unwrap_or("-"),
        task.status,
        task.title,
        due,
        task.priority
    );
    if task.repeat.is_repeating() {
        line.push_str(&format!(" | repeat {}", task.repeat));
    }
    if task.reminder != ReminderPolicy::OnTime {
        line.push_str(&format!(" | remind {}", task.reminder));
    }
    line
}

pub fn add(cfg: &Config, store: &FileTaskStore, input: &NewTask) -> Result<Task> {
    let task = build_task(input, cfg.timezone()?, Utc::now())?;
    let task = store.add(&cfg.user.id, task)?;
    println!("Added {}", describe(&task, cfg.timezone()?));
    Ok(task)
}

pub fn list(cfg: &Config, store: &FileTaskStore, all: bool) -> Result<()> {
    let tz = cfg.timezone()?;
    let mut tasks = store.all(&cfg.user.id)?;
    tasks.retain(|t| all || t.is_pending());
    tasks.sort_by_key(|t| (t.due_date.is_none(), t.due_date, t.priority));
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    for t in &tasks {
        println!("{}", describe(t, tz));
    }
    Ok(())
}

pub fn delete(cfg: &Config, store: &FileTaskStore, id: &str) -> Result<()> {
    if store.delete(&cfg.user.id, id)? {
        println!("Deleted {id}");
    } else {
        println!("No task {id}");
    }
    Ok(())
}

pub async fn complete(cfg: &Config, store: &FileTaskStore, id: &str) -> Result<()> {
    match store.get_task_by_id(&cfg.user.id, id).await? {
        None => println!("No task {id}"),
        Some(t) if !t.is_pending() => println!("{id} is already {}", t.status),
        Some(_) => {
            store.update_task_status(&cfg.user.id, id, TaskStatus::Completed).await?;
            println!("Completed {id}");
        }
    }
    Ok(())
}

/// Upcoming triggers as the daemon would schedule them right now.
pub async fn status(cfg: &Config, store: &FileTaskStore) -> Result<()> {
    let calc = cfg.calculator()?;
    let tz = calc.timezone();
    let now = Utc::now();
    let pending = store.list_pending_tasks_with_deadlines(&cfg.user.id).await?;

    let mut upcoming: Vec<(DateTime<Utc>, &Task)> = Vec::new();
    let mut missed = 0usize;
    for t in &pending {
        match calc.trigger(t, now) {
            Some(at) => upcoming.push((at, t)),
            None => missed += 1,
        }
    }
    upcoming.sort_by_key(|(at, _)| *at);

    println!("Tasks file: {}", store.path().display());
    println!("Pending with due date: {} ({} past due, not scheduled)", pending.len(), missed);
    for (at, t) in upcoming {
        println!("- {} -> {} ({})", format_local(at, tz), t.title, t.id().unwrap_or("-"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nag_core::RepeatPeriod;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 18, 0, 0).unwrap()
    }

    #[test]
    fn relative_and_local_times() {
        let tz = chrono_tz::America::Chicago;
        assert_eq!(parse_when("+90m", tz, now()).unwrap(), now() + Duration::minutes(90));
        assert_eq!(parse_when("+2d", tz, now()).unwrap(), now() + Duration::days(2));
        // CST is UTC-6
        assert_eq!(
            parse_when("2026-01-16 09:30", tz, now()).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 16, 15, 30, 0).unwrap()
        );
        assert!(parse_when("+5w", tz, now()).is_err());
        assert!(parse_when("+m", tz, now()).is_err());
    }

    #[test]
    fn huge_relative_time_is_an_error() {
        let tz = chrono_tz::UTC;
        assert!(parse_when("+99999999999999d", tz, now()).is_err());
        assert!(parse_when("+9223372036854775807m", tz, now()).is_err());
        assert!(parse_when("+2562047788015h", tz, now()).is_err());
    }

    #[test]
    fn builds_task_from_strings() {
        let input = NewTask {
            title: "Standup".into(),
            due: Some("+1h".into()),
            reminder: Some("early:10m".into()),
            repeat: Some("count:weekly:4".into()),
            priority: Some("high".into()),
        };
        let t = build_task(&input, chrono_tz::UTC, now()).unwrap();
        assert_eq!(t.id, None);
        assert_eq!(t.due_date, Some(now() + Duration::hours(1)));
        assert_eq!(t.reminder, ReminderPolicy::EarlyOffset(Duration::minutes(10)));
        assert_eq!(
            t.repeat,
            RepeatRule::CountN {
                period: RepeatPeriod::Weekly,
                remaining: 4
            }
        );
        assert_eq!(t.priority, Priority::High);
    }

    #[test]
    fn repeating_without_due_date_is_rejected() {
        let input = NewTask {
            title: "Stretch".into(),
            repeat: Some("daily".into()),
            ..NewTask::default()
        };
        assert!(build_task(&input, chrono_tz::UTC, now()).is_err());
    }
}
