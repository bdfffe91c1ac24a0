//! Time utilities: trigger computation, repeat advancement, timezone-aware deadlines.
//!
//! Everything here is pure. "Now" is always passed in by the caller.

use anyhow::Result;
use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::task::{RepeatPeriod, RepeatRule, ReminderPolicy, Task, WeekdaySet};

/// Minimum lead a trigger must have over "now" to be scheduled.
pub const DEFAULT_EPSILON_SECS: i64 = 5;

/// Upper bound on catch-up steps when advancing a repeat past "now".
const MAX_CATCH_UP_STEPS: u32 = 100_000;

/// The occurrence a repeating task advances to after a fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextOccurrence {
    pub due_date: DateTime<Utc>,
    pub trigger_at: DateTime<Utc>,
    /// Repeat rule to carry forward (`CountN` comes back decremented).
    pub repeat: RepeatRule,
}

impl NextOccurrence {
    /// Copy of `task` moved to this occurrence.
    pub fn apply_to(&self, task: &Task) -> Task {
        let mut next = task.clone();
        next.due_date = Some(self.due_date);
        next.repeat = self.repeat;
        next
    }
}

/// Derives trigger instants and next occurrences.
///
/// Calendar steps (days, months, weekdays) are taken in the user's time zone so
/// a reminder keeps its local wall-clock time across DST changes.
#[derive(Debug, Clone, Copy)]
pub struct ReminderTimeCalculator {
    tz: Tz,
    epsilon: Duration,
}

impl Default for ReminderTimeCalculator {
    fn default() -> Self {
        Self::new(Tz::UTC, Duration::seconds(DEFAULT_EPSILON_SECS))
    }
}

impl ReminderTimeCalculator {
    pub fn new(tz: Tz, epsilon: Duration) -> Self {
        Self {
            tz,
            epsilon: epsilon.max(Duration::zero()),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn epsilon(&self) -> Duration {
        self.epsilon
    }

    /// When the reminder for `task` should fire, if it should fire at all.
    ///
    /// `None` for non-pending tasks, tasks without a due date, and triggers
    /// that are not strictly after `now + epsilon` (past-due tasks never fire
    /// immediately).
    pub fn trigger(&self, task: &Task, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !task.is_pending() {
            return None;
        }
        self.future_trigger(task.due_date?, task.reminder, now)
    }

    /// Next occurrence after the one anchored at `task.due_date`.
    ///
    /// Missed occurrences are skipped: the result is the first one whose trigger
    /// is in the future, never a backlog. For `CountN` every skipped period still
    /// consumes one from the remaining count.
    pub fn next_occurrence(&self, task: &Task, now: DateTime<Utc>) -> Option<NextOccurrence> {
        let anchor = task.due_date?;

        match task.repeat {
            RepeatRule::None => None,
            RepeatRule::Daily | RepeatRule::Weekly | RepeatRule::Monthly | RepeatRule::Yearly => {
                let period = task.repeat.period()?;
                let (due_date, trigger_at, _) =
                    self.advance(anchor, period, task.reminder, now, MAX_CATCH_UP_STEPS)?;
                Some(NextOccurrence {
                    due_date,
                    trigger_at,
                    repeat: task.repeat,
                })
            }
            RepeatRule::CountN { period, remaining } => {
                let max_steps = remaining.min(MAX_CATCH_UP_STEPS);
                let (due_date, trigger_at, steps) =
                    self.advance(anchor, period, task.reminder, now, max_steps)?;
                Some(NextOccurrence {
                    due_date,
                    trigger_at,
                    repeat: RepeatRule::CountN {
                        period,
                        remaining: remaining - steps,
                    },
                })
            }
            RepeatRule::DaysOfWeek(days) => self.next_weekday(anchor, days, task.reminder, now),
        }
    }

    fn future_trigger(
        &self,
        due: DateTime<Utc>,
        reminder: ReminderPolicy,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let at = due - reminder.offset();
        (at > now + self.epsilon).then_some(at)
    }

    /// Step the anchor forward by whole periods until the trigger is in the future.
    /// Returns the due date, its trigger and the number of periods taken.
    fn advance(
        &self,
        anchor: DateTime<Utc>,
        period: RepeatPeriod,
        reminder: ReminderPolicy,
        now: DateTime<Utc>,
        max_steps: u32,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>, u32)> {
        for k in 1..=max_steps {
            let due = self.shift(anchor, period, k)?;
            if let Some(at) = self.future_trigger(due, reminder, now) {
                return Some((due, at, k));
            }
        }
        None
    }

    fn next_weekday(
        &self,
        anchor: DateTime<Utc>,
        days: WeekdaySet,
        reminder: ReminderPolicy,
        now: DateTime<Utc>,
    ) -> Option<NextOccurrence> {
        if days.is_empty() {
            return None;
        }
        for k in 1..=MAX_CATCH_UP_STEPS {
            let due = self.shift(anchor, RepeatPeriod::Daily, k)?;
            if !days.contains(due.with_timezone(&self.tz).weekday()) {
                continue;
            }
            if let Some(trigger_at) = self.future_trigger(due, reminder, now) {
                return Some(NextOccurrence {
                    due_date: due,
                    trigger_at,
                    repeat: RepeatRule::DaysOfWeek(days),
                });
            }
        }
        None
    }

    /// `anchor + k periods`, computed from the anchor in local time so month-end
    /// days clamp (Jan 31 + 1 month = Feb 28/29).
    fn shift(&self, anchor: DateTime<Utc>, period: RepeatPeriod, k: u32) -> Option<DateTime<Utc>> {
        let local = anchor.with_timezone(&self.tz).naive_local();
        let shifted = match period {
            RepeatPeriod::Daily => local.checked_add_days(Days::new(u64::from(k)))?,
            RepeatPeriod::Weekly => local.checked_add_days(Days::new(7 * u64::from(k)))?,
            RepeatPeriod::Monthly => local.checked_add_months(Months::new(k))?,
            RepeatPeriod::Yearly => local.checked_add_months(Months::new(k.checked_mul(12)?))?,
        };
        self.resolve_local(shifted)
    }

    /// Map a local wall-clock time to UTC. Ambiguous times (DST fall-back) take
    /// the earlier instant; skipped times (DST spring-forward) move one hour on.
    fn resolve_local(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.tz
            .from_local_datetime(&local)
            .earliest()
            .or_else(|| self.tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Parse a deadline like "2026-02-20 23:59" in an IANA tz like "America/Chicago",
/// returning UTC.
pub fn parse_local_deadline_to_utc(local: &str, tz: &str) -> Result<DateTime<Utc>> {
    let tz: Tz = tz
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid timezone: {tz}"))?;

    let ndt = NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M")
        .map_err(|e| anyhow::anyhow!("invalid local datetime '{local}': {e}"))?;

    let local_dt = tz
        .from_local_datetime(&ndt)
        .single()
        .ok_or_else(|| anyhow::anyhow!("ambiguous or invalid local time (DST?): {local} {tz}"))?;

    Ok(local_dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{RepeatPeriod, TaskStatus};
    use chrono::Weekday;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn calc() -> ReminderTimeCalculator {
        ReminderTimeCalculator::default()
    }

    #[test]
    fn test_parse_chicago_deadline() {
        // Feb is CST (UTC-6)
        let utc = parse_local_deadline_to_utc("2026-02-20 23:59", "America/Chicago").unwrap();
        assert_eq!(utc.to_rfc3339(), "2026-02-21T05:59:00+00:00");
    }

    #[test]
    fn on_time_trigger_equals_due_date() {
        let now = at(2026, 5, 1, 8, 0);
        let t = Task::new("a", "on time").with_due_date(now + Duration::hours(1));
        assert_eq!(calc().trigger(&t, now), Some(now + Duration::hours(1)));
    }

    #[test]
    fn early_offset_moves_trigger_back() {
        let now = at(2026, 5, 1, 8, 0);
        let t = Task::new("a", "early")
            .with_due_date(now + Duration::hours(2))
            .with_reminder(ReminderPolicy::EarlyOffset(Duration::minutes(30)));
        assert_eq!(calc().trigger(&t, now), Some(now + Duration::minutes(90)));
    }

    #[test]
    fn no_trigger_without_due_date_or_when_not_pending() {
        let now = at(2026, 5, 1, 8, 0);
        assert_eq!(calc().trigger(&Task::new("a", "undated"), now), None);

        let done = Task::new("b", "done")
            .with_due_date(now + Duration::hours(1))
            .with_status(TaskStatus::Completed);
        assert_eq!(calc().trigger(&done, now), None);
    }

    #[test]
    fn never_returns_trigger_within_epsilon_or_past() {
        let now = at(2026, 5, 1, 8, 0);
        let c = calc();
        for secs in [-86_400, -1, 0, 1, 4, 5] {
            let t = Task::new("a", "edge").with_due_date(now + Duration::seconds(secs));
            assert_eq!(c.trigger(&t, now), None, "offset {secs}s");
        }
        let t = Task::new("a", "edge").with_due_date(now + Duration::seconds(6));
        assert!(c.trigger(&t, now).unwrap() > now + c.epsilon());
    }

    #[test]
    fn early_offset_past_now_yields_none() {
        let now = at(2026, 5, 1, 8, 0);
        let t = Task::new("a", "too late for early")
            .with_due_date(now + Duration::minutes(10))
            .with_reminder(ReminderPolicy::EarlyOffset(Duration::hours(1)));
        assert_eq!(calc().trigger(&t, now), None);
    }

    #[test]
    fn no_repeat_has_no_next_occurrence() {
        let now = at(2026, 5, 1, 8, 0);
        let t = Task::new("a", "once").with_due_date(now);
        assert!(calc().next_occurrence(&t, now).is_none());
    }

    #[test]
    fn daily_catch_up_skips_missed_days() {
        let now = at(2026, 5, 20, 12, 0);
        let anchor = at(2026, 5, 10, 9, 0);
        let t = Task::new("a", "daily").with_due_date(anchor).with_repeat(RepeatRule::Daily);

        let next = calc().next_occurrence(&t, now).unwrap();
        assert_eq!(next.due_date, at(2026, 5, 21, 9, 0));
        assert!(next.trigger_at > now);
        assert!(next.trigger_at <= now + Duration::days(1));
    }

    #[test]
    fn daily_keeps_local_time_across_dst() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let c = ReminderTimeCalculator::new(tz, Duration::seconds(5));
        // 09:00 EST on the day before spring-forward.
        let anchor = at(2026, 3, 7, 14, 0);
        let t = Task::new("a", "vitamins").with_due_date(anchor).with_repeat(RepeatRule::Daily);

        let next = c.next_occurrence(&t, anchor).unwrap();
        // 09:00 EDT
        assert_eq!(next.due_date, at(2026, 3, 8, 13, 0));
    }

    #[test]
    fn monthly_clamps_to_month_end() {
        let anchor = at(2026, 1, 31, 9, 0);
        let t = Task::new("a", "rent").with_due_date(anchor).with_repeat(RepeatRule::Monthly);
        let next = calc().next_occurrence(&t, anchor).unwrap();
        assert_eq!(next.due_date, at(2026, 2, 28, 9, 0));

        // Catching up over several months counts from the anchor.
        let next = calc().next_occurrence(&t, at(2026, 3, 15, 0, 0)).unwrap();
        assert_eq!(next.due_date, at(2026, 3, 31, 9, 0));
    }

    #[test]
    fn yearly_advances_one_year() {
        let anchor = at(2026, 7, 4, 10, 0);
        let t = Task::new("a", "renew").with_due_date(anchor).with_repeat(RepeatRule::Yearly);
        let next = calc().next_occurrence(&t, anchor).unwrap();
        assert_eq!(next.due_date, at(2027, 7, 4, 10, 0));
    }

    #[test]
    fn days_of_week_picks_nearest_matching_day() {
        // 2026-05-01 is a Friday.
        let anchor = at(2026, 5, 1, 7, 30);
        let days = WeekdaySet::new().with(Weekday::Mon).with(Weekday::Wed);
        let t = Task::new("a", "gym")
            .with_due_date(anchor)
            .with_repeat(RepeatRule::DaysOfWeek(days));

        let next = calc().next_occurrence(&t, anchor).unwrap();
        assert_eq!(next.due_date, at(2026, 5, 4, 7, 30));

        let next = calc().next_occurrence(&t, at(2026, 5, 4, 8, 0)).unwrap();
        assert_eq!(next.due_date, at(2026, 5, 6, 7, 30));
    }

    #[test]
    fn empty_weekday_set_does_not_repeat() {
        let anchor = at(2026, 5, 1, 7, 30);
        let t = Task::new("a", "never")
            .with_due_date(anchor)
            .with_repeat(RepeatRule::DaysOfWeek(WeekdaySet::new()));
        assert!(calc().next_occurrence(&t, anchor).is_none());
    }

    #[test]
    fn count_decrements_and_exhausts() {
        let anchor = at(2026, 5, 1, 9, 0);
        let rule = RepeatRule::CountN {
            period: RepeatPeriod::Weekly,
            remaining: 2,
        };
        let t = Task::new("a", "three standups").with_due_date(anchor).with_repeat(rule);

        let next = calc().next_occurrence(&t, anchor).unwrap();
        assert_eq!(next.due_date, at(2026, 5, 8, 9, 0));
        assert_eq!(
            next.repeat,
            RepeatRule::CountN {
                period: RepeatPeriod::Weekly,
                remaining: 1
            }
        );

        let t = next.apply_to(&t);
        let last = calc().next_occurrence(&t, next.due_date).unwrap();
        assert_eq!(
            last.repeat,
            RepeatRule::CountN {
                period: RepeatPeriod::Weekly,
                remaining: 0
            }
        );

        let t = last.apply_to(&t);
        assert!(calc().next_occurrence(&t, last.due_date).is_none());
    }

    #[test]
    fn count_missed_periods_consume_the_series() {
        let anchor = at(2026, 5, 1, 9, 0);
        let t = Task::new("a", "short series")
            .with_due_date(anchor)
            .with_repeat(RepeatRule::CountN {
                period: RepeatPeriod::Daily,
                remaining: 3,
            });
        // Asleep for five days: the remaining three occurrences are gone.
        assert!(calc().next_occurrence(&t, at(2026, 5, 6, 12, 0)).is_none());
    }
}
