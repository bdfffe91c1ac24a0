//! Task model as seen by the reminder engine.
//!
//! Tasks are owned by the external store; the engine only reads them and asks
//! the store to change `status` (and, for repeats, the next occurrence).

use chrono::{DateTime, Duration, Utc, Weekday};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Completed,
    Overdue,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Urgent = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

/// How far ahead of the due date the reminder fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderPolicy {
    OnTime,
    EarlyOffset(Duration),
}

impl ReminderPolicy {
    pub fn offset(&self) -> Duration {
        match self {
            Self::OnTime => Duration::zero(),
            Self::EarlyOffset(d) => *d,
        }
    }
}

/// Calendar step used by periodic repeat rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepeatPeriod {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Set of weekdays, one bit per day starting at Monday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, day: Weekday) -> Self {
        self.insert(day);
        self
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Days in Monday-first order.
    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        ALL_WEEKDAYS.into_iter().filter(|d| self.contains(*d))
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = Self::new();
        for d in iter {
            set.insert(d);
        }
        set
    }
}

const ALL_WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatRule {
    None,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    /// A periodic series with `remaining` occurrences left after the current one.
    CountN { period: RepeatPeriod, remaining: u32 },
    DaysOfWeek(WeekdaySet),
}

impl RepeatRule {
    pub fn is_repeating(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Period for the plain periodic rules and counted series.
    pub fn period(&self) -> Option<RepeatPeriod> {
        match self {
            Self::Daily => Some(RepeatPeriod::Daily),
            Self::Weekly => Some(RepeatPeriod::Weekly),
            Self::Monthly => Some(RepeatPeriod::Monthly),
            Self::Yearly => Some(RepeatPeriod::Yearly),
            Self::CountN { period, .. } => Some(*period),
            Self::None | Self::DaysOfWeek(_) => None,
        }
    }
}

/// Task snapshot read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Absent until the task is first persisted.
    pub id: Option<String>,
    pub title: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub reminder: ReminderPolicy,
    pub repeat: RepeatRule,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::draft(title)
        }
    }

    /// A task that has not been saved yet.
    pub fn draft(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            status: TaskStatus::Pending,
            priority: Priority::Normal,
            due_date: None,
            reminder: ReminderPolicy::OnTime,
            repeat: RepeatRule::None,
        }
    }

    pub fn with_due_date(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn with_reminder(mut self, reminder: ReminderPolicy) -> Self {
        self.reminder = reminder;
        self
    }

    pub fn with_repeat(mut self, repeat: RepeatRule) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_set_iterates_monday_first() {
        let set: WeekdaySet = [Weekday::Fri, Weekday::Mon, Weekday::Wed].into_iter().collect();
        let days: Vec<Weekday> = set.iter().collect();
        assert_eq!(days, vec![Weekday::Mon, Weekday::Wed, Weekday::Fri]);
        assert!(!set.contains(Weekday::Sun));
    }

    #[test]
    fn draft_has_no_id() {
        let t = Task::draft("write report");
        assert!(t.id().is_none());
        assert!(t.is_pending());
    }

    #[test]
    fn early_offset_exposes_duration() {
        let p = ReminderPolicy::EarlyOffset(Duration::minutes(15));
        assert_eq!(p.offset(), Duration::minutes(15));
        assert_eq!(ReminderPolicy::OnTime.offset(), Duration::zero());
    }
}
