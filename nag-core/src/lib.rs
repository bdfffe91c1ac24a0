//! nag-core: task model, enum codecs and reminder time rules for the Nag reminder engine

pub mod codec;
pub mod document;
pub mod error;
pub mod notification;
pub mod task;
pub mod time;

pub use document::TaskDocument;
pub use error::{ReminderError, Result};
pub use notification::{Notification, NotificationAction, offset_label, render_notification};
pub use task::{Priority, ReminderPolicy, RepeatPeriod, RepeatRule, Task, TaskStatus, WeekdaySet};
pub use time::{
    DEFAULT_EPSILON_SECS, NextOccurrence, ReminderTimeCalculator, parse_local_deadline_to_utc,
};
