//! Line-oriented console for `nag run`.

use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use nag_core::NotificationAction;
use nag_engine::ReminderEngine;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::commands::{self, NewTask};
use crate::config::Config;
use crate::sink::ConsoleSink;
use crate::store::FileTaskStore;

/// How often the daemon re-reads the task file on its own.
const RESCAN_EVERY: Duration = Duration::from_secs(300);

const HELP: &str = "\
commands:
  add <when> <title...>   when = +30m | +2h | +1d | YYYY-MM-DD@HH:MM
  done <id>               complete a task (same as the notification action)
  dismiss <id>            clear a notification, keep the task
  delete <id>
  list
  status
  rescan                  rebuild the schedule from the task file
  quit";

enum Flow {
    Continue,
    Quit,
}

pub struct Console<'a> {
    pub cfg: &'a Config,
    pub engine: &'a ReminderEngine,
    pub store: &'a FileTaskStore,
    pub sink: &'a ConsoleSink,
}

impl Console<'_> {
    pub async fn run(&self) -> Result<()> {
        println!("{HELP}");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut rescan = tokio::time::interval(RESCAN_EVERY);
        rescan.tick().await;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        info!("stdin closed; stopping");
                        break;
                    };
                    match self.handle(&line).await {
                        Ok(Flow::Quit) => break,
                        Ok(Flow::Continue) => {}
                        Err(e) => println!("error: {e:#}"),
                    }
                }
                _ = rescan.tick() => {
                    if let Err(e) = self.engine.restarted() {
                        warn!(error = %e, "periodic rescan not queued");
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle(&self, line: &str) -> Result<Flow> {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            return Ok(Flow::Continue);
        };
        let rest: Vec<&str> = words.collect();

        match cmd {
            "quit" | "exit" => return Ok(Flow::Quit),
            "help" => println!("{HELP}"),
            "add" => self.add(&rest)?,
            "delete" | "rm" => {
                let id = one_id(&rest)?;
                self.store.delete(&self.cfg.user.id, id)?;
                self.engine.task_deleted(id);
                println!("Deleted {id}");
            }
            "list" | "ls" => self.list()?,
            "status" => self.status(),
            "rescan" => {
                self.engine.restarted()?;
                self.engine.wait_idle().await;
                println!("Rescanned; {} reminder(s) scheduled", self.engine.scheduler().len());
            }
            other => match other.parse::<NotificationAction>() {
                Ok(action) => {
                    let id = one_id(&rest)?;
                    self.engine.notification_action(id, action)?;
                    self.engine.wait_idle().await;
                }
                Err(_) => println!("unknown command '{other}' (try: help)"),
            },
        }
        Ok(Flow::Continue)
    }

    fn add(&self, args: &[&str]) -> Result<()> {
        let [when, title @ ..] = args else {
            bail!("usage: add <when> <title...>");
        };
        if title.is_empty() {
            bail!("usage: add <when> <title...>");
        }
        let input = NewTask {
            title: title.join(" "),
            due: Some(when.replace('@', " ")),
            ..NewTask::default()
        };
        let task = commands::add(self.cfg, self.store, &input)?;
        match self.engine.task_saved(&task)? {
            nag_engine::ScheduleOutcome::Scheduled(r) => println!(
                "   reminder at {} ({:?})",
                commands::format_local(r.trigger_at, self.cfg.timezone()?),
                r.mode
            ),
            _ => println!("   no reminder scheduled (due time already passed)"),
        }
        Ok(())
    }

    fn list(&self) -> Result<()> {
        let tz = self.cfg.timezone()?;
        let tasks = self.store.all(&self.cfg.user.id)?;
        if tasks.is_empty() {
            println!("No tasks.");
        }
        for t in tasks.iter().filter(|t| t.is_pending()) {
            let next = t
                .id()
                .and_then(|id| self.engine.scheduler().get(id))
                .map(|r| format!(" | fires {}", commands::format_local(r.trigger_at, tz)))
                .unwrap_or_default();
            println!("{}{next}", commands::describe(t, tz));
        }
        Ok(())
    }

    fn status(&self) {
        let scheduler = self.engine.scheduler();
        println!(
            "{} reminder(s) scheduled at {}",
            scheduler.len(),
            Utc::now().format("%H:%M:%S UTC")
        );
        if scheduler.exact_scheduling_degraded() {
            println!("exact timers unavailable; reminders may fire late (wake.exact_allowed)");
        }
        for n in self.sink.showing() {
            println!("showing: {} ({})", n.title, n.task_id);
        }
    }
}

fn one_id<'a>(args: &[&'a str]) -> Result<&'a str> {
    match args {
        [id] => Ok(*id),
        _ => bail!("expected exactly one task id"),
    }
}
