use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;

use nag_engine::{Clock, EngineParts, FileJournal, ReminderEngine, SystemClock, TokioWakeService};

mod commands;
mod config;
mod console;
mod sink;
mod state;
mod store;

use commands::NewTask;
use store::FileTaskStore;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("NAG_BUILD_SHA"), ")");

#[derive(Parser, Debug)]
#[command(name = "nag", version = VERSION, about = "Task reminders that survive restarts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a task
    Add {
        /// Task title
        title: String,

        /// Due time: "YYYY-MM-DD HH:MM" (local) or +30m / +2h / +1d
        #[arg(long)]
        due: Option<String>,

        /// on_time | early:<n>[m|h|d]
        #[arg(long)]
        reminder: Option<String>,

        /// none | daily | weekly | monthly | yearly | count:<period>:<n> | days:mon,wed
        #[arg(long)]
        repeat: Option<String>,

        /// urgent | high | normal | low
        #[arg(long)]
        priority: Option<String>,
    },

    /// List tasks (pending only unless --all)
    List {
        #[arg(long)]
        all: bool,
    },

    /// Delete a task
    Delete { id: String },

    /// Mark a task completed
    Complete { id: String },

    /// Show upcoming reminder times without starting the daemon
    Status,

    /// Run the reminder daemon in the foreground
    Run,

    /// Write ~/.nag/config.toml with defaults (if missing)
    InitConfig,

    /// Print the resolved configuration
    ConfigCheck,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries notifications and command output; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::InitConfig => config::init_config()?,
        Command::ConfigCheck => config::config_check()?,
        Command::Run => run_daemon().await?,
        Command::Add {
            title,
            due,
            reminder,
            repeat,
            priority,
        } => {
            let (cfg, store) = open_store()?;
            let input = NewTask {
                title,
                due,
                reminder,
                repeat,
                priority,
            };
            commands::add(&cfg, &store, &input)?;
        }
        Command::List { all } => {
            let (cfg, store) = open_store()?;
            commands::list(&cfg, &store, all)?;
        }
        Command::Delete { id } => {
            let (cfg, store) = open_store()?;
            commands::delete(&cfg, &store, &id)?;
        }
        Command::Complete { id } => {
            let (cfg, store) = open_store()?;
            commands::complete(&cfg, &store, &id).await?;
        }
        Command::Status => {
            let (cfg, store) = open_store()?;
            commands::status(&cfg, &store).await?;
        }
    }

    Ok(())
}

fn open_store() -> Result<(config::Config, FileTaskStore)> {
    Ok((config::load_config()?, FileTaskStore::open(state::tasks_path()?)))
}

async fn run_daemon() -> Result<()> {
    let cfg = config::load_config()?;
    let store = Arc::new(FileTaskStore::open(state::tasks_path()?));
    let sink = Arc::new(sink::ConsoleSink::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let journal = FileJournal::open(state::journal_dir()?)?;
    let carried = journal.compact()?;
    if carried > 0 {
        tracing::info!(carried, "unfinished jobs from the previous run will be replayed");
    }

    let (wake, wake_events) = TokioWakeService::new(clock.clone(), cfg.wake_config());
    let mut engine = ReminderEngine::start(
        cfg.engine_config()?,
        EngineParts {
            store: store.clone(),
            sink: sink.clone(),
            wake: Arc::new(wake),
            clock,
            journal: Arc::new(journal),
        },
    )?;
    engine.attach_wake_events(wake_events);

    engine.restarted()?;
    engine.wait_idle().await;
    println!(
        "nag {VERSION}: {} reminder(s) scheduled from {}",
        engine.scheduler().len(),
        store.path().display()
    );

    let result = console::Console {
        cfg: &cfg,
        engine: &engine,
        store: &store,
        sink: &sink,
    }
    .run()
    .await;

    engine.shutdown().await;
    result
}
