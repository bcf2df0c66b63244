//! Timekeeper CLI - inspect and maintain the local session store

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use timekeeper::config::expand_path;
use timekeeper::timeline::{self, WeekView, CURRENT_USER_ID};
use timekeeper::{Config, Core, Session};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "timekeeper")]
#[command(author = "Timekeeper Team")]
#[command(version)]
#[command(about = "Timekeeper - playtime sessions and weekly timeline", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.timekeeper/config.toml", env = "TIMEKEEPER_CONFIG")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the sessions of one week, split per day
    Week {
        /// Any day of the week to show (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Accounts to include; "me" is the local user
        #[arg(long = "friend", default_value = CURRENT_USER_ID)]
        friends: Vec<String>,
    },
    /// Print the optimal timeline start hour
    Hour {
        /// Recompute from the full history first
        #[arg(long)]
        recalculate: bool,
    },
    /// List stored sessions
    List {
        /// Only sessions of this app
        #[arg(long)]
        app: Option<String>,
    },
    /// Print the number of stored sessions
    Count,
    /// Import sessions from a JSON array (all or nothing)
    Import { file: PathBuf },
    /// Print every session as JSON
    Export,
    /// Delete one session
    Delete { id: i64 },
    /// Delete every session
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
    /// Write a default config file
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_path = expand_path(&args.config);

    // Handle init-config before anything touches the data directory
    if let Command::InitConfig = args.command {
        init_logging(&Config::default(), args.verbose);
        if config_path.exists() {
            tracing::warn!("Config file already exists: {}", config_path.display());
            return Ok(());
        }
        Config::create_default(&config_path)?;
        tracing::info!("Created default config at: {}", config_path.display());
        return Ok(());
    }

    // Load configuration
    let mut config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };
    config.apply_env_overrides()?;

    let _log_guard = init_logging(&config, args.verbose);
    if !config_path.exists() {
        tracing::debug!(
            "Config file not found at {}, using defaults",
            config_path.display()
        );
    }

    let core = Core::new(config);
    core.initialize().await?;
    let store = core.store();

    match args.command {
        Command::Week { date, friends } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let view = WeekView::load(store, date, &friends).await?;
            print_week(&view);
        }
        Command::Hour { recalculate } => {
            let hour = if recalculate {
                store.recalculate_optimal_start_hour().await?
            } else {
                store.get_optimal_start_hour().await?
            };
            println!("{} ({})", hour, timeline::format_hour_label(hour));
        }
        Command::List { app } => {
            let sessions = match app {
                Some(app) => store.get_sessions_by_app(&app).await?,
                None => store.get_all_sessions().await?,
            };
            for session in &sessions {
                print_session(session);
            }
        }
        Command::Count => {
            println!("{}", store.get_session_count().await?);
        }
        Command::Import { file } => {
            let content = std::fs::read_to_string(&file)?;
            let sessions: Vec<Session> = serde_json::from_str(&content)?;
            let ids = store.add_sessions(sessions).await?;
            tracing::info!("Imported {} sessions from {}", ids.len(), file.display());
        }
        Command::Export => {
            let sessions = store.get_all_sessions().await?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        Command::Delete { id } => {
            if store.get_session(id).await?.is_none() {
                anyhow::bail!("session {} not found", id);
            }
            store.delete_session(id).await?;
            tracing::info!("Deleted session {}", id);
        }
        Command::Clear { yes } => {
            if !yes {
                anyhow::bail!("refusing to delete every session without --yes");
            }
            store.clear_all_sessions().await?;
        }
        Command::InitConfig => unreachable!("handled above"),
    }

    Ok(())
}

/// Initialize logging; the returned guard flushes the log file on drop
fn init_logging(config: &Config, verbose: bool) -> Option<WorkerGuard> {
    let log_level = if verbose { "debug" } else { config.logging.level.as_str() };

    let (file_layer, guard) = if config.logging.file {
        let appender = tracing_appender::rolling::daily(config.log_dir(), "timekeeper.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("timekeeper={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

fn print_week(view: &WeekView) {
    let sunday = view.week_start + chrono::Duration::days(6);
    println!(
        "Week {} - {}  (timeline starts {})",
        view.week_start.format("%b %-d"),
        sunday.format("%b %-d"),
        timeline::format_hour_label(view.timeline_start_hour)
    );

    for day in view.days() {
        println!("{}", day.format("%a %b %-d"));
        for session in view.sessions_on(day) {
            print!("  ");
            print_session(session);
        }
    }

    println!(
        "Total {}  ·  {} achievements",
        timeline::format_duration(view.total_minutes()),
        view.total_achievements()
    );
}

fn print_session(session: &Session) {
    let who = session.account_id.as_deref().unwrap_or(CURRENT_USER_ID);
    println!(
        "#{:<5} {:<10} {:<10} {} -> {}  {}",
        session.id.unwrap_or_default(),
        session.app_id,
        who,
        session.start_time.format("%Y-%m-%d %H:%M"),
        session.end_time.format("%Y-%m-%d %H:%M"),
        timeline::format_duration(timeline::duration_minutes(session))
    );
}
