mod cli;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clinicpulse_core::{
    Config, Credential, InboundMessage, MemoryCache, NotificationLog, Role, Scope,
    SessionProvider,
};
use clinicpulse_live::LiveUpdates;
use clinicpulse_store::FileStore;

use crate::cli::{Cli, Commands, RoleArg, TopicKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("clinicpulse=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Handle ConfigSample immediately without loading config
    if let Commands::ConfigSample { output } = &cli.command {
        let path = output
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("./clinicpulse.sample.yaml"));
        Config::sample().save(&path)?;
        println!("Sample configuration written to {}", path.display());
        return Ok(());
    }

    let config = Config::load(cli.config_path.as_deref())?;

    match cli.command {
        Commands::Listen {
            token,
            role,
            doctor,
            dates,
        } => listen(&config, token, role, doctor, dates).await?,
        Commands::Topic { kind, doctor, date } => {
            let scope = match (kind, doctor, date) {
                (TopicKind::Slots, Some(doctor), Some(date)) => Scope::slots(doctor, date),
                (TopicKind::Slots, _, _) => anyhow::bail!("slots topics need --doctor and --date"),
                (TopicKind::Emergency, _, _) => Scope::EmergencyAlerts,
                (TopicKind::Personal, _, _) => Scope::PersonalQueue,
            };
            println!("{}", scope.topic());
            if let Some(key) = scope.fetch_key() {
                println!("fetch key: {}", key);
            }
        }
        Commands::Notifications { unread } => {
            let log = open_notification_log(&config)?;
            let entries: Vec<_> = log
                .entries()
                .into_iter()
                .filter(|entry| !unread || !entry.read)
                .collect();
            if entries.is_empty() {
                println!("No notifications");
            } else {
                for entry in entries.iter().rev() {
                    println!(
                        "{} {} [{}] {} ({})",
                        if entry.read { " " } else { "*" },
                        entry.received_at.format("%Y-%m-%d %H:%M"),
                        entry.patient_full_name,
                        entry.message,
                        entry.appointment_time.format("%Y-%m-%d %H:%M"),
                    );
                }
                println!("{} unread of {}", log.unread_count(), log.len());
            }
        }
        Commands::MarkRead => {
            let log = open_notification_log(&config)?;
            let changed = log.mark_all_read();
            println!("Marked {} notification(s) as read", changed);
        }
        Commands::ConfigSample { .. } => {
            // Already handled
        }
    }

    Ok(())
}

fn open_notification_log(config: &Config) -> anyhow::Result<Arc<NotificationLog>> {
    let store = FileStore::new(config.notifications.store_dir.clone()).with_context(|| {
        format!(
            "opening notification store at {}",
            config.notifications.store_dir.display()
        )
    })?;
    Ok(Arc::new(NotificationLog::with_store(
        config.notifications.capacity,
        Arc::new(store),
    )))
}

async fn listen(
    config: &Config,
    token: String,
    role: RoleArg,
    doctor: Option<i64>,
    dates: Vec<chrono::NaiveDate>,
) -> anyhow::Result<()> {
    let notifications = open_notification_log(config)?;
    let live = Arc::new(LiveUpdates::with_websocket(
        config,
        Arc::new(MemoryCache::new()),
        notifications,
    ));

    let role = match role {
        RoleArg::Admin => Role::Admin,
        RoleArg::Doctor => Role::Doctor,
    };

    let mut scopes = vec![Scope::PersonalQueue];
    if role == Role::Admin {
        scopes.push(Scope::EmergencyAlerts);
    }
    if let Some(doctor) = doctor {
        let dates = if dates.is_empty() {
            vec![chrono::Local::now().date_naive()]
        } else {
            dates
        };
        scopes.extend(dates.into_iter().map(|date| Scope::slots(doctor, date)));
    }

    for scope in scopes {
        info!("Following {}", scope);
        live.subscribe(scope, print_message);
    }

    let mut states = live.watch_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            if state.is_degraded() {
                eprintln!("live updates unavailable ({})", state);
            } else {
                eprintln!("live updates {}", state);
            }
        }
    });

    let session = SessionProvider::new();
    live.follow_session(&session)?;
    session.login(Credential::new(token), role);
    info!("Connecting to {}", config.live.url());

    tokio::signal::ctrl_c().await?;
    session.logout();

    let log = live.notifications();
    info!("{} notification(s) stored, {} unread", log.len(), log.unread_count());
    Ok(())
}

fn print_message(message: &InboundMessage) {
    let body = match message {
        InboundMessage::SlotUpdate(slot) => serde_json::to_string(slot),
        InboundMessage::Notification(notice) => serde_json::to_string(notice),
        InboundMessage::EmergencyAlert(alert) => serde_json::to_string(alert),
    };
    match body {
        Ok(body) => println!("{} {}", message.kind(), body),
        Err(e) => tracing::warn!("Could not render {}: {}", message.kind(), e),
    }
}
