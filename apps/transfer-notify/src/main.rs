mod config;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use config::AppConfig;
use notify_client::{HttpNotificationApi, NotificationClient, WebSocketConnector};
use notify_core::{
    resolve_route, ActionKind, ConnectionState, Locale, NotificationRecord, SessionToken,
    TransactionKind, TransactionRef,
};
use telemetry::{LogConfig, LogLevel};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "transfer-notify",
    about = "Watch and manage budget-transfer notifications"
)]
struct Cli {
    /// REST base of the budget service, e.g. https://budget.example.com/api
    #[arg(long, global = true, env = "TRANSFER_NOTIFY_API_BASE")]
    api_base: Option<String>,

    /// Session token; never printed.
    #[arg(long, global = true, env = "TRANSFER_NOTIFY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long, global = true)]
    locale: Option<Locale>,

    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stay connected and print the list whenever it changes.
    Watch,
    /// Fetch the listing once and print it.
    List,
    /// Mark one notification read.
    Read { id: String },
    /// Mark every notification read.
    ReadAll,
    /// Delete one notification.
    Delete { id: String },
    /// Delete every visible notification.
    Clear,
    /// Print the in-app route for a transaction reference.
    Route {
        #[arg(long)]
        kind: TransactionKind,
        #[arg(long)]
        action: ActionKind,
        #[arg(long)]
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let cfg = AppConfig::from_env().context("invalid NOTIFY__ configuration")?;

    let log_file = cli.log_file.clone().or_else(|| cfg.log_path.clone().map(PathBuf::from));
    telemetry::init(&LogConfig {
        level: cli.log_level,
        file: log_file,
    })?;

    if let Command::Route { kind, action, id } = &cli.command {
        let reference = TransactionRef {
            transaction_id: Some(*id),
            transaction_kind: Some(*kind),
            action_kind: Some(*action),
        };
        match resolve_route(&reference) {
            Some(route) => println!("{route}"),
            None => return Err(anyhow!("no route for transaction id {id}")),
        }
        return Ok(());
    }

    let locale = match (cli.locale, cfg.locale.as_deref()) {
        (Some(locale), _) => locale,
        (None, Some(raw)) => raw.parse().map_err(|err: String| anyhow!(err))?,
        (None, None) => Locale::default(),
    };
    let mut cfg = cfg;
    if let Some(base) = cli.api_base.as_deref() {
        cfg.api_base_url = base.trim().trim_end_matches('/').to_string();
    }
    let token = cli
        .token
        .as_deref()
        .and_then(SessionToken::new)
        .or_else(|| cfg.token.as_deref().and_then(SessionToken::new))
        .ok_or_else(|| anyhow!("a session token is required (--token or TRANSFER_NOTIFY_TOKEN)"))?;

    let client = NotificationClient::spawn(
        cfg.client_config(),
        Arc::new(HttpNotificationApi::new(cfg.api_base_url.clone(), token.clone())),
        Arc::new(WebSocketConnector),
    );

    let outcome = match cli.command {
        Command::Watch => watch(&client, token, locale).await,
        Command::List => {
            client.refresh().await?;
            print_view(&client, locale);
            Ok(())
        }
        Command::Read { id } => {
            client.refresh().await?;
            client.mark_read(&id).await?;
            println!("marked {id} read");
            Ok(())
        }
        Command::ReadAll => {
            client.refresh().await?;
            client.mark_all_read().await?;
            println!("all notifications marked read");
            Ok(())
        }
        Command::Delete { id } => {
            client.refresh().await?;
            client.delete(&id).await?;
            println!("deleted {id}");
            Ok(())
        }
        Command::Clear => {
            client.refresh().await?;
            let total = client.view().len();
            client.clear_all().await?;
            println!("deleted {total} notifications");
            Ok(())
        }
        Command::Route { .. } => Ok(()),
    };
    client.teardown().await;
    outcome
}

async fn watch(
    client: &NotificationClient,
    token: SessionToken,
    locale: Locale,
) -> anyhow::Result<()> {
    let mut states = client.subscribe_state();
    let mut views = client.subscribe();
    client.connect(Some(token))?;
    let refresher = client.spawn_refresh_loop();
    info!(target = "notify.cli", "watching notifications; Ctrl-C to stop");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(target = "notify.cli", error = %err, "ctrl-c handler failed");
                }
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                println!("-- connection {}", state_label(state));
                if state == ConnectionState::Error {
                    eprintln!("push connection gave up; listing still refreshes over REST");
                }
            }
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                views.borrow_and_update();
                print_view(client, locale);
            }
        }
    }
    refresher.abort();
    Ok(())
}

fn state_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::Error => "error",
    }
}

fn print_view(client: &NotificationClient, locale: Locale) {
    let view = client.view();
    println!("{} notifications, {} unread", view.len(), view.unread_count());
    for record in view.records() {
        println!("{}", render_line(record, locale));
    }
}

fn render_line(record: &NotificationRecord, locale: Locale) -> String {
    let marker = if record.read { ' ' } else { '*' };
    let mut line = format!(
        "{marker} {} {:<24} {}",
        record.timestamp.format("%Y-%m-%d %H:%M"),
        record.id,
        record.text.for_locale(locale)
    );
    if let Some(badge) = record.badge() {
        line.push_str(&format!(" [{badge}]"));
    }
    if let Some(route) = record.reference.as_ref().and_then(resolve_route) {
        line.push_str(&format!(" -> {route}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use notify_core::{LocalizedText, NotificationKind, Origin};

    fn record() -> NotificationRecord {
        NotificationRecord {
            id: "17".into(),
            kind: NotificationKind::Notification,
            text: LocalizedText {
                primary: "Transfer approved".into(),
                secondary: "تمت الموافقة".into(),
            },
            reference: Some(TransactionRef {
                transaction_id: Some(17),
                transaction_kind: Some(TransactionKind::Far),
                action_kind: Some(ActionKind::List),
            }),
            payload: serde_json::json!({ "code": "FAR-17" }),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
            read: false,
            origin: Origin::Snapshot,
        }
    }

    #[test]
    fn renders_unread_marker_badge_and_route() {
        let line = render_line(&record(), Locale::English);
        assert!(line.starts_with("* 2024-03-01 09:30 17"));
        assert!(line.contains("Transfer approved [FAR-17] -> /app/far/17"));
    }

    #[test]
    fn renders_secondary_text_for_arabic() {
        let mut record = record();
        record.read = true;
        let line = render_line(&record, Locale::Arabic);
        assert!(line.starts_with("  2024"));
        assert!(line.contains("تمت الموافقة"));
    }

    #[test]
    fn cli_parses_route_and_global_flags() {
        let cli = Cli::try_parse_from([
            "transfer-notify",
            "route",
            "--kind",
            "HFR",
            "--action",
            "Approval",
            "--id",
            "9",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, LogLevel::Debug);
        match cli.command {
            Command::Route { kind, action, id } => {
                assert_eq!(kind, TransactionKind::Hfr);
                assert_eq!(action, ActionKind::Approval);
                assert_eq!(id, 9);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn cli_parses_mutations() {
        let cli = Cli::try_parse_from(["transfer-notify", "--locale", "ar", "read", "abc"]).unwrap();
        assert_eq!(cli.locale, Some(Locale::Arabic));
        assert!(matches!(cli.command, Command::Read { ref id } if id == "abc"));
    }
}
