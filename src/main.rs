//! `alarm-mail-sync` -- mirrors alarm notification emails into Domoticz.
//!
//! Every flag can also be set through the environment (or a `.env` file).
//! Logging follows `RUST_LOG`, defaulting to `alarm_mail_sync=info`.

use alarm_mail_sync::config::{
    parse_device_list, DEFAULT_DOMOTICZ_URL, DEFAULT_LEVEL_DEVICE_IDX, DEFAULT_MAILBOX,
    DEFAULT_SENDER, DEFAULT_VARIABLE_PATH,
};
use alarm_mail_sync::{
    ConnectBoxClient, ConnectBoxConfig, DomoticzClient, DomoticzConfig, ImapConnector,
    MailConfig, NotificationDispatcher, PollingConfig, SessionSupervisor, SupervisorReport,
};
use clap::Parser;
use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Watches an IMAP mailbox for alarm notifications.
#[derive(Parser)]
#[command(name = "alarm-mail-sync", version)]
struct Cli {
    /// IMAP server as host:port (port 993 uses implicit TLS).
    #[arg(long, env = "IMAP_ADDR")]
    imap_addr: Option<String>,

    /// IMAP login.
    #[arg(long, env = "IMAP_LOGIN")]
    imap_login: Option<String>,

    /// IMAP password.
    #[arg(long, env = "IMAP_PASSWORD", hide_env_values = true)]
    imap_password: Option<String>,

    /// Mailbox to watch.
    #[arg(long, env = "IMAP_MAILBOX", default_value = DEFAULT_MAILBOX)]
    imap_mailbox: String,

    /// Sender of the alarm notifications.
    #[arg(long, env = "ALARM_SENDER", default_value = DEFAULT_SENDER)]
    sender: String,

    /// Domoticz base URL.
    #[arg(long, env = "DOMOTICS_URL", default_value = DEFAULT_DOMOTICZ_URL)]
    domotics_url: String,

    /// User-variable path template with `{name}` and `{value}` (or two `%s`).
    #[arg(long, env = "DOMOTICS_PATH", default_value = DEFAULT_VARIABLE_PATH)]
    domotics_path: String,

    /// Domoticz basic-auth login.
    #[arg(long, env = "DOMOTICS_LOGIN")]
    domotics_login: Option<String>,

    /// Domoticz basic-auth password.
    #[arg(long, env = "DOMOTICS_PASSWORD", hide_env_values = true)]
    domotics_password: Option<String>,

    /// Device index of the level-mirroring dimmer.
    #[arg(long, env = "DOMOTICS_LEVEL_IDX", default_value_t = DEFAULT_LEVEL_DEVICE_IDX)]
    domotics_level_idx: u32,

    /// Accept self-signed Domoticz certificates.
    #[arg(long, env = "DOMOTICS_INSECURE")]
    domotics_insecure: bool,

    /// Connect Box router URL; remote access toggling is off without it.
    #[arg(long, env = "ZIGGO_URL")]
    ziggo_url: Option<String>,

    /// Router login (defaults to NULL).
    #[arg(long, env = "ZIGGO_LOGIN", default_value = "")]
    ziggo_login: String,

    /// Router password.
    #[arg(long, env = "ZIGGO_PASSWORD", default_value = "", hide_env_values = true)]
    ziggo_password: String,

    /// Comma-separated MAC addresses of the camera devices.
    #[arg(long, env = "ZIGGO_MACS", default_value = "")]
    ziggo_macs: String,

    /// Seconds between polls.
    #[arg(
        long,
        env = "POLL_INTERVAL_SECS",
        default_value_t = 2,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    poll_interval_secs: u64,

    /// Seconds before a session is recycled.
    #[arg(
        long,
        env = "SESSION_LIFETIME_SECS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    session_lifetime_secs: u64,

    /// Enable debug-level logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(report) => {
            info!(
                sessions = report.sessions,
                failed_opens = report.failed_opens,
                "Stopped"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, category = %e.category(), "Startup failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "alarm_mail_sync=debug"
    } else {
        "alarm_mail_sync=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(true)
        .init();
}

async fn run(cli: Cli) -> alarm_mail_sync::Result<SupervisorReport> {
    let domoticz = domoticz_config(&cli);

    let mut builder = MailConfig::builder()
        .mailbox(cli.imap_mailbox)
        .sender(cli.sender);
    if let Some(addr) = cli.imap_addr {
        builder = builder.address(addr);
    }
    if let Some(login) = cli.imap_login {
        builder = builder.login(login);
    }
    if let Some(password) = cli.imap_password {
        builder = builder.password(password);
    }
    let mail = builder.build()?;

    let mut dispatcher = NotificationDispatcher::new(Arc::new(DomoticzClient::new(domoticz)?));

    match cli.ziggo_url {
        Some(url) if !url.is_empty() => {
            let devices = parse_device_list(&cli.ziggo_macs);
            if devices.is_empty() {
                warn!("Router configured without devices, remote access is left alone");
            }
            let router = ConnectBoxConfig::new(url, cli.ziggo_login, cli.ziggo_password, devices);
            let devices = router.devices.clone();
            dispatcher = dispatcher.with_access_control(Arc::new(ConnectBoxClient::new(router)?), devices);
        }
        _ => info!("No router configured, remote access is left alone"),
    }

    let polling = PollingConfig {
        interval: Duration::from_secs(cli.poll_interval_secs),
        session_lifetime: Duration::from_secs(cli.session_lifetime_secs),
        ..PollingConfig::default()
    };

    info!(
        imap_host = %mail.host(),
        mailbox = %mail.mailbox,
        sender = %mail.sender,
        "Starting alarm mail sync"
    );

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let sender = mail.sender.clone();
    let mut supervisor =
        SessionSupervisor::new(ImapConnector::new(mail), dispatcher, sender, polling, cancel);

    Ok(supervisor.run().await)
}

/// Basic auth is sent whenever a login is given, with an empty password if none is set.
fn domoticz_config(cli: &Cli) -> DomoticzConfig {
    let mut domoticz = DomoticzConfig::new(cli.domotics_url.clone())
        .with_variable_path(cli.domotics_path.clone())
        .with_level_device_idx(cli.domotics_level_idx);
    domoticz.accept_invalid_certs = cli.domotics_insecure;

    match (&cli.domotics_login, &cli.domotics_password) {
        (Some(login), password) => {
            domoticz = domoticz.with_credentials(login.clone(), password.clone().unwrap_or_default());
        }
        (None, Some(_)) => warn!("DOMOTICS_PASSWORD is set without DOMOTICS_LOGIN, ignoring it"),
        (None, None) => {}
    }

    domoticz
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        () = wait_for_ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    hold_on_error(tokio::signal::ctrl_c()).await;
}

/// Resolves when `signal` fires; never resolves if its handler could not be installed.
async fn hold_on_error(signal: impl Future<Output = std::io::Result<()>>) {
    if let Err(e) = signal.await {
        error!(error = %e, "Signal handler unavailable, running until killed");
        std::future::pending::<()>().await;
    }
}
