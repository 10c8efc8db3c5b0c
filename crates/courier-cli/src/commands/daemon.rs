//! CLI commands for the courier daemon.
//!
//! - `init`: create the default courier.toml
//! - `run`: run the daemon in the foreground
//! - `start`/`stop`: control the supervised client
//! - `status`: query the supervisor state
//! - `shutdown`: stop the daemon process

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{info, warn};

use courier_channel::DiscordPlatform;
use courier_control::{ControlClient, ControlCommand};
use courier_daemon::{DaemonPing, DaemonRuntime};
use courier_types::{config_path, courier_dir, CourierConfig, Credential, StatusReport};

/// Environment variable holding the bot token.
const TOKEN_ENV: &str = "DISCORD_TOKEN";

fn load_config() -> anyhow::Result<CourierConfig> {
    Ok(CourierConfig::load_or_default(&config_path())?)
}

fn client() -> anyhow::Result<ControlClient> {
    Ok(ControlClient::new(load_config()?.control.socket_path))
}

/// Connect to the daemon, or explain that it is not running.
fn running_client() -> anyhow::Result<Option<ControlClient>> {
    let client = client()?;
    if !client.is_running() {
        println!("Daemon is not running.\nStart it with `courier run`.");
        return Ok(None);
    }
    Ok(Some(client))
}

/// Write a default configuration to `~/.courier/courier.toml`.
pub fn init() -> anyhow::Result<()> {
    let path = config_path();
    if path.exists() {
        anyhow::bail!(
            "config already exists at {}\nEdit it directly or remove to reinitialize.",
            path.display()
        );
    }

    std::fs::create_dir_all(courier_dir())?;
    std::fs::write(&path, CourierConfig::default().to_toml()?)?;

    println!("Config created at: {}", path.display());
    println!();
    println!("Put the bot token in {TOKEN_ENV} (or a .env file), then run:");
    println!("  courier run");
    Ok(())
}

/// Run the daemon in the foreground. Blocks until shutdown.
pub fn run() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            warn!(error = %e, "failed to load .env file");
        }
    }

    let config = load_config()?;

    let env_credential = match std::env::var(TOKEN_ENV) {
        Ok(raw) => match Credential::parse(&raw) {
            Ok(credential) => {
                info!("using credential from {TOKEN_ENV}");
                Some(credential)
            }
            Err(e) => {
                warn!(error = %e, "ignoring {TOKEN_ENV}");
                None
            }
        },
        Err(_) => None,
    };

    let platform = Arc::new(DiscordPlatform::new(config.discord.clone()));
    let mut runtime = DaemonRuntime::new(config, platform, env_credential);
    let shutdown = runtime.shutdown_flag();

    ctrlc::set_handler(move || {
        eprintln!("\nShutdown signal received...");
        shutdown.store(true, Ordering::Relaxed);
    })?;

    println!(
        "Daemon starting (socket {})...",
        runtime.config.control.socket_path.display()
    );
    runtime.run().map_err(|e| anyhow::anyhow!("{e}"))
}

/// Start the supervised client.
pub fn start(token: Option<String>) -> anyhow::Result<()> {
    let Some(client) = running_client()? else {
        return Ok(());
    };

    let response = client
        .send(&ControlCommand::Start { token })
        .map_err(|e| anyhow::anyhow!("failed to send start: {e}"))?;

    if !response.ok {
        anyhow::bail!("start failed: {}", response.message);
    }
    println!("Client started.");
    Ok(())
}

/// Stop the supervised client.
pub fn stop() -> anyhow::Result<()> {
    let Some(client) = running_client()? else {
        return Ok(());
    };

    let response = client
        .send(&ControlCommand::Stop)
        .map_err(|e| anyhow::anyhow!("failed to send stop: {e}"))?;

    if !response.ok {
        anyhow::bail!("stop failed: {}", response.message);
    }
    println!("{}.", capitalize(&response.message));
    Ok(())
}

/// Query the supervisor status.
pub fn status(json: bool) -> anyhow::Result<()> {
    let Some(client) = running_client()? else {
        return Ok(());
    };

    let response = client
        .send(&ControlCommand::Status)
        .map_err(|e| anyhow::anyhow!("failed to query status: {e}"))?;
    let Some(report) = response.data_as::<StatusReport>() else {
        anyhow::bail!("unexpected status response: {}", response.message);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let ping = client
        .send(&ControlCommand::Ping)
        .ok()
        .and_then(|r| r.data_as::<DaemonPing>());

    print!("{}", format_status(&report, ping.as_ref()));
    Ok(())
}

/// Ask the daemon to exit.
pub fn shutdown() -> anyhow::Result<()> {
    let Some(client) = running_client()? else {
        return Ok(());
    };

    let response = client
        .send(&ControlCommand::Shutdown)
        .map_err(|e| anyhow::anyhow!("failed to send shutdown: {e}"))?;

    if response.ok {
        println!("Daemon shutdown requested.");
    } else {
        println!("Shutdown failed: {}", response.message);
    }
    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn format_status(report: &StatusReport, ping: Option<&DaemonPing>) -> String {
    let mut out = String::new();
    out.push_str(&format!("Client:      {}\n", report.phase));
    if let Some(error) = &report.error {
        out.push_str(&format!("  Error:     {error}\n"));
    }
    if let Some(uptime) = report.uptime_secs {
        out.push_str(&format!("  Uptime:    {uptime}s\n"));
    }
    out.push_str(&format!("  Restarts:  {}\n", report.restart_count));
    if report.manually_stopped {
        out.push_str("  Automatic restarts suppressed until the next start.\n");
    }
    out.push_str(&format!("Deployment:  {}\n", report.deployment_id));
    if let Some(ping) = ping {
        out.push_str(&format!(
            "Daemon:      PID {}, up {}s (since {})\n",
            ping.daemon_pid,
            ping.uptime_secs,
            ping.started_at.to_rfc3339()
        ));
    }
    out
}
