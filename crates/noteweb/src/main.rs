//! # noteweb
//!
//! Server binary: loads settings, opens the vault, watches it for changes
//! and serves the note graph over JSON-RPC on a WebSocket.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use noteweb_rpc::handlers::register_all;
use noteweb_rpc::{ChangeVersion, HandlerLimits, MethodRegistry, RpcContext};
use noteweb_server::metrics::install_recorder;
use noteweb_server::{NoteServer, ServerConfig};
use noteweb_settings::NotewebSettings;
use noteweb_vault::{ChangeSink, FsVault, VaultWatcher};

/// noteweb server.
#[derive(Parser, Debug)]
#[command(name = "noteweb", about = "Serve a note vault's link graph over JSON-RPC")]
struct Cli {
    /// Settings file (defaults to `~/.noteweb/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Vault root folder (overrides settings).
    #[arg(long)]
    vault: Option<PathBuf>,

    /// Do not watch the vault for changes.
    #[arg(long)]
    no_watch: bool,

    /// Log JSON lines instead of text.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Apply flags over loaded settings.
    fn apply(&self, settings: &mut NotewebSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(vault) = &self.vault {
            settings.vault.root = vault.display().to_string();
        }
        if self.no_watch {
            settings.vault.watch = false;
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

fn load_settings(cli: &Cli) -> Result<NotewebSettings> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(noteweb_settings::settings_path);
    let mut settings = noteweb_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    let _ = noteweb_logging::init_subscriber(&settings.logging);

    let vault = FsVault::open(&settings.vault.root)
        .with_context(|| format!("Failed to open vault: {}", settings.vault.root))?;
    let vault_root = vault.root().to_path_buf();

    let versions = Arc::new(ChangeVersion::new());
    let ctx = RpcContext::new(
        Arc::new(vault),
        Arc::clone(&versions),
        HandlerLimits::from_settings(&settings.vault),
    );

    let mut registry = MethodRegistry::new();
    register_all(&mut registry);
    let method_count = registry.methods().len();

    let notice = settings.notice.clone();
    let mut server = NoteServer::new(ServerConfig::from_settings(&settings.server), registry, ctx)
        .with_connect_hook(move |client_id| {
            tracing::info!(client_id, "{notice}");
        });
    match install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "metrics recorder unavailable, /metrics disabled"),
    }

    let addr = server.start().await.context("Failed to bind server")?;
    tracing::info!(
        vault = %vault_root.display(),
        "noteweb listening on ws://{addr}/ws ({method_count} RPC methods registered)"
    );

    let _watcher = if settings.vault.watch {
        let sink: Arc<dyn ChangeSink> = versions;
        let watcher = VaultWatcher::start(
            &vault_root,
            Duration::from_millis(settings.vault.debounce_ms),
            sink,
        )
        .with_context(|| format!("Failed to watch vault: {}", vault_root.display()))?;
        Some(watcher)
    } else {
        tracing::info!("vault watching disabled");
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["noteweb"]);
        let mut settings = NotewebSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 27125);
        assert!(settings.vault.watch);
        assert!(!settings.logging.json);
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "noteweb",
            "--host",
            "127.0.0.1",
            "--port",
            "0",
            "--vault",
            "/notes",
            "--no-watch",
            "--log-json",
        ]);
        let mut settings = NotewebSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.vault.root, "/notes");
        assert!(!settings.vault.watch);
        assert!(settings.logging.json);
    }

    #[test]
    fn load_settings_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 4000}, "notice": "hi"}"#).unwrap();

        let cli = Cli::parse_from(["noteweb", "--config", path.to_str().unwrap()]);
        let settings = load_settings(&cli).unwrap();
        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.notice, "hi");
    }

    #[test]
    fn load_settings_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();

        let cli = Cli::parse_from(["noteweb", "--config", path.to_str().unwrap()]);
        assert!(load_settings(&cli).is_err());
    }
}
