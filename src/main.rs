use clap::Parser;
use ssh_tunnel_proxy::cli::{Cli, Mode};
use ssh_tunnel_proxy::config::ConfigStore;
use ssh_tunnel_proxy::supervisor::Supervisor;
use ssh_tunnel_proxy::system_proxy::NoopSystemProxyHook;
use ssh_tunnel_proxy::utils::logger;
use std::sync::Arc;

const EXIT_OK: i32 = 0;
const EXIT_FATAL_START: i32 = 1;
const EXIT_USAGE: i32 = 2;

#[tokio::main]
async fn main() {
    logger::init();

    let cli = Cli::parse();

    if cli.mode == Mode::Gui {
        eprintln!("GUI mode is not available in this build.");
        eprintln!("Run with `cli` and the connection flags instead, e.g.:");
        eprintln!("  ssh-tunnel-proxy cli --host <HOST> --user <USER> --password <PASSWORD>");
        std::process::exit(EXIT_USAGE);
    }

    let cfg = match cli.to_session_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {}", e.user_message());
            std::process::exit(EXIT_USAGE);
        }
    };

    let supervisor = Supervisor::new(Arc::new(NoopSystemProxyHook));

    if let Err(e) = supervisor.start(cfg.clone()).await {
        eprintln!("error: failed to start session: {}", e.user_message());
        std::process::exit(EXIT_FATAL_START);
    }

    tracing::info!(
        "tunnel up: socks5://127.0.0.1:{} http://127.0.0.1:{}",
        cfg.socks_port,
        cfg.http_port
    );

    if !cli.no_save {
        match ConfigStore::new() {
            Ok(store) => {
                if let Err(e) = store.save(&cfg).await {
                    tracing::warn!("failed to save session config: {}", e);
                }
            }
            Err(e) => tracing::warn!("failed to resolve config directory: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {}", e);
    }

    tracing::info!("shutting down");
    supervisor.stop().await;

    std::process::exit(EXIT_OK);
}
