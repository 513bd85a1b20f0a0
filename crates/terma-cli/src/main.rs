use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use terma_config::{Config, DEFAULT_UI_PORT};
use terma_core::{SessionRegistry, DEFAULT_CLEANUP_INTERVAL, DEFAULT_IDLE_TIMEOUT};
use terma_server::{announce, build_state, run_server, run_ws_server, ui};

#[derive(Parser)]
#[command(name = "terma")]
#[command(version)]
#[command(about = "Terma - multi-session terminal server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the Terma server")]
    Server {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long = "ui-port", default_value_t = DEFAULT_UI_PORT)]
        ui_port: u16,
        #[arg(long, default_value_t = false)]
        no_ui: bool,
    },
    #[command(about = "Create a new terminal session")]
    CreateSession {
        #[arg(long)]
        shell_command: Option<String>,
    },
    #[command(about = "List active terminal sessions")]
    ListSessions,
    #[command(about = "Close a terminal session")]
    CloseSession {
        session_id: String,
    },
    #[command(about = "Start the UI server")]
    Ui {
        #[arg(long)]
        host: Option<String>,
        #[arg(long, default_value_t = DEFAULT_UI_PORT)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        use clap::CommandFactory;
        let _ = Cli::command().print_help();
        return ExitCode::FAILURE;
    };

    match run(command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    let config = terma_config::load();

    match command {
        Commands::Server {
            host,
            port,
            ui_port,
            no_ui,
        } => serve(config, host, port, ui_port, no_ui).await,
        Commands::CreateSession { shell_command } => create_session(&config, shell_command).await,
        Commands::ListSessions => list_sessions(&config).await,
        Commands::CloseSession { session_id } => close_session(&config, &session_id).await,
        Commands::Ui { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let addr = parse_addr(&host, port)?;
            ui::run_ui_server(addr, ui::ui_dir()).await
        }
    }
}

fn parse_addr(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address: {host}:{port}"))
}

async fn serve(
    mut config: Config,
    host: Option<String>,
    port: Option<u16>,
    ui_port: u16,
    no_ui: bool,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let api_addr = parse_addr(&config.server.host, config.server.port)?;
    let state = build_state(config.clone());
    announce(&state).await;

    let mut tasks = tokio::task::JoinSet::new();

    {
        let state = state.clone();
        tasks.spawn(async move { run_server(api_addr, state).await });
    }

    // Optional dedicated WebSocket listener.
    if let Ok(ws_port) = std::env::var("TERMA_WS_PORT") {
        let ws_port: u16 = ws_port
            .parse()
            .with_context(|| format!("invalid TERMA_WS_PORT: {ws_port}"))?;
        let ws_host = std::env::var("TERMA_WS_HOST").unwrap_or_else(|_| config.server.host.clone());
        let ws_addr = parse_addr(&ws_host, ws_port)?;
        let state = state.clone();
        tasks.spawn(async move { run_ws_server(ws_addr, state).await });
    }

    if !no_ui {
        let ui_host = std::env::var("TERMA_UI_HOST").unwrap_or_else(|_| config.server.host.clone());
        let ui_addr = parse_addr(&ui_host, ui_port)?;
        tasks.spawn(async move { ui::run_ui_server(ui_addr, ui::ui_dir()).await });
    }

    let result = tokio::select! {
        joined = tasks.join_next() => match joined {
            Some(Ok(result)) => result,
            Some(Err(e)) => Err(anyhow::anyhow!("server task panicked: {e}")),
            None => Ok(()),
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    };

    if let Some(hermes) = &state.hermes {
        hermes.deregister().await;
    }
    state.registry.stop().await;
    result
}

fn session_registry(config: &Config) -> Arc<SessionRegistry> {
    Arc::new(SessionRegistry::with_shell(
        config.terminal.default_shell.clone(),
        DEFAULT_CLEANUP_INTERVAL,
        DEFAULT_IDLE_TIMEOUT,
    ))
}

async fn create_session(config: &Config, shell_command: Option<String>) -> anyhow::Result<()> {
    let registry = session_registry(config);
    let session_id = registry
        .create(None, shell_command)
        .await
        .context("failed to create session")?;
    println!("Created session: {session_id}");

    // Give the shell a moment to come up before the process exits.
    tokio::time::sleep(Duration::from_millis(100)).await;
    registry.stop().await;
    Ok(())
}

async fn list_sessions(config: &Config) -> anyhow::Result<()> {
    let registry = session_registry(config);
    let sessions = registry.list().await;
    if sessions.is_empty() {
        println!("No active sessions");
    } else {
        println!("Active sessions:");
        for session in sessions {
            println!(
                "  {} - Active: {}, Shell: {}, Idle: {:.1}s",
                session.id, session.active, session.shell_command, session.idle_time
            );
        }
    }
    Ok(())
}

async fn close_session(config: &Config, session_id: &str) -> anyhow::Result<()> {
    let registry = session_registry(config);
    if registry.close(session_id).await {
        println!("Closed session: {session_id}");
        Ok(())
    } else {
        anyhow::bail!("Failed to close session: {session_id}")
    }
}
