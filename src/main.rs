use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zerobuild_liveness::config::LivenessConfig;
use zerobuild_liveness::gateway::{self, AppState};
use zerobuild_liveness::health::port::wait_until_listening;
use zerobuild_liveness::health::{
    BackupLauncher, Endpoint, HealthSession, SandboxBackup, SandboxProbe, TunnelProbe,
};
use zerobuild_liveness::observability::Metrics;
use zerobuild_liveness::resolver::{SandboxResolver, StoreResolver};
use zerobuild_liveness::store;

#[derive(Parser, Debug)]
#[command(name = "zerobuild-liveness", version)]
#[command(about = "Sandbox file watching, tunnel health checks and dev server failover")]
struct Cli {
    /// Config file (defaults to ~/.zerobuild/liveness.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP gateway
    Serve,
    /// Probe a tunnel endpoint once and print the report as JSON
    Probe {
        url: String,
        /// Sandbox to cross-check the port in
        #[arg(long)]
        sandbox_id: Option<String>,
        /// Port checked inside the sandbox (defaults to the primary port)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run a health monitor session in the foreground
    Monitor {
        #[arg(long)]
        project: String,
        /// Public URL of the primary dev server
        #[arg(long)]
        url: String,
    },
    /// Record (or clear) which sandbox serves a project
    Attach {
        project_id: String,
        sandbox_id: Option<String>,
        #[arg(long, conflicts_with = "sandbox_id")]
        clear: bool,
    },
    /// Print shell completions
    Completions { shell: Shell },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "zerobuild_liveness=info",
        1 => "zerobuild_liveness=debug",
        _ => "zerobuild_liveness=trace",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Completions { shell } = cli.command {
        clap_complete::generate(
            shell,
            &mut Cli::command(),
            "zerobuild-liveness",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    init_tracing(cli.verbose);
    let config = LivenessConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Probe {
            url,
            sandbox_id,
            port,
        } => probe(config, &url, sandbox_id.as_deref(), port).await,
        Command::Monitor { project, url } => monitor(config, &project, &url).await,
        Command::Attach {
            project_id,
            sandbox_id,
            clear,
        } => attach(&config, &project_id, sandbox_id.as_deref(), clear),
        Command::Completions { .. } => Ok(()),
    }
}

fn open_resolver(config: &LivenessConfig) -> Result<Arc<StoreResolver>> {
    Ok(Arc::new(StoreResolver::open(
        Path::new(&config.store.db_path),
        config,
    )?))
}

async fn serve(config: LivenessConfig) -> Result<()> {
    let resolver = open_resolver(&config)?;
    let state = AppState::new(config, resolver)?;
    gateway::run(state).await
}

async fn probe(
    config: LivenessConfig,
    url: &str,
    sandbox_id: Option<&str>,
    port: Option<u16>,
) -> Result<()> {
    let sandbox = match sandbox_id {
        Some(id) => Some(open_resolver(&config)?.attach(id).await?),
        None => None,
    };
    let probe = TunnelProbe::new(&config.probe, Arc::new(Metrics::new()))?;
    let report = probe
        .probe(
            url,
            sandbox.as_deref(),
            port.unwrap_or(config.failover.primary_port),
        )
        .await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn monitor(config: LivenessConfig, project_id: &str, url: &str) -> Result<()> {
    let resolver = open_resolver(&config)?;
    let sandbox = resolver.resolve_project(project_id).await?;
    let metrics = Arc::new(Metrics::new());
    let port_budget = Duration::from_millis(config.probe.port_check_timeout_ms);

    let probe = Arc::new(TunnelProbe::new(&config.probe, metrics.clone())?);
    let launcher = Arc::new(BackupLauncher::new(
        config.failover.clone(),
        config.sandbox.project_root.clone(),
        port_budget,
        metrics,
    ));
    let session = HealthSession::new(
        project_id,
        Endpoint::new(url, config.failover.primary_port),
        Arc::new(SandboxProbe::new(probe, sandbox.clone())),
        Arc::new(SandboxBackup::new(launcher, project_id, sandbox.clone())),
        &config.monitor,
    );

    let primary_port = config.failover.primary_port;
    let poll = config.failover.ready_poll();
    let ready = async move {
        // Activation waits for the primary dev server's first successful boot.
        while !wait_until_listening(sandbox.as_ref(), primary_port, port_budget, poll, poll * 20).await {
            tracing::info!("Waiting for dev server on port {primary_port}");
        }
    };

    let mut events = session.subscribe();
    let handle = session.spawn(ready);
    tracing::info!("Monitoring project {project_id} at {url}, Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Dropped {n} monitor events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    handle.stop().await;
    println!("{}", serde_json::to_string_pretty(&session.state())?);
    Ok(())
}

fn attach(
    config: &LivenessConfig,
    project_id: &str,
    sandbox_id: Option<&str>,
    clear: bool,
) -> Result<()> {
    let conn = store::init_db(Path::new(&config.store.db_path))?;
    if clear {
        if store::projects::clear_sandbox_id(&conn, project_id)? {
            println!("Cleared sandbox for project {project_id}");
        } else {
            println!("Project {project_id} had no sandbox");
        }
        return Ok(());
    }

    let sandbox_id = sandbox_id.context("sandbox id is required unless --clear is given")?;
    store::projects::save_sandbox_id(&conn, project_id, sandbox_id)?;
    println!("Project {project_id} -> sandbox {sandbox_id}");
    Ok(())
}
