//! closerd - Mistaken Pull Request Closer
//!
//! Main entry point for the daemon binary.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use closerd::check::check_config_file;
use closerd::{Daemon, DaemonConfig};
use eyre::WrapErr;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "closerd",
    about = "Closes pull requests opened from the wrong branch",
    version,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(flatten)]
    serve: ServeArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a repository config file and its filters
    CheckConfig {
        /// Path to the YAML config file
        path: PathBuf,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, env = "CLOSERD_PORT")]
    port: Option<u16>,

    /// Address to bind to
    #[arg(short, long, env = "CLOSERD_BIND")]
    bind: Option<IpAddr>,

    /// Daemon config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// GitHub REST API base URL
    #[arg(long, env = "GITHUB_API_URL")]
    api_base: Option<String>,

    /// GitHub API token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

impl ServeArgs {
    fn into_config(self) -> eyre::Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::from_file(path)
                .wrap_err_with(|| format!("failed to load {}", path.display()))?,
            None => DaemonConfig::default(),
        };
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(api_base) = self.api_base {
            config.api_base = api_base;
        }
        if self.token.is_some() {
            config.token = self.token;
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing.
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Some(Command::CheckConfig { path }) => check_config(&path),
        None => match serve(cli.serve) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}

fn check_config(path: &Path) -> ExitCode {
    let reports = match check_config_file(path) {
        Ok(reports) => reports,
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let mut failed = false;
    for report in &reports {
        match &report.error {
            None => println!("ok      [{}] {}", report.index, report.source),
            Some(e) => {
                failed = true;
                println!("invalid [{}] {}: {}", report.index, report.source, e);
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        println!("{}: {} filter(s) valid", path.display(), reports.len());
        ExitCode::SUCCESS
    }
}

fn serve(args: ServeArgs) -> eyre::Result<()> {
    let config = args.into_config()?;

    // Run the async main.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("failed to create tokio runtime")?;

    runtime.block_on(async {
        let daemon = Daemon::new(config).wrap_err("failed to initialize daemon")?;

        // Set up signal handlers for graceful shutdown.
        let cancel = daemon.cancel_token();
        tokio::spawn(shutdown_on_signal(cancel));

        daemon.run().await
    })
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!("failed to register signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT, initiating graceful shutdown"),
            _ = sigterm.recv() => info!("received SIGTERM, initiating graceful shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
            return;
        }
        info!("received SIGINT, initiating graceful shutdown");
    }

    cancel.cancel();
}
