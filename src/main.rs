//! cogserver: cognitive server host process.

use std::path::PathBuf;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use cogserver::builtin::register_builtin_requests;
use cogserver::config::ServerConfig;
use cogserver::server::CogServer;

#[derive(Parser)]
#[command(name = "cogserver", version, about = "Cognitive server core")]
struct Cli {
    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Console listener port (0 picks a free port).
    #[arg(long)]
    port: Option<u16>,

    /// Target duration of one cycle, in milliseconds.
    #[arg(long)]
    cycle_duration: Option<u64>,

    /// Script of console commands run before the first cycle.
    #[arg(long)]
    bootstrap: Option<PathBuf>,

    /// Module to load at startup (repeatable).
    #[arg(long = "module")]
    modules: Vec<String>,

    /// Do not start the console listener.
    #[arg(long)]
    no_network: bool,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.server_port = port;
        }
        if let Some(ms) = self.cycle_duration {
            config.server_cycle_duration = ms;
        }
        if let Some(path) = &self.bootstrap {
            config.bootstrap_script = Some(path.clone());
        }
        config.modules.extend(self.modules.iter().cloned());
    }
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok();

    let cli = Cli::parse();
    let mut config = ServerConfig::resolve(cli.config.as_deref())?;
    cli.apply(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    let modules = config.modules.clone();
    let mut server = CogServer::new(config);
    register_builtin_requests(&mut server)?;

    for path in &modules {
        if let Err(e) = server.load_module(path) {
            tracing::warn!(path, error = %e, "startup module not loaded");
        }
    }

    if !cli.no_network {
        let addr = server.enable_network()?;
        tracing::info!(%addr, "console listening");
    }

    let mut signals = Signals::new([SIGINT, SIGTERM]).into_diagnostic()?;
    let handle = server.handle();
    std::thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            tracing::info!(signal, "stopping on signal");
            handle.stop();
        }
    });

    server.serve();
    drop(server);
    tracing::info!("cogserver exited");
    Ok(())
}
