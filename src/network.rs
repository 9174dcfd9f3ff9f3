//! TCP console listener.
//!
//! The network side runs on its own tokio runtime. Sessions never touch the
//! server directly: each typed line becomes a [`ConsoleCommand`] on the
//! request queue, and the session waits for the reply the server thread sends
//! back before printing the next prompt.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::{oneshot, watch};

use crate::console::ConsoleCommand;
use crate::error::{NetworkError, NetworkResult};
use crate::request::RequestQueue;

/// Prompt written before every command.
pub const PROMPT: &str = "cog> ";

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Owns the network runtime and its listeners.
pub struct NetworkServer {
    runtime: Option<Runtime>,
    shutdown: watch::Sender<bool>,
    console_addr: Option<SocketAddr>,
}

impl NetworkServer {
    /// Start the network runtime. No listener is bound yet.
    pub fn start() -> NetworkResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("cog-network")
            .enable_all()
            .build()
            .map_err(|e| NetworkError::Runtime { source: e })?;
        let (shutdown, _) = watch::channel(false);
        tracing::debug!("network runtime started");
        Ok(Self {
            runtime: Some(runtime),
            shutdown,
            console_addr: None,
        })
    }

    /// Bind a console listener on `port` feeding `queue`. Port 0 picks any
    /// free port; the bound address is returned.
    pub fn add_console_listener(
        &mut self,
        port: u16,
        queue: RequestQueue,
    ) -> NetworkResult<SocketAddr> {
        let runtime = self.runtime.as_ref().ok_or(NetworkError::NotRunning)?;
        let bind_err = |e| NetworkError::Bind { port, source: e };

        let std_listener = std::net::TcpListener::bind(("0.0.0.0", port)).map_err(bind_err)?;
        std_listener.set_nonblocking(true).map_err(bind_err)?;
        let addr = std_listener.local_addr().map_err(bind_err)?;
        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(std_listener).map_err(bind_err)?
        };

        runtime.spawn(accept_loop(listener, queue, self.shutdown.subscribe()));
        self.console_addr = Some(addr);
        tracing::info!(%addr, "console listener started");
        Ok(addr)
    }

    /// Address of the console listener, if one is bound.
    pub fn console_addr(&self) -> Option<SocketAddr> {
        self.console_addr
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// Close every listener and session and shut the runtime down.
    pub fn stop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
            tracing::info!("network server stopped");
        }
        self.console_addr = None;
    }
}

impl Drop for NetworkServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for NetworkServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkServer")
            .field("running", &self.is_running())
            .field("console_addr", &self.console_addr)
            .finish()
    }
}

async fn accept_loop(
    listener: TcpListener,
    queue: RequestQueue,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "console session opened");
                    let queue = queue.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = session(stream, queue, shutdown).await {
                            tracing::debug!(%peer, error = %e, "console session error");
                        }
                        tracing::debug!(%peer, "console session closed");
                    });
                }
                Err(e) => tracing::warn!(error = %e, "console accept failed"),
            },
        }
    }
}

async fn session(
    stream: TcpStream,
    queue: RequestQueue,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    writer.write_all(PROMPT.as_bytes()).await?;

    loop {
        let line = tokio::select! {
            _ = shutdown.changed() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line == "quit" || line == "exit" {
            break;
        }

        if !line.is_empty() {
            let (tx, rx) = oneshot::channel();
            queue.push(Box::new(ConsoleCommand::new(line, tx)));
            let reply = tokio::select! {
                _ = shutdown.changed() => break,
                reply = rx => reply.unwrap_or_else(|_| "error: command was not executed".into()),
            };
            if !reply.is_empty() {
                writer.write_all(reply.as_bytes()).await?;
                if !reply.ends_with('\n') {
                    writer.write_all(b"\n").await?;
                }
            }
        }
        writer.write_all(PROMPT.as_bytes()).await?;
    }
    writer.shutdown().await
}
