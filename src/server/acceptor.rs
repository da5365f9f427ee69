//! Listening socket and accept loop.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::bridge::attach_shell;
use super::extended::ExtendedSession;
use super::ServerConfig;
use crate::error::NetshellError;
use crate::protocol::{sniff_server, Mode};
use crate::Result;

/// Pause after an accept error other than `EINTR`, so a persistent failure
/// such as descriptor exhaustion does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound netshell server.
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Bind the listening socket with `SO_REUSEADDR` and the configured backlog.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let address = config.bind_address();
        let addr = lookup_host(&address)
            .await?
            .next()
            .ok_or_else(|| NetshellError::UnknownHost(address.clone()))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(config.backlog)?;

        info!("netshell server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    /// Address the server is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop until `shutdown` becomes `true` (or its sender is
    /// dropped).
    ///
    /// Shutdown only stops new accepts: connections already running are left
    /// to finish on their own, and this future resolves once they have.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let Server { listener, config } = self;
        let mut handlers: JoinSet<()> = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            while let Some(finished) = handlers.try_join_next() {
                reap(finished);
            }

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("New connection from {}:{}", peer.ip(), peer.port());
                        let config = Arc::clone(&config);
                        handlers.spawn(
                            async move {
                                if let Err(e) = handle_connection(stream, &config).await {
                                    warn!("connection ended with error: {}", e);
                                }
                            }
                            .instrument(info_span!("connection", %peer)),
                        );
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        error!("accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("shutdown sender dropped");
                        break;
                    }
                }
            }
        }

        drop(listener);
        info!(
            "Server shutting down, waiting for {} active connection(s)",
            handlers.len()
        );
        while let Some(finished) = handlers.join_next().await {
            reap(finished);
        }
        info!("Server stopped");
        Ok(())
    }
}

fn reap(finished: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        error!("connection handler failed: {}", e);
    }
}

/// Negotiate the mode of one connection and serve it to completion.
async fn handle_connection(mut stream: TcpStream, config: &ServerConfig) -> Result<()> {
    let mode = sniff_server(&mut stream, config.sniff_timeout).await?;
    debug!("negotiated {} mode", mode);

    match mode {
        Mode::Basic => {
            let status = attach_shell(stream, &config.shell).await?;
            info!("shell exited ({})", status);
        }
        Mode::Extended => {
            ExtendedSession::new(stream, config.max_transfer_size)
                .run()
                .await?;
            info!("extended session closed");
        }
    }
    Ok(())
}

/// Flip `shutdown` to `true` on SIGINT or SIGTERM.
pub async fn shutdown_on_signal(shutdown: watch::Sender<bool>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = interrupt.recv() => info!("received SIGINT"),
        _ = terminate.recv() => info!("received SIGTERM"),
    }

    // Receivers may already be gone if the server stopped on its own.
    let _ = shutdown.send(true);
    Ok(())
}
