//! TCP listener for accepting client connections.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::command_listener::CommandListener;
use crate::server::session::Session;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Maximum concurrent sessions. Further connections wait for a free slot.
    pub max_connections: usize,
    /// Calls one session may have in flight. Further calls are rejected.
    pub max_calls_per_session: usize,
}

/// Accepts connections and runs one session per connection.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    service: Arc<CommandListener>,
    shutdown: CancellationToken,
}

impl Server {
    /// Bind the listening socket.
    pub async fn bind(config: ServerConfig, service: Arc<CommandListener>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let shutdown = service.shutdown_token();
        Ok(Self {
            listener,
            config,
            service,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown, then wait for every session to finish.
    pub async fn run(self) -> std::io::Result<()> {
        let Server {
            listener,
            config,
            service,
            shutdown,
        } = self;

        info!("Server listening on {}", listener.local_addr()?);

        let permits = Arc::new(Semaphore::new(config.max_connections.max(1)));
        let mut sessions = JoinSet::new();
        let mut connection_count = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!("Session task failed: {}", e);
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, addr)) => {
                        connection_count += 1;
                        let session_id = connection_count;
                        info!("[Session {}] New connection from {}", session_id, addr);

                        let service = Arc::clone(&service);
                        let permits = Arc::clone(&permits);
                        let shutdown = shutdown.clone();
                        let max_calls = config.max_calls_per_session;
                        sessions.spawn(async move {
                            if let Err(e) = handle_connection(
                                socket, addr, session_id, service, permits, max_calls, shutdown,
                            )
                            .await
                            {
                                error!("[Session {}] Connection error: {}", session_id, e);
                            }
                            info!("[Session {}] Connection closed", session_id);
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }

        drop(listener);
        info!("Stopped accepting connections, waiting for {} sessions", sessions.len());
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!("Session task failed: {}", e);
            }
        }
        info!("Server stopped");
        Ok(())
    }
}

/// Handle a single client connection once a session slot is free.
async fn handle_connection(
    socket: TcpStream,
    addr: SocketAddr,
    session_id: u64,
    service: Arc<CommandListener>,
    permits: Arc<Semaphore>,
    max_calls: usize,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let _permit = tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return Ok(()),
        },
    };

    // Disable Nagle's algorithm for lower latency
    if let Err(e) = socket.set_nodelay(true) {
        warn!("[Session {}] Failed to set TCP_NODELAY: {}", session_id, e);
    }

    Session::new(session_id, addr, service, shutdown)
        .with_call_limit(max_calls)
        .run(socket)
        .await
}
