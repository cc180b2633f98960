//! Client session handling.
//!
//! One session per TCP connection. After the `Hello` handshake every request
//! runs in its own task so that event waits and tuner commands can be in
//! flight together; responses are funnelled through a single writer task and
//! go out in completion order. A session holds at most a fixed number of
//! calls at once and rejects the excess with `InvalidState`.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use fmradio_protocol::{
    ClientId, ClientMessage, ErrorCode, EventCategory, Request, Response, ServerMessage,
    PROTOCOL_VERSION,
};

use crate::command_listener::CommandListener;
use crate::dispatcher::DispatchError;
use crate::lifecycle::SessionError;
use crate::notifier::NotifierError;
use crate::server::framing::{FrameError, ServerCodec};

/// Default for [`Session::with_call_limit`].
const DEFAULT_MAX_CALLS: usize = 16;

/// Session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Waiting for hello.
    Initial,
    /// Handshake complete, ready to accept commands.
    Ready,
}

/// Why the read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    ClientDisconnect,
    ProtocolError,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::ClientDisconnect => "client_disconnect",
            CloseReason::ProtocolError => "protocol_error",
            CloseReason::Shutdown => "server_shutdown",
        };
        f.write_str(s)
    }
}

/// Failure of a single call, reported to the client as an `Error` response.
#[derive(Debug)]
struct CallError {
    code: ErrorCode,
    message: String,
}

impl CallError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn into_message(self) -> ServerMessage {
        ServerMessage::Error {
            error_code: self.code.into(),
            message: self.message,
        }
    }
}

impl From<DispatchError> for CallError {
    fn from(e: DispatchError) -> Self {
        Self::new(e.error_code(), e.to_string())
    }
}

impl From<SessionError> for CallError {
    fn from(e: SessionError) -> Self {
        Self::new(e.error_code(), e.to_string())
    }
}

impl From<NotifierError> for CallError {
    fn from(e: NotifierError) -> Self {
        Self::new(e.error_code(), e.to_string())
    }
}

type ResponseSender = mpsc::Sender<Response>;

/// State shared between the session and its in-flight calls.
#[derive(Clone)]
struct CallContext {
    session_id: u64,
    service: Arc<CommandListener>,
    /// Client ids acquired over this connection.
    owned_clients: Arc<Mutex<HashSet<ClientId>>>,
}

impl CallContext {
    async fn handle_call(&self, message: ClientMessage) -> Result<ServerMessage, CallError> {
        match message {
            ClientMessage::AcquireClientId => {
                let client_id = self.service.acquire_client_id()?;
                self.owned_clients.lock().insert(client_id);
                debug!("[Session {}] Owns client {}", self.session_id, client_id);
                Ok(ServerMessage::AcquireClientIdAck { client_id })
            }
            ClientMessage::AcquireInitialState => {
                self.service.acquire_initial_state()?;
                Ok(ServerMessage::AcquireInitialStateAck)
            }
            ClientMessage::AcquireEvent { client_id, category } => {
                self.acquire_event(client_id, category).await
            }
            ClientMessage::EnableRadio => {
                self.run_blocking(CommandListener::enable_radio).await?;
                Ok(ServerMessage::EnableRadioAck)
            }
            ClientMessage::DisableRadio => {
                self.run_blocking(CommandListener::disable_radio).await?;
                Ok(ServerMessage::DisableRadioAck)
            }
            ClientMessage::SeekForwards => {
                self.run_blocking(CommandListener::seek_forwards).await?;
                Ok(ServerMessage::SeekForwardsAck)
            }
            ClientMessage::SeekBackwards => {
                self.run_blocking(CommandListener::seek_backwards).await?;
                Ok(ServerMessage::SeekBackwardsAck)
            }
            ClientMessage::SetAudioEndpoint { endpoint } => {
                self.run_blocking(move |s| s.set_audio_endpoint(endpoint))
                    .await?;
                Ok(ServerMessage::SetAudioEndpointAck)
            }
            ClientMessage::SetFrequency { frequency } => {
                self.run_blocking(move |s| s.set_frequency(frequency))
                    .await?;
                Ok(ServerMessage::SetFrequencyAck)
            }
            ClientMessage::GetSignalQuality => {
                let quality = self.run_blocking(CommandListener::get_signal_quality).await?;
                Ok(ServerMessage::GetSignalQualityAck { quality })
            }
            ClientMessage::Hello { .. } | ClientMessage::Ping => Err(CallError::new(
                ErrorCode::ProtocolError,
                "Message is handled by the session",
            )),
        }
    }

    async fn acquire_event(
        &self,
        client_id: ClientId,
        category: u16,
    ) -> Result<ServerMessage, CallError> {
        let category = EventCategory::try_from(category).map_err(|raw| {
            CallError::new(
                ErrorCode::InvalidParameter,
                format!("Unknown event category: {}", raw),
            )
        })?;

        if !self.owned_clients.lock().contains(&client_id) {
            return Err(NotifierError::UnknownClient(client_id).into());
        }

        trace!(
            "[Session {}] Client {} waiting for {}",
            self.session_id,
            client_id,
            category
        );
        let fired = self.service.wait_for_event(client_id, category).await?;
        Ok(ServerMessage::EventNotification { category: fired })
    }

    /// Run a tuner command on the blocking pool.
    async fn run_blocking<T, F>(&self, f: F) -> Result<T, CallError>
    where
        F: FnOnce(&CommandListener) -> Result<T, DispatchError> + Send + 'static,
        T: Send + 'static,
    {
        let service = Arc::clone(&self.service);
        match tokio::task::spawn_blocking(move || f(&service)).await {
            Ok(result) => Ok(result?),
            Err(e) => Err(CallError::new(
                ErrorCode::HardwareFailure,
                format!("Tuner call failed: {}", e),
            )),
        }
    }
}

/// A client session.
pub struct Session {
    /// Unique session ID.
    id: u64,
    /// Client address.
    addr: SocketAddr,
    /// Current session state.
    state: SessionState,
    /// Shared with in-flight calls.
    context: CallContext,
    /// One permit per in-flight call.
    call_slots: Arc<Semaphore>,
    max_calls: usize,
    /// Cancelled when the server shuts down.
    shutdown: CancellationToken,
}

impl Session {
    /// Create a new session.
    pub fn new(
        id: u64,
        addr: SocketAddr,
        service: Arc<CommandListener>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            addr,
            state: SessionState::Initial,
            context: CallContext {
                session_id: id,
                service,
                owned_clients: Arc::new(Mutex::new(HashSet::new())),
            },
            call_slots: Arc::new(Semaphore::new(DEFAULT_MAX_CALLS)),
            max_calls: DEFAULT_MAX_CALLS,
            shutdown,
        }
    }

    /// Limit the calls this session runs at once (at least one).
    pub fn with_call_limit(mut self, max_calls: usize) -> Self {
        let max_calls = max_calls.max(1);
        self.call_slots = Arc::new(Semaphore::new(max_calls));
        self.max_calls = max_calls;
        self
    }

    /// Run the session, processing requests until disconnection or shutdown.
    pub async fn run(mut self, socket: TcpStream) -> std::io::Result<()> {
        let (read_half, write_half) = socket.into_split();
        let mut requests = FramedRead::new(read_half, ServerCodec);
        // Every in-flight call can queue its reply without waiting
        let (tx, rx) = mpsc::channel(self.max_calls + 1);
        let writer = tokio::spawn(write_responses(
            self.id,
            FramedWrite::new(write_half, ServerCodec),
            rx,
        ));
        let mut calls = JoinSet::new();

        let reason = loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break CloseReason::Shutdown,

                Some(joined) = calls.join_next(), if !calls.is_empty() => {
                    if let Err(e) = joined {
                        error!("[Session {}] Call task failed: {}", self.id, e);
                    }
                }

                frame = requests.next() => match frame {
                    Some(Ok(request)) => self.handle_request(request, &tx, &mut calls).await,
                    Some(Err(e)) => {
                        error!("[Session {}] Protocol error: {}", self.id, e);
                        break CloseReason::ProtocolError;
                    }
                    None => break CloseReason::ClientDisconnect,
                },
            }
        };
        drop(requests);

        if reason == CloseReason::Shutdown {
            // Waits complete with ShuttingDown once the notifier stops
            info!(
                "[Session {}] Server shutting down, finishing {} calls",
                self.id,
                calls.len()
            );
            while let Some(joined) = calls.join_next().await {
                if let Err(e) = joined {
                    error!("[Session {}] Call task failed: {}", self.id, e);
                }
            }
        } else {
            calls.abort_all();
            while calls.join_next().await.is_some() {}
        }

        self.release_clients();

        drop(tx);
        let result = match writer.await {
            Ok(result) => result.map_err(std::io::Error::from),
            Err(e) => {
                error!("[Session {}] Writer task failed: {}", self.id, e);
                Ok(())
            }
        };

        info!(
            "[Session {}] Session with {} ended: {}",
            self.id, self.addr, reason
        );
        result
    }

    async fn handle_request(
        &mut self,
        request: Request,
        tx: &ResponseSender,
        calls: &mut JoinSet<()>,
    ) {
        let Request { call_id, message } = request;
        trace!("[Session {}] Received #{}: {:?}", self.id, call_id, message);

        match message {
            ClientMessage::Hello { version } => {
                let reply = self.handle_hello(version);
                send(tx, call_id, reply).await;
            }
            ClientMessage::Ping => send(tx, call_id, ServerMessage::Pong).await,
            _ if self.state != SessionState::Ready => {
                warn!(
                    "[Session {}] {:?} before handshake",
                    self.id,
                    message.message_type()
                );
                let error = CallError::new(ErrorCode::InvalidState, "Handshake required");
                send(tx, call_id, error.into_message()).await;
            }
            message => {
                let Ok(slot) = Arc::clone(&self.call_slots).try_acquire_owned() else {
                    warn!(
                        "[Session {}] Rejecting {:?}: {} calls in flight",
                        self.id,
                        message.message_type(),
                        self.max_calls
                    );
                    let error = CallError::new(ErrorCode::InvalidState, "Too many calls in flight");
                    send(tx, call_id, error.into_message()).await;
                    return;
                };

                let context = self.context.clone();
                let tx = tx.clone();
                calls.spawn(async move {
                    let _slot = slot;
                    let reply = match context.handle_call(message).await {
                        Ok(reply) => reply,
                        Err(e) => {
                            debug!(
                                "[Session {}] Call #{} failed: {:?} {}",
                                context.session_id, call_id, e.code, e.message
                            );
                            e.into_message()
                        }
                    };
                    send(&tx, call_id, reply).await;
                });
            }
        }
    }

    /// Handle Hello message.
    fn handle_hello(&mut self, version: u16) -> ServerMessage {
        info!("[Session {}] Client hello, version {}", self.id, version);

        let success = version == PROTOCOL_VERSION;
        if success {
            self.state = SessionState::Ready;
        } else {
            warn!(
                "[Session {}] Unsupported protocol version {} (expected {})",
                self.id, version, PROTOCOL_VERSION
            );
        }

        ServerMessage::HelloAck {
            version: PROTOCOL_VERSION,
            success,
        }
    }

    /// Release every client id this connection acquired.
    fn release_clients(&self) {
        let owned: Vec<ClientId> = self.context.owned_clients.lock().drain().collect();
        for client in owned {
            match self.context.service.release_client(client) {
                Ok(()) => {}
                // The notifier already dropped every client on shutdown
                Err(SessionError::Notifier(NotifierError::NotRunning)) => {}
                Err(e) => warn!(
                    "[Session {}] Failed to release client {}: {}",
                    self.id, client, e
                ),
            }
        }
    }
}

async fn send(tx: &ResponseSender, call_id: u32, message: ServerMessage) {
    // The writer is gone only when the connection already failed
    let _ = tx.send(Response::new(call_id, message)).await;
}

/// Write responses in arrival order until every sender is dropped.
async fn write_responses(
    session_id: u64,
    mut sink: FramedWrite<OwnedWriteHalf, ServerCodec>,
    mut rx: mpsc::Receiver<Response>,
) -> Result<(), FrameError> {
    while let Some(response) = rx.recv().await {
        trace!(
            "[Session {}] Sending #{}: {:?}",
            session_id,
            response.call_id,
            response.message
        );
        sink.send(response).await?;
    }
    sink.close().await
}
