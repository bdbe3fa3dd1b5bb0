use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use chatter_types::models::User;

use crate::auth::{Authenticator, CLOSE_GOING_AWAY, HandshakeError};
use crate::hub::Hub;
use crate::registry::{Connection, Outbound};

/// How long a closing connection may take to flush its queued frames.
const WRITER_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of one gateway connection. `Closed` is terminal.
///
/// The order of states is fixed by the straight-line control flow of
/// [`handle_connection`]; `advance` only re-checks it with `debug_assert!`,
/// so release builds perform no runtime transition check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Authenticating,
    Active,
    Closed,
}

impl ConnectionState {
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Pending, Authenticating)
                | (Pending, Closed)
                | (Authenticating, Active)
                | (Authenticating, Closed)
                | (Active, Closed)
        )
    }

    fn advance(&mut self, next: ConnectionState) {
        debug_assert!(self.can_advance_to(next), "{:?} -> {:?}", self, next);
        trace!("connection state {:?} -> {:?}", self, next);
        *self = next;
    }
}

/// One receive call, classified.
#[derive(Debug)]
pub enum Inbound {
    Text(String),
    /// Control or binary frame; not part of the chat stream.
    Ignored,
    Closed,
    Error(axum::Error),
}

impl Inbound {
    pub fn from_frame(frame: Option<Result<Message, axum::Error>>) -> Self {
        match frame {
            Some(Ok(Message::Text(text))) => Inbound::Text(text.as_str().to_owned()),
            Some(Ok(Message::Close(_))) | None => Inbound::Closed,
            Some(Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_))) => Inbound::Ignored,
            Some(Err(e)) => Inbound::Error(e),
        }
    }
}

#[derive(Debug)]
enum Disconnect {
    ClientClosed,
    ReceiveError(axum::Error),
    WriterGone,
    /// The outbound queue overflowed and the broadcaster dropped us.
    Lagged,
    Shutdown,
}

/// Drive one upgraded socket from handshake to cleanup.
///
/// `token` is the raw `token` query parameter of the upgrade request.
/// Rejected handshakes are closed with the matching close code and never
/// touch the registry.
pub async fn handle_connection(
    mut socket: WebSocket,
    hub: Hub,
    auth: Authenticator,
    token: Option<String>,
) {
    let mut state = ConnectionState::Pending;
    state.advance(ConnectionState::Authenticating);

    let user = match authenticate(&hub, &auth, token.as_deref()).await {
        Ok(user) => user,
        Err(e) => {
            match &e {
                HandshakeError::Store(_) => error!("Gateway handshake failed: {}", e),
                _ => info!("Gateway handshake rejected: {}", e),
            }
            let frame = CloseFrame {
                code: e.close_code(),
                reason: e.reason().into(),
            };
            let _ = socket.send(Message::Close(Some(frame))).await;
            state.advance(ConnectionState::Closed);
            return;
        }
    };

    state.advance(ConnectionState::Active);
    run_session(socket, hub, user).await;
    state.advance(ConnectionState::Closed);
}

async fn authenticate(
    hub: &Hub,
    auth: &Authenticator,
    token: Option<&str>,
) -> Result<User, HandshakeError> {
    if hub.is_shutting_down() {
        return Err(HandshakeError::ShuttingDown);
    }
    auth.authenticate(token).await
}

async fn run_session(socket: WebSocket, hub: Hub, user: User) {
    let (conn, outbound) = Connection::new(&user.username);
    let (sink, mut stream) = socket.split();

    let registration = hub.register(conn.clone());
    info!("{} ({}) connected to gateway", user.username, conn.id());

    let mut writer = tokio::spawn(write_loop(sink, outbound));
    let mut writer_done = false;
    let shutdown = hub.shutdown_token();

    let reason = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Disconnect::Shutdown,
            _ = conn.lagged() => break Disconnect::Lagged,
            _ = &mut writer => {
                writer_done = true;
                break Disconnect::WriterGone;
            }
            frame = stream.next() => match Inbound::from_frame(frame) {
                Inbound::Text(text) => {
                    hub.publish(&conn, text);
                }
                Inbound::Ignored => {}
                Inbound::Closed => break Disconnect::ClientClosed,
                Inbound::Error(e) => break Disconnect::ReceiveError(e),
            },
        }
    };

    // Leave the broadcast set before anything else can go wrong.
    drop(registration);

    if matches!(reason, Disconnect::Shutdown) {
        let _ = conn.deliver(Outbound::Close(CLOSE_GOING_AWAY, "server shutting down".into()));
    }
    drop(conn);

    if matches!(reason, Disconnect::Lagged) && !writer_done {
        // The backlog is what got us evicted; do not wait for it to flush.
        writer.abort();
    } else if !writer_done && tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        debug!("{} writer did not finish in time, aborting", user.username);
        writer.abort();
    }

    match reason {
        Disconnect::ReceiveError(e) => {
            debug!("{} disconnected after receive error: {}", user.username, e)
        }
        other => debug!("{} disconnected: {:?}", user.username, other),
    }
    info!("{} disconnected from gateway", user.username);
}

/// Drain the outbound queue into the socket. Returns on the first write
/// error; dropping the queue makes every later delivery to this connection
/// fail.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
) {
    while let Some(frame) = outbound.recv().await {
        let sent = match frame {
            Outbound::Text(text) => sink.send(Message::Text(text.into())).await,
            Outbound::Close(code, reason) => {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                return;
            }
        };

        if let Err(e) = sent {
            debug!("Gateway write failed: {}", e);
            return;
        }
    }

    let _ = sink.close().await;
}
