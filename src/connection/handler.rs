// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a
//! client connection.

use super::guard::ConnectionGuard;
use crate::core::dispatcher;
use crate::core::protocol::{ImCodec, Packet};
use crate::core::registry::SessionId;
use crate::core::routing::ServerHandle;
use crate::core::state::ServerState;
use crate::core::ImError;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// What the select loop observed; acted upon outside the select so the
/// framed transport is only borrowed once at a time.
enum Event {
    GlobalShutdown,
    Killed,
    Outbound(Option<Packet>),
    Inbound(Option<Result<Packet, ImError>>),
}

/// Manages the full lifecycle of a client connection: one task per
/// connection owns the socket, its decoder, and its outbox. Inbound frames
/// are dispatched inline, which serializes processing per connection.
pub struct ConnectionHandler {
    framed: Framed<TcpStream, ImCodec>,
    addr: SocketAddr,
    state: Arc<ServerState>,
    session_id: SessionId,
    outbox_rx: mpsc::UnboundedReceiver<Packet>,
    kill_rx: broadcast::Receiver<()>,
    global_shutdown_rx: broadcast::Receiver<()>,
}

impl ConnectionHandler {
    pub fn new(
        socket: TcpStream,
        addr: SocketAddr,
        state: Arc<ServerState>,
        session_id: SessionId,
        outbox_rx: mpsc::UnboundedReceiver<Packet>,
        kill_rx: broadcast::Receiver<()>,
    ) -> Self {
        let global_shutdown_rx = state.shutdown_tx.subscribe();
        Self {
            framed: Framed::new(socket, ImCodec::new()),
            addr,
            state,
            session_id,
            outbox_rx,
            kill_rx,
            global_shutdown_rx,
        }
    }

    /// The main event loop for the connection. Returns when the peer goes
    /// away, the session is killed (logout), or the server shuts down.
    pub async fn run(&mut self) -> Result<(), ImError> {
        let _guard = ConnectionGuard::new(self.state.clone(), self.session_id, self.addr);
        let server = ServerHandle::new(self.state.clone());

        loop {
            let event = tokio::select! {
                // Shutdown and kill signals win over pending traffic.
                biased;
                _ = self.global_shutdown_rx.recv() => Event::GlobalShutdown,
                _ = self.kill_rx.recv() => Event::Killed,
                outbound = self.outbox_rx.recv() => Event::Outbound(outbound),
                inbound = self.framed.next() => Event::Inbound(inbound),
            };

            match event {
                Event::GlobalShutdown => {
                    info!(session_id = self.session_id, addr = %self.addr, "closing for server shutdown");
                    return Ok(());
                }
                Event::Killed => {
                    debug!(session_id = self.session_id, addr = %self.addr, "session killed");
                    return Ok(());
                }
                Event::Outbound(Some(packet)) => {
                    if let Err(e) = self.framed.send(packet).await {
                        if e.is_normal_disconnect() {
                            debug!(session_id = self.session_id, addr = %self.addr, "peer gone during send: {e}");
                        } else {
                            warn!(session_id = self.session_id, addr = %self.addr, "send failed: {e}");
                        }
                        return Ok(());
                    }
                }
                Event::Outbound(None) => {
                    // The registry entry (and with it the outbox sender) is
                    // gone; nothing left to deliver.
                    return Ok(());
                }
                Event::Inbound(Some(Ok(packet))) => {
                    dispatcher::dispatch(&server, self.session_id, packet).await;
                }
                Event::Inbound(Some(Err(e))) => {
                    if e.is_normal_disconnect() {
                        debug!(session_id = self.session_id, addr = %self.addr, "connection closed by peer: {e}");
                    } else {
                        warn!(session_id = self.session_id, addr = %self.addr, "connection error: {e}");
                    }
                    return Ok(());
                }
                Event::Inbound(None) => {
                    debug!(session_id = self.session_id, addr = %self.addr, "connection closed by peer");
                    return Ok(());
                }
            }
        }
    }
}
