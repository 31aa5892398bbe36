// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling
//! graceful shutdown.

use super::initialization::ServerContext;
use crate::connection::ConnectionHandler;
use crate::core::registry::SessionId;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Resolves once the process is asked to stop: SIGINT or SIGTERM on Unix,
/// Ctrl+C elsewhere.
async fn shutdown_requested() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut interrupt = signal(SignalKind::interrupt()).expect("cannot install SIGINT handler");
        let mut terminate = signal(SignalKind::terminate()).expect("cannot install SIGTERM handler");
        tokio::select! {
            _ = interrupt.recv() => info!("caught SIGINT, beginning graceful shutdown"),
            _ = terminate.recv() => info!("caught SIGTERM, beginning graceful shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("cannot install Ctrl+C handler");
        info!("caught Ctrl+C, beginning graceful shutdown");
    }
}

/// The main server loop: accepts connections, spawns one handler task per
/// client, and orchestrates graceful shutdown. Returns once every client
/// task has terminated.
pub async fn run(ctx: ServerContext) {
    let ServerContext { state, listener } = ctx;
    let mut session_id_counter: SessionId = 0;
    let mut client_tasks = JoinSet::new();
    let mut shutdown_rx = state.shutdown_tx.subscribe();
    let mut signalled = false;

    loop {
        tokio::select! {
            biased; // Prioritize shutdown over new traffic.

            _ = shutdown_requested() => {
                signalled = true;
                break;
            },

            // Programmatic shutdown (tests, embedders).
            _ = shutdown_rx.recv() => {
                break;
            },

            res = listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        session_id_counter = session_id_counter.wrapping_add(1);
                        let session_id = session_id_counter;
                        info!(session_id, %addr, "accepted new connection");

                        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
                        let (kill_tx, kill_rx) = broadcast::channel(1);
                        state.registry.add(session_id, addr, outbox_tx, kill_tx);

                        let state = state.clone();
                        client_tasks.spawn(async move {
                            let mut handler = ConnectionHandler::new(
                                socket, addr, state, session_id, outbox_rx, kill_rx,
                            );
                            if let Err(e) = handler.run().await {
                                warn!(%addr, "connection terminated unexpectedly: {e}");
                            }
                        });
                    }
                    Err(e) => error!("failed to accept connection: {e}"),
                }
            },

            // Reap completed client tasks.
            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res {
                    if e.is_panic() {
                        error!("a client handler panicked: {e:?}");
                    }
                }
            },
        }
    }

    // --- Graceful shutdown sequence ---
    if signalled {
        // A second signal skips the graceful path entirely.
        tokio::spawn(async {
            shutdown_requested().await;
            warn!("second shutdown signal received, forcing exit");
            std::process::exit(1);
        });
    }

    info!(
        clients = state.registry.len(),
        "shutting down, closing client connections"
    );
    let _ = state.shutdown_tx.send(());
    client_tasks.shutdown().await;
    drop(listener);
    info!("server shutdown complete");
}
