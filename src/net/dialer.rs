//! Dialer Loop (§4.3). Dequeues `ConnectionRequest`s and dials them one at
//! a time; a failed dial's backoff sleep runs in a spawned task so it
//! never blocks the loop from picking up the next request, matching the
//! "serialized dials, parallel retry timers" contract.
//!
//! Structurally grounded on Tari's `connection_manager::Dialer` actor: a
//! single consumer loop racing a queue against pending retry timers,
//! rather than one task per peer.

use super::connection::{Connection, ConnectionsRegister};
use super::tls::EncryptedStream;
use super::types::{ConnectionRequest, Direction, PeerKey};
use crate::clock::Clock;
use crate::crypto::Keypair;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct DialerLoop {
    dial_rx: mpsc::UnboundedReceiver<ConnectionRequest>,
    dial_tx: mpsc::UnboundedSender<ConnectionRequest>,
    connections_tx: mpsc::UnboundedSender<Connection>,
    register: Arc<ConnectionsRegister>,
    local_keypair: Arc<Keypair>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl DialerLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dial_rx: mpsc::UnboundedReceiver<ConnectionRequest>,
        dial_tx: mpsc::UnboundedSender<ConnectionRequest>,
        connections_tx: mpsc::UnboundedSender<Connection>,
        register: Arc<ConnectionsRegister>,
        local_keypair: Arc<Keypair>,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dial_rx,
            dial_tx,
            connections_tx,
            register,
            local_keypair,
            clock,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            let request = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                req = self.dial_rx.recv() => match req {
                    Some(r) => r,
                    None => break,
                },
            };

            if self.register.contains(&request.key) {
                debug!(peer = %request.key, "dialer: already connected, dropping request");
                continue;
            }

            match EncryptedStream::connect(request.address, &self.local_keypair, request.key.0).await {
                Ok(stream) => {
                    let mut conn = Connection::new(request.address, Direction::Outgoing, stream);
                    match self.register.register_if_absent(
                        request.key,
                        request.address,
                        Direction::Outgoing,
                    ) {
                        Some(id) => {
                            conn.id = id;
                            if self.connections_tx.send(conn).is_err() {
                                break;
                            }
                        }
                        None => {
                            // incumbent already holds this peer (lost the
                            // glare race); `conn` is dropped here, closing it.
                        }
                    }
                }
                Err(e) => {
                    warn!(peer = %request.key, error = %e, "dial failed, scheduling retry");
                    self.spawn_retry(request);
                }
            }
        }
    }

    fn spawn_retry(&self, request: ConnectionRequest) {
        let delay = request.retry_delay();
        let retry = request.failed();
        let dial_tx = self.dial_tx.clone();
        let clock = self.clock.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = clock.sleep(delay) => {
                    let _ = dial_tx.send(retry);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::fake::InstantClock;
    use crate::net::types::PeerKey;
    use std::time::Duration;

    #[tokio::test]
    async fn unreachable_peer_schedules_increasing_backoff() {
        let register = Arc::new(ConnectionsRegister::new());
        let (dial_tx, dial_rx) = mpsc::unbounded_channel();
        let (conn_tx, _conn_rx) = mpsc::unbounded_channel();
        let clock = Arc::new(InstantClock::new());
        let shutdown = CancellationToken::new();
        let keypair = Arc::new(Keypair::generate());

        let loop_ = DialerLoop::new(
            dial_rx,
            dial_tx.clone(),
            conn_tx,
            register,
            keypair,
            clock.clone(),
            shutdown.clone(),
        );

        // An address nothing listens on: connect() fails fast.
        let unreachable: std::net::SocketAddr = "127.0.0.1:1".parse().unwrap();
        dial_tx
            .send(ConnectionRequest::fresh(PeerKey([9u8; 32]), unreachable))
            .unwrap();

        let handle = tokio::spawn(loop_.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        let _ = handle.await;

        let sleeps = clock.recorded_sleeps();
        assert!(!sleeps.is_empty());
        assert_eq!(sleeps[0], Duration::from_millis(1000));
    }
}
