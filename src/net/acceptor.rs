//! Acceptor Loop (§4.4). Accepts inbound TLS connections, admits only
//! federation members (looked up by the authenticated peer key), and
//! offers survivors to the multiplexer.

use super::connection::{Connection, ConnectionsRegister};
use super::tls::EncryptedStream;
use super::types::{Direction, FederationMember, PeerKey};
use crate::crypto::Keypair;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct AcceptorLoop {
    listener: TcpListener,
    connections_tx: mpsc::UnboundedSender<Connection>,
    register: Arc<ConnectionsRegister>,
    local_keypair: Arc<Keypair>,
    federation: HashMap<PeerKey, FederationMember>,
    shutdown: CancellationToken,
}

impl AcceptorLoop {
    pub fn new(
        listener: TcpListener,
        connections_tx: mpsc::UnboundedSender<Connection>,
        register: Arc<ConnectionsRegister>,
        local_keypair: Arc<Keypair>,
        federation: Vec<FederationMember>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            listener,
            connections_tx,
            register,
            local_keypair,
            federation: federation.into_iter().map(|m| (m.key, m)).collect(),
            shutdown,
        }
    }

    pub async fn run(self) {
        let federation_keys = Arc::new(self.federation.keys().map(|k| k.0).collect::<Vec<_>>());
        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "acceptor: listener error");
                        continue;
                    }
                },
            };

            let local_keypair = self.local_keypair.clone();
            let federation_keys = federation_keys.clone();
            let connections_tx = self.connections_tx.clone();
            let register = self.register.clone();
            let federation = self.federation.clone();

            tokio::spawn(async move {
                let stream = match EncryptedStream::accept(stream, &local_keypair, federation_keys).await {
                    Ok(s) => s,
                    Err(e) => {
                        debug!(peer = %peer_addr, error = %e, "acceptor: handshake failed, dropping");
                        return;
                    }
                };

                let remote_key = PeerKey(stream.remote_key);
                let member = match federation.get(&remote_key) {
                    Some(m) => m.clone(),
                    None => {
                        debug!(peer = %peer_addr, key = %remote_key, "acceptor: unknown peer, dropping");
                        return;
                    }
                };

                let mut conn = Connection::new(member.address, Direction::Incoming, stream);
                if let Some(id) = register.register_if_absent(remote_key, member.address, Direction::Incoming) {
                    conn.id = id;
                    let _ = connections_tx.send(conn);
                }
                // else: incumbent already connected to this peer; `conn`
                // is dropped here, closing the losing side of the glare race.
            });
        }
    }
}
