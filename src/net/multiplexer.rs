//! Read Multiplexer (§4.5). Spawns one reader task per connection offered
//! to it; pumps inbound frames into a single shared queue tagged with the
//! sender's `PeerKey`, and re-queues a dial request when a connection
//! terminates.

use super::connection::{Connection, ConnectionsRegister};
use super::types::{ConnectionRequest, PeerKey};
use crate::tracer::Tracer;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct InboundMessage {
    pub from: PeerKey,
    pub payload: Vec<u8>,
}

pub struct Multiplexer {
    connections_rx: mpsc::UnboundedReceiver<Connection>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    dial_tx: mpsc::UnboundedSender<ConnectionRequest>,
    register: Arc<ConnectionsRegister>,
    tracer: Arc<dyn Tracer>,
    shutdown: CancellationToken,
}

impl Multiplexer {
    pub fn new(
        connections_rx: mpsc::UnboundedReceiver<Connection>,
        inbound_tx: mpsc::UnboundedSender<InboundMessage>,
        dial_tx: mpsc::UnboundedSender<ConnectionRequest>,
        register: Arc<ConnectionsRegister>,
        tracer: Arc<dyn Tracer>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            connections_rx,
            inbound_tx,
            dial_tx,
            register,
            tracer,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            let mut conn = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                offered = self.connections_rx.recv() => match offered {
                    Some(c) => c,
                    None => break,
                },
            };

            let Some(mut stream) = conn.take_stream() else {
                continue;
            };
            let remote_key = conn.remote_key;
            let remote_server_address = conn.remote_server_address;
            let connection_id = conn.id;
            let inbound_tx = self.inbound_tx.clone();
            let dial_tx = self.dial_tx.clone();
            let register = self.register.clone();
            let tracer = self.tracer.clone();
            let shutdown = self.shutdown.clone();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            register.deregister(remote_key, connection_id);
                            return;
                        }
                        frame = stream.read_frame() => match frame {
                            Ok(Some(payload)) => {
                                if inbound_tx.send(InboundMessage { from: remote_key, payload }).is_err() {
                                    return;
                                }
                            }
                            Ok(None) => {
                                debug!(peer = %remote_key, "connection closed by remote");
                                break;
                            }
                            Err(e) => {
                                // Surfaced exactly once per terminated connection (§7).
                                tracer.connection_error(&remote_key.to_string(), &e.to_string());
                                break;
                            }
                        },
                    }
                }

                register.deregister(remote_key, connection_id);
                let _ = dial_tx.send(ConnectionRequest::fresh(remote_key, remote_server_address));
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::tls::EncryptedStream;
    use super::super::types::Direction;
    use crate::crypto::Keypair;
    use crate::tracer::CountingTracer;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn read_error_surfaces_exactly_once_via_tracer() {
        let server_kp = Keypair::generate();
        let client_kp = Keypair::generate();
        let client_pub = client_kp.public_key();
        let server_pub = server_kp.public_key();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let federation = Arc::new(vec![client_pub]);

        let server_handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            EncryptedStream::accept(stream, &server_kp, federation).await.unwrap()
        });
        let mut client = EncryptedStream::connect(addr, &client_kp, server_pub).await.unwrap();
        let server_stream = server_handle.await.unwrap();

        let (dial_tx, mut dial_rx) = mpsc::unbounded_channel();
        let (connections_tx, connections_rx) = mpsc::unbounded_channel();
        let (inbound_tx, _inbound_rx) = mpsc::unbounded_channel();
        let register = Arc::new(ConnectionsRegister::new());
        let tracer = CountingTracer::new();
        let shutdown = CancellationToken::new();

        let remote_key = PeerKey(server_stream.remote_key);
        let id = register.register_if_absent(remote_key, addr, Direction::Incoming).unwrap();
        let mut conn = Connection::new(addr, Direction::Incoming, server_stream);
        conn.id = id;
        connections_tx.send(conn).unwrap();

        let multiplexer = Multiplexer::new(
            connections_rx,
            inbound_tx,
            dial_tx,
            register.clone(),
            tracer.clone(),
            shutdown.clone(),
        );
        let mux_handle = tokio::spawn(multiplexer.run());

        // Write a length prefix promising 100 bytes, then drop the client
        // without sending the body: the server's second `read_exact` (the
        // frame body, not the length prefix) hits a genuine `UnexpectedEof`
        // that `read_frame` propagates as an `Err`, not a clean close.
        client.write_raw(&100u64.to_be_bytes()).await.unwrap();
        drop(client);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(tracer.fired_count(), 1);
        assert!(!register.contains(&remote_key));
        assert!(dial_rx.try_recv().is_ok());

        shutdown.cancel();
        let _ = mux_handle.await;
    }
}
