//! End-to-end scenarios over the real TCP/TLS stack, driven in-process
//! (two `ConnectionManager`s in the same test binary) rather than by
//! spawning separate node processes, per the composition's
//! dependency-injection design.

use robot_node::net::{ConnectionManager, FederationMember, NetworkTransport, PeerKey};
use std::net::SocketAddr;
use std::time::Duration;

mod scratch_dir {
    //! Minimal scratch-directory helper so tests don't depend on an extra
    //! crate just to clean up after themselves.
    pub struct TempDataDir(pub std::path::PathBuf);

    impl TempDataDir {
        pub fn new(label: &str) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "robot-node-test-{label}-{}-{}",
                std::process::id(),
                label.len()
            ));
            let _ = std::fs::remove_dir_all(&dir);
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }
    }

    impl Drop for TempDataDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
}

use scratch_dir::TempDataDir;

#[tokio::test]
async fn test_two_node_glare_and_mutual_registration() {
    let key_a = robot_node::crypto::Keypair::generate();
    let key_b = robot_node::crypto::Keypair::generate();
    let pk_a = PeerKey(key_a.public_key());
    let pk_b = PeerKey(key_b.public_key());

    let dir_a = TempDataDir::new("glare-a");
    let dir_b = TempDataDir::new("glare-b");
    std::fs::write(dir_a.0.join("node_key.bin"), key_a.secret_bytes()).unwrap();
    std::fs::write(dir_b.0.join("node_key.bin"), key_b.secret_bytes()).unwrap();

    let probe_a = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_a = probe_a.local_addr().unwrap();
    drop(probe_a);
    let probe_b = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_b = probe_b.local_addr().unwrap();
    drop(probe_b);

    let federation = vec![
        FederationMember { key: pk_a, address: addr_a },
        FederationMember { key: pk_b, address: addr_b },
    ];

    let manager_a = ConnectionManager::start(&dir_a.0, addr_a, federation.clone())
        .await
        .unwrap();
    let manager_b = ConnectionManager::start(&dir_b.0, addr_b, federation)
        .await
        .unwrap();

    // Give the dialer/acceptor loops time to race and settle.
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(manager_a.connected_peers(), vec![pk_b]);
    assert_eq!(manager_b.connected_peers(), vec![pk_a]);

    manager_a.shutdown().await;
    manager_b.shutdown().await;
}

#[tokio::test]
async fn test_retry_against_unreachable_peer_does_not_register() {
    let key_a = robot_node::crypto::Keypair::generate();
    let pk_a = PeerKey(key_a.public_key());
    let unreachable_key = PeerKey([42u8; 32]);

    let dir_a = TempDataDir::new("retry-a");
    let probe_a = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_a = probe_a.local_addr().unwrap();
    drop(probe_a);

    // An address nothing listens on.
    let unreachable_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();

    let federation = vec![
        FederationMember { key: pk_a, address: addr_a },
        FederationMember { key: unreachable_key, address: unreachable_addr },
    ];

    let manager_a = ConnectionManager::start(&dir_a.0, addr_a, federation).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(manager_a.connected_peers().is_empty());

    manager_a.shutdown().await;
}
