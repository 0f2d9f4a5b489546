//! Shared network types: peer identity, addresses, and connection records.

use crate::crypto::PublicKeyBytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Default retry policy (spec §4.3).
pub const INITIAL_RETRY_DELAY_MS: u64 = 500;
pub const RETRY_BACKOFF_FACTOR: u32 = 2;
pub const MAX_RETRY_DELAY_SECS: u64 = 30;

/// Capacity of each connection's bounded inbound frame queue (spec §4.1).
pub const INBOUND_QUEUE_CAPACITY: usize = 100;

/// A federation member's public key, used both as connection identity and
/// as the TLS pinning token. Thin wrapper over the raw Ed25519 bytes so it
/// gets `Hash`/`Eq`/`Ord` for free as a map key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerKey(pub PublicKeyBytes);

impl PeerKey {
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Debug for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerKey({})", self.fingerprint())
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint())
    }
}

/// A federation member's network endpoint.
pub type PeerAddress = SocketAddr;

/// One statically configured federation member.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FederationMember {
    pub key: PeerKey,
    pub address: PeerAddress,
}

/// Direction a `Connection` was established in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// A request to establish (or re-establish) a connection to a peer,
/// carrying the number of consecutive prior failures for backoff (§4.3).
#[derive(Clone, Debug)]
pub struct ConnectionRequest {
    pub key: PeerKey,
    pub address: PeerAddress,
    pub failure_count: u32,
}

impl ConnectionRequest {
    pub fn fresh(key: PeerKey, address: PeerAddress) -> Self {
        Self {
            key,
            address,
            failure_count: 0,
        }
    }

    pub fn retry_delay(&self) -> std::time::Duration {
        let millis = INITIAL_RETRY_DELAY_MS
            .saturating_mul(RETRY_BACKOFF_FACTOR.pow((self.failure_count + 1).min(20)) as u64);
        std::time::Duration::from_millis(millis).min(std::time::Duration::from_secs(MAX_RETRY_DELAY_SECS))
    }

    pub fn failed(self) -> Self {
        Self {
            failure_count: self.failure_count.saturating_add(1),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_backs_off_and_caps() {
        let mut req = ConnectionRequest::fresh(PeerKey([0u8; 32]), "127.0.0.1:9000".parse().unwrap());
        let d0 = req.retry_delay();
        assert_eq!(d0.as_millis(), 1000);
        req = req.failed();
        assert_eq!(req.retry_delay().as_millis(), 2000);
        req = req.failed().failed().failed().failed().failed().failed().failed();
        assert_eq!(req.retry_delay(), std::time::Duration::from_secs(MAX_RETRY_DELAY_SECS));
    }
}
