//! Static-federation encrypted overlay: C1 (tls) through C5 (multiplexer),
//! composed by `manager::ConnectionManager`.

pub mod acceptor;
pub mod connection;
pub mod dialer;
pub mod manager;
pub mod multiplexer;
pub mod tls;
pub mod types;

pub use connection::{Connection, ConnectionsRegister};
pub use manager::{ConnectionManager, NetworkTransport};
pub use multiplexer::InboundMessage;
pub use types::{ConnectionRequest, Direction, FederationMember, PeerAddress, PeerKey};
