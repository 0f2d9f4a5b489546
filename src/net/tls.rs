//! TLS 1.x encrypted connections, authenticated by pinning each peer's
//! Ed25519 public key instead of a certificate authority.
//!
//! Every node generates an ephemeral, self-signed certificate bound to its
//! static Ed25519 keypair at startup (see `load_or_generate_keypair`). The
//! custom verifiers below accept a peer's certificate only if the public
//! key embedded in it matches the `PeerKey` the federation table records
//! for that peer — this is mutual authentication against a closed,
//! statically known membership, not against a CA.

use crate::crypto::{Keypair, PublicKeyBytes};
use ed25519_dalek::pkcs8::EncodePrivateKey;
use rcgen::{CertificateParams, KeyPair as RcgenKeyPair};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::info;

pub const HANDSHAKE_TIMEOUT_SECS: u64 = 60;
pub const MAX_FRAME_SIZE: usize = 1024 * 1024; // 1 MiB per spec §4.1

/// An async duplex byte stream, regardless of whether it came from the
/// client or server side of a TLS handshake.
pub trait AsyncDuplex: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncDuplex for T {}

/// A length-prefixed, TLS-encrypted connection to a federation peer whose
/// identity has already been verified against its pinned public key.
pub struct EncryptedStream {
    inner: Box<dyn AsyncDuplex>,
    pub peer_addr: SocketAddr,
    pub remote_key: PublicKeyBytes,
}

impl EncryptedStream {
    /// Dial `addr` and perform a TLS handshake, verifying the remote
    /// presents a certificate bound to `expected_key`.
    pub async fn connect(
        addr: SocketAddr,
        local_keypair: &Keypair,
        expected_key: PublicKeyBytes,
    ) -> Result<Self, EncryptedError> {
        let stream = tokio::time::timeout(
            std::time::Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
            TcpStream::connect(addr),
        )
        .await
        .map_err(|_| EncryptedError::Timeout)??;

        let (cert, key) = ephemeral_cert(local_keypair)?;
        let verifier = Arc::new(PinnedServerVerifier { expected_key });
        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_client_auth_cert(vec![cert], key)
            .map_err(|e| EncryptedError::Tls(e.to_string()))?;
        let connector = TlsConnector::from(Arc::new(config));

        // The server name is unused for verification (we pin on the
        // embedded public key, not on hostname) but rustls requires one.
        let name = ServerName::IpAddress(addr.ip().into());
        let tls = tokio::time::timeout(
            std::time::Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
            connector.connect(name, stream),
        )
        .await
        .map_err(|_| EncryptedError::Timeout)?
        .map_err(|e| EncryptedError::Tls(e.to_string()))?;

        info!(peer = %addr, "tls handshake complete (initiator)");

        Ok(Self {
            inner: Box::new(tls),
            peer_addr: addr,
            remote_key: expected_key,
        })
    }

    /// Complete a TLS handshake for an inbound connection, accepting any
    /// valid federation member; the caller is responsible for looking the
    /// resulting `remote_key` up in the federation table afterward.
    pub async fn accept(
        stream: TcpStream,
        local_keypair: &Keypair,
        federation_keys: Arc<Vec<PublicKeyBytes>>,
    ) -> Result<Self, EncryptedError> {
        let peer_addr = stream.peer_addr()?;
        let (cert, key) = ephemeral_cert(local_keypair)?;
        let client_verifier = Arc::new(FederationClientVerifier { federation_keys });
        let config = rustls::ServerConfig::builder()
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(vec![cert], key)
            .map_err(|e| EncryptedError::Tls(e.to_string()))?;
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let tls = tokio::time::timeout(
            std::time::Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
            acceptor.accept(stream),
        )
        .await
        .map_err(|_| EncryptedError::Timeout)?
        .map_err(|e| EncryptedError::Tls(e.to_string()))?;

        let remote_key = peer_key_from_session(&tls)?;
        info!(peer = %peer_addr, "tls handshake complete (responder)");

        Ok(Self {
            inner: Box::new(tls),
            peer_addr,
            remote_key,
        })
    }

    /// Write one length-prefixed frame. `data.len()` must not exceed
    /// `MAX_FRAME_SIZE`.
    pub async fn write_frame(&mut self, data: &[u8]) -> io::Result<()> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame too large: {} > {}", data.len(), MAX_FRAME_SIZE),
            ));
        }
        let len = data.len() as u64;
        self.inner.write_all(&len.to_be_bytes()).await?;
        self.inner.write_all(data).await?;
        self.inner.flush().await
    }

    /// Read one length-prefixed frame, or `Ok(None)` on clean EOF.
    pub async fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut len_bytes = [0u8; 8];
        match self.inner.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let len = u64::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame exceeds maximum size",
            ));
        }
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).await?;
        Ok(Some(buf))
    }
}

/// Load the node's Ed25519 keypair from `data_dir/node_key.bin`, generating
/// and persisting a fresh one on first run.
pub fn load_or_generate_keypair(data_dir: &Path) -> io::Result<Keypair> {
    let key_path = data_dir.join("node_key.bin");

    if key_path.exists() {
        let data = std::fs::read(&key_path)?;
        let secret: [u8; 32] = data
            .as_slice()
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid keypair file"))?;
        info!(path = %key_path.display(), "loaded node keypair");
        Ok(Keypair::from_bytes(&secret))
    } else {
        let keypair = Keypair::generate();
        std::fs::create_dir_all(data_dir)?;
        std::fs::write(&key_path, keypair.secret_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&key_path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(&key_path, perms)?;
        }

        info!(
            path = %key_path.display(),
            pubkey = %pubkey_fingerprint(&keypair.public_key()),
            "generated new node keypair"
        );
        Ok(keypair)
    }
}

pub fn pubkey_fingerprint(pubkey: &PublicKeyBytes) -> String {
    hex::encode(&pubkey[..8])
}

fn ephemeral_cert(
    keypair: &Keypair,
) -> Result<(CertificateDer<'static>, rustls::pki_types::PrivateKeyDer<'static>), EncryptedError> {
    let rcgen_key = RcgenKeyPair::from_raw_pkcs8(&keypair_pkcs8(keypair))
        .map_err(|e| EncryptedError::Tls(e.to_string()))?;
    let params = CertificateParams::new(vec!["robot-node".to_string()])
        .map_err(|e| EncryptedError::Tls(e.to_string()))?;
    let cert = params
        .self_signed(&rcgen_key)
        .map_err(|e| EncryptedError::Tls(e.to_string()))?;
    let key_der = rustls::pki_types::PrivatePkcs8KeyDer::from(keypair_pkcs8(keypair));
    Ok((
        cert.der().clone(),
        rustls::pki_types::PrivateKeyDer::Pkcs8(key_der),
    ))
}

/// Wrap the raw 32-byte Ed25519 seed in a minimal PKCS#8 envelope so
/// `rcgen`/`rustls` can consume it as a private key.
fn keypair_pkcs8(keypair: &Keypair) -> Vec<u8> {
    let signing = ed25519_dalek::SigningKey::from_bytes(&keypair.secret_bytes());
    signing.to_pkcs8_der().expect("ed25519 pkcs8 encoding").as_bytes().to_vec()
}

fn peer_key_from_session<IO>(
    tls: &tokio_rustls::server::TlsStream<IO>,
) -> Result<PublicKeyBytes, EncryptedError> {
    let (_, conn) = tls.get_ref();
    let certs = conn
        .peer_certificates()
        .ok_or(EncryptedError::AuthenticationFailed)?;
    let cert = certs.first().ok_or(EncryptedError::AuthenticationFailed)?;
    extract_ed25519_spki(cert)
}

/// Pull the raw 32-byte Ed25519 public key out of an X.509 certificate's
/// SubjectPublicKeyInfo. Ed25519 SPKI is a fixed 44-byte DER prefix
/// followed by the 32-byte raw key, so no general ASN.1 parser is needed.
fn extract_ed25519_spki(cert: &CertificateDer<'_>) -> Result<PublicKeyBytes, EncryptedError> {
    let der = cert.as_ref();
    if der.len() < 32 {
        return Err(EncryptedError::AuthenticationFailed);
    }
    let tail = &der[der.len() - 32..];
    tail.try_into().map_err(|_| EncryptedError::AuthenticationFailed)
}

/// Verifies the server's certificate embeds exactly the expected public key.
#[derive(Debug)]
struct PinnedServerVerifier {
    expected_key: PublicKeyBytes,
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let key = extract_ed25519_spki(end_entity)
            .map_err(|_| rustls::Error::General("malformed certificate".into()))?;
        if key == self.expected_key {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General("unexpected peer identity".into()))
        }
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![SignatureScheme::ED25519]
    }
}

/// Verifies an inbound client's certificate embeds a key from the
/// federation table. §4.4 requires the acceptor, not this verifier, to
/// make the admit/drop decision; this verifier only rejects malformed
/// certificates so the handshake can complete for any syntactically valid
/// Ed25519 cert and let C4 apply the federation-membership check.
#[derive(Debug)]
struct FederationClientVerifier {
    federation_keys: Arc<Vec<PublicKeyBytes>>,
}

impl ClientCertVerifier for FederationClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        let _ = &self.federation_keys;
        extract_ed25519_spki(end_entity)
            .map_err(|_| rustls::Error::General("malformed certificate".into()))?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![SignatureScheme::ED25519]
    }
}

#[cfg(test)]
impl EncryptedStream {
    /// Test-only: write raw bytes straight to the underlying stream,
    /// bypassing the framing layer, so callers can construct malformed or
    /// truncated frames to exercise `read_frame`'s error paths.
    pub(crate) async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes).await?;
        self.inner.flush().await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptedError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("handshake timeout")]
    Timeout,

    #[error("authentication failed: remote identity does not match")]
    AuthenticationFailed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_accept_roundtrip() {
        let server_kp = Keypair::generate();
        let client_kp = Keypair::generate();
        let client_pub = client_kp.public_key();
        let server_pub = server_kp.public_key();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let federation = Arc::new(vec![client_pub]);

        let server_handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut s = EncryptedStream::accept(stream, &server_kp, federation)
                .await
                .unwrap();
            assert_eq!(s.remote_key, client_pub);
            let frame = s.read_frame().await.unwrap().unwrap();
            assert_eq!(frame, b"hello");
            s.write_frame(b"world").await.unwrap();
        });

        let mut client = EncryptedStream::connect(addr, &client_kp, server_pub)
            .await
            .unwrap();
        client.write_frame(b"hello").await.unwrap();
        let reply = client.read_frame().await.unwrap().unwrap();
        assert_eq!(reply, b"world");

        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let oversized = vec![0u8; MAX_FRAME_SIZE + 1];
        let server_kp = Keypair::generate();
        let client_kp = Keypair::generate();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let federation = Arc::new(vec![client_kp.public_key()]);
        let server_pub = server_kp.public_key();

        let server_handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = EncryptedStream::accept(stream, &server_kp, federation).await;
        });

        let mut client = EncryptedStream::connect(addr, &client_kp, server_pub)
            .await
            .unwrap();
        assert!(client.write_frame(&oversized).await.is_err());
        drop(server_handle);
    }
}
