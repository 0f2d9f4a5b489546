//! Node identity (Ed25519) and content-addressing (SHA3-256).

use ed25519_dalek::{Signer, Verifier};
use sha3::{Digest, Sha3_256};
use thiserror::Error;

pub const PUBLIC_KEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

pub type Hash = [u8; 32];
pub type PublicKeyBytes = [u8; PUBLIC_KEY_SIZE];
pub type SignatureBytes = [u8; SIGNATURE_SIZE];

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key")]
    InvalidPublicKey,
}

/// A node's static Ed25519 identity. The same keypair signs the node's
/// TLS leaf certificate (see `net::tls::load_or_generate_keypair`) and is
/// used as the `PeerKey` federation members dial and accept by.
pub struct Keypair {
    signing: ed25519_dalek::SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self {
            signing: ed25519_dalek::SigningKey::from_bytes(secret),
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    pub fn public_key(&self) -> PublicKeyBytes {
        self.signing.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        self.signing.sign(message).to_bytes()
    }
}

pub fn verify(
    pubkey: &PublicKeyBytes,
    message: &[u8],
    signature: &SignatureBytes,
) -> Result<(), CryptoError> {
    let vk = ed25519_dalek::VerifyingKey::from_bytes(pubkey).map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    vk.verify(message, &sig).map_err(|_| CryptoError::InvalidSignature)
}

pub fn sha3(data: &[u8]) -> Hash {
    Sha3_256::digest(data).into()
}

pub fn sha3_concat(a: &[u8], b: &[u8]) -> Hash {
    let mut hasher = Sha3_256::new();
    hasher.update(a);
    hasher.update(b);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha3_deterministic() {
        let hash1 = sha3(b"test");
        let hash2 = sha3(b"test");
        assert_eq!(hash1, hash2);

        let hash3 = sha3(b"different");
        assert_ne!(hash1, hash3);
    }

    #[test]
    fn sha3_length() {
        let hash = sha3(b"any input");
        assert_eq!(hash.len(), 32);
    }

    #[test]
    fn sign_verify_roundtrip() {
        let kp = Keypair::generate();
        let msg = b"test message";
        let sig = kp.sign(msg);
        assert!(verify(&kp.public_key(), msg, &sig).is_ok());
    }

    #[test]
    fn sign_verify_wrong_message() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"original message");
        assert!(verify(&kp.public_key(), b"tampered message", &sig).is_err());
    }

    #[test]
    fn sign_verify_wrong_key() {
        let kp1 = Keypair::generate();
        let kp2 = Keypair::generate();
        let msg = b"test message";
        let sig = kp1.sign(msg);
        assert!(verify(&kp2.public_key(), msg, &sig).is_err());
    }

    #[test]
    fn keypair_unique() {
        let kp1 = Keypair::generate();
        let kp2 = Keypair::generate();
        assert_ne!(kp1.public_key(), kp2.public_key());
    }
}
