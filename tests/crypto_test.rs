//! Integration tests for node identity crypto (Ed25519 signing, SHA3-256 hashing).

use robot_node::crypto::{sha3, verify, Keypair};

#[test]
fn test_sha3_deterministic() {
    let hash1 = sha3(b"test");
    let hash2 = sha3(b"test");
    assert_eq!(hash1, hash2);

    let hash3 = sha3(b"different");
    assert_ne!(hash1, hash3);
}

#[test]
fn test_sha3_length() {
    let hash = sha3(b"any input");
    assert_eq!(hash.len(), 32);
}

#[test]
fn test_sign_verify() {
    let kp = Keypair::generate();
    let msg = b"test message";
    let sig = kp.sign(msg);
    assert!(verify(&kp.public_key(), msg, &sig).is_ok());
}

#[test]
fn test_sign_verify_wrong_message() {
    let kp = Keypair::generate();
    let msg = b"original message";
    let sig = kp.sign(msg);

    let wrong_msg = b"tampered message";
    assert!(verify(&kp.public_key(), wrong_msg, &sig).is_err());
}

#[test]
fn test_sign_verify_wrong_key() {
    let kp1 = Keypair::generate();
    let kp2 = Keypair::generate();
    let msg = b"test message";
    let sig = kp1.sign(msg);

    assert!(verify(&kp2.public_key(), msg, &sig).is_err());
}

#[test]
fn test_keypair_unique() {
    let kp1 = Keypair::generate();
    let kp2 = Keypair::generate();
    assert_ne!(kp1.public_key(), kp2.public_key());
}
