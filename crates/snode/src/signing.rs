//! Compact recoverable ECDSA signing over the chain curve.
//!
//! Two payload formats coexist on the network: the modern format signs a
//! 32-byte message hash computed per message type, the legacy format signs
//! the magic-prefixed printable rendering of the message. Verifiers try
//! modern first and fall back to legacy until the new-signatures spork has
//! fully taken hold.

use aurumd_consensus::constants::SIGNED_MESSAGE_MAGIC;
use aurumd_consensus::{ChainParams, Hash256};
use aurumd_primitives::{p2pkh_script, sha256d, wif_to_secret_key, Encoder};
use aurumd_primitives::hash::hash160;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

/// Size of a compact signature with its recovery header byte.
pub const COMPACT_SIGNATURE_SIZE: usize = 65;

#[derive(Clone)]
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl KeyPair {
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, &'static str> {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(bytes).map_err(|_| "invalid secret key")?;
        let public = PublicKey::from_secret_key(&secp, &secret);
        Ok(Self { secret, public })
    }

    pub fn from_wif(wif: &str, params: &ChainParams) -> Result<Self, &'static str> {
        let secret = wif_to_secret_key(wif, params.network).map_err(|_| "invalid operator key")?;
        Self::from_secret_bytes(&secret)
    }
}

/// 20-byte identifier of a public key (hash160 of its compressed form).
pub fn key_id(pubkey: &PublicKey) -> [u8; 20] {
    hash160(&pubkey.serialize())
}

/// P2PKH locking script paying to the given key.
pub fn script_for_key(pubkey: &PublicKey) -> Vec<u8> {
    p2pkh_script(&key_id(pubkey))
}

pub fn sign_hash(secret: &SecretKey, hash: &Hash256) -> Vec<u8> {
    let secp = Secp256k1::new();
    let message = Message::from_digest(*hash);
    let signature = secp.sign_ecdsa_recoverable(&message, secret);
    let (recovery_id, compact) = signature.serialize_compact();
    let mut out = Vec::with_capacity(COMPACT_SIGNATURE_SIZE);
    // 27 marks a recoverable signature, +4 a compressed pubkey
    out.push(27 + 4 + recovery_id.to_i32() as u8);
    out.extend_from_slice(&compact);
    out
}

pub fn verify_hash(pubkey: &PublicKey, hash: &Hash256, sig: &[u8]) -> Result<(), &'static str> {
    if sig.len() != COMPACT_SIGNATURE_SIZE {
        return Err("signature has the wrong size");
    }
    let header = sig[0];
    if !(27..27 + 8).contains(&header) {
        return Err("signature has an invalid recovery header");
    }
    let recovery_id = RecoveryId::from_i32(((header - 27) & 0x03) as i32)
        .map_err(|_| "signature has an invalid recovery id")?;
    let signature = RecoverableSignature::from_compact(&sig[1..], recovery_id)
        .map_err(|_| "malformed compact signature")?;

    let secp = Secp256k1::new();
    let message = Message::from_digest(*hash);
    let recovered = secp
        .recover_ecdsa(&message, &signature)
        .map_err(|_| "signature recovery failed")?;
    if recovered != *pubkey {
        return Err("signature does not match the expected key");
    }
    Ok(())
}

/// Digest of a printable message in the legacy signed-message envelope.
pub fn signed_message_hash(message: &str) -> Hash256 {
    let mut encoder = Encoder::new();
    encoder.write_var_str(SIGNED_MESSAGE_MAGIC);
    encoder.write_var_str(message);
    sha256d(&encoder.into_inner())
}

pub fn sign_message(secret: &SecretKey, message: &str) -> Vec<u8> {
    sign_hash(secret, &signed_message_hash(message))
}

pub fn verify_message(pubkey: &PublicKey, message: &str, sig: &[u8]) -> Result<(), &'static str> {
    verify_hash(pubkey, &signed_message_hash(message), sig)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keys(seed: u8) -> KeyPair {
        KeyPair::from_secret_bytes(&[seed; 32]).expect("keys")
    }

    #[test]
    fn hash_signature_round_trip() {
        let keys = test_keys(1);
        let hash = sha256d(b"payload");
        let sig = sign_hash(&keys.secret, &hash);
        assert_eq!(sig.len(), COMPACT_SIGNATURE_SIZE);
        assert!(verify_hash(&keys.public, &hash, &sig).is_ok());

        let other = test_keys(2);
        assert!(verify_hash(&other.public, &hash, &sig).is_err());
    }

    #[test]
    fn message_signature_round_trip() {
        let keys = test_keys(3);
        let sig = sign_message(&keys.secret, "203.0.113.5:7215");
        assert!(verify_message(&keys.public, "203.0.113.5:7215", &sig).is_ok());
        assert!(verify_message(&keys.public, "203.0.113.5:7216", &sig).is_err());
    }

    #[test]
    fn truncated_signature_rejected() {
        let keys = test_keys(4);
        let hash = sha256d(b"payload");
        let sig = sign_hash(&keys.secret, &hash);
        assert!(verify_hash(&keys.public, &hash, &sig[..64]).is_err());
    }

    #[test]
    fn key_script_is_canonical_p2pkh() {
        let keys = test_keys(5);
        let script = script_for_key(&keys.public);
        assert_eq!(script.len(), 25);
    }
}
