//! Sender recovery for intercepted envelopes.
//!
//! Every envelope type signs over its own signing hash, so one routine covers
//! legacy and typed transactions alike. Signatures with a high `s` value are
//! refused even though they would recover, matching what the sequencer's
//! execution client accepts.

use alloy_consensus::TxEnvelope;
use alloy_primitives::{
    Address,
    Signature,
    keccak256,
};
use secp256k1::{
    Message,
    PublicKey,
    ecdsa::{
        RecoverableSignature,
        RecoveryId,
    },
    global::SECP256K1,
};

use crate::error::{
    GatewayError,
    Result,
};

/// Recovers the account that signed `envelope`.
pub fn recover_sender(envelope: &TxEnvelope) -> Result<Address> {
    let reject = |reason: &str| {
        GatewayError::KeyDerivation(format!("{reason} in {:#x}", envelope.tx_hash()))
    };

    let signature = recoverable(envelope.signature()).map_err(reject)?;
    let digest = Message::from_digest(envelope.signature_hash().0);
    let public_key = SECP256K1
        .recover_ecdsa(&digest, &signature)
        .map_err(|_| reject("signature does not recover to a public key"))?;

    Ok(account_address(&public_key))
}

fn recoverable(signature: &Signature) -> std::result::Result<RecoverableSignature, &'static str> {
    if signature.normalize_s().is_some() {
        return Err("non-canonical signature s value");
    }
    let parity = RecoveryId::from_i32(i32::from(signature.v()))
        .map_err(|_| "invalid signature parity")?;
    RecoverableSignature::from_compact(&signature.as_bytes()[..64], parity)
        .map_err(|_| "malformed signature")
}

/// Last 20 bytes of the keccak hash of the uncompressed key, tag byte dropped.
fn account_address(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    Address::from_word(keccak256(&uncompressed[1..]))
}
