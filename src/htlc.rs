//! Hash-preimage discipline shared by every escrowed swap protocol (§4 C9).
//!
//! The engine never constructs chain-specific HTLC/PrTLC scripts itself — that lives
//! behind [`crate::contract::Contract`] — but it owns the hash/preimage bookkeeping
//! that both sides of a swap must agree on: generating secrets, deriving
//! `payment_hash`, and checking invariant I3 (`claim_hash` must match the preimage).

use crate::error::{Error, Result};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generate a fresh 32-byte secret suitable as an HTLC preimage.
pub fn generate_secret() -> [u8; 32] {
    let mut secret = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut secret);
    secret
}

/// `payment_hash = sha256(secret)`, matching the Lightning invoice's payment hash.
pub fn payment_hash(secret: &[u8; 32]) -> [u8; 32] {
    Sha256::digest(secret).into()
}

/// Invariant I3: whenever a secret is known, `H_claim(sha256(secret))` must equal
/// the escrow's `claim_hash`. `hash_for_htlc` is the chain's `H_claim` wrapper
/// ([`crate::contract::Contract::get_hash_for_htlc`], often the identity function).
pub fn verify_preimage(
    hash_for_htlc: impl Fn(&[u8; 32]) -> [u8; 32],
    secret: &[u8; 32],
    claim_hash: &[u8; 32],
) -> Result<()> {
    let derived = hash_for_htlc(&payment_hash(secret));
    if &derived != claim_hash {
        return Err(Error::SwapDataVerificationError(
            "preimage does not hash to the escrow's claim_hash".into(),
        ));
    }
    Ok(())
}

/// Canonical hash over a serialized payload, used to derive `escrow_hash` (the
/// correlator against chain events) from a swap's `EscrowData`.
pub fn escrow_hash(data: &crate::types::EscrowData) -> Result<[u8; 32]> {
    let bytes = serde_json::to_vec(data)?;
    Ok(Sha256::digest(bytes).into())
}
