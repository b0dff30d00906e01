//! The abstract per-chain contract capability set (§6).
//!
//! The engine never encodes smart-contract bytecode or a particular chain's
//! transaction format. Everything chain-specific — constructing escrow data,
//! estimating fees, checking signatures, building claim/commit/refund
//! transactions, and streaming on-chain events — is provided by an
//! implementation of [`Contract`] supplied by the embedding application, the
//! same way `WalletStorage`/`SwapStorage` are supplied in `storage.rs`.

use crate::error::Result;
use crate::types::EscrowData;
use std::future::Future;
use std::pin::Pin;

#[cfg(target_arch = "wasm32")]
pub type ContractFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a>>;
#[cfg(not(target_arch = "wasm32"))]
pub type ContractFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A chain event observed via [`Contract::subscribe`] or a batched
/// [`Contract::get_commit_statuses`] deep-sync (§4.4.7, §4.5 T2/T3).
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// An escrow was funded on-chain.
    Initialize {
        escrow_hash: [u8; 32],
        data: Option<EscrowData>,
        tx_id: String,
    },
    /// An escrow was claimed; `secret` is populated when the claim revealed a preimage.
    Claim {
        escrow_hash: [u8; 32],
        secret: Option<[u8; 32]>,
        tx_id: String,
    },
    /// An escrow was refunded after its expiry.
    Refund {
        escrow_hash: [u8; 32],
        tx_id: String,
    },
}

impl ChainEvent {
    pub fn escrow_hash(&self) -> [u8; 32] {
        match self {
            ChainEvent::Initialize { escrow_hash, .. } => *escrow_hash,
            ChainEvent::Claim { escrow_hash, .. } => *escrow_hash,
            ChainEvent::Refund { escrow_hash, .. } => *escrow_hash,
        }
    }
}

/// The authoritative on-chain status of an escrow, as used by T3 deep-sync to force
/// a swap's state machine back in line with chain reality.
#[derive(Debug, Clone)]
pub enum CommitStatus {
    NotCommitted,
    Committed,
    Paid {
        secret: Option<[u8; 32]>,
        claim_tx_id: String,
    },
    Expired {
        refund_tx_id: Option<String>,
    },
}

/// An unsigned transaction plus enough metadata for the caller to sign and
/// broadcast it. Left intentionally opaque (`raw`) since the engine never
/// interprets chain-specific transaction formats.
#[derive(Debug, Clone)]
pub struct UnsignedTx {
    pub raw: Vec<u8>,
    pub description: String,
}

/// Capability set a chain adapter must provide. One implementation per supported
/// smart chain (and one for Bitcoin on-chain).
///
/// `Send + Sync` is required off wasm32 the same way `WalletStorage`/`SwapStorage`
/// require it, since the reconciliation loop shares a `Contract` across tasks.
#[cfg(not(target_arch = "wasm32"))]
pub trait Contract: Send + Sync {
    /// Construct the chain-native escrow representation for a new swap.
    #[allow(clippy::too_many_arguments)]
    fn create_swap_data(
        &self,
        offerer: &str,
        claimer: &str,
        token: &crate::types::Token,
        amount: u64,
        claim_hash: [u8; 32],
        sequence: u64,
        expiry: u64,
    ) -> ContractFuture<'_, EscrowData>;

    /// The chain-specific rehash wrapper applied to a Lightning `payment_hash` to
    /// produce the escrow's `claim_hash` (often the identity function).
    fn get_hash_for_htlc(&self, payment_hash: &[u8; 32]) -> [u8; 32];

    fn is_valid_data_signature(&self, data: &[u8], signature: &str, address: &str) -> bool;

    fn is_valid_init_authorization(
        &self,
        initiator: &str,
        data: &EscrowData,
        signature: &str,
    ) -> bool;

    fn get_commit_status(&self, data: &EscrowData) -> ContractFuture<'_, CommitStatus>;

    fn get_commit_statuses(
        &self,
        escrow_hashes: Vec<[u8; 32]>,
    ) -> ContractFuture<'_, Vec<(u8, CommitStatus)>>
    where
        Self: Sized;

    fn txs_commit(&self, data: &EscrowData) -> ContractFuture<'_, Vec<UnsignedTx>>;
    fn txs_claim_with_secret(
        &self,
        data: &EscrowData,
        secret: &[u8; 32],
    ) -> ContractFuture<'_, Vec<UnsignedTx>>;
    fn txs_refund(&self, data: &EscrowData) -> ContractFuture<'_, Vec<UnsignedTx>>;

    /// Subscribe to this chain's event stream, already filtered to the escrow
    /// hashes currently tracked by the caller.
    fn subscribe(
        &self,
        escrow_hashes: Vec<[u8; 32]>,
    ) -> ContractFuture<'_, tokio::sync::mpsc::Receiver<ChainEvent>>;
}

#[cfg(target_arch = "wasm32")]
pub trait Contract {
    #[allow(clippy::too_many_arguments)]
    fn create_swap_data(
        &self,
        offerer: &str,
        claimer: &str,
        token: &crate::types::Token,
        amount: u64,
        claim_hash: [u8; 32],
        sequence: u64,
        expiry: u64,
    ) -> ContractFuture<'_, EscrowData>;

    fn get_hash_for_htlc(&self, payment_hash: &[u8; 32]) -> [u8; 32];

    fn is_valid_data_signature(&self, data: &[u8], signature: &str, address: &str) -> bool;

    fn is_valid_init_authorization(
        &self,
        initiator: &str,
        data: &EscrowData,
        signature: &str,
    ) -> bool;

    fn get_commit_status(&self, data: &EscrowData) -> ContractFuture<'_, CommitStatus>;

    fn txs_commit(&self, data: &EscrowData) -> ContractFuture<'_, Vec<UnsignedTx>>;
    fn txs_claim_with_secret(
        &self,
        data: &EscrowData,
        secret: &[u8; 32],
    ) -> ContractFuture<'_, Vec<UnsignedTx>>;
    fn txs_refund(&self, data: &EscrowData) -> ContractFuture<'_, Vec<UnsignedTx>>;

    fn subscribe(
        &self,
        escrow_hashes: Vec<[u8; 32]>,
    ) -> ContractFuture<'_, tokio::sync::mpsc::Receiver<ChainEvent>>;
}
