//! Fire-and-forget propagation of claim preimages (§6 Messenger).
//!
//! `FROM_BTCLN_AUTO` relies on a permissionless watchtower network picking up the
//! claim secret once it is safe to reveal (§4.4.3). The engine never assumes the
//! broadcast was received; it just re-broadcasts on a schedule from the tick loop.

use crate::error::Result;
use std::future::Future;
use std::pin::Pin;

#[cfg(target_arch = "wasm32")]
pub type MessengerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a>>;
#[cfg(not(target_arch = "wasm32"))]
pub type MessengerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A claim witness ready to be broadcast so a watchtower can claim on the user's
/// behalf.
#[derive(Debug, Clone)]
pub struct SwapClaimWitnessMessage {
    pub escrow_hash: [u8; 32],
    pub secret: [u8; 32],
}

#[cfg(not(target_arch = "wasm32"))]
pub trait Messenger: Send + Sync {
    fn broadcast(&self, message: SwapClaimWitnessMessage) -> MessengerFuture<'_, ()>;
}

#[cfg(target_arch = "wasm32")]
pub trait Messenger {
    fn broadcast(&self, message: SwapClaimWitnessMessage) -> MessengerFuture<'_, ()>;
}

/// A `Messenger` that drops every message, for embedders with no watchtower
/// network configured (e.g. during tests, or protocols that never need one).
#[derive(Debug, Default)]
pub struct NullMessenger;

impl Messenger for NullMessenger {
    fn broadcast(&self, _message: SwapClaimWitnessMessage) -> MessengerFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
