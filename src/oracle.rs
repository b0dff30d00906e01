//! Price oracle boundary (§4 C3).
//!
//! Consumed to validate LP-quoted prices against the market; aggregation across
//! multiple providers is out of scope for the core (the façade owns that, §4.7) —
//! this module only defines the narrow trait `QuoteVerifier` calls against.

use crate::error::Result;
use crate::types::Token;
use std::future::Future;
use std::pin::Pin;

#[cfg(target_arch = "wasm32")]
pub type OracleFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a>>;
#[cfg(not(target_arch = "wasm32"))]
pub type OracleFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Market price source, expressed the way the quote protocol does: micro-sats
/// (µsat) per smallest unit of `token`.
#[cfg(not(target_arch = "wasm32"))]
pub trait PriceOracle: Send + Sync {
    fn usat_per_token(&self, token: &Token) -> OracleFuture<'_, u64>;
}

#[cfg(target_arch = "wasm32")]
pub trait PriceOracle {
    fn usat_per_token(&self, token: &Token) -> OracleFuture<'_, u64>;
}

/// A fixed-price oracle, useful for tests and for embedders that only trade a
/// single pair at a known rate.
pub struct FixedPriceOracle {
    price: u64,
}

impl FixedPriceOracle {
    pub fn new(usat_per_token: u64) -> Self {
        Self {
            price: usat_per_token,
        }
    }
}

impl PriceOracle for FixedPriceOracle {
    fn usat_per_token(&self, _token: &Token) -> OracleFuture<'_, u64> {
        let price = self.price;
        Box::pin(async move { Ok(price) })
    }
}
