//! Liquidity-provider discovery, verification and ranking (§4.2 C2).
//!
//! Discovery is pluggable (a static list, a DNS seed, an on-chain registry
//! contract) behind the narrow [`Registry`] trait; everything downstream of the
//! URL list — fetching `/info`, verifying the per-chain signature, ranking
//! candidates, blacklisting — lives on [`IntermediaryRegistry`] itself.

use crate::cancel::CancelToken;
use crate::contract::Contract;
use crate::error::{Error, Result};
use crate::lp_client::{EnvelopeBody, LPClient};
use crate::types::{Intermediary, ServiceOffer, SwapType, Token};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;
use std::time::Duration;

#[cfg(target_arch = "wasm32")]
pub type RegistryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a>>;
#[cfg(not(target_arch = "wasm32"))]
pub type RegistryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// External source of candidate LP URLs. Deliberately narrow: this is the only
/// piece that changes between "a hardcoded LP list" and "an on-chain registry
/// contract" deployment.
#[cfg(not(target_arch = "wasm32"))]
pub trait Registry: Send + Sync {
    fn list_urls(&self) -> RegistryFuture<'_, Vec<String>>;
}

#[cfg(target_arch = "wasm32")]
pub trait Registry {
    fn list_urls(&self) -> RegistryFuture<'_, Vec<String>>;
}

/// A fixed, operator-supplied LP URL list.
pub struct StaticRegistry {
    urls: Vec<String>,
}

impl StaticRegistry {
    pub fn new(urls: Vec<String>) -> Self {
        Self { urls }
    }
}

impl Registry for StaticRegistry {
    fn list_urls(&self) -> RegistryFuture<'_, Vec<String>> {
        let urls = self.urls.clone();
        Box::pin(async move { Ok(urls) })
    }
}

/// A ranked candidate for a requested swap (§4.2 `get_swap_candidates`).
#[derive(Debug, Clone)]
pub struct SwapCandidate {
    pub url: String,
    pub offer: ServiceOffer,
    /// `base_fee_sats + amount * ppm / 1_000_000`, the ranking cost (lower is
    /// better). Ties break on lower `swap_fee_ppm`, then lower `swap_base_fee_sats`,
    /// then `url` for a stable order across otherwise-identical offers.
    pub estimated_cost_sats: u64,
}

/// Discovers, verifies and ranks liquidity providers (§4.2).
///
/// One `Contract` per chain is required to verify a provider's per-chain
/// signature (`is_valid_data_signature`) over the envelope bytes — an LP is only
/// trusted for the chains whose signature verifies; every other chain's address
/// is simply absent from `Intermediary::addresses`.
pub struct IntermediaryRegistry {
    source: Box<dyn Registry>,
    lp_client: Box<dyn LPClient>,
    contracts: HashMap<String, Box<dyn Contract>>,
    http_timeout: Duration,
    cache: RwLock<HashMap<String, Intermediary>>,
    blacklist: RwLock<HashSet<String>>,
}

impl IntermediaryRegistry {
    pub fn new(
        source: Box<dyn Registry>,
        lp_client: Box<dyn LPClient>,
        contracts: HashMap<String, Box<dyn Contract>>,
        http_timeout: Duration,
    ) -> Self {
        Self {
            source,
            lp_client,
            contracts,
            http_timeout,
            cache: RwLock::new(HashMap::new()),
            blacklist: RwLock::new(HashSet::new()),
        }
    }

    /// Blacklist a misbehaving LP (§4.2); it is dropped from future candidate
    /// lists until the process restarts or `refresh` re-admits a still-reachable
    /// copy at the same URL (callers that want a permanent ban should persist
    /// this list themselves).
    pub fn remove(&self, url: &str) {
        self.blacklist.write().unwrap().insert(url.to_string());
        self.cache.write().unwrap().remove(url);
    }

    pub fn known_intermediaries(&self) -> Vec<Intermediary> {
        self.cache.read().unwrap().values().cloned().collect()
    }

    /// Re-discover and re-verify every LP the source currently lists.
    ///
    /// Verification runs concurrently per URL, each individually raced against
    /// `cancel`. The race window only ever discards work that has not yet
    /// produced a verified `Intermediary` when cancellation fires — a fetch that
    /// already completed verification before `cancel` fired is kept in the
    /// result set even if the overall call is said to have been cancelled
    /// (§4.2 "never discard verified work on cancellation").
    pub async fn refresh(&self, cancel: &CancelToken) -> Result<usize> {
        let urls = self.source.list_urls().await?;
        let blacklist = self.blacklist.read().unwrap().clone();
        let candidates: Vec<String> = urls.into_iter().filter(|u| !blacklist.contains(u)).collect();

        let fetches = candidates
            .into_iter()
            .map(|url| cancel.race(self.http_timeout, self.fetch_and_verify(url)));
        let results = futures::future::join_all(fetches).await;

        let mut admitted = 0;
        for result in results {
            match result {
                Ok(intermediary) => {
                    self.cache
                        .write()
                        .unwrap()
                        .insert(intermediary.url.clone(), intermediary);
                    admitted += 1;
                }
                Err(Error::CancellationError) | Err(Error::Timeout(_)) => {
                    // not yet verified when the race ended; simply not admitted this round
                }
                Err(_) => {
                    // transport/parse/signature failure for this LP; leave it out, don't blacklist
                    // on a single bad round since it may be transient
                }
            }
        }
        Ok(admitted)
    }

    async fn fetch_and_verify(&self, url: String) -> Result<Intermediary> {
        let info = self.lp_client.get_info(&url).await?;
        let body: EnvelopeBody = serde_json::from_str(&info.envelope)
            .map_err(|e| Error::SwapDataVerificationError(format!("malformed LP envelope: {e}")))?;

        let mut addresses = HashMap::new();
        for (chain_id, attestation) in &info.chains {
            let Some(contract) = self.contracts.get(chain_id) else {
                continue; // engine has no adapter for this chain; skip it, not an error
            };
            if contract.is_valid_data_signature(
                info.envelope.as_bytes(),
                &attestation.signature,
                &attestation.address,
            ) {
                addresses.insert(chain_id.clone(), attestation.address.clone());
            }
        }
        if addresses.is_empty() {
            return Err(Error::SignatureVerificationError(format!(
                "no chain attestation from {url} verified"
            )));
        }

        Ok(Intermediary {
            url,
            addresses,
            services: body.services,
            reputation: None,
            liquidity: None,
        })
    }

    /// Ranked candidates for a requested swap (§4.2/P5): every known, non-blacklisted
    /// LP that offers `swap_type`/`token` on `chain_id` within its advertised
    /// bounds, sorted by ascending `base_fee + amount*ppm/1_000_000`; ties broken by
    /// lower `swap_fee_ppm`, then lower `swap_base_fee_sats`, then `url` for a stable
    /// order across otherwise-identical offers.
    pub fn get_swap_candidates(
        &self,
        chain_id: &str,
        swap_type: SwapType,
        token: &Token,
        amount: Option<u64>,
    ) -> Vec<SwapCandidate> {
        let cache = self.cache.read().unwrap();
        let mut candidates: Vec<SwapCandidate> = cache
            .values()
            .filter(|lp| lp.offers(swap_type, chain_id, token))
            .filter_map(|lp| {
                let offer = lp.services.get(&swap_type)?.clone();
                if let Some(amount) = amount {
                    if amount < offer.min_sats || amount > offer.max_sats {
                        return None;
                    }
                }
                let variable = amount.unwrap_or(0) * offer.swap_fee_ppm / 1_000_000;
                Some(SwapCandidate {
                    url: lp.url.clone(),
                    estimated_cost_sats: offer.swap_base_fee_sats + variable,
                    offer,
                })
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.estimated_cost_sats
                .cmp(&b.estimated_cost_sats)
                .then_with(|| a.offer.swap_fee_ppm.cmp(&b.offer.swap_fee_ppm))
                .then_with(|| a.offer.swap_base_fee_sats.cmp(&b.offer.swap_base_fee_sats))
                .then_with(|| a.url.cmp(&b.url))
        });
        candidates
    }

    /// Aggregated `[min, max]` sats this registry can currently route for
    /// `swap_type`/`token` on `chain_id`, across every known LP (§4.2
    /// `swap_bounds`). `None` if no LP currently offers this pair.
    pub fn swap_bounds(&self, chain_id: &str, swap_type: SwapType, token: &Token) -> Option<(u64, u64)> {
        let cache = self.cache.read().unwrap();
        cache
            .values()
            .filter(|lp| lp.offers(swap_type, chain_id, token))
            .filter_map(|lp| lp.services.get(&swap_type))
            .fold(None, |acc: Option<(u64, u64)>, offer| match acc {
                None => Some((offer.min_sats, offer.max_sats)),
                Some((min, max)) => Some((min.min(offer.min_sats), max.max(offer.max_sats))),
            })
    }
}
