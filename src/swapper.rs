//! The top-level façade applications embed (§4.7 C8).
//!
//! Grounded in the teacher's `Client<S: WalletStorage, SS: SwapStorage>`: generic
//! over the two storage traits, owning an HTTP LP client, an HD `Wallet`, and
//! (new, generalized from the teacher's single hardcoded LP) an
//! [`IntermediaryRegistry`] plus a price oracle. `create`/`commit`/`claim`/`refund`
//! are thin wrappers over `crate::state_machine`; `recover_swaps` mirrors the
//! teacher's `Client::recover_swaps` shape.

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::contract::{Contract, UnsignedTx};
use crate::error::{Error, Result};
use crate::lp_client::{InitRequest, LPClient};
use crate::oracle::PriceOracle;
use crate::registry::IntermediaryRegistry;
use crate::retry::with_retry;
use crate::state_machine;
use crate::storage::WalletStorage;
use crate::store::{IndexMatch, Query, SwapStore};
use crate::types::{Fees, PricingInfo, Swap, SwapId, SwapState, SwapType, Token};
use crate::verifier::QuoteVerifier;
use crate::wallet::Wallet;
use std::collections::HashMap;

/// Default window a quote is honored for once an LP returns it (§9 Open
/// Questions: the distilled spec names `quote_expiry`/`quote_expiry_soft` but
/// never pins a duration; see DESIGN.md).
const DEFAULT_QUOTE_WINDOW_SECS: u64 = 600;
const DEFAULT_QUOTE_SOFT_WINDOW_SECS: u64 = 300;

/// The swap lifecycle façade (§4.7).
pub struct Swapper<ST: SwapStore, WS: WalletStorage> {
    store: ST,
    wallet: Wallet<WS>,
    lp_client: Box<dyn LPClient>,
    registry: IntermediaryRegistry,
    contracts: HashMap<String, Box<dyn Contract>>,
    oracle: Box<dyn PriceOracle>,
    config: EngineConfig,
}

impl<ST: SwapStore, WS: WalletStorage> Swapper<ST, WS> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: ST,
        wallet: Wallet<WS>,
        lp_client: Box<dyn LPClient>,
        registry: IntermediaryRegistry,
        contracts: HashMap<String, Box<dyn Contract>>,
        oracle: Box<dyn PriceOracle>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            wallet,
            lp_client,
            registry,
            contracts,
            oracle,
            config,
        }
    }

    pub fn store(&self) -> &ST {
        &self.store
    }

    fn contract_for(&self, chain_id: &str) -> Result<&dyn Contract> {
        self.contracts
            .get(chain_id)
            .map(|c| c.as_ref())
            .ok_or_else(|| Error::UserError(format!("no chain adapter configured for {chain_id}")))
    }

    /// Quote and create a new swap, picking the cheapest candidate LP the
    /// registry currently knows about (§4.7 `create`).
    pub async fn create(
        &self,
        swap_type: SwapType,
        chain_id: &str,
        token: Token,
        amount: u64,
        exact_in: bool,
        initiator_address: &str,
        cancel: &CancelToken,
    ) -> Result<Swap> {
        let candidate = self
            .registry
            .get_swap_candidates(chain_id, swap_type, &token, Some(amount))
            .into_iter()
            .next()
            .ok_or_else(|| Error::UserError("no liquidity provider offers this swap".into()))?;
        let lp = self
            .registry
            .known_intermediaries()
            .into_iter()
            .find(|lp| lp.url == candidate.url)
            .ok_or_else(|| Error::UserError("candidate LP vanished from the registry".into()))?;

        let params = self.wallet.derive_swap_params().await?;
        let request = InitRequest {
            swap_type,
            amount,
            token: token.clone(),
            exact_in,
            initiator_address: initiator_address.to_string(),
            claim_hash: if swap_type.has_escrow() {
                Some(params.preimage_hash)
            } else {
                None
            },
            additional_params: HashMap::new(),
        };

        let response = with_retry(&self.config, cancel, || {
            self.lp_client.init_swap(&candidate.url, &request)
        })
        .await?;

        let contract = self.contract_for(chain_id)?;
        let verifier = QuoteVerifier::new(&self.config, self.oracle.as_ref(), contract);
        let verified = verifier.verify(&request, &response, &lp).await.map_err(|e| {
            if let Error::IntermediaryError { recoverable: false, .. } = e {
                self.registry.remove(&candidate.url);
            }
            e
        })?;
        let response = verified.response;

        let now = crate::clock::now_unix_secs();
        let market = self.oracle.usat_per_token(&token).await.unwrap_or(0);
        let id = SwapId::derive(&params.preimage_hash, uuid::Uuid::new_v4().as_bytes());
        let swap = Swap {
            id,
            swap_type,
            state: SwapState::initial(swap_type.state_family()),
            chain_id: chain_id.to_string(),
            lp_url: candidate.url.clone(),
            initiator_address: initiator_address.to_string(),
            input: crate::types::AmountSpec {
                token: if swap_type.is_from_btc() {
                    Token::BtcLightning
                } else {
                    token.clone()
                },
                raw_amount: if exact_in { amount } else { response.total },
            },
            output: crate::types::AmountSpec {
                token: if swap_type.is_from_btc() {
                    token.clone()
                } else {
                    Token::BtcLightning
                },
                raw_amount: response.amount,
            },
            initial_swap_data: response.data.clone(),
            swap_data: None,
            fees: Fees {
                swap_fee_sats: response.swap_fee,
                network_fee_sats: response.network_fee,
                gas_swap_fee_sats: response.gas_swap_fee,
                watchtower_bounty_sats: None,
            },
            pricing_info: PricingInfo {
                base_fee_sats: 0,
                fee_ppm: 0,
                quoted_usat_per_token: if response.amount == 0 {
                    0
                } else {
                    response.total.saturating_mul(1_000_000) / response.amount
                },
                observed_usat_per_token: Some(market),
                valid: true,
                usd_per_btc_at_quote: None,
            },
            preimage_secret: Some(params.preimage),
            payment_hash: Some(params.preimage_hash),
            payment_request: response.pr.clone(),
            lnurl_state: None,
            signature_bundle: None,
            created_at: now,
            quote_expiry: now + DEFAULT_QUOTE_WINDOW_SECS,
            quote_expiry_soft: now + DEFAULT_QUOTE_SOFT_WINDOW_SECS,
            htlc_expiry: response.data.as_ref().map(|d| d.expiry),
            committed_at: None,
            commit_tx_id: None,
            claim_tx_id: None,
            refund_tx_id: None,
            ticks_in_state: 0,
        };

        self.store.save(&swap).await?;
        Ok(swap)
    }

    /// Convenience wrapper over [`Self::create`] that sniffs `swap_type` from
    /// the shape of the two tokens and the counterparty address, the way a
    /// wallet UI would before ever constructing an `InitRequest` (§4.7 `swap`).
    ///
    /// Exactly one of `src_token`/`dst_token` must be a BTC-family token
    /// (`Btc` or `BtcLightning`); `address` is the smart-chain signer the same
    /// as `create`'s `initiator_address`. For the BTC leg of an incoming
    /// Lightning swap, an LNURL-shaped `address` selects the watchtower-settled
    /// `FROM_BTCLN_AUTO` variant over plain `FROM_BTCLN`.
    pub async fn swap(
        &self,
        src_token: Token,
        dst_token: Token,
        amount: u64,
        exact_in: bool,
        address: &str,
        cancel: &CancelToken,
    ) -> Result<Swap> {
        let swap_type = infer_swap_type(&src_token, &dst_token, address)?;
        let (chain_id, token) = match (&src_token, &dst_token) {
            (Token::Btc | Token::BtcLightning, Token::Chain { chain_id, .. }) => {
                (chain_id.clone(), dst_token)
            }
            (Token::Chain { chain_id, .. }, Token::Btc | Token::BtcLightning) => {
                (chain_id.clone(), src_token)
            }
            _ => unreachable!("infer_swap_type already rejected every other combination"),
        };
        self.create(swap_type, &chain_id, token, amount, exact_in, address, cancel)
            .await
    }

    fn scoped_query(chain: Option<&str>, signer: Option<&str>) -> Query {
        let mut query = Query::new();
        if let Some(chain) = chain {
            query = query.and(IndexMatch::ChainId(chain.to_string()));
        }
        if let Some(signer) = signer {
            query = query.and(IndexMatch::InitiatorAddress(signer.to_string()));
        }
        query
    }

    /// All locally-known swaps, optionally narrowed to one chain and/or
    /// initiator address (§4.7 `get_all_swaps(chain?, signer?)`).
    pub async fn get_all_swaps(&self, chain: Option<&str>, signer: Option<&str>) -> Result<Vec<Swap>> {
        self.store.query(Self::scoped_query(chain, signer)).await
    }

    /// Look up a swap by id, optionally asserting it belongs to the given chain
    /// and/or initiator address (§4.7 `get_swap_by_id(id, chain?, signer?)`).
    pub async fn get_swap_by_id(
        &self,
        id: &SwapId,
        chain: Option<&str>,
        signer: Option<&str>,
    ) -> Result<Swap> {
        let swap = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::SwapNotFound(id.to_string()))?;
        if chain.is_some_and(|c| c != swap.chain_id)
            || signer.is_some_and(|s| s != swap.initiator_address)
        {
            return Err(Error::SwapNotFound(id.to_string()));
        }
        Ok(swap)
    }

    /// Every non-terminal swap that needs a human decision right now: ready to
    /// commit, ready to claim, or ready to refund (§4.7 `get_actionable_swaps`).
    pub async fn get_actionable_swaps(&self, chain: Option<&str>, signer: Option<&str>) -> Result<Vec<Swap>> {
        let all = self
            .store
            .query(Self::scoped_query(chain, signer).and(IndexMatch::NonTerminal))
            .await?;
        Ok(all
            .into_iter()
            .filter(|s| is_commit_ready(s) || is_claim_ready(s) || is_refund_ready(s))
            .collect())
    }

    pub async fn get_refundable_swaps(&self, chain: Option<&str>, signer: Option<&str>) -> Result<Vec<Swap>> {
        let all = self
            .store
            .query(Self::scoped_query(chain, signer).and(IndexMatch::NonTerminal))
            .await?;
        Ok(all.into_iter().filter(is_refund_ready).collect())
    }

    pub async fn get_claimable_swaps(&self, chain: Option<&str>, signer: Option<&str>) -> Result<Vec<Swap>> {
        let all = self
            .store
            .query(Self::scoped_query(chain, signer).and(IndexMatch::NonTerminal))
            .await?;
        Ok(all.into_iter().filter(is_claim_ready).collect())
    }

    pub async fn commit(&self, id: &SwapId) -> Result<Vec<UnsignedTx>> {
        let swap = self.get_swap_by_id(id, None, None).await?;
        let contract = self.contract_for(&swap.chain_id)?;
        state_machine::commit(&swap, contract).await
    }

    pub async fn claim(&self, id: &SwapId) -> Result<Vec<UnsignedTx>> {
        let swap = self.get_swap_by_id(id, None, None).await?;
        let secret = swap
            .preimage_secret
            .ok_or_else(|| Error::UserError("no known preimage for this swap".into()))?;
        let contract = self.contract_for(&swap.chain_id)?;
        state_machine::claim(&swap, contract, &secret).await
    }

    pub async fn refund(&self, id: &SwapId) -> Result<Vec<UnsignedTx>> {
        let swap = self.get_swap_by_id(id, None, None).await?;
        let contract = self.contract_for(&swap.chain_id)?;
        state_machine::refund(&swap, contract).await
    }

    /// Rebuild swap history for the wallet's current mnemonic by asking every
    /// known LP to recover swaps tied to its `user_id` xpub (§4.7
    /// `recover_swaps(chain, signer, start_block?)`). The re-derived
    /// `SwapParams` are not retried at every index; this recovers standing
    /// records, not in-flight local state.
    ///
    /// `chain` narrows recovery to LPs that attest that chain; the recovered
    /// records are stamped with `signer` as their `initiator_address` since
    /// the LP-side recovery endpoint only keys by xpub, not by address.
    /// `start_block` is advisory: it is logged for adapters that page their
    /// own on-chain rescans from it, but the LP recovery endpoint itself has
    /// no block-range parameter to forward it to.
    pub async fn recover_swaps(
        &self,
        chain: &str,
        signer: &str,
        start_block: Option<u64>,
    ) -> Result<Vec<Swap>> {
        if let Some(start_block) = start_block {
            log::debug!("recover_swaps({chain}, {signer}) requested from block {start_block}");
        }
        let xpub = self
            .wallet
            .get_user_id_xpub()
            .await?
            .ok_or(Error::NoMnemonic)?;

        let mut recovered_swaps = Vec::new();
        for lp in self
            .registry
            .known_intermediaries()
            .into_iter()
            .filter(|lp| lp.addresses.contains_key(chain))
        {
            let Ok(recovered) = self.lp_client.recover_swaps(&lp.url, &xpub).await else {
                continue; // one unreachable LP should not fail the whole recovery
            };
            for r in recovered {
                let now = crate::clock::now_unix_secs();
                // Deterministic on (lp, claim_hash) so repeated recovery calls land on the
                // same id and the dedup check below holds.
                let id = SwapId::derive(&r.claim_hash, lp.url.as_bytes());
                if self.store.get(&id).await?.is_some() {
                    continue; // already tracked locally
                }
                let htlc_expiry = r.data.as_ref().map(|d| d.expiry);
                let swap = Swap {
                    id,
                    swap_type: r.swap_type,
                    state: SwapState::initial(r.swap_type.state_family()),
                    chain_id: chain.to_string(),
                    lp_url: lp.url.clone(),
                    initiator_address: signer.to_string(),
                    input: crate::types::AmountSpec {
                        token: Token::BtcLightning,
                        raw_amount: 0,
                    },
                    output: crate::types::AmountSpec {
                        token: r
                            .data
                            .as_ref()
                            .map(|d| d.token.clone())
                            .unwrap_or(Token::Btc),
                        raw_amount: r.data.as_ref().map(|d| d.amount).unwrap_or(0),
                    },
                    initial_swap_data: r.data.clone(),
                    swap_data: r.data,
                    fees: Fees::default(),
                    pricing_info: PricingInfo {
                        base_fee_sats: 0,
                        fee_ppm: 0,
                        quoted_usat_per_token: 0,
                        observed_usat_per_token: None,
                        valid: true,
                        usd_per_btc_at_quote: None,
                    },
                    preimage_secret: None,
                    payment_hash: Some(r.claim_hash),
                    payment_request: r.payment_request,
                    lnurl_state: None,
                    signature_bundle: None,
                    created_at: now,
                    quote_expiry: now,
                    quote_expiry_soft: now,
                    htlc_expiry,
                    committed_at: None,
                    commit_tx_id: None,
                    claim_tx_id: None,
                    refund_tx_id: None,
                    ticks_in_state: 0,
                };
                self.store.save(&swap).await?;
                recovered_swaps.push(swap);
            }
        }
        Ok(recovered_swaps)
    }
}

fn is_commit_ready(swap: &Swap) -> bool {
    matches!(
        swap.state,
        SwapState::FromBtc(crate::types::FromBtcPositive::PrPaid)
            | SwapState::ToBtc(crate::types::ToBtcPositive::Created)
    )
}

fn is_claim_ready(swap: &Swap) -> bool {
    matches!(swap.state, SwapState::FromBtc(crate::types::FromBtcPositive::ClaimCommited))
        && !swap.swap_type.is_watchtower_settled()
}

fn is_refund_ready(swap: &Swap) -> bool {
    matches!(
        swap.state,
        SwapState::Negative(crate::types::NegativeState::Expired)
            | SwapState::ToBtc(crate::types::ToBtcPositive::Refundable)
    )
}

fn looks_like_bolt11(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    lower.starts_with("lnbc") || lower.starts_with("lntb") || lower.starts_with("lnbcrt")
}

fn looks_like_lnurl(s: &str) -> bool {
    s.to_ascii_uppercase().starts_with("LNURL") || s.contains('@')
}

/// Pick the `SwapType` a bare `(src_token, dst_token, address)` triple implies
/// (§4.7 `swap`). Exactly one side must be BTC-family; the other is the
/// smart-chain leg `create` already knows how to quote.
fn infer_swap_type(src: &Token, dst: &Token, address: &str) -> Result<SwapType> {
    match (src, dst) {
        (Token::Btc, Token::Chain { .. }) => Ok(SwapType::FromBtc),
        (Token::BtcLightning, Token::Chain { .. }) => Ok(if looks_like_lnurl(address) {
            SwapType::FromBtcLnAuto
        } else {
            SwapType::FromBtcLn
        }),
        (Token::Chain { .. }, Token::Btc) => Ok(SwapType::ToBtc),
        (Token::Chain { .. }, Token::BtcLightning) => {
            if !address.is_empty() && !looks_like_bolt11(address) && !looks_like_lnurl(address) {
                log::warn!("swap() address does not look like a lightning destination: {address}");
            }
            Ok(SwapType::ToBtcLn)
        }
        (Token::Chain { .. }, Token::Chain { .. }) => Err(Error::UserError(
            "swap() requires one side to be a BTC-family token".into(),
        )),
        _ => Err(Error::UserError(
            "swap() cannot move BTC to BTC; pick a smart-chain token on one side".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_token() -> Token {
        Token::Chain {
            chain_id: "polygon".into(),
            address: "0xtoken".into(),
            decimals: 18,
        }
    }

    #[test]
    fn infer_swap_type_picks_from_btc_for_onchain_deposit() {
        assert_eq!(
            infer_swap_type(&Token::Btc, &chain_token(), "0xuser").unwrap(),
            SwapType::FromBtc
        );
    }

    #[test]
    fn infer_swap_type_picks_auto_for_lnurl_destination() {
        assert_eq!(
            infer_swap_type(&Token::BtcLightning, &chain_token(), "LNURL1DP68GURN8GHJ7").unwrap(),
            SwapType::FromBtcLnAuto
        );
    }

    #[test]
    fn infer_swap_type_picks_plain_lightning_without_lnurl() {
        assert_eq!(
            infer_swap_type(&Token::BtcLightning, &chain_token(), "0xuser").unwrap(),
            SwapType::FromBtcLn
        );
    }

    #[test]
    fn infer_swap_type_picks_to_btc_for_onchain_withdrawal() {
        assert_eq!(
            infer_swap_type(&chain_token(), &Token::Btc, "0xuser").unwrap(),
            SwapType::ToBtc
        );
    }

    #[test]
    fn infer_swap_type_rejects_chain_to_chain() {
        assert!(infer_swap_type(&chain_token(), &chain_token(), "0xuser").is_err());
    }

    #[test]
    fn infer_swap_type_rejects_btc_to_btc() {
        assert!(infer_swap_type(&Token::Btc, &Token::BtcLightning, "anything").is_err());
    }
}
