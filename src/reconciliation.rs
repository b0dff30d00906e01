//! The background driver that keeps every tracked swap in sync with chain
//! reality and with time (§4.5 C7, §5 Concurrency).
//!
//! Four `tokio` tasks, coordinated the way §4.5/§5 describe: T1 a periodic
//! tick on a `tokio::time::interval`, T2 a `Contract::subscribe` event stream
//! fed through an `mpsc::Receiver<ChainEvent>`, T3 a batched deep-sync via
//! `get_commit_statuses`, T4 a periodic poll of the LP's payment-authorization
//! / invoice-status endpoint on `EngineConfig::check_interval` for swaps still
//! waiting on an off-chain payment signal (§4.4.2, §4.4.5b). Per-swap mutations
//! are serialized with a lock keyed by `SwapId`, matching the teacher's "one
//! mutex per logical resource, held only across the critical section" style.

use crate::config::EngineConfig;
use crate::contract::Contract;
use crate::lp_client::LPClient;
use crate::messenger::{Messenger, SwapClaimWitnessMessage};
use crate::oracle::PriceOracle;
use crate::state_machine;
use crate::store::{IndexMatch, Query, SwapStore};
use crate::types::{FromBtcPositive, NegativeState, StateFamily, SwapId, SwapState, TrustedPositive};
use crate::verifier::QuoteVerifier;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Per-swap locks, so T1/T2/T3 (and a concurrent user action) never race on the
/// same record (§5 "Per-swap lock, held across every state mutation + persist").
#[derive(Default)]
struct LockTable {
    locks: Mutex<HashMap<SwapId, Arc<Mutex<()>>>>,
}

impl LockTable {
    async fn lock_for(&self, id: &SwapId) -> Arc<Mutex<()>> {
        let mut table = self.locks.lock().await;
        table.entry(id.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

/// Owns the background tasks driving a [`SwapStore`]/[`Contract`] pair.
pub struct ReconciliationLoop {
    tick_handle: JoinHandle<()>,
    event_handle: JoinHandle<()>,
    poll_handle: JoinHandle<()>,
}

impl ReconciliationLoop {
    /// Spawn T1 (periodic tick), T2 (chain-event subscription) and T4
    /// (payment-authorization poll) for a single chain.
    /// `contract`/`store`/`messenger`/`lp_client`/`oracle` are shared across
    /// every task via `Arc`. Call [`Self::deep_sync`] separately (T3) on
    /// whatever schedule or trigger the embedding application wants (e.g. on
    /// reconnect after being offline).
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        chain_id: String,
        store: Arc<dyn SwapStore>,
        contract: Arc<dyn Contract>,
        messenger: Arc<dyn Messenger>,
        lp_client: Arc<dyn LPClient>,
        oracle: Arc<dyn PriceOracle>,
        config: EngineConfig,
    ) -> Self {
        let locks = Arc::new(LockTable::default());

        let tick_handle = tokio::spawn(tick_task(
            chain_id.clone(),
            store.clone(),
            messenger.clone(),
            config.clone(),
            locks.clone(),
        ));
        let event_handle = tokio::spawn(event_task(
            chain_id.clone(),
            store.clone(),
            contract.clone(),
            locks.clone(),
            config.clone(),
        ));
        let poll_handle = tokio::spawn(poll_task(chain_id, store, contract, lp_client, oracle, config, locks));

        Self {
            tick_handle,
            event_handle,
            poll_handle,
        }
    }

    pub fn abort(&self) {
        self.tick_handle.abort();
        self.event_handle.abort();
        self.poll_handle.abort();
    }

    /// T3: batched deep-sync. Replaces individually-replayed events with one
    /// authoritative status fetch per tracked escrow, for use after a long
    /// offline period or on demand (§4.5).
    ///
    /// Generic over `C: Contract` rather than `&dyn Contract`: `get_commit_statuses`
    /// carries a `where Self: Sized` bound (see `contract.rs`) and so isn't part of
    /// the trait's vtable.
    pub async fn deep_sync<C: Contract>(
        chain_id: &str,
        store: &dyn SwapStore,
        contract: &C,
    ) -> crate::error::Result<usize> {
        let swaps = store
            .query(
                Query::new()
                    .and(IndexMatch::ChainId(chain_id.to_string()))
                    .and(IndexMatch::NonTerminal),
            )
            .await?;
        let tracked: Vec<&crate::types::Swap> = swaps.iter().filter(|s| s.escrow_hash().is_some()).collect();
        if tracked.is_empty() {
            return Ok(0);
        }
        let hashes: Vec<[u8; 32]> = tracked.iter().map(|s| s.escrow_hash().unwrap()).collect();
        let statuses = contract.get_commit_statuses(hashes).await?;
        let mut changed = 0;
        for (idx, status) in statuses {
            let Some(swap) = tracked.get(idx as usize) else {
                continue;
            };
            let mut swap = (*swap).clone();
            if state_machine::force_onchain_state(&mut swap, &status).state_changed {
                store.save(&swap).await?;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

impl Drop for ReconciliationLoop {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn tick_task(
    chain_id: String,
    store: Arc<dyn SwapStore>,
    messenger: Arc<dyn Messenger>,
    config: EngineConfig,
    locks: Arc<LockTable>,
) {
    let mut interval = tokio::time::interval(config.tick_interval);
    loop {
        interval.tick().await;
        let swaps = match store
            .query(
                Query::new()
                    .and(IndexMatch::ChainId(chain_id.clone()))
                    .and(IndexMatch::NonTerminal),
            )
            .await
        {
            Ok(swaps) => swaps,
            Err(err) => {
                log::warn!("reconciliation tick: failed to query {chain_id}: {err}");
                continue;
            }
        };

        let now = crate::clock::now_unix_secs();
        for swap in swaps {
            let lock = locks.lock_for(&swap.id).await;
            let _guard = lock.lock().await;

            let Ok(Some(mut swap)) = store.get(&swap.id).await else {
                continue; // removed concurrently
            };
            let outcome = state_machine::tick(&mut swap, now, &config);
            if outcome.state_changed {
                let is_bare_quote_expiry = matches!(swap.state, SwapState::Negative(NegativeState::QuoteExpired))
                    && swap.swap_data.is_none()
                    && swap.commit_tx_id.is_none();
                let persist = if is_bare_quote_expiry {
                    store.remove(&swap.id).await
                } else {
                    store.save(&swap).await
                };
                if let Err(err) = persist {
                    log::warn!("reconciliation tick: failed to persist {}: {err}", swap.id);
                }
            }
            if outcome.rebroadcast_secret {
                if let (Some(secret), Some(escrow_hash)) = (swap.preimage_secret, swap.escrow_hash()) {
                    let message = SwapClaimWitnessMessage { escrow_hash, secret };
                    if let Err(err) = messenger.broadcast(message).await {
                        log::warn!("reconciliation tick: secret broadcast failed for {}: {err}", swap.id);
                    }
                }
            }
        }
    }
}

async fn event_task(
    chain_id: String,
    store: Arc<dyn SwapStore>,
    contract: Arc<dyn Contract>,
    locks: Arc<LockTable>,
    config: EngineConfig,
) {
    loop {
        let tracked = match store
            .query(
                Query::new()
                    .and(IndexMatch::ChainId(chain_id.clone()))
                    .and(IndexMatch::NonTerminal),
            )
            .await
        {
            Ok(swaps) => swaps,
            Err(err) => {
                log::warn!("reconciliation events: failed to query {chain_id}: {err}");
                tokio::time::sleep(config.tick_interval).await;
                continue;
            }
        };
        let hashes: Vec<[u8; 32]> = tracked.iter().filter_map(|s| s.escrow_hash()).collect();

        let mut receiver = match contract.subscribe(hashes).await {
            Ok(rx) => rx,
            Err(err) => {
                log::warn!("reconciliation events: subscribe failed for {chain_id}: {err}");
                tokio::time::sleep(config.tick_interval).await;
                continue;
            }
        };

        while let Some(event) = receiver.recv().await {
            let escrow_hash = event.escrow_hash();
            let matching = match store
                .query(Query::new().and(IndexMatch::EscrowHash(escrow_hash)))
                .await
            {
                Ok(matching) => matching,
                Err(err) => {
                    log::warn!("reconciliation events: failed to look up escrow {}: {err}", hex::encode(escrow_hash));
                    continue;
                }
            };
            for swap in matching {
                let lock = locks.lock_for(&swap.id).await;
                let _guard = lock.lock().await;

                let Ok(Some(mut swap)) = store.get(&swap.id).await else {
                    continue;
                };
                let outcome = state_machine::apply_event(&mut swap, &event);
                if outcome.state_changed {
                    if let Err(err) = store.save(&swap).await {
                        log::warn!("reconciliation events: failed to persist {}: {err}", swap.id);
                    }
                }
            }
        }
        // the subscription stream ended (chain adapter reconnect); loop and resubscribe
    }
}

/// T4: poll the LP for swaps whose progress is only observable off-chain
/// (§4.4.2 `PR_CREATED -> PR_PAID`, §4.4.5b `CREATED -> RECEIVED -> SETTLED`).
/// Escrow-backed protocols hit `get_payment_authorization`; `TRUSTED_*`
/// protocols have no escrow and hit `get_invoice_status` instead.
#[allow(clippy::too_many_arguments)]
async fn poll_task(
    chain_id: String,
    store: Arc<dyn SwapStore>,
    contract: Arc<dyn Contract>,
    lp_client: Arc<dyn LPClient>,
    oracle: Arc<dyn PriceOracle>,
    config: EngineConfig,
    locks: Arc<LockTable>,
) {
    let mut interval = tokio::time::interval(config.check_interval);
    loop {
        interval.tick().await;
        let swaps = match store
            .query(
                Query::new()
                    .and(IndexMatch::ChainId(chain_id.clone()))
                    .and(IndexMatch::NonTerminal),
            )
            .await
        {
            Ok(swaps) => swaps,
            Err(err) => {
                log::warn!("reconciliation poll: failed to query {chain_id}: {err}");
                continue;
            }
        };

        for swap in swaps {
            let awaiting_poll = match swap.swap_type.state_family() {
                StateFamily::FromBtc => matches!(swap.state, SwapState::FromBtc(FromBtcPositive::PrCreated)),
                StateFamily::Trusted => matches!(
                    swap.state,
                    SwapState::Trusted(TrustedPositive::Created | TrustedPositive::Received)
                ),
                StateFamily::ToBtc => false,
            };
            let Some(payment_hash) = swap.payment_hash.filter(|_| awaiting_poll) else {
                continue;
            };

            let status = match swap.swap_type.state_family() {
                StateFamily::Trusted => lp_client.get_invoice_status(&swap.lp_url, &payment_hash).await,
                _ => lp_client.get_payment_authorization(&swap.lp_url, &payment_hash).await,
            };
            let status = match status {
                Ok(status) => status,
                Err(err) => {
                    log::warn!("reconciliation poll: LP query failed for {}: {err}", swap.id);
                    continue;
                }
            };

            let lock = locks.lock_for(&swap.id).await;
            let _guard = lock.lock().await;

            let Ok(Some(mut swap)) = store.get(&swap.id).await else {
                continue; // removed concurrently
            };
            let verifier = QuoteVerifier::new(&config, oracle.as_ref(), contract.as_ref());
            match state_machine::apply_payment_status(&mut swap, &status, &verifier).await {
                Ok(outcome) if outcome.state_changed => {
                    if let Err(err) = store.save(&swap).await {
                        log::warn!("reconciliation poll: failed to persist {}: {err}", swap.id);
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    log::warn!("reconciliation poll: rejected payment status for {}: {err}", swap.id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{ChainEvent, CommitStatus, ContractFuture};
    use crate::messenger::NullMessenger;
    use crate::store::MemorySwapStore;
    use crate::types::*;
    use std::collections::HashMap as Map;
    use tokio::sync::mpsc;

    struct FakeContract {
        events: Mutex<Option<mpsc::Receiver<ChainEvent>>>,
    }

    impl Contract for FakeContract {
        fn create_swap_data(
            &self,
            _: &str,
            _: &str,
            _: &Token,
            _: u64,
            _: [u8; 32],
            _: u64,
            _: u64,
        ) -> ContractFuture<'_, EscrowData> {
            unimplemented!()
        }
        fn get_hash_for_htlc(&self, h: &[u8; 32]) -> [u8; 32] {
            *h
        }
        fn is_valid_data_signature(&self, _: &[u8], _: &str, _: &str) -> bool {
            true
        }
        fn is_valid_init_authorization(&self, _: &str, _: &EscrowData, _: &str) -> bool {
            true
        }
        fn get_commit_status(&self, _: &EscrowData) -> ContractFuture<'_, CommitStatus> {
            Box::pin(async { Ok(CommitStatus::NotCommitted) })
        }
        fn get_commit_statuses(
            &self,
            _: Vec<[u8; 32]>,
        ) -> ContractFuture<'_, Vec<(u8, CommitStatus)>> {
            Box::pin(async { Ok(vec![]) })
        }
        fn txs_commit(&self, _: &EscrowData) -> ContractFuture<'_, Vec<crate::contract::UnsignedTx>> {
            unimplemented!()
        }
        fn txs_claim_with_secret(
            &self,
            _: &EscrowData,
            _: &[u8; 32],
        ) -> ContractFuture<'_, Vec<crate::contract::UnsignedTx>> {
            unimplemented!()
        }
        fn txs_refund(&self, _: &EscrowData) -> ContractFuture<'_, Vec<crate::contract::UnsignedTx>> {
            unimplemented!()
        }
        fn subscribe(
            &self,
            _: Vec<[u8; 32]>,
        ) -> ContractFuture<'_, tokio::sync::mpsc::Receiver<ChainEvent>> {
            Box::pin(async move {
                let rx = self.events.lock().await.take().expect("subscribe called once in this test");
                Ok(rx)
            })
        }
    }

    fn sample_swap(id: &str, claim_hash: [u8; 32]) -> Swap {
        Swap {
            id: SwapId(id.to_string()),
            swap_type: SwapType::FromBtcLn,
            state: SwapState::FromBtc(FromBtcPositive::PrPaid),
            chain_id: "polygon".into(),
            lp_url: "https://lp.example".into(),
            initiator_address: "user".into(),
            input: AmountSpec {
                token: Token::BtcLightning,
                raw_amount: 100_000,
            },
            output: AmountSpec {
                token: Token::Chain {
                    chain_id: "polygon".into(),
                    address: "0xusdc".into(),
                    decimals: 6,
                },
                raw_amount: 99_000,
            },
            initial_swap_data: Some(EscrowData {
                offerer: "lp".into(),
                claimer: "user".into(),
                token: Token::Chain {
                    chain_id: "polygon".into(),
                    address: "0xusdc".into(),
                    decimals: 6,
                },
                amount: 99_000,
                claim_hash,
                sequence: 0,
                expiry: 10_000,
                extra: Map::new(),
            }),
            swap_data: None,
            fees: Fees::default(),
            pricing_info: PricingInfo {
                base_fee_sats: 0,
                fee_ppm: 0,
                quoted_usat_per_token: 1,
                observed_usat_per_token: None,
                valid: true,
                usd_per_btc_at_quote: None,
            },
            preimage_secret: None,
            payment_hash: None,
            payment_request: None,
            lnurl_state: None,
            signature_bundle: None,
            created_at: 0,
            quote_expiry: 1_000_000,
            quote_expiry_soft: 900_000,
            htlc_expiry: Some(50_000),
            committed_at: None,
            commit_tx_id: None,
            claim_tx_id: None,
            refund_tx_id: None,
            ticks_in_state: 0,
        }
    }

    #[tokio::test]
    async fn event_task_advances_matching_swap_and_ignores_others() {
        let store: Arc<dyn SwapStore> = Arc::new(MemorySwapStore::new());
        let swap = sample_swap("s1", [3u8; 32]);
        let escrow_hash = swap.escrow_hash().unwrap();
        store.save(&swap).await.unwrap();

        let (tx, rx) = mpsc::channel(4);
        let contract: Arc<dyn Contract> = Arc::new(FakeContract {
            events: Mutex::new(Some(rx)),
        });
        let locks = Arc::new(LockTable::default());

        let handle = tokio::spawn(event_task(
            "polygon".to_string(),
            store.clone(),
            contract,
            locks,
            EngineConfig::default(),
        ));

        tx.send(ChainEvent::Initialize {
            escrow_hash,
            data: None,
            tx_id: "0xcommit".into(),
        })
        .await
        .unwrap();

        // Unrelated escrow hash must not affect this swap.
        tx.send(ChainEvent::Initialize {
            escrow_hash: [9u8; 32],
            data: None,
            tx_id: "0xother".into(),
        })
        .await
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.abort();

        let updated = store.get(&swap.id).await.unwrap().unwrap();
        assert!(matches!(updated.state, SwapState::FromBtc(FromBtcPositive::ClaimCommited)));
        assert_eq!(updated.commit_tx_id.as_deref(), Some("0xcommit"));
    }

    #[tokio::test]
    async fn tick_task_moves_swap_to_quote_soft_expired() {
        let store: Arc<dyn SwapStore> = Arc::new(MemorySwapStore::new());
        let mut swap = sample_swap("s2", [4u8; 32]);
        swap.state = SwapState::FromBtc(FromBtcPositive::PrCreated);
        swap.quote_expiry_soft = 0;
        swap.quote_expiry = 100_000_000_000;
        swap.htlc_expiry = None;
        store.save(&swap).await.unwrap();

        let messenger: Arc<dyn Messenger> = Arc::new(NullMessenger);
        let locks = Arc::new(LockTable::default());
        let config = EngineConfig {
            tick_interval: std::time::Duration::from_millis(5),
            ..Default::default()
        };

        let handle = tokio::spawn(tick_task(
            "polygon".to_string(),
            store.clone(),
            messenger,
            config,
            locks,
        ));

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        handle.abort();

        let updated = store.get(&swap.id).await.unwrap().unwrap();
        assert_eq!(updated.state, SwapState::Negative(NegativeState::QuoteSoftExpired));
    }

    #[tokio::test]
    async fn tick_task_drops_bare_quote_expired_swap_from_the_store() {
        let store: Arc<dyn SwapStore> = Arc::new(MemorySwapStore::new());
        let mut swap = sample_swap("s3", [5u8; 32]);
        swap.state = SwapState::Negative(NegativeState::QuoteSoftExpired);
        swap.quote_expiry_soft = 0;
        swap.quote_expiry = 0;
        swap.htlc_expiry = None;
        swap.initial_swap_data = None;
        store.save(&swap).await.unwrap();

        let messenger: Arc<dyn Messenger> = Arc::new(NullMessenger);
        let locks = Arc::new(LockTable::default());
        let config = EngineConfig {
            tick_interval: std::time::Duration::from_millis(5),
            ..Default::default()
        };

        let handle = tokio::spawn(tick_task("polygon".to_string(), store.clone(), messenger, config, locks));

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        handle.abort();

        assert!(store.get(&swap.id).await.unwrap().is_none());
    }

    struct FakeLpClient {
        payment_hash: [u8; 32],
        response: crate::lp_client::PaymentStatus,
    }

    impl LPClient for FakeLpClient {
        fn init_swap(
            &self,
            _: &str,
            _: &crate::lp_client::InitRequest,
        ) -> crate::lp_client::LpFuture<'_, crate::lp_client::InitResponse> {
            unimplemented!()
        }
        fn get_payment_authorization(
            &self,
            _: &str,
            payment_hash: &[u8; 32],
        ) -> crate::lp_client::LpFuture<'_, crate::lp_client::PaymentStatus> {
            assert_eq!(*payment_hash, self.payment_hash);
            let response = self.response.clone();
            Box::pin(async move { Ok(response) })
        }
        fn get_invoice_status(
            &self,
            _: &str,
            payment_hash: &[u8; 32],
        ) -> crate::lp_client::LpFuture<'_, crate::lp_client::PaymentStatus> {
            assert_eq!(*payment_hash, self.payment_hash);
            let response = self.response.clone();
            Box::pin(async move { Ok(response) })
        }
        fn get_info(&self, _: &str) -> crate::lp_client::LpFuture<'_, crate::lp_client::InfoResponse> {
            unimplemented!()
        }
        fn recover_swaps(
            &self,
            _: &str,
            _: &str,
        ) -> crate::lp_client::LpFuture<'_, Vec<crate::lp_client::RecoveredSwap>> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn poll_task_moves_pr_created_swap_to_pr_paid_on_auth_data() {
        let store: Arc<dyn SwapStore> = Arc::new(MemorySwapStore::new());
        let mut swap = sample_swap("s4", [6u8; 32]);
        swap.state = SwapState::FromBtc(FromBtcPositive::PrCreated);
        let payment_hash = [7u8; 32];
        swap.payment_hash = Some(payment_hash);
        let expected_data = swap.initial_swap_data.clone().unwrap();
        store.save(&swap).await.unwrap();

        let (_tx, rx) = mpsc::channel(1);
        let contract: Arc<dyn Contract> = Arc::new(FakeContract {
            events: Mutex::new(Some(rx)),
        });
        let lp_client: Arc<dyn LPClient> = Arc::new(FakeLpClient {
            payment_hash,
            response: crate::lp_client::PaymentStatus::AuthData {
                data: expected_data,
                prefix: "lp-prefix".into(),
                timeout: 600,
                signature: "sig".into(),
            },
        });
        let oracle: Arc<dyn PriceOracle> = Arc::new(crate::oracle::FixedPriceOracle::new(1));
        let locks = Arc::new(LockTable::default());
        let config = EngineConfig {
            check_interval: std::time::Duration::from_millis(5),
            ..Default::default()
        };

        let handle = tokio::spawn(poll_task(
            "polygon".to_string(),
            store.clone(),
            contract,
            lp_client,
            oracle,
            config,
            locks,
        ));

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        handle.abort();

        let updated = store.get(&swap.id).await.unwrap().unwrap();
        assert_eq!(updated.state, SwapState::FromBtc(FromBtcPositive::PrPaid));
        assert!(updated.signature_bundle.is_some());
    }
}
