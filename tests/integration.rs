//! End-to-end façade tests: registry discovery -> quote verification -> swap
//! creation -> chain-confirmed commit/claim, and T3 deep-sync recovery.
//!
//! The unit tests colocated with each module already exercise P1-P7 and
//! S1-S4 in isolation with narrow mocks; these tests instead wire up the
//! full `Swapper` stack the way an embedding application would, to catch
//! anything that only breaks when the pieces are assembled together.

use std::collections::HashMap;
use std::time::Duration;

use swaplink_core::contract::{ChainEvent, CommitStatus, Contract, ContractFuture, UnsignedTx};
use swaplink_core::error::Error;
use swaplink_core::lp_client::{
    ChainAttestation, EnvelopeBody, InfoResponse, InitRequest, InitResponse, LPClient, LpFuture,
    PaymentStatus, RecoveredSwap,
};
use swaplink_core::oracle::FixedPriceOracle;
use swaplink_core::reconciliation::ReconciliationLoop;
use swaplink_core::registry::{IntermediaryRegistry, StaticRegistry};
use swaplink_core::state_machine;
use swaplink_core::storage::{StorageFuture, WalletStorage};
use swaplink_core::store::{IndexMatch, MemorySwapStore, Query, SwapStore};
use swaplink_core::swapper::Swapper;
use swaplink_core::types::{EscrowData, FromBtcPositive, Network, SwapState, SwapType, Token};
use swaplink_core::verifier::QuoteVerifier;
use swaplink_core::wallet::Wallet;

const CHAIN_ID: &str = "polygon";
const LP_URL: &str = "https://lp.example";
const LP_ADDRESS: &str = "0xlp";
const GOOD_SIG: &str = "good-signature";

/// In-memory `WalletStorage`, local to this test binary since
/// `swaplink_core::storage::memory::MemoryWalletStorage` is `#[cfg(test)]`-gated
/// inside the library crate and invisible from here.
#[derive(Default)]
struct LocalWalletStorage {
    mnemonic: std::sync::RwLock<Option<String>>,
    key_index: std::sync::RwLock<u32>,
}

impl WalletStorage for LocalWalletStorage {
    fn get_mnemonic(&self) -> StorageFuture<'_, Option<String>> {
        Box::pin(async move { Ok(self.mnemonic.read().unwrap().clone()) })
    }

    fn set_mnemonic(&self, mnemonic: &str) -> StorageFuture<'_, ()> {
        let mnemonic = mnemonic.to_string();
        Box::pin(async move {
            *self.mnemonic.write().unwrap() = Some(mnemonic);
            Ok(())
        })
    }

    fn get_key_index(&self) -> StorageFuture<'_, u32> {
        Box::pin(async move { Ok(*self.key_index.read().unwrap()) })
    }

    fn set_key_index(&self, index: u32) -> StorageFuture<'_, ()> {
        Box::pin(async move {
            *self.key_index.write().unwrap() = index;
            Ok(())
        })
    }
}

/// A chain adapter stub good enough to drive the commit/claim/refund surface
/// end to end without interpreting any real chain format, grounded in the
/// `AllowAllContract`/`NoopContract` fixtures in `registry.rs`/`verifier.rs`.
struct StubContract {
    commit_statuses: std::sync::Mutex<HashMap<[u8; 32], CommitStatus>>,
}

impl StubContract {
    fn new() -> Self {
        Self {
            commit_statuses: std::sync::Mutex::new(HashMap::new()),
        }
    }
}

impl Contract for StubContract {
    fn create_swap_data(
        &self,
        _offerer: &str,
        _claimer: &str,
        _token: &Token,
        _amount: u64,
        _claim_hash: [u8; 32],
        _sequence: u64,
        _expiry: u64,
    ) -> ContractFuture<'_, EscrowData> {
        unimplemented!("not exercised by this test: LPs construct EscrowData here")
    }

    fn get_hash_for_htlc(&self, payment_hash: &[u8; 32]) -> [u8; 32] {
        *payment_hash
    }

    fn is_valid_data_signature(&self, _data: &[u8], signature: &str, _address: &str) -> bool {
        signature == GOOD_SIG
    }

    fn is_valid_init_authorization(&self, _initiator: &str, _data: &EscrowData, _signature: &str) -> bool {
        true
    }

    fn get_commit_status(&self, data: &EscrowData) -> ContractFuture<'_, CommitStatus> {
        let status = self
            .commit_statuses
            .lock()
            .unwrap()
            .get(&data.claim_hash)
            .cloned()
            .unwrap_or(CommitStatus::NotCommitted);
        Box::pin(async move { Ok(status) })
    }

    fn get_commit_statuses(
        &self,
        escrow_hashes: Vec<[u8; 32]>,
    ) -> ContractFuture<'_, Vec<(u8, CommitStatus)>> {
        let table = self.commit_statuses.lock().unwrap();
        let out: Vec<(u8, CommitStatus)> = escrow_hashes
            .iter()
            .enumerate()
            .filter_map(|(idx, hash)| table.get(hash).cloned().map(|s| (idx as u8, s)))
            .collect();
        Box::pin(async move { Ok(out) })
    }

    fn txs_commit(&self, data: &EscrowData) -> ContractFuture<'_, Vec<UnsignedTx>> {
        let raw = data.claim_hash.to_vec();
        Box::pin(async move {
            Ok(vec![UnsignedTx {
                raw,
                description: "commit".into(),
            }])
        })
    }

    fn txs_claim_with_secret(&self, data: &EscrowData, secret: &[u8; 32]) -> ContractFuture<'_, Vec<UnsignedTx>> {
        let raw = secret.to_vec();
        let _ = data;
        Box::pin(async move {
            Ok(vec![UnsignedTx {
                raw,
                description: "claim".into(),
            }])
        })
    }

    fn txs_refund(&self, data: &EscrowData) -> ContractFuture<'_, Vec<UnsignedTx>> {
        let raw = data.claim_hash.to_vec();
        Box::pin(async move {
            Ok(vec![UnsignedTx {
                raw,
                description: "refund".into(),
            }])
        })
    }

    fn subscribe(
        &self,
        _escrow_hashes: Vec<[u8; 32]>,
    ) -> ContractFuture<'_, tokio::sync::mpsc::Receiver<ChainEvent>> {
        unimplemented!("event-stream wiring is covered by reconciliation.rs's own tests")
    }
}

/// A single hardcoded LP, echoing back whatever `claim_hash`/`initiator_address`
/// the request carries rather than memorizing them up front, since the
/// wallet-derived secret is not known until `Swapper::create` runs.
struct StubLpClient;

impl LPClient for StubLpClient {
    fn init_swap(&self, _url: &str, request: &InitRequest) -> LpFuture<'_, InitResponse> {
        let request = request.clone();
        Box::pin(async move {
            let claim_hash = request
                .claim_hash
                .ok_or_else(|| Error::UserError("escrow protocol requires a claim hash".into()))?;
            let response = InitResponse {
                intermediary_key: LP_ADDRESS.to_string(),
                total: 100_500,
                amount: request.amount,
                swap_fee: 400,
                network_fee: 100,
                gas_swap_fee: None,
                btc_amount_gas: None,
                btc_amount_swap: None,
                data: Some(EscrowData {
                    offerer: LP_ADDRESS.to_string(),
                    claimer: request.initiator_address.clone(),
                    token: request.token.clone(),
                    amount: 100_500,
                    claim_hash,
                    sequence: 0,
                    expiry: swaplink_core::clock::now_unix_secs() + 3_600,
                    extra: HashMap::new(),
                }),
                pr: Some("lnbc1...".to_string()),
                signature: None,
                fee_rate: None,
            };
            Ok(response)
        })
    }

    fn get_payment_authorization(&self, _url: &str, _payment_hash: &[u8; 32]) -> LpFuture<'_, PaymentStatus> {
        Box::pin(async { Ok(PaymentStatus::Paid) })
    }

    fn get_invoice_status(&self, _url: &str, _payment_hash: &[u8; 32]) -> LpFuture<'_, PaymentStatus> {
        Box::pin(async { Ok(PaymentStatus::Paid) })
    }

    fn get_info(&self, _url: &str) -> LpFuture<'_, InfoResponse> {
        Box::pin(async move {
            let mut services = HashMap::new();
            services.insert(
                SwapType::FromBtcLn,
                swaplink_core::types::ServiceOffer {
                    swap_fee_ppm: 1_000,
                    swap_base_fee_sats: 100,
                    min_sats: 1_000,
                    max_sats: 10_000_000,
                    chain_tokens: HashMap::from([(CHAIN_ID.to_string(), vec![token()])]),
                },
            );
            let envelope = serde_json::to_string(&EnvelopeBody { services }).unwrap();
            let chains = HashMap::from([(
                CHAIN_ID.to_string(),
                ChainAttestation {
                    signature: GOOD_SIG.to_string(),
                    address: LP_ADDRESS.to_string(),
                },
            )]);
            Ok(InfoResponse { envelope, chains })
        })
    }

    fn recover_swaps(&self, _url: &str, _xpub: &str) -> LpFuture<'_, Vec<RecoveredSwap>> {
        Box::pin(async { Ok(vec![]) })
    }
}

fn token() -> Token {
    Token::Chain {
        chain_id: CHAIN_ID.to_string(),
        address: "0xusdc".to_string(),
        decimals: 6,
    }
}

async fn build_swapper() -> Swapper<MemorySwapStore, LocalWalletStorage> {
    let mut registry_contracts: HashMap<String, Box<dyn Contract>> = HashMap::new();
    registry_contracts.insert(CHAIN_ID.to_string(), Box::new(StubContract::new()));
    let registry = IntermediaryRegistry::new(
        Box::new(StaticRegistry::new(vec![LP_URL.to_string()])),
        Box::new(StubLpClient),
        registry_contracts,
        Duration::from_secs(5),
    );
    let admitted = registry
        .refresh(&swaplink_core::cancel::CancelToken::new())
        .await
        .unwrap();
    assert_eq!(admitted, 1, "the single stub LP must pass signature verification");

    let wallet_storage = LocalWalletStorage::default();
    let wallet = Wallet::new(wallet_storage, Network::Regtest);
    wallet.generate_or_get_mnemonic().await.unwrap();

    let mut swapper_contracts: HashMap<String, Box<dyn Contract>> = HashMap::new();
    swapper_contracts.insert(CHAIN_ID.to_string(), Box::new(StubContract::new()));

    Swapper::new(
        MemorySwapStore::new(),
        wallet,
        Box::new(StubLpClient),
        registry,
        swapper_contracts,
        Box::new(FixedPriceOracle::new(1_005_000)),
        swaplink_core::config::EngineConfig::default(),
    )
}

/// S1 at the façade level: a user creates a `FROM_BTCLN` swap against the
/// cheapest (only) ranked candidate, the quote passes `QuoteVerifier`, and the
/// record lands in the store at its protocol-initial state.
#[tokio::test]
async fn facade_create_picks_verified_candidate_and_stores_initial_state() {
    let swapper = build_swapper().await;
    let cancel = swaplink_core::cancel::CancelToken::new();

    let swap = swapper
        .create(SwapType::FromBtcLn, CHAIN_ID, token(), 100_000, true, "0xuser", &cancel)
        .await
        .unwrap();

    assert_eq!(swap.state, SwapState::FromBtc(FromBtcPositive::PrCreated));
    assert_eq!(swap.output.raw_amount, 100_000);
    assert!(swap.preimage_secret.is_some());
    assert!(swap.initial_swap_data.is_some());

    let stored = swapper.get_swap_by_id(&swap.id, None, None).await.unwrap();
    assert_eq!(stored.id, swap.id);
}

/// S1 continued end to end: once the LP reports the invoice paid via
/// `AUTH_DATA` (driven through `state_machine::apply_payment_status`, the same
/// call the reconciliation loop's poll task makes) and the chain confirms the
/// escrow, `commit` then `claim` both succeed and leave the swap in its
/// terminal positive state.
///
/// S5 is folded in here: replaying the same `Initialize` event a second time
/// through the exact façade+store path must be a no-op, not a double-commit.
#[tokio::test]
async fn facade_commit_then_claim_reaches_terminal_state_and_events_are_idempotent() {
    let swapper = build_swapper().await;
    let cancel = swaplink_core::cancel::CancelToken::new();

    let created = swapper
        .create(SwapType::FromBtcLn, CHAIN_ID, token(), 100_000, true, "0xuser", &cancel)
        .await
        .unwrap();

    // The LP reports the invoice paid (§4.4.2 PR_CREATED -> PR_PAID).
    let mut swap = swapper.get_swap_by_id(&created.id, None, None).await.unwrap();
    let config = swaplink_core::config::EngineConfig::default();
    let oracle = FixedPriceOracle::new(1_005_000);
    let contract = StubContract::new();
    let verifier = QuoteVerifier::new(&config, &oracle, &contract);
    let status = PaymentStatus::AuthData {
        data: swap.initial_swap_data.clone().unwrap(),
        prefix: "lp-prefix".into(),
        timeout: 600,
        signature: GOOD_SIG.into(),
    };
    let outcome = state_machine::apply_payment_status(&mut swap, &status, &verifier)
        .await
        .unwrap();
    assert!(outcome.state_changed);
    assert_eq!(swap.state, SwapState::FromBtc(FromBtcPositive::PrPaid));
    swapper.store().save(&swap).await.unwrap();

    // User is now ready to commit their side of the escrow.
    let commit_txs = swapper.commit(&created.id).await.unwrap();
    assert_eq!(commit_txs.len(), 1);

    // Chain confirms the commit; the reconciliation loop's event_task would call
    // exactly this same `state_machine::apply_event` + `store.save` pair.
    let escrow_hash = swap.escrow_hash().unwrap();
    let event = ChainEvent::Initialize {
        escrow_hash,
        data: None,
        tx_id: "0xcommit".into(),
    };
    let outcome = state_machine::apply_event(&mut swap, &event);
    assert!(outcome.state_changed);
    swapper.store().save(&swap).await.unwrap();

    let claimable = swapper.get_claimable_swaps(None, None).await.unwrap();
    assert_eq!(claimable.len(), 1);
    assert_eq!(claimable[0].id, created.id);

    // S5: replaying the identical Initialize event must not change anything.
    let before = swapper.get_swap_by_id(&created.id, None, None).await.unwrap();
    let outcome = state_machine::apply_event(&mut swap, &event);
    assert!(!outcome.state_changed);
    swapper.store().save(&swap).await.unwrap();
    let after = swapper.get_swap_by_id(&created.id, None, None).await.unwrap();
    assert_eq!(
        serde_json::to_string(&before).unwrap(),
        serde_json::to_string(&after).unwrap()
    );

    // Now the user claims with the revealed preimage.
    let claim_txs = swapper.claim(&created.id).await.unwrap();
    assert_eq!(claim_txs.len(), 1);

    let claim_event = ChainEvent::Claim {
        escrow_hash,
        secret: swap.preimage_secret,
        tx_id: "0xclaim".into(),
    };
    let outcome = state_machine::apply_event(&mut swap, &claim_event);
    assert!(outcome.state_changed);
    swapper.store().save(&swap).await.unwrap();

    let finished = swapper.get_swap_by_id(&created.id, None, None).await.unwrap();
    assert_eq!(finished.state, SwapState::FromBtc(FromBtcPositive::ClaimClaimed));
    assert!(swapper.get_actionable_swaps(None, None).await.unwrap().is_empty());
}

/// S6: a swap that missed its chain events entirely (e.g. the process was
/// offline) is brought back in line by T3 batched deep-sync once the chain
/// adapter reports the escrow as paid.
#[tokio::test]
async fn deep_sync_recovers_a_swap_the_event_stream_missed() {
    let swapper = build_swapper().await;
    let cancel = swaplink_core::cancel::CancelToken::new();

    let created = swapper
        .create(SwapType::FromBtcLn, CHAIN_ID, token(), 100_000, true, "0xuser", &cancel)
        .await
        .unwrap();
    let mut swap = swapper.get_swap_by_id(&created.id, None, None).await.unwrap();
    let config = swaplink_core::config::EngineConfig::default();
    let oracle = FixedPriceOracle::new(1_005_000);
    let contract_for_auth = StubContract::new();
    let verifier = QuoteVerifier::new(&config, &oracle, &contract_for_auth);
    let status = PaymentStatus::AuthData {
        data: swap.initial_swap_data.clone().unwrap(),
        prefix: "lp-prefix".into(),
        timeout: 600,
        signature: GOOD_SIG.into(),
    };
    state_machine::apply_payment_status(&mut swap, &status, &verifier)
        .await
        .unwrap();
    assert_eq!(swap.state, SwapState::FromBtc(FromBtcPositive::PrPaid));
    swapper.store().save(&swap).await.unwrap();

    let escrow_hash = swap.escrow_hash().unwrap();

    // `get_commit_statuses` is keyed by `escrow_hash` (the canonical hash
    // `deep_sync` correlates against, per `reconciliation.rs`), not `claim_hash`.
    let contract = StubContract::new();
    contract.commit_statuses.lock().unwrap().insert(
        escrow_hash,
        CommitStatus::Paid {
            secret: swap.preimage_secret,
            claim_tx_id: "0xclaim-recovered".into(),
        },
    );

    let changed = ReconciliationLoop::deep_sync(CHAIN_ID, swapper.store(), &contract)
        .await
        .unwrap();
    assert_eq!(changed, 1);

    let recovered = swapper.get_swap_by_id(&created.id, None, None).await.unwrap();
    assert_eq!(recovered.state, SwapState::FromBtc(FromBtcPositive::ClaimClaimed));
    assert_eq!(recovered.claim_tx_id.as_deref(), Some("0xclaim-recovered"));
    assert_eq!(recovered.escrow_hash(), Some(escrow_hash));

    // A second deep-sync pass with the same status must not report a change.
    let changed_again = ReconciliationLoop::deep_sync(CHAIN_ID, swapper.store(), &contract)
        .await
        .unwrap();
    assert_eq!(changed_again, 0);
}

/// `get_swap_by_id` surfaces a typed not-found error rather than panicking.
#[tokio::test]
async fn unknown_swap_id_is_a_user_facing_not_found_error() {
    let swapper = build_swapper().await;
    let missing = swaplink_core::types::SwapId("does-not-exist".to_string());
    let err = swapper.get_swap_by_id(&missing, None, None).await.unwrap_err();
    assert!(matches!(err, Error::SwapNotFound(_)));
}

/// `get_actionable_swaps` stays consistent with the store's `NonTerminal`
/// index once a swap has progressed past quote expiry without ever being
/// committed.
#[tokio::test]
async fn quote_expired_swap_is_not_actionable() {
    let swapper = build_swapper().await;
    let cancel = swaplink_core::cancel::CancelToken::new();

    let created = swapper
        .create(SwapType::FromBtcLn, CHAIN_ID, token(), 100_000, true, "0xuser", &cancel)
        .await
        .unwrap();

    let mut swap = swapper.get_swap_by_id(&created.id, None, None).await.unwrap();
    swap.state = SwapState::Negative(swaplink_core::types::NegativeState::QuoteExpired);
    swapper.store().save(&swap).await.unwrap();

    let all_non_terminal = swapper
        .store()
        .query(Query::new().and(IndexMatch::NonTerminal))
        .await
        .unwrap();
    assert!(all_non_terminal.is_empty());
    assert!(swapper.get_actionable_swaps(None, None).await.unwrap().is_empty());
}

fn _assert_send_sync<T: Send + Sync>() {}

#[test]
fn swapper_of_memory_backends_is_send_sync() {
    _assert_send_sync::<Swapper<MemorySwapStore, LocalWalletStorage>>();
}

/// `swap()` sniffs `FROM_BTCLN` from a `BtcLightning` source token and a
/// non-LNURL destination address, then delegates to the same `create` path
/// exercised above.
#[tokio::test]
async fn swap_helper_infers_from_btcln_and_creates_the_swap() {
    let swapper = build_swapper().await;
    let cancel = swaplink_core::cancel::CancelToken::new();

    let swap = swapper
        .swap(Token::BtcLightning, token(), 100_000, true, "0xuser", &cancel)
        .await
        .unwrap();

    assert_eq!(swap.swap_type, SwapType::FromBtcLn);
    assert_eq!(swap.state, SwapState::FromBtc(FromBtcPositive::PrCreated));
    assert_eq!(swap.chain_id, CHAIN_ID);
}

/// `get_all_swaps`/`get_swap_by_id` scoped to a chain or signer that does not
/// own the record behave as if it were absent.
#[tokio::test]
async fn scoped_queries_respect_chain_and_signer_filters() {
    let swapper = build_swapper().await;
    let cancel = swaplink_core::cancel::CancelToken::new();

    let created = swapper
        .create(SwapType::FromBtcLn, CHAIN_ID, token(), 100_000, true, "0xuser", &cancel)
        .await
        .unwrap();

    assert_eq!(swapper.get_all_swaps(Some(CHAIN_ID), None).await.unwrap().len(), 1);
    assert!(swapper.get_all_swaps(Some("ethereum"), None).await.unwrap().is_empty());
    assert!(swapper
        .get_all_swaps(None, Some("0xsomeoneelse"))
        .await
        .unwrap()
        .is_empty());

    assert!(swapper
        .get_swap_by_id(&created.id, Some("ethereum"), None)
        .await
        .is_err());
    assert!(swapper
        .get_swap_by_id(&created.id, Some(CHAIN_ID), Some("0xuser"))
        .await
        .is_ok());
}
