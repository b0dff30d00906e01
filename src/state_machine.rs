//! State variable + transitions, hosting every protocol's rules (§4.4 C6).
//!
//! This is the dominant component of the engine. Rather than the teacher's
//! (JavaScript) "abstract base class" wrapper hierarchy, transitions are free
//! functions over the typed `Swap` record (§9 Design Notes: capability
//! composition over inheritance) — `tick`, `apply_event`, `commit`, `claim`,
//! `refund` all take `&mut Swap` plus whatever collaborator they need and return
//! whether anything changed, so the caller (the reconciliation loop or the
//! façade) knows whether to persist.

use crate::config::EngineConfig;
use crate::contract::{ChainEvent, CommitStatus, Contract, UnsignedTx};
use crate::error::{Error, Result};
use crate::htlc;
use crate::lp_client::PaymentStatus;
use crate::types::{
    FromBtcPositive, NegativeState, StateFamily, Swap, SwapState, ToBtcPositive, TrustedPositive,
};
use crate::verifier::QuoteVerifier;

/// What changed after a `tick()` or `apply_event()` call, so the reconciliation
/// loop (§4.5) knows whether to persist and whether to kick the messenger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outcome {
    pub state_changed: bool,
    /// `FROM_BTCLN_AUTO` only: the secret should be (re-)broadcast this round
    /// (§4.4.3, §4.4.6).
    pub rebroadcast_secret: bool,
}

impl Outcome {
    fn changed() -> Self {
        Self {
            state_changed: true,
            rebroadcast_secret: false,
        }
    }
    fn none() -> Self {
        Self::default()
    }
}

/// Whether `swap` is still in the window before any on-chain commit is observed,
/// i.e. still fair game for quote-expiry transitions (§4.4.6 "early positive").
fn is_pre_commit(swap: &Swap) -> bool {
    match swap.state {
        SwapState::Negative(NegativeState::QuoteSoftExpired) => true,
        SwapState::FromBtc(FromBtcPositive::PrCreated | FromBtcPositive::PrPaid) => true,
        SwapState::ToBtc(ToBtcPositive::Created) => true,
        SwapState::Trusted(TrustedPositive::Created) => true,
        _ => false,
    }
}

/// Whether `swap` sits in the post-commit, pre-claim window where an htlc expiry
/// should force it to `EXPIRED`/`REFUNDABLE` (§4.4.6).
fn is_committed_awaiting_claim(swap: &Swap) -> bool {
    matches!(
        swap.state,
        SwapState::FromBtc(FromBtcPositive::PrPaid | FromBtcPositive::ClaimCommited)
            | SwapState::ToBtc(ToBtcPositive::Commited | ToBtcPositive::SoftClaimed)
    )
}

/// Per-tick rules (§4.4.6), evaluated for every non-terminal swap on the
/// reconciliation loop's T1 schedule.
pub fn tick(swap: &mut Swap, now_secs: u64, config: &EngineConfig) -> Outcome {
    if swap.state.is_terminal() {
        return Outcome::none();
    }

    if is_pre_commit(swap) && !matches!(swap.state, SwapState::Negative(_)) {
        if now_secs > swap.quote_expiry_soft {
            swap.state = SwapState::Negative(NegativeState::QuoteSoftExpired);
            return Outcome::changed();
        }
    }

    if matches!(swap.state, SwapState::Negative(NegativeState::QuoteSoftExpired))
        && now_secs > swap.quote_expiry
    {
        swap.state = SwapState::Negative(NegativeState::QuoteExpired);
        return Outcome::changed();
    }

    if let Some(htlc_expiry) = swap.htlc_expiry {
        if now_secs > htlc_expiry && is_committed_awaiting_claim(swap) {
            match swap.swap_type.state_family() {
                StateFamily::FromBtc => {
                    swap.state = SwapState::Negative(NegativeState::Expired);
                }
                StateFamily::ToBtc => {
                    swap.state = SwapState::ToBtc(ToBtcPositive::Refundable);
                }
                StateFamily::Trusted => {}
            }
            return Outcome::changed();
        }
    }

    if swap.swap_type.is_watchtower_settled()
        && matches!(swap.state, SwapState::FromBtc(FromBtcPositive::ClaimCommited))
        && swap.preimage_secret.is_some()
    {
        swap.ticks_in_state += 1;
        if swap.ticks_in_state % config.secret_rebroadcast_every_n_ticks.max(1) == 0 {
            return Outcome {
                state_changed: false,
                rebroadcast_secret: true,
            };
        }
    }

    Outcome::none()
}

/// Apply an `Initialize` chain event (§4.4.7). Idempotent (P3): replaying the
/// same event a second time leaves the swap byte-identical.
pub fn apply_initialize(swap: &mut Swap, event: &ChainEvent) -> Outcome {
    let ChainEvent::Initialize { escrow_hash, data, tx_id } = event else {
        return Outcome::none();
    };
    if swap.state.is_terminal() {
        return Outcome::none();
    }
    if swap.commit_tx_id.as_deref() == Some(tx_id.as_str()) {
        return Outcome::none(); // already applied
    }
    let known_hash = swap.escrow_hash();
    if let Some(known) = known_hash {
        if known != *escrow_hash {
            return Outcome::none(); // belongs to a different escrow
        }
    }

    let pre_commit_positive = matches!(
        swap.state,
        SwapState::FromBtc(FromBtcPositive::PrCreated | FromBtcPositive::PrPaid)
            | SwapState::ToBtc(ToBtcPositive::Created)
    );
    if !pre_commit_positive {
        return Outcome::none();
    }

    if swap.swap_data.is_none() {
        if let Some(data) = data {
            swap.swap_data = Some(data.clone());
        } else if let Some(initial) = swap.initial_swap_data.clone() {
            swap.swap_data = Some(initial);
        }
    }
    swap.commit_tx_id = Some(tx_id.clone());

    swap.state = match swap.swap_type.state_family() {
        StateFamily::FromBtc => SwapState::FromBtc(FromBtcPositive::ClaimCommited),
        StateFamily::ToBtc => SwapState::ToBtc(ToBtcPositive::Commited),
        StateFamily::Trusted => swap.state, // trusted protocols have no escrow events
    };
    Outcome::changed()
}

/// Apply a `Claim` chain event (§4.4.7). Idempotent (P3).
pub fn apply_claim(swap: &mut Swap, event: &ChainEvent) -> Outcome {
    let ChainEvent::Claim { escrow_hash, secret, tx_id } = event else {
        return Outcome::none();
    };
    if matches!(
        swap.state,
        SwapState::FromBtc(FromBtcPositive::ClaimClaimed)
            | SwapState::ToBtc(ToBtcPositive::Claimed)
            | SwapState::Negative(NegativeState::Failed)
            | SwapState::ToBtc(ToBtcPositive::Refunded)
    ) {
        return Outcome::none(); // terminal or contradicting state already reached
    }
    if swap.claim_tx_id.as_deref() == Some(tx_id.as_str()) {
        return Outcome::none();
    }
    if let Some(known) = swap.escrow_hash() {
        if known != *escrow_hash {
            return Outcome::none();
        }
    }

    swap.claim_tx_id = Some(tx_id.clone());
    if let Some(secret) = secret {
        if swap.preimage_secret.is_none() {
            swap.preimage_secret = Some(*secret);
        }
    }
    swap.state = match swap.swap_type.state_family() {
        StateFamily::FromBtc => SwapState::FromBtc(FromBtcPositive::ClaimClaimed),
        StateFamily::ToBtc => SwapState::ToBtc(ToBtcPositive::Claimed),
        StateFamily::Trusted => swap.state,
    };
    Outcome::changed()
}

/// Apply a `Refund` chain event (§4.4.7). Idempotent (P3).
pub fn apply_refund(swap: &mut Swap, event: &ChainEvent) -> Outcome {
    let ChainEvent::Refund { escrow_hash, tx_id } = event else {
        return Outcome::none();
    };
    if matches!(
        swap.state,
        SwapState::FromBtc(FromBtcPositive::ClaimClaimed) | SwapState::ToBtc(ToBtcPositive::Claimed)
    ) {
        return Outcome::none(); // already claimed, refund cannot retroactively apply
    }
    if swap.refund_tx_id.as_deref() == Some(tx_id.as_str()) {
        return Outcome::none();
    }
    if let Some(known) = swap.escrow_hash() {
        if known != *escrow_hash {
            return Outcome::none();
        }
    }

    swap.refund_tx_id = Some(tx_id.clone());
    swap.state = match swap.swap_type.state_family() {
        StateFamily::FromBtc => SwapState::Negative(NegativeState::Failed),
        StateFamily::ToBtc => SwapState::ToBtc(ToBtcPositive::Refunded),
        StateFamily::Trusted => swap.state,
    };
    Outcome::changed()
}

/// Dispatch any chain event to the right handler (§4.4.7).
pub fn apply_event(swap: &mut Swap, event: &ChainEvent) -> Outcome {
    match event {
        ChainEvent::Initialize { .. } => apply_initialize(swap, event),
        ChainEvent::Claim { .. } => apply_claim(swap, event),
        ChainEvent::Refund { .. } => apply_refund(swap, event),
    }
}

/// Apply an LP poll response from `get_payment_authorization` (escrow-backed
/// protocols) or `get_invoice_status` (trusted protocols), driving
/// `PR_CREATED -> PR_PAID` and `CREATED -> RECEIVED -> SETTLED` (§4.4.2,
/// §4.4.5b). Run by the reconciliation loop's T4 poll task on
/// `EngineConfig::check_interval`.
pub async fn apply_payment_status(
    swap: &mut Swap,
    status: &PaymentStatus,
    verifier: &QuoteVerifier<'_>,
) -> Result<Outcome> {
    if swap.state.is_terminal() {
        return Ok(Outcome::none());
    }
    match swap.swap_type.state_family() {
        StateFamily::FromBtc => apply_from_btc_payment_status(swap, status, verifier).await,
        StateFamily::Trusted => Ok(apply_trusted_payment_status(swap, status)),
        StateFamily::ToBtc => Ok(Outcome::none()),
    }
}

async fn apply_from_btc_payment_status(
    swap: &mut Swap,
    status: &PaymentStatus,
    verifier: &QuoteVerifier<'_>,
) -> Result<Outcome> {
    if !matches!(swap.state, SwapState::FromBtc(FromBtcPositive::PrCreated)) {
        return Ok(Outcome::none());
    }
    match status {
        PaymentStatus::AuthData { data, prefix, timeout, signature } => {
            verifier
                .verify_auth_data(
                    &swap.initiator_address,
                    swap.initial_swap_data.as_ref(),
                    data,
                    signature,
                )
                .await?;
            swap.initial_swap_data = Some(data.clone());
            swap.signature_bundle = Some(crate::types::SignatureBundle {
                prefix: prefix.clone(),
                timeout: *timeout,
                signature: signature.clone(),
            });
            swap.state = SwapState::FromBtc(FromBtcPositive::PrPaid);
            Ok(Outcome::changed())
        }
        PaymentStatus::Expired => {
            swap.state = SwapState::Negative(NegativeState::QuoteExpired);
            Ok(Outcome::changed())
        }
        PaymentStatus::Pending | PaymentStatus::Paid | PaymentStatus::Received | PaymentStatus::Settled => {
            Ok(Outcome::none())
        }
    }
}

/// Trusted protocols have no escrow, so no signature to verify: `CREATED ->
/// RECEIVED -> SETTLED` is driven purely by what the LP reports (§4.4.5b).
fn apply_trusted_payment_status(swap: &mut Swap, status: &PaymentStatus) -> Outcome {
    match (swap.state, status) {
        (SwapState::Trusted(TrustedPositive::Created), PaymentStatus::Paid | PaymentStatus::Received) => {
            swap.state = SwapState::Trusted(TrustedPositive::Received);
            Outcome::changed()
        }
        (
            SwapState::Trusted(TrustedPositive::Created | TrustedPositive::Received),
            PaymentStatus::Settled,
        ) => {
            swap.state = SwapState::Trusted(TrustedPositive::Settled);
            Outcome::changed()
        }
        (SwapState::Trusted(TrustedPositive::Created), PaymentStatus::Expired) => {
            swap.state = SwapState::Negative(NegativeState::QuoteExpired);
            Outcome::changed()
        }
        _ => Outcome::none(),
    }
}

/// Force a swap's state to match an authoritative on-chain status (§4.5 T3 deep
/// sync). Used after long offline periods instead of replaying individual
/// events one at a time.
pub fn force_onchain_state(swap: &mut Swap, status: &CommitStatus) -> Outcome {
    if swap.state.is_terminal() {
        return Outcome::none();
    }
    match status {
        CommitStatus::NotCommitted => Outcome::none(),
        CommitStatus::Committed => {
            let target = match swap.swap_type.state_family() {
                StateFamily::FromBtc => SwapState::FromBtc(FromBtcPositive::ClaimCommited),
                StateFamily::ToBtc => SwapState::ToBtc(ToBtcPositive::Commited),
                StateFamily::Trusted => return Outcome::none(),
            };
            if swap.state == target {
                return Outcome::none();
            }
            swap.state = target;
            Outcome::changed()
        }
        CommitStatus::Paid { secret, claim_tx_id } => {
            if swap.claim_tx_id.as_deref() == Some(claim_tx_id.as_str()) {
                return Outcome::none();
            }
            swap.claim_tx_id = Some(claim_tx_id.clone());
            if let Some(secret) = secret {
                swap.preimage_secret.get_or_insert(*secret);
            }
            swap.state = match swap.swap_type.state_family() {
                StateFamily::FromBtc => SwapState::FromBtc(FromBtcPositive::ClaimClaimed),
                StateFamily::ToBtc => SwapState::ToBtc(ToBtcPositive::Claimed),
                StateFamily::Trusted => return Outcome::none(),
            };
            Outcome::changed()
        }
        CommitStatus::Expired { refund_tx_id } => {
            if swap.refund_tx_id == *refund_tx_id && refund_tx_id.is_some() {
                return Outcome::none();
            }
            swap.refund_tx_id = refund_tx_id.clone();
            swap.state = match swap.swap_type.state_family() {
                StateFamily::FromBtc => SwapState::Negative(NegativeState::Failed),
                StateFamily::ToBtc => SwapState::ToBtc(ToBtcPositive::Refunded),
                StateFamily::Trusted => return Outcome::none(),
            };
            Outcome::changed()
        }
    }
}

/// Build the unsigned commit transaction(s) for a `FROM_*`/`TO_*` escrow swap.
///
/// For `FROM_BTCLN`/`FROM_BTC` this is the user-broadcast init transaction funding
/// the escrow the LP will later claim from after the user's Bitcoin payment is
/// confirmed. For `TO_BTC`/`TO_BTCLN` this is the user-funded PrTLC/HTLC escrow
/// the LP will later claim by proving Bitcoin payment.
pub async fn commit(swap: &Swap, contract: &dyn Contract) -> Result<Vec<UnsignedTx>> {
    let ready = match swap.state {
        SwapState::FromBtc(FromBtcPositive::PrPaid) => true,
        SwapState::ToBtc(ToBtcPositive::Created) => true,
        _ => false,
    };
    if !ready {
        return Err(Error::UserError(format!(
            "cannot commit swap {} in state {:?}",
            swap.id, swap.state
        )));
    }
    let data = swap
        .swap_data
        .as_ref()
        .or(swap.initial_swap_data.as_ref())
        .ok_or_else(|| Error::UserError("no escrow data to commit".into()))?;
    contract.txs_commit(data).await
}

/// Build the unsigned claim-with-secret transaction for a `FROM_*` swap (§4.4.2).
///
/// P7 (secret reveal gating): this only succeeds from `CLAIM_COMMITED`, which is
/// only reached once an `Initialize` chain event confirmed the commit transaction
/// — so the claim transaction, and the preimage it reveals, can never be built
/// before the commit is confirmed.
pub async fn claim(swap: &Swap, contract: &dyn Contract, secret: &[u8; 32]) -> Result<Vec<UnsignedTx>> {
    if !matches!(swap.state, SwapState::FromBtc(FromBtcPositive::ClaimCommited)) {
        return Err(Error::UserError(format!(
            "cannot claim swap {} in state {:?}; commit must be confirmed first",
            swap.id, swap.state
        )));
    }
    let data = swap
        .swap_data
        .as_ref()
        .ok_or_else(|| Error::UserError("no confirmed escrow data to claim".into()))?;
    htlc::verify_preimage(
        |h| contract.get_hash_for_htlc(h),
        secret,
        &data.claim_hash,
    )?;
    contract.txs_claim_with_secret(data, secret).await
}

/// Build the unsigned refund transaction once a swap's escrow window has passed
/// (`EXPIRED` for `FROM_*`, `REFUNDABLE` for `TO_*`).
pub async fn refund(swap: &Swap, contract: &dyn Contract) -> Result<Vec<UnsignedTx>> {
    let ready = match swap.swap_type.state_family() {
        StateFamily::FromBtc => matches!(swap.state, SwapState::Negative(NegativeState::Expired)),
        StateFamily::ToBtc => matches!(swap.state, SwapState::ToBtc(ToBtcPositive::Refundable)),
        StateFamily::Trusted => false,
    };
    if !ready {
        return Err(Error::UserError(format!(
            "cannot refund swap {} in state {:?}",
            swap.id, swap.state
        )));
    }
    let data = swap
        .swap_data
        .as_ref()
        .or(swap.initial_swap_data.as_ref())
        .ok_or_else(|| Error::UserError("no escrow data to refund".into()))?;
    contract.txs_refund(data).await
}
