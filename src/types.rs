//! Shared data model for the swap lifecycle engine (§3 of the design).

use bitcoin::secp256k1::{PublicKey, SecretKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

/// Serde module for serializing `[u8; 32]` as hex strings.
pub mod hex_bytes32 {
    use super::*;

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

/// Serde module for 64-bit amounts, carried as decimal strings on the wire so they
/// survive environments without native 64-bit integers (§6 persistence layout).
pub mod string_amount {
    use super::*;

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Bitcoin network type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Bitcoin mainnet.
    Bitcoin,
    /// Bitcoin testnet.
    Testnet,
    /// Bitcoin regtest (local development).
    Regtest,
    /// Mutinynet (signet).
    Mutinynet,
}

impl Network {
    /// Convert to bitcoin crate's Network type.
    pub fn to_bitcoin_network(self) -> bitcoin::Network {
        match self {
            Network::Bitcoin => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Regtest => bitcoin::Network::Regtest,
            Network::Mutinynet => bitcoin::Network::Signet,
        }
    }
}

impl std::str::FromStr for Network {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bitcoin" | "mainnet" => Ok(Network::Bitcoin),
            "testnet" | "testnet3" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            "mutinynet" | "signet" => Ok(Network::Mutinynet),
            _ => Err(crate::error::Error::Parse(format!(
                "unknown network: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Bitcoin => write!(f, "bitcoin"),
            Network::Testnet => write!(f, "testnet"),
            Network::Regtest => write!(f, "regtest"),
            Network::Mutinynet => write!(f, "mutinynet"),
        }
    }
}

/// Parameters derived for a single swap's secret/keypair (HD-derived, see `hd_wallet`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapParams {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
    #[serde(with = "hex_bytes32")]
    pub preimage: [u8; 32],
    #[serde(with = "hex_bytes32")]
    pub preimage_hash: [u8; 32],
    pub user_id: PublicKey,
    pub key_index: u32,
}

/// Spendable/spent/recoverable accounting for an escrow, as reported by a chain
/// adapter (e.g. after an `SPV_VAULT_FROM_BTC` deposit, or a VHTLC-shaped escrow).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowAmounts {
    /// Amount that can still be spent (in satoshis).
    pub spendable: u64,
    /// Amount already spent (in satoshis).
    pub spent: u64,
    /// Amount that can be recovered via refund (in satoshis).
    pub recoverable: u64,
}

/// The seven swap protocols this engine drives, per the GLOSSARY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapType {
    FromBtc,
    FromBtcLn,
    FromBtcLnAuto,
    ToBtc,
    ToBtcLn,
    TrustedFromBtc,
    TrustedFromBtcLn,
    SpvVaultFromBtc,
}

impl SwapType {
    /// Whether this protocol settles through an on-chain escrow at all, as opposed
    /// to a trusted LP-fronted transfer (`TRUSTED_*`).
    pub fn has_escrow(self) -> bool {
        !matches!(self, SwapType::TrustedFromBtc | SwapType::TrustedFromBtcLn)
    }

    /// Whether bitcoin is the input side of the swap (`FROM_*`) as opposed to the
    /// output side (`TO_*`).
    pub fn is_from_btc(self) -> bool {
        matches!(
            self,
            SwapType::FromBtc
                | SwapType::FromBtcLn
                | SwapType::FromBtcLnAuto
                | SwapType::TrustedFromBtc
                | SwapType::TrustedFromBtcLn
                | SwapType::SpvVaultFromBtc
        )
    }

    /// Whether an LP-initiated on-chain init event (rather than a user `commit`
    /// call) is what drives this protocol's commit transition (§4.4.3).
    pub fn is_watchtower_settled(self) -> bool {
        matches!(self, SwapType::FromBtcLnAuto)
    }

    /// Which [`StateFamily`] this protocol's positive states belong to (§4.4.1).
    pub fn state_family(self) -> StateFamily {
        match self {
            SwapType::FromBtc
            | SwapType::FromBtcLn
            | SwapType::FromBtcLnAuto
            | SwapType::SpvVaultFromBtc => StateFamily::FromBtc,
            SwapType::ToBtc | SwapType::ToBtcLn => StateFamily::ToBtc,
            SwapType::TrustedFromBtc | SwapType::TrustedFromBtcLn => StateFamily::Trusted,
        }
    }
}

/// Which positive-state enum a [`SwapType`] uses (§4.4.1 shared shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFamily {
    FromBtc,
    ToBtc,
    Trusted,
}

impl std::fmt::Display for SwapType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SwapType::FromBtc => "FROM_BTC",
            SwapType::FromBtcLn => "FROM_BTCLN",
            SwapType::FromBtcLnAuto => "FROM_BTCLN_AUTO",
            SwapType::ToBtc => "TO_BTC",
            SwapType::ToBtcLn => "TO_BTCLN",
            SwapType::TrustedFromBtc => "TRUSTED_FROM_BTC",
            SwapType::TrustedFromBtcLn => "TRUSTED_FROM_BTCLN",
            SwapType::SpvVaultFromBtc => "SPV_VAULT_FROM_BTC",
        };
        write!(f, "{s}")
    }
}

/// Identifies a token on a chain (or Bitcoin itself, on- or off-chain).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Token {
    /// Bitcoin on-chain.
    Btc,
    /// Bitcoin over Lightning.
    BtcLightning,
    /// A token on a specific smart chain.
    Chain {
        chain_id: String,
        address: String,
        decimals: u8,
    },
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Btc => write!(f, "btc"),
            Token::BtcLightning => write!(f, "btc_lightning"),
            Token::Chain {
                chain_id, address, ..
            } => write!(f, "{chain_id}:{address}"),
        }
    }
}

/// An `{token, raw_amount}` pair, as used for a swap's input and output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmountSpec {
    pub token: Token,
    #[serde(with = "string_amount")]
    pub raw_amount: u64,
}

/// Fee breakdown attached to a swap, per §3.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fees {
    pub swap_fee_sats: u64,
    pub network_fee_sats: u64,
    pub gas_swap_fee_sats: Option<u64>,
    pub watchtower_bounty_sats: Option<u64>,
}

impl Fees {
    pub fn total_sats(&self) -> u64 {
        self.swap_fee_sats + self.network_fee_sats + self.gas_swap_fee_sats.unwrap_or(0)
    }
}

/// Pricing data attached to a swap at quote time, re-checked against the oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingInfo {
    pub base_fee_sats: u64,
    pub fee_ppm: u64,
    pub quoted_usat_per_token: u64,
    pub observed_usat_per_token: Option<u64>,
    pub valid: bool,
    pub usd_per_btc_at_quote: Option<rust_decimal::Decimal>,
}

/// Chain-native representation of an escrow/HTLC (§3 `swap_data`).
///
/// Fields the verifier and state machines inspect directly are typed; anything
/// genuinely chain-specific that the engine never inspects travels in `extra` as an
/// opaque payload (Design Notes: opaque byte payloads for untyped chain fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowData {
    pub offerer: String,
    pub claimer: String,
    pub token: Token,
    #[serde(with = "string_amount")]
    pub amount: u64,
    #[serde(with = "hex_bytes32")]
    pub claim_hash: [u8; 32],
    pub sequence: u64,
    pub expiry: u64,
    /// Chain-specific construction parameters the engine passes through unmodified
    /// (e.g. script-level deposit/bounty fields) but never inspects.
    pub extra: HashMap<String, serde_json::Value>,
}

/// An `AUTH_DATA` authorization bundle returned by an LP once it has observed
/// payment, per §4.4.2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureBundle {
    pub prefix: String,
    pub timeout: u64,
    pub signature: String,
}

/// LNURL withdraw/pay bookkeeping (§3 `lnurl_state`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LnurlState {
    pub lnurl: String,
    pub k1: String,
    pub callback: String,
    pub posted: bool,
}

/// Content-addressed swap identifier (§6 "Swap identifier"): either `claim_hash` or
/// `payment_hash` depending on the protocol, optionally suffixed with a random
/// nonce to disambiguate re-creations of an otherwise-identical swap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SwapId(pub String);

impl SwapId {
    /// Derive an id from a correlator hash plus an optional disambiguating nonce
    /// (0-8 random bytes, per §6).
    pub fn derive(correlator: &[u8; 32], nonce: &[u8]) -> Self {
        if nonce.is_empty() {
            SwapId(hex::encode(correlator))
        } else {
            SwapId(format!("{}:{}", hex::encode(correlator), hex::encode(nonce)))
        }
    }
}

impl std::fmt::Display for SwapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for SwapId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

/// The shared negative axis every protocol's state enum embeds (§4.4.1).
///
/// Ordered `Failed < QuoteExpired < QuoteSoftExpired < Expired` as in the design,
/// all strictly below every protocol's positive states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegativeState {
    /// Terminal: funds recovered via refund, or the swap never got on-chain.
    Failed,
    /// Terminal: the quote is definitively gone and the swap is removable.
    QuoteExpired,
    /// Quote past its soft deadline but still possibly honorable.
    QuoteSoftExpired,
    /// The on-chain escrow (not the quote) passed its deadline; refund window open.
    Expired,
}

impl NegativeState {
    pub fn ordinal(self) -> i8 {
        match self {
            NegativeState::Failed => -4,
            NegativeState::QuoteExpired => -3,
            NegativeState::QuoteSoftExpired => -2,
            NegativeState::Expired => -1,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NegativeState::Failed | NegativeState::QuoteExpired)
    }
}

/// Positive states shared by every escrow-funded-from-Bitcoin protocol:
/// `FROM_BTC`, `FROM_BTCLN`, `FROM_BTCLN_AUTO`, `SPV_VAULT_FROM_BTC` (§4.4.2-§4.4.4).
///
/// `PrCreated`/`PrPaid` read literally for the Lightning flavors; for `FROM_BTC`
/// and `SPV_VAULT_FROM_BTC` the same two slots stand in for "deposit address
/// issued" and "Bitcoin payment observed" respectively — the skeleton is shared
/// even though the "payment" is an on-chain tx rather than a bolt11 invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FromBtcPositive {
    PrCreated,
    PrPaid,
    ClaimCommited,
    ClaimClaimed,
}

impl FromBtcPositive {
    pub fn ordinal(self) -> i8 {
        match self {
            FromBtcPositive::PrCreated => 0,
            FromBtcPositive::PrPaid => 1,
            FromBtcPositive::ClaimCommited => 2,
            FromBtcPositive::ClaimClaimed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FromBtcPositive::ClaimClaimed)
    }
}

/// Positive states shared by `TO_BTC` and `TO_BTCLN` (§4.4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToBtcPositive {
    Created,
    Commited,
    SoftClaimed,
    Claimed,
    /// Branch off `Commited`/`SoftClaimed` once the LP's output deadline passed
    /// without a claim being observed.
    Refundable,
    Refunded,
}

impl ToBtcPositive {
    pub fn ordinal(self) -> i8 {
        match self {
            ToBtcPositive::Created => 0,
            ToBtcPositive::Commited => 1,
            ToBtcPositive::SoftClaimed => 2,
            ToBtcPositive::Claimed => 3,
            ToBtcPositive::Refundable => 4,
            ToBtcPositive::Refunded => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ToBtcPositive::Claimed | ToBtcPositive::Refunded)
    }
}

/// Positive states for `TRUSTED_FROM_BTC` / `TRUSTED_FROM_BTCLN` (§4.4.5b
/// expansion): no escrow, so no commit/claim pair, just LP-asserted delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustedPositive {
    Created,
    Received,
    Settled,
}

impl TrustedPositive {
    pub fn ordinal(self) -> i8 {
        match self {
            TrustedPositive::Created => 0,
            TrustedPositive::Received => 1,
            TrustedPositive::Settled => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TrustedPositive::Settled)
    }
}

/// A swap's state, embedding the shared negative axis plus the positive states of
/// whichever protocol family owns it (§4.4.1). Which `Positive` variant is legal
/// for a given [`SwapType`] is fixed by [`SwapType::state_family`] and enforced by
/// the state machine (`crate::state_machine`), not by this type itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", content = "state")]
pub enum SwapState {
    Negative(NegativeState),
    FromBtc(FromBtcPositive),
    ToBtc(ToBtcPositive),
    Trusted(TrustedPositive),
}

impl SwapState {
    pub fn ordinal(self) -> i8 {
        match self {
            SwapState::Negative(s) => s.ordinal(),
            SwapState::FromBtc(s) => s.ordinal(),
            SwapState::ToBtc(s) => s.ordinal(),
            SwapState::Trusted(s) => s.ordinal(),
        }
    }

    /// Terminal states are write-once (§3 Lifecycle); no transition may originate
    /// from one (P2 Monotone states).
    pub fn is_terminal(self) -> bool {
        match self {
            SwapState::Negative(s) => s.is_terminal(),
            SwapState::FromBtc(s) => s.is_terminal(),
            SwapState::ToBtc(s) => s.is_terminal(),
            SwapState::Trusted(s) => s.is_terminal(),
        }
    }

    pub fn is_negative(self) -> bool {
        matches!(self, SwapState::Negative(_))
    }

    /// The initial state a freshly created swap of `family` starts in.
    pub fn initial(family: StateFamily) -> Self {
        match family {
            StateFamily::FromBtc => SwapState::FromBtc(FromBtcPositive::PrCreated),
            StateFamily::ToBtc => SwapState::ToBtc(ToBtcPositive::Created),
            StateFamily::Trusted => SwapState::Trusted(TrustedPositive::Created),
        }
    }
}

/// The central entity (§3). Mutated only by the owning state machine
/// (`crate::state_machine`) in response to a user action, a periodic tick, or a
/// chain event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Swap {
    pub id: SwapId,
    #[serde(rename = "type")]
    pub swap_type: SwapType,
    pub state: SwapState,
    pub chain_id: String,
    /// The LP this swap was created against, so the reconciliation loop's
    /// payment-authorization poll (§4.4.2, §4.4.5b) knows which LP to ask.
    pub lp_url: String,
    pub initiator_address: String,
    pub input: AmountSpec,
    pub output: AmountSpec,
    /// The LP-proposed escrow data before any on-chain event confirms it.
    pub initial_swap_data: Option<EscrowData>,
    /// Real, on-chain-confirmed escrow data. Replaces `initial_swap_data` once an
    /// `Initialize` event is observed (§3 `swap_data`).
    pub swap_data: Option<EscrowData>,
    pub fees: Fees,
    pub pricing_info: PricingInfo,
    #[serde(default, with = "hex_bytes32_opt")]
    pub preimage_secret: Option<[u8; 32]>,
    #[serde(default, with = "hex_bytes32_opt")]
    pub payment_hash: Option<[u8; 32]>,
    pub payment_request: Option<String>,
    pub lnurl_state: Option<LnurlState>,
    pub signature_bundle: Option<SignatureBundle>,
    pub created_at: u64,
    pub quote_expiry: u64,
    /// Softer deadline reached before `quote_expiry` (§4.4.6 tick rules).
    pub quote_expiry_soft: u64,
    pub htlc_expiry: Option<u64>,
    pub committed_at: Option<u64>,
    pub commit_tx_id: Option<String>,
    pub claim_tx_id: Option<String>,
    pub refund_tx_id: Option<String>,
    /// Count of ticks observed while sitting in a secret-broadcasting state
    /// (`FROM_BTCLN_AUTO` `CLAIM_COMMITED`), used to re-broadcast every Nth tick.
    #[serde(default)]
    pub ticks_in_state: u32,
}

impl Swap {
    /// `escrow_hash` is the hash over the canonicalized `swap_data` (§3), used as
    /// the primary correlator against chain events. `None` before any escrow data
    /// (proposed or real) is known.
    pub fn escrow_hash(&self) -> Option<[u8; 32]> {
        let data = self.swap_data.as_ref().or(self.initial_swap_data.as_ref())?;
        Some(canonical_escrow_hash(data))
    }
}

/// Canonical hash of an [`EscrowData`], used as `escrow_hash` (§3).
pub fn canonical_escrow_hash(data: &EscrowData) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    // Canonicalize via serde_json's sorted-map serialization of a stable subset of
    // fields; `extra` is excluded since the engine never inspects it and chain
    // adapters may populate it with non-canonical ordering.
    let canonical = serde_json::json!({
        "offerer": data.offerer,
        "claimer": data.claimer,
        "token": data.token,
        "amount": data.amount,
        "claim_hash": hex::encode(data.claim_hash),
        "sequence": data.sequence,
        "expiry": data.expiry,
    });
    let bytes = serde_json::to_vec(&canonical).expect("canonical escrow json never fails");
    Sha256::digest(&bytes).into()
}

/// Like [`hex_bytes32`] but for `Option<[u8; 32]>`.
pub mod hex_bytes32_opt {
    use super::*;

    pub fn serialize<S>(value: &Option<[u8; 32]>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<[u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt = Option::<String>::deserialize(deserializer)?;
        match opt {
            None => Ok(None),
            Some(s) => {
                let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
                Ok(Some(arr))
            }
        }
    }
}

/// Per-swap-type service bounds and pricing advertised by an intermediary (§3
/// `services[swap_type]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOffer {
    pub swap_fee_ppm: u64,
    pub swap_base_fee_sats: u64,
    pub min_sats: u64,
    pub max_sats: u64,
    pub chain_tokens: HashMap<String, Vec<Token>>,
}

/// A liquidity provider, discovered and verified by `crate::registry` (§3
/// "Intermediary (LP)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intermediary {
    pub url: String,
    /// Per-chain address, populated only for chains whose signature verified.
    pub addresses: HashMap<String, String>,
    pub services: HashMap<SwapType, ServiceOffer>,
    pub reputation: Option<f64>,
    pub liquidity: Option<u64>,
}

impl Intermediary {
    pub fn address(&self, chain_id: &str) -> Option<&str> {
        self.addresses.get(chain_id).map(String::as_str)
    }

    pub fn offers(&self, swap_type: SwapType, chain_id: &str, token: &Token) -> bool {
        self.addresses.contains_key(chain_id)
            && self
                .services
                .get(&swap_type)
                .map(|offer| {
                    offer
                        .chain_tokens
                        .get(chain_id)
                        .is_some_and(|tokens| tokens.contains(token))
                })
                .unwrap_or(false)
    }
}
