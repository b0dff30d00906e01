//! Typed request/response surface to a liquidity provider (§4.6 C4).
//!
//! Thin typed wrappers over HTTP, grounded directly in the teacher's `ApiClient`
//! (`reqwest::Client` + `get_json`/`post_json` helpers that deserialize a
//! structured error body on non-2xx) but generalized from one backend's bespoke
//! EVM/Arkade surface to the seven-protocol quote/poll/info surface named in §6.

use crate::error::{Error, Result};
use crate::types::{EscrowData, SwapType, Token};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

#[cfg(target_arch = "wasm32")]
pub type LpFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a>>;
#[cfg(not(target_arch = "wasm32"))]
pub type LpFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// `POST /init/<swap_type>` request body (§6 LP HTTP surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitRequest {
    pub swap_type: SwapType,
    pub amount: u64,
    pub token: Token,
    pub exact_in: bool,
    /// The smart-chain address that signs/receives funds for this swap.
    pub initiator_address: String,
    /// The hash of the locally-derived swap secret, set whenever `swap_type.has_escrow()`
    /// so the LP can build its escrow/invoice against this exact hashlock; `None` for
    /// `TRUSTED_*` protocols, which have no escrow to hash-lock.
    pub claim_hash: Option<[u8; 32]>,
    #[serde(default)]
    pub additional_params: HashMap<String, serde_json::Value>,
}

/// `POST /init/<swap_type>` response body (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitResponse {
    pub intermediary_key: String,
    pub total: u64,
    pub amount: u64,
    pub swap_fee: u64,
    pub network_fee: u64,
    pub gas_swap_fee: Option<u64>,
    pub btc_amount_gas: Option<u64>,
    pub btc_amount_swap: Option<u64>,
    /// Absent for `TRUSTED_*` protocols, which have no escrow (§4.4.5b).
    pub data: Option<EscrowData>,
    /// Bolt11 invoice, present for `*_BTCLN*` protocols.
    pub pr: Option<String>,
    pub signature: Option<String>,
    /// Opaque fee-rate blob, passed straight through to `Contract` calls.
    pub fee_rate: Option<String>,
}

/// `GET /payment-authorization` / `GET /invoice-status` response (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    AuthData {
        data: EscrowData,
        prefix: String,
        timeout: u64,
        signature: String,
    },
    Paid,
    /// Trusted-protocol interim signal (§4.4.5b): the LP has seen the
    /// Bitcoin-side payment but the destination-chain transfer hasn't landed
    /// yet. The escrow-backed protocols use `AuthData`/`Paid` instead.
    Received,
    /// Trusted-protocol terminal signal (§4.4.5b): the destination-chain
    /// transfer landed.
    Settled,
    Expired,
}

/// `GET /info` response (§6): a signed envelope plus per-chain attestations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    /// Opaque JSON whose fields include `services[type] -> ServiceOffer`; the
    /// registry verifies the signature over these exact bytes, so they are kept
    /// as a raw string rather than eagerly parsed.
    pub envelope: String,
    pub chains: HashMap<String, ChainAttestation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainAttestation {
    pub signature: String,
    pub address: String,
}

/// The `services` block inside a parsed envelope (§3 Intermediary, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeBody {
    pub services: HashMap<SwapType, crate::types::ServiceOffer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveredSwap {
    pub swap_type: SwapType,
    pub claim_hash: [u8; 32],
    pub data: Option<EscrowData>,
    pub payment_request: Option<String>,
}

/// Deserialized structured error body (§7 `RequestError`/`OutOfBoundsError`).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ApiErrorBody {
    OutOfBounds { min: u64, max: u64 },
    Error { message: String },
}

#[cfg(not(target_arch = "wasm32"))]
pub trait LPClient: Send + Sync {
    fn init_swap(&self, url: &str, request: &InitRequest) -> LpFuture<'_, InitResponse>;
    fn get_payment_authorization(&self, url: &str, payment_hash: &[u8; 32])
    -> LpFuture<'_, PaymentStatus>;
    fn get_invoice_status(&self, url: &str, payment_hash: &[u8; 32]) -> LpFuture<'_, PaymentStatus>;
    fn get_info(&self, url: &str) -> LpFuture<'_, InfoResponse>;
    fn recover_swaps(&self, url: &str, xpub: &str) -> LpFuture<'_, Vec<RecoveredSwap>>;
}

#[cfg(target_arch = "wasm32")]
pub trait LPClient {
    fn init_swap(&self, url: &str, request: &InitRequest) -> LpFuture<'_, InitResponse>;
    fn get_payment_authorization(&self, url: &str, payment_hash: &[u8; 32])
    -> LpFuture<'_, PaymentStatus>;
    fn get_invoice_status(&self, url: &str, payment_hash: &[u8; 32]) -> LpFuture<'_, PaymentStatus>;
    fn get_info(&self, url: &str) -> LpFuture<'_, InfoResponse>;
    fn recover_swaps(&self, url: &str, xpub: &str) -> LpFuture<'_, Vec<RecoveredSwap>>;
}

/// `reqwest`-backed [`LPClient`], mirroring the teacher's `ApiClient` shape.
#[derive(Debug, Clone)]
pub struct HttpLpClient {
    client: reqwest::Client,
}

impl HttpLpClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client config is always valid"),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("GET {url}: {e}")))?;
        Self::parse_response(url, response).await
    }

    async fn post_json<T: serde::de::DeserializeOwned, R: serde::Serialize>(
        &self,
        url: &str,
        body: &R,
    ) -> Result<T> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("POST {url}: {e}")))?;
        Self::parse_response(url, response).await
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        url: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("reading body from {url}: {e}")))?;

        if !status.is_success() {
            if let Ok(ApiErrorBody::OutOfBounds { min, max }) = serde_json::from_str(&text) {
                return Err(Error::OutOfBoundsError { min, max });
            }
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .ok()
                .map(|b| match b {
                    ApiErrorBody::Error { message } => message,
                    ApiErrorBody::OutOfBounds { .. } => unreachable!(),
                })
                .unwrap_or(text);
            return Err(Error::RequestError {
                http_code: status.as_u16(),
                message,
            });
        }

        log::debug!("{url} -> {text}");
        serde_json::from_str(&text)
            .map_err(|e| Error::Parse(format!("parsing response from {url}: {e}. body: {text}")))
    }
}

impl LPClient for HttpLpClient {
    fn init_swap(&self, url: &str, request: &InitRequest) -> LpFuture<'_, InitResponse> {
        let url = format!("{url}/init/{}", request.swap_type);
        let request = request.clone();
        Box::pin(async move { self.post_json(&url, &request).await })
    }

    fn get_payment_authorization(
        &self,
        url: &str,
        payment_hash: &[u8; 32],
    ) -> LpFuture<'_, PaymentStatus> {
        let url = format!("{url}/payment-authorization/{}", hex::encode(payment_hash));
        Box::pin(async move { self.get_json(&url).await })
    }

    fn get_invoice_status(&self, url: &str, payment_hash: &[u8; 32]) -> LpFuture<'_, PaymentStatus> {
        let url = format!("{url}/invoice-status/{}", hex::encode(payment_hash));
        Box::pin(async move { self.get_json(&url).await })
    }

    fn get_info(&self, url: &str) -> LpFuture<'_, InfoResponse> {
        let url = format!("{url}/info");
        Box::pin(async move { self.get_json(&url).await })
    }

    fn recover_swaps(&self, url: &str, xpub: &str) -> LpFuture<'_, Vec<RecoveredSwap>> {
        let url = format!("{url}/swap/recover");
        #[derive(Serialize)]
        struct Req<'a> {
            xpub: &'a str,
        }
        let xpub = xpub.to_string();
        Box::pin(async move { self.post_json(&url, &Req { xpub: &xpub }).await })
    }
}
