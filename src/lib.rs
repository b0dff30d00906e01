//! Swaplink Core - cross-chain atomic swap engine
//!
//! Platform-agnostic state machine, liquidity-provider discovery, and quote
//! verification for moving value between Bitcoin (on-chain/Lightning) and smart
//! chains through an intermediary. The engine never signs or broadcasts a
//! transaction itself; every chain-specific capability (building escrow data,
//! checking signatures, constructing unsigned transactions, streaming events) is
//! supplied by an embedder-provided [`contract::Contract`] implementation, the
//! same way wallet/swap persistence is supplied through [`storage::WalletStorage`]
//! and [`store::SwapStore`].
//!
//! # Example
//!
//! ```rust,ignore
//! use swaplink_core::{Swapper, Wallet, Network, config::EngineConfig};
//! use swaplink_core::store::MemorySwapStore;
//!
//! let wallet = Wallet::new(my_wallet_storage, Network::Bitcoin);
//! let swapper = Swapper::new(
//!     MemorySwapStore::new(),
//!     wallet,
//!     lp_client,
//!     registry,
//!     contracts,
//!     oracle,
//!     EngineConfig::default(),
//! );
//! let swap = swapper.create(swap_type, "polygon", token, 100_000, true, "0xuser", &cancel).await?;
//! ```

pub mod cancel;
pub mod clock;
pub mod config;
pub mod contract;
pub mod error;
pub mod hd_wallet;
pub mod htlc;
pub mod lp_client;
pub mod messenger;
pub mod oracle;
pub mod reconciliation;
pub mod registry;
pub mod retry;
pub mod state_machine;
pub mod storage;
pub mod store;
pub mod swapper;
pub mod types;
pub mod verifier;
pub mod wallet;

pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use contract::{ChainEvent, CommitStatus, Contract, UnsignedTx};
pub use error::{Error, Result};
pub use hd_wallet::HdWallet;
pub use lp_client::{HttpLpClient, LPClient};
pub use messenger::{Messenger, NullMessenger};
pub use oracle::{FixedPriceOracle, PriceOracle};
pub use reconciliation::ReconciliationLoop;
pub use registry::{IntermediaryRegistry, Registry, StaticRegistry};
pub use storage::{StorageFuture, WalletStorage, WalletStorageExt};
pub use store::{MemorySwapStore, Query, SwapStore};
pub use swapper::Swapper;
pub use types::{Network, Swap, SwapId, SwapParams, SwapState, SwapType, Token};
pub use verifier::QuoteVerifier;
pub use wallet::Wallet;
