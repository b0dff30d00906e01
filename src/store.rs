//! Durable persistence of swap records with composite-index queries (§4.1 C1).
//!
//! The store persists a mapping `id -> Swap` with secondary composite indexes over
//! `(type, state, initiator_address, payment_hash, escrow_hash, chain_id)`. The
//! engine ships one reference implementation, an in-memory store, the same way
//! `storage.rs` ships `memory::MemoryWalletStorage`; real deployments plug in their
//! own (sled, sqlite, IndexedDB, ...) behind the same trait.

use crate::error::{Error, Result};
use crate::types::{Swap, SwapId, SwapState, SwapType};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

#[cfg(target_arch = "wasm32")]
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a>>;
#[cfg(not(target_arch = "wasm32"))]
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// One conjunct of a [`Query`]: match an exact value, or any value in a set.
#[derive(Debug, Clone)]
pub enum IndexMatch {
    Type(SwapType),
    State(SwapState),
    InitiatorAddress(String),
    PaymentHash([u8; 32]),
    EscrowHash([u8; 32]),
    ChainId(String),
    /// Match if the swap's state is anything but terminal.
    NonTerminal,
}

/// A disjunction of conjunctions over index keys (§4.1 `query`).
///
/// `Query::any()` matches every swap. Build up a query with `and`/`or`:
/// `Query::new().and(IndexMatch::ChainId(..)).and(IndexMatch::NonTerminal)`.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Each inner `Vec` is a conjunction (AND); the outer `Vec` is a disjunction (OR).
    clauses: Vec<Vec<IndexMatch>>,
}

impl Query {
    pub fn new() -> Self {
        Self {
            clauses: vec![Vec::new()],
        }
    }

    pub fn any() -> Self {
        Self::new()
    }

    /// Add a conjunct to the last (or only) clause.
    pub fn and(mut self, m: IndexMatch) -> Self {
        self.clauses.last_mut().expect("clauses never empty").push(m);
        self
    }

    /// Start a new disjunct clause.
    pub fn or(mut self) -> Self {
        self.clauses.push(Vec::new());
        self
    }

    fn matches(&self, swap: &Swap) -> bool {
        if self.clauses.iter().all(Vec::is_empty) {
            return true;
        }
        self.clauses.iter().any(|clause| {
            clause.iter().all(|m| match m {
                IndexMatch::Type(t) => swap.swap_type == *t,
                IndexMatch::State(s) => swap.state == *s,
                IndexMatch::InitiatorAddress(a) => &swap.initiator_address == a,
                IndexMatch::PaymentHash(h) => swap.payment_hash == Some(*h),
                IndexMatch::EscrowHash(h) => swap.escrow_hash() == Some(*h),
                IndexMatch::ChainId(c) => &swap.chain_id == c,
                IndexMatch::NonTerminal => !swap.state.is_terminal(),
            })
        })
    }
}

/// The durable swap store (§4.1).
///
/// Guarantees: single-writer discipline per `id` is enforced by the caller (the
/// per-swap lock, §5), not by the store itself — the store is treated as exclusive
/// per-process.
#[cfg(not(target_arch = "wasm32"))]
pub trait SwapStore: Send + Sync {
    fn init(&self) -> StoreFuture<'_, ()>;
    fn save(&self, swap: &Swap) -> StoreFuture<'_, ()>;
    fn save_all(&self, swaps: &[Swap]) -> StoreFuture<'_, ()>;
    fn remove(&self, id: &SwapId) -> StoreFuture<'_, ()>;
    fn remove_all(&self, ids: &[SwapId]) -> StoreFuture<'_, ()>;
    fn get(&self, id: &SwapId) -> StoreFuture<'_, Option<Swap>>;
    fn query(&self, query: Query) -> StoreFuture<'_, Vec<Swap>>;
}

#[cfg(target_arch = "wasm32")]
pub trait SwapStore {
    fn init(&self) -> StoreFuture<'_, ()>;
    fn save(&self, swap: &Swap) -> StoreFuture<'_, ()>;
    fn save_all(&self, swaps: &[Swap]) -> StoreFuture<'_, ()>;
    fn remove(&self, id: &SwapId) -> StoreFuture<'_, ()>;
    fn remove_all(&self, ids: &[SwapId]) -> StoreFuture<'_, ()>;
    fn get(&self, id: &SwapId) -> StoreFuture<'_, Option<Swap>>;
    fn query(&self, query: Query) -> StoreFuture<'_, Vec<Swap>>;
}

/// In-memory reference implementation. Secondary indexes are recomputed on every
/// query rather than maintained incrementally — sufficient for the handful of
/// swaps a single wallet process tracks, and trivially correct.
#[derive(Default)]
pub struct MemorySwapStore {
    swaps: RwLock<HashMap<SwapId, Swap>>,
    /// Content hash of the last-saved serialization per id, used to detect a
    /// no-op `save` for P6 (idempotent store / "fires the change notification at
    /// most once").
    last_hash: RwLock<HashMap<SwapId, u64>>,
}

impl MemorySwapStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn content_hash(swap: &Swap) -> Result<u64> {
        use std::hash::{Hash, Hasher};
        let bytes = serde_json::to_vec(swap).map_err(|e| Error::StoreError(e.to_string()))?;
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        bytes.hash(&mut hasher);
        Ok(hasher.finish())
    }

    /// `true` if this save actually changed the stored content (P6).
    fn save_one(&self, swap: &Swap) -> Result<bool> {
        let hash = Self::content_hash(swap)?;
        let mut last_hash = self.last_hash.write().unwrap();
        let changed = last_hash.get(&swap.id) != Some(&hash);
        self.swaps
            .write()
            .unwrap()
            .insert(swap.id.clone(), swap.clone());
        last_hash.insert(swap.id.clone(), hash);
        Ok(changed)
    }
}

impl SwapStore for MemorySwapStore {
    fn init(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }

    fn save(&self, swap: &Swap) -> StoreFuture<'_, ()> {
        let swap = swap.clone();
        Box::pin(async move {
            self.save_one(&swap)?;
            Ok(())
        })
    }

    fn save_all(&self, swaps: &[Swap]) -> StoreFuture<'_, ()> {
        let swaps = swaps.to_vec();
        Box::pin(async move {
            // Atomic per batch: validate every record serializes before writing any.
            for swap in &swaps {
                Self::content_hash(swap)?;
            }
            for swap in &swaps {
                self.save_one(swap)?;
            }
            Ok(())
        })
    }

    fn remove(&self, id: &SwapId) -> StoreFuture<'_, ()> {
        let id = id.clone();
        Box::pin(async move {
            self.swaps.write().unwrap().remove(&id);
            self.last_hash.write().unwrap().remove(&id);
            Ok(())
        })
    }

    fn remove_all(&self, ids: &[SwapId]) -> StoreFuture<'_, ()> {
        let ids: Vec<SwapId> = ids.to_vec();
        Box::pin(async move {
            let mut swaps = self.swaps.write().unwrap();
            let mut last_hash = self.last_hash.write().unwrap();
            for id in &ids {
                swaps.remove(id);
                last_hash.remove(id);
            }
            Ok(())
        })
    }

    fn get(&self, id: &SwapId) -> StoreFuture<'_, Option<Swap>> {
        let id = id.clone();
        Box::pin(async move { Ok(self.swaps.read().unwrap().get(&id).cloned()) })
    }

    fn query(&self, query: Query) -> StoreFuture<'_, Vec<Swap>> {
        Box::pin(async move {
            Ok(self
                .swaps
                .read()
                .unwrap()
                .values()
                .filter(|s| query.matches(s))
                .cloned()
                .collect())
        })
    }
}

/// Convenience conjunct sets used throughout the engine.
impl Query {
    pub fn by_id_set(ids: HashSet<SwapId>) -> impl Fn(&Swap) -> bool {
        move |s: &Swap| ids.contains(&s.id)
    }
}
