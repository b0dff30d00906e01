//! Engine configuration.
//!
//! The engine is a library, not a service, so there is no configuration-file layer:
//! the embedding application constructs an [`EngineConfig`] and passes it into
//! [`crate::swapper::Swapper::new`] / [`crate::reconciliation::ReconciliationLoop::spawn`].

use std::time::Duration;

/// Every tunable named across the component design.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the reconciliation loop's periodic tick (T1) runs. Typ. 5s.
    pub tick_interval: Duration,
    /// How often to poll an LP for payment/authorization status while waiting.
    pub check_interval: Duration,
    /// Allowed deviation between a quoted price and the oracle price, in parts per
    /// million. Typ. 10_000 (1%).
    pub allowed_difference_ppm: u64,
    /// Maximum attempts for the exponential-backoff retry policy.
    pub retry_max_attempts: u32,
    /// Base delay for the exponential-backoff retry policy.
    pub retry_base_delay: Duration,
    /// Multiplier applied to the delay after every attempt.
    pub retry_multiplier: f64,
    /// How long a user may wait before a manual claim is allowed to race the
    /// watchtower network in `FROM_BTCLN_AUTO`. Single knob, see DESIGN.md.
    pub watchtower_grace_window: Duration,
    /// Timeout applied to every LP HTTP request.
    pub http_timeout: Duration,
    /// Re-broadcast the claim secret over the messenger every N ticks while a
    /// `FROM_BTCLN_AUTO` swap sits in `CLAIM_COMMITED`.
    pub secret_rebroadcast_every_n_ticks: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            check_interval: Duration::from_secs(5),
            allowed_difference_ppm: 10_000,
            retry_max_attempts: 5,
            retry_base_delay: Duration::from_millis(500),
            retry_multiplier: 2.0,
            watchtower_grace_window: Duration::from_secs(60),
            http_timeout: Duration::from_secs(15),
            secret_rebroadcast_every_n_ticks: 3,
        }
    }
}
