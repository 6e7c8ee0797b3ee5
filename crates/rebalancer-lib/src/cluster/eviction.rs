//! Eviction with exponential backoff on rate limiting

use super::{ClusterStateProvider, EvictionOutcome};
use crate::error::ClusterError;
use crate::models::Pod;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff applied to rate-limited evictions
///
/// Delay before retry `n` (0-based) is `base * 2^n` plus up to `max_jitter`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub max_jitter: Duration,
}

impl BackoffPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
        }
    }

    /// Delay before the retry following `attempt`
    pub fn delay(&self, attempt: u32, jitter_fraction: f64) -> Duration {
        let exp = self.base.saturating_mul(2u32.saturating_pow(attempt));
        exp + self.max_jitter.mul_f64(jitter_fraction.clamp(0.0, 1.0))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Final result of an eviction including retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionResult {
    Evicted { attempts: u32 },
    Denied(String),
    /// Still rate limited after every retry
    GaveUp { attempts: u32 },
}

impl EvictionResult {
    pub fn is_evicted(&self) -> bool {
        matches!(self, EvictionResult::Evicted { .. })
    }
}

/// Evict `pod`, retrying rate-limited attempts with exponential backoff
///
/// Hard API errors are returned to the caller; denial and give-up are
/// normal outcomes for a single pod.
pub async fn evict_with_backoff(
    provider: &dyn ClusterStateProvider,
    pod: &Pod,
    policy: &BackoffPolicy,
) -> Result<EvictionResult, ClusterError> {
    let mut attempt = 0;

    loop {
        match provider.evict(pod).await? {
            EvictionOutcome::Evicted => {
                return Ok(EvictionResult::Evicted {
                    attempts: attempt + 1,
                })
            }
            EvictionOutcome::Denied(reason) => return Ok(EvictionResult::Denied(reason)),
            EvictionOutcome::RateLimited => {
                if attempt >= policy.max_retries {
                    warn!(
                        pod = %pod.key(),
                        attempts = attempt + 1,
                        "Eviction still rate limited, giving up"
                    );
                    return Ok(EvictionResult::GaveUp {
                        attempts: attempt + 1,
                    });
                }

                let delay = policy.delay(attempt, rand::random::<f64>());
                debug!(
                    pod = %pod.key(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Eviction rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
