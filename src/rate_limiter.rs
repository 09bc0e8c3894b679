use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::{SharedClock, SystemClock};

/// Bucket count above which stale entries are swept.
pub const DEFAULT_MAX_BUCKETS: usize = 10_000;

/// Counter state for one `bucket:identifier` pair. Times are epoch millis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketState {
    pub count: u64,
    pub window_reset_at: u64,
    pub blocked_until: Option<u64>,
    pub last_seen_at: u64,
}

impl BucketState {
    fn new(now: u64, window_ms: u64) -> Self {
        Self {
            count: 0,
            window_reset_at: now.saturating_add(window_ms),
            blocked_until: None,
            last_seen_at: now,
        }
    }

    /// Neither the window nor a block is still running.
    pub fn is_stale(&self, now: u64) -> bool {
        self.window_reset_at <= now && !self.is_blocked(now)
    }

    pub fn is_blocked(&self, now: u64) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }
}

/// One rate-limit check.
#[derive(Debug, Clone)]
pub struct RateLimitRequest<'a> {
    pub bucket: &'a str,
    pub identifier: &'a str,
    pub window: Duration,
    pub max: u64,
    pub block: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Epoch millis when the quota next resets.
    pub reset_at: u64,
    /// Set only when rejected, always at least 1.
    pub retry_after_ms: Option<u64>,
}

impl RateLimitResult {
    pub fn allowed(limit: u64, remaining: u64, reset_at: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            retry_after_ms: None,
        }
    }

    pub fn rejected(limit: u64, reset_at: u64, retry_after_ms: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            retry_after_ms: Some(retry_after_ms.max(1)),
        }
    }
}

/// Storage for bucket state.
///
/// `update` must run `apply` atomically with respect to other calls for the
/// same key, so a read-check-increment never interleaves with another.
pub trait BucketStore: Send + Sync {
    fn update<R>(&self, key: &str, now: u64, apply: impl FnOnce(&mut Option<BucketState>) -> R) -> R;

    fn remove(&self, key: &str);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local store. Counters are lost on restart and not shared between
/// processes.
#[derive(Debug)]
pub struct MemoryBucketStore {
    buckets: Mutex<HashMap<String, BucketState>>,
    max_buckets: usize,
}

impl MemoryBucketStore {
    pub fn new(max_buckets: usize) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            max_buckets,
        }
    }

    /// Size a sweep shrinks the map to, leaving headroom so the next sweep
    /// only runs after roughly a tenth of the ceiling in new keys.
    fn low_water_mark(&self) -> usize {
        self.max_buckets - self.max_buckets / 10
    }

    /// Drop stale buckets, then the least recently seen live ones until the
    /// map is back at the low-water mark. Blocked buckets go last and `keep`
    /// is never evicted.
    fn sweep(&self, buckets: &mut HashMap<String, BucketState>, now: u64, keep: &str) {
        let before = buckets.len();
        buckets.retain(|_, state| !state.is_stale(now));
        let stale = before - buckets.len();

        let target = self.low_water_mark();
        let mut displaced = 0;
        if buckets.len() > target {
            let mut candidates: Vec<(bool, u64, String)> = buckets
                .iter()
                .filter(|(key, _)| key.as_str() != keep)
                .map(|(key, state)| (state.is_blocked(now), state.last_seen_at, key.clone()))
                .collect();
            candidates.sort_unstable();

            let excess = buckets.len() - target;
            for (_, _, key) in candidates.into_iter().take(excess) {
                buckets.remove(&key);
                displaced += 1;
            }
        }

        if displaced > 0 {
            warn!(
                stale,
                displaced,
                remaining = buckets.len(),
                max_buckets = self.max_buckets,
                "Rate-limit store over capacity, evicted least recently seen buckets"
            );
        } else {
            debug!(stale, remaining = buckets.len(), "Evicted stale rate-limit buckets");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, BucketState>> {
        // A panic mid-update leaves at worst one stale counter behind.
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryBucketStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUCKETS)
    }
}

impl BucketStore for MemoryBucketStore {
    fn update<R>(&self, key: &str, now: u64, apply: impl FnOnce(&mut Option<BucketState>) -> R) -> R {
        let mut buckets = self.lock();

        let mut slot = buckets.remove(key);
        let result = apply(&mut slot);
        if let Some(state) = slot {
            buckets.insert(key.to_string(), state);
        }

        if buckets.len() > self.max_buckets {
            self.sweep(&mut buckets, now, key);
        }

        result
    }

    fn remove(&self, key: &str) {
        self.lock().remove(key);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Fixed-window counter with an optional penalty block, keyed by
/// `bucket:identifier`.
pub struct RateLimiter<S: BucketStore = MemoryBucketStore> {
    store: Arc<S>,
    clock: SharedClock,
}

impl<S: BucketStore> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl RateLimiter<MemoryBucketStore> {
    pub fn in_memory(max_buckets: usize) -> Self {
        Self::new(MemoryBucketStore::new(max_buckets), Arc::new(SystemClock))
    }
}

impl<S: BucketStore> RateLimiter<S> {
    pub fn new(store: S, clock: SharedClock) -> Self {
        Self {
            store: Arc::new(store),
            clock,
        }
    }

    pub fn evaluate(&self, request: &RateLimitRequest<'_>) -> RateLimitResult {
        let now = self.clock.now_millis();
        let window_ms = request.window.as_millis() as u64;
        let block_ms = request.block.map(|block| block.as_millis() as u64);
        let max = request.max;
        let key = bucket_key(request.bucket, request.identifier);

        let result = self.store.update(&key, now, |slot| {
            let state = slot.get_or_insert_with(|| BucketState::new(now, window_ms));
            state.last_seen_at = now;

            if let Some(until) = state.blocked_until {
                if until > now {
                    let reset_at = until.max(state.window_reset_at);
                    return RateLimitResult::rejected(max, reset_at, until - now);
                }
                state.blocked_until = None;
            }

            if now >= state.window_reset_at {
                state.count = 0;
                state.window_reset_at = now.saturating_add(window_ms);
            }

            state.count = state.count.saturating_add(1);
            if state.count <= max {
                return RateLimitResult::allowed(max, max - state.count, state.window_reset_at);
            }

            if let Some(block_ms) = block_ms {
                state.blocked_until = Some(now.saturating_add(block_ms));
            }
            let retry_at = state
                .blocked_until
                .map_or(state.window_reset_at, |until| until.max(state.window_reset_at));
            RateLimitResult::rejected(max, retry_at, retry_at.saturating_sub(now))
        });

        if !result.allowed {
            debug!(
                bucket = %request.bucket,
                identifier = %request.identifier,
                retry_after_ms = result.retry_after_ms.unwrap_or_default(),
                "Rate limit exceeded"
            );
        }

        result
    }

    /// Drop all state for one `bucket:identifier` pair.
    pub fn reset(&self, bucket: &str, identifier: &str) {
        self.store.remove(&bucket_key(bucket, identifier));
    }

    pub fn tracked_buckets(&self) -> usize {
        self.store.len()
    }
}

fn bucket_key(bucket: &str, identifier: &str) -> String {
    format!("{}:{}", bucket, identifier)
}
