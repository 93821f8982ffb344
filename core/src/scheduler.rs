//! Bounded request queue in front of `PredictionFusion`.
//!
//! Requests are answered through `PredictionHandle`s. A request is either
//! resolved synchronously from the result cache, or queued and resolved by
//! the next drain. The queue never grows past `max_queue_size`: enqueueing
//! into a full queue evicts the oldest request, which still resolves with an
//! empty `Resolution::Overflow` result.
//!
//! Draining is a synchronous step (`drain_once`); `run` drives it from a
//! `tokio::time::interval` until the shutdown token fires.

use crate::candidate::Suggestion;
use crate::engine::PredictionFusion;
use crate::utils::char_len;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_queue_size: usize,
    /// Requests resolved per drain
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    pub cache_ttl_ms: u64,
    pub cache_capacity: usize,
    pub prefetch_enabled: bool,
    /// Minimum prefix length (chars) before prefetching
    pub prefetch_threshold: usize,
    /// Likely next characters appended to a prefix when prefetching
    pub prefetch_chars: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            batch_size: 10,
            poll_interval_ms: 50,
            cache_ttl_ms: 300_000,
            cache_capacity: 500,
            prefetch_enabled: true,
            prefetch_threshold: 3,
            prefetch_chars: "aeiourlnm".to_string(),
        }
    }
}

/// Cooperative cancellation flag shared between a handle and the scheduler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Completes once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// How a request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Computed by the fusion engine during a drain
    Computed,
    /// Answered from the result cache
    Cached,
    /// Evicted from a full queue
    Overflow,
    /// Cancelled before it was computed
    Cancelled,
    /// The scheduler went away before resolving it
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub id: u64,
    /// Input the request was made for; consumers compare this with their
    /// current text to discard stale results.
    pub input: String,
    pub suggestions: Vec<Suggestion>,
    pub resolution: Resolution,
}

impl PredictionResult {
    fn empty(id: u64, input: String, resolution: Resolution) -> Self {
        Self {
            id,
            input,
            suggestions: Vec::new(),
            resolution,
        }
    }
}

/// Receiving end of one prediction request.
#[derive(Debug)]
pub struct PredictionHandle {
    id: u64,
    input: String,
    cancel: CancelToken,
    receiver: oneshot::Receiver<PredictionResult>,
}

impl PredictionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    /// Skip computation if the request is still queued. The handle still
    /// resolves, with `Resolution::Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the result.
    pub async fn result(self) -> PredictionResult {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => PredictionResult::empty(self.id, self.input, Resolution::Dropped),
        }
    }

    /// The result if it is already available.
    pub fn try_result(&mut self) -> Option<PredictionResult> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    Draining,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Exponential moving average (alpha 0.1) of enqueue-to-resolve time
    pub average_response_ms: f64,
    pub queue_overflows: u64,
    pub cancelled: u64,
    pub queue_len: usize,
    pub cache_size: usize,
    pub state: SchedulerState,
}

const EMA_ALPHA: f64 = 0.1;

struct Pending {
    id: u64,
    input: String,
    key: String,
    cancel: CancelToken,
    enqueued_at: Instant,
    sink: oneshot::Sender<PredictionResult>,
}

impl Pending {
    fn resolve(self, suggestions: Vec<Suggestion>, resolution: Resolution) {
        let result = PredictionResult {
            id: self.id,
            input: self.input,
            suggestions,
            resolution,
        };
        // receiver may already be gone
        let _ = self.sink.send(result);
    }
}

struct CacheEntry {
    inserted_at: Instant,
    value: Vec<Suggestion>,
}

#[derive(Default)]
struct Counters {
    total_requests: u64,
    cache_hits: u64,
    cache_misses: u64,
    average_response_ms: f64,
    queue_overflows: u64,
    cancelled: u64,
}

pub struct RequestScheduler {
    fusion: Arc<PredictionFusion>,
    config: SchedulerConfig,
    queue: Mutex<VecDeque<Pending>>,
    cache: Mutex<lru::LruCache<String, CacheEntry>>,
    counters: Mutex<Counters>,
    draining: AtomicBool,
    next_id: AtomicU64,
    generation: AtomicU64,
}

impl std::fmt::Debug for RequestScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScheduler")
            .field("config", &self.config)
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl RequestScheduler {
    pub fn new(fusion: Arc<PredictionFusion>, config: SchedulerConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            fusion,
            queue: Mutex::new(VecDeque::with_capacity(config.max_queue_size.min(1024))),
            cache: Mutex::new(lru::LruCache::new(capacity)),
            counters: Mutex::new(Counters::default()),
            draining: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            generation: AtomicU64::new(0),
            config,
        }
    }

    /// Scheduler configured from the fusion engine's own config.
    pub fn with_fusion(fusion: Arc<PredictionFusion>) -> Self {
        let config = fusion.config().scheduler.clone();
        Self::new(fusion, config)
    }

    pub fn fusion(&self) -> &Arc<PredictionFusion> {
        &self.fusion
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Request suggestions for `input`.
    ///
    /// Answered immediately on a cache hit; otherwise queued for the next
    /// drain.
    pub fn predict(&self, input: &str) -> PredictionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = self.fusion.cache_key(input);
        let (sink, receiver) = oneshot::channel();
        let cancel = CancelToken::new();
        let handle = PredictionHandle {
            id,
            input: input.to_string(),
            cancel: cancel.clone(),
            receiver,
        };
        let pending = Pending {
            id,
            input: input.to_string(),
            key,
            cancel,
            enqueued_at: Instant::now(),
            sink,
        };

        let cached = self.cached(&pending.key);
        self.count(|c| {
            c.total_requests += 1;
            if cached.is_some() {
                c.cache_hits += 1;
            } else {
                c.cache_misses += 1;
            }
        });
        if let Some(hit) = cached {
            pending.resolve(hit, Resolution::Cached);
            return handle;
        }

        let evicted = match self.queue.lock() {
            Ok(mut queue) => {
                let evicted = if queue.len() >= self.config.max_queue_size.max(1) {
                    queue.pop_front()
                } else {
                    None
                };
                queue.push_back(pending);
                evicted
            }
            Err(_) => {
                tracing::warn!("scheduler queue poisoned; dropping request");
                pending.resolve(Vec::new(), Resolution::Dropped);
                None
            }
        };
        if let Some(old) = evicted {
            tracing::debug!(id = old.id, "queue full; evicting oldest request");
            self.count(|c| c.queue_overflows += 1);
            old.resolve(Vec::new(), Resolution::Overflow);
        }
        handle
    }

    /// Resolve up to `batch_size` queued requests in enqueue order. Returns
    /// the number resolved.
    pub fn drain_once(&self) -> usize {
        let batch: Vec<Pending> = match self.queue.lock() {
            Ok(mut queue) => {
                let n = self.config.batch_size.max(1).min(queue.len());
                queue.drain(..n).collect()
            }
            Err(_) => return 0,
        };
        if batch.is_empty() {
            return 0;
        }

        self.draining.store(true, Ordering::SeqCst);
        let resolved = batch.len();
        for pending in batch {
            if pending.cancel.is_cancelled() {
                self.count(|c| c.cancelled += 1);
                pending.resolve(Vec::new(), Resolution::Cancelled);
                continue;
            }
            // an earlier request in this batch may have filled the cache
            if let Some(hit) = self.cached(&pending.key) {
                pending.resolve(hit, Resolution::Cached);
                continue;
            }

            let generation = self.generation();
            let suggestions = self.fusion.predict(&pending.input);
            self.store_if_current(pending.key.clone(), suggestions.clone(), generation);
            let elapsed = pending.enqueued_at.elapsed().as_secs_f64() * 1000.0;
            self.count(|c| {
                c.average_response_ms = c.average_response_ms * (1.0 - EMA_ALPHA) + elapsed * EMA_ALPHA;
            });
            pending.resolve(suggestions, Resolution::Computed);
        }
        self.draining.store(false, Ordering::SeqCst);
        tracing::debug!(resolved, "drained prediction batch");
        resolved
    }

    /// Drain on every tick until `shutdown` is cancelled. Requests still
    /// queued at shutdown resolve as cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancelToken) {
        let period = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_ms = period.as_millis() as u64, "scheduler started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.drain_once();
                }
            }
        }

        let left = self.cancel_pending();
        tracing::info!(cancelled = left, "scheduler stopped");
    }

    /// Start `run` on the current tokio runtime.
    pub fn spawn(self: &Arc<Self>, shutdown: CancelToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(shutdown))
    }

    /// Resolve every queued request as cancelled. Returns how many there were.
    pub fn cancel_pending(&self) -> usize {
        let pending: Vec<Pending> = match self.queue.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(_) => return 0,
        };
        let n = pending.len();
        if n > 0 {
            self.count(|c| c.cancelled += n as u64);
        }
        for p in pending {
            p.resolve(Vec::new(), Resolution::Cancelled);
        }
        n
    }

    /// Learn an accepted message and drop cached results.
    pub fn learn(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        self.fusion.learn_from_message(text);
        self.clear_results();
    }

    pub fn learn_batch<I, S>(&self, texts: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for text in texts {
            let text = text.as_ref();
            if !text.trim().is_empty() {
                self.fusion.learn_from_message(text);
            }
        }
        self.clear_results();
    }

    /// Queue `prefix + c` for each configured next char that is not cached.
    ///
    /// Skipped when prefetching is disabled, the prefix is shorter than
    /// `prefetch_threshold`, or the queue has no room for all of them.
    pub fn prefetch(&self, prefix: &str) -> Vec<PredictionHandle> {
        if !self.config.prefetch_enabled || char_len(prefix.trim()) < self.config.prefetch_threshold {
            return Vec::new();
        }
        let inputs: Vec<String> = self
            .config
            .prefetch_chars
            .chars()
            .map(|c| format!("{}{}", prefix, c))
            .filter(|input| self.cached(&self.fusion.cache_key(input)).is_none())
            .collect();
        let room = self.config.max_queue_size.saturating_sub(self.queue_len());
        if inputs.is_empty() || inputs.len() > room {
            return Vec::new();
        }
        inputs.iter().map(|input| self.predict(input)).collect()
    }

    // ========== Diagnostics ==========

    pub fn state(&self) -> SchedulerState {
        if self.draining.load(Ordering::SeqCst) {
            SchedulerState::Draining
        } else {
            SchedulerState::Idle
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = match self.counters.lock() {
            Ok(c) => SchedulerStats {
                total_requests: c.total_requests,
                cache_hits: c.cache_hits,
                cache_misses: c.cache_misses,
                average_response_ms: c.average_response_ms,
                queue_overflows: c.queue_overflows,
                cancelled: c.cancelled,
                ..Default::default()
            },
            Err(_) => SchedulerStats::default(),
        };
        stats.queue_len = self.queue_len();
        stats.cache_size = self.cache.lock().map(|c| c.len()).unwrap_or(0);
        stats.state = self.state();
        stats
    }

    /// Drop scheduler and fusion caches.
    pub fn clear_cache(&self) {
        self.clear_results();
        self.fusion.clear_cache();
    }

    fn clear_results(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Own result generation paired with the fusion's.
    fn generation(&self) -> (u64, u64) {
        (
            self.generation.load(Ordering::Acquire),
            self.fusion.cache_generation(),
        )
    }

    fn store_if_current(&self, key: String, value: Vec<Suggestion>, generation: (u64, u64)) -> bool {
        let Ok(mut cache) = self.cache.lock() else {
            return false;
        };
        if self.generation() != generation {
            return false;
        }
        cache.put(
            key,
            CacheEntry {
                inserted_at: Instant::now(),
                value,
            },
        );
        true
    }

    fn cached(&self, key: &str) -> Option<Vec<Suggestion>> {
        let mut cache = self.cache.lock().ok()?;
        let ttl = Duration::from_millis(self.config.cache_ttl_ms);
        let fresh = cache.peek(key).map(|e| e.inserted_at.elapsed() < ttl)?;
        if fresh {
            cache.peek(key).map(|e| e.value.clone())
        } else {
            cache.pop(key);
            None
        }
    }

    fn count<F: FnOnce(&mut Counters)>(&self, f: F) {
        if let Ok(mut c) = self.counters.lock() {
            f(&mut c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexicon::{Lexicon, LexiconData};
    use crate::Config;

    fn fusion() -> Arc<PredictionFusion> {
        let config = Config::default();
        let data = LexiconData {
            common_words: ["kargo", "kart", "merhaba", "sipariş"].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let lexicon = Lexicon::new(data, config.tokenizer()).expect("lexicon");
        Arc::new(PredictionFusion::builder(config).lexicon(Arc::new(lexicon)).build())
    }

    fn scheduler(config: SchedulerConfig) -> RequestScheduler {
        RequestScheduler::new(fusion(), config)
    }

    #[tokio::test]
    async fn queued_request_resolves_after_drain() {
        let s = scheduler(SchedulerConfig::default());
        let mut h = s.predict("kar");
        assert!(h.try_result().is_none());
        assert_eq!(s.queue_len(), 1);
        assert_eq!(s.drain_once(), 1);
        let r = h.result().await;
        assert_eq!(r.resolution, Resolution::Computed);
        assert_eq!(r.input, "kar");
        assert!(r.suggestions.iter().any(|x| x.text == "kargo"));
    }

    #[tokio::test]
    async fn cached_request_resolves_synchronously() {
        let s = scheduler(SchedulerConfig::default());
        let h = s.predict("kar");
        s.drain_once();
        h.result().await;

        let mut again = s.predict("KAR");
        let r = again.try_result().expect("resolved without drain");
        assert_eq!(r.resolution, Resolution::Cached);
        let stats = s.stats();
        assert_eq!((stats.total_requests, stats.cache_hits, stats.cache_misses), (2, 1, 1));
    }

    #[tokio::test]
    async fn overflow_evicts_oldest_with_empty_result() {
        let config = SchedulerConfig {
            max_queue_size: 3,
            batch_size: 2,
            ..Default::default()
        };
        let s = scheduler(config);
        let handles: Vec<_> = ["kar", "karg", "kargo", "mer"].iter().map(|i| s.predict(i)).collect();
        assert_eq!(s.queue_len(), 3);
        assert_eq!(s.stats().queue_overflows, 1);
        while s.drain_once() > 0 {}

        let mut results = Vec::new();
        for h in handles {
            results.push(h.result().await);
        }
        assert_eq!(results[0].resolution, Resolution::Overflow);
        assert!(results[0].suggestions.is_empty());
        for r in &results[1..] {
            assert_eq!(r.resolution, Resolution::Computed);
        }
        assert!(!results[3].suggestions.is_empty());
    }

    #[tokio::test]
    async fn cancelled_request_is_not_computed() {
        let s = scheduler(SchedulerConfig::default());
        let h = s.predict("kar");
        h.cancel();
        s.drain_once();
        let r = h.result().await;
        assert_eq!(r.resolution, Resolution::Cancelled);
        assert!(r.suggestions.is_empty());
        assert_eq!(s.stats().cancelled, 1);
        assert_eq!(s.fusion().cache_stats(), (0, 0));
    }

    #[tokio::test]
    async fn drain_respects_batch_size() {
        let config = SchedulerConfig {
            batch_size: 2,
            ..Default::default()
        };
        let s = scheduler(config);
        let _handles: Vec<_> = ["a1", "a2", "a3"].iter().map(|i| s.predict(i)).collect();
        assert_eq!(s.drain_once(), 2);
        assert_eq!(s.queue_len(), 1);
        assert_eq!(s.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn learn_clears_results() {
        let s = scheduler(SchedulerConfig::default());
        let h = s.predict("kar");
        s.drain_once();
        h.result().await;
        assert_eq!(s.stats().cache_size, 1);
        s.learn("kargo yolda");
        assert_eq!(s.stats().cache_size, 0);
    }

    #[test]
    fn result_computed_before_learn_is_not_cached() {
        let s = scheduler(SchedulerConfig::default());
        let generation = s.generation();
        let stale = s.fusion().predict("kar");
        s.learn("kargo yolda");
        assert!(!s.store_if_current(s.fusion().cache_key("kar"), stale, generation));
        assert_eq!(s.stats().cache_size, 0);

        // a learn that bypasses the scheduler also invalidates
        let generation = s.generation();
        let stale = s.fusion().predict("mer");
        s.fusion().learn_from_message("merhaba");
        assert!(!s.store_if_current(s.fusion().cache_key("mer"), stale, generation));

        let generation = s.generation();
        let fresh = s.fusion().predict("kar");
        assert!(s.store_if_current(s.fusion().cache_key("kar"), fresh, generation));
        assert_eq!(s.stats().cache_size, 1);
    }

    #[tokio::test]
    async fn prefetch_needs_threshold_and_room() {
        let s = scheduler(SchedulerConfig {
            prefetch_chars: "ao".to_string(),
            max_queue_size: 3,
            ..Default::default()
        });
        assert!(s.prefetch("ka").is_empty());
        let handles = s.prefetch("kar");
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].input(), "kara");
        // one slot left, two needed
        assert!(s.prefetch("mer").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_loop_resolves_and_shuts_down() {
        let s = Arc::new(scheduler(SchedulerConfig {
            poll_interval_ms: 5,
            ..Default::default()
        }));
        let shutdown = CancelToken::new();
        let task = s.spawn(shutdown.clone());

        let r = s.predict("mer").result().await;
        assert_eq!(r.resolution, Resolution::Computed);
        assert!(r.suggestions.iter().any(|x| x.text == "merhaba"));

        shutdown.cancel();
        task.await.expect("join");
        assert_eq!(s.state(), SchedulerState::Idle);
    }
}
