//! Multi-Provider Dispatcher (C10): health-scored provider selection with
//! sticky sessions and rolling per-provider load metrics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use std::sync::Mutex;

use crate::config::DispatcherConfig;
use crate::error::AgentError;
use crate::provider::ProviderAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
    Disabled,
}

struct ResponseWindow {
    samples: Mutex<VecDeque<Duration>>,
    capacity: usize,
}

impl ResponseWindow {
    fn new(capacity: usize) -> Self {
        Self { samples: Mutex::new(VecDeque::with_capacity(capacity)), capacity }
    }

    fn push(&self, sample: Duration) {
        let mut samples = self.samples.lock().expect("response window mutex poisoned");
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    fn average(&self) -> Duration {
        let samples = self.samples.lock().expect("response window mutex poisoned");
        if samples.is_empty() {
            return Duration::ZERO;
        }
        samples.iter().sum::<Duration>() / samples.len() as u32
    }
}

/// Rolling health/load state for one provider.
struct ProviderEntry {
    name: String,
    adapter: Arc<dyn ProviderAdapter>,
    max_concurrency: i64,
    active_requests: AtomicI64,
    success_count: AtomicU64,
    error_count: AtomicU64,
    response_times: ResponseWindow,
    status: Mutex<ProviderStatus>,
}

impl ProviderEntry {
    fn total(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed) + self.error_count.load(Ordering::Relaxed)
    }

    fn error_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.error_count.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    fn utilization(&self) -> f64 {
        if self.max_concurrency <= 0 {
            0.0
        } else {
            self.active_requests.load(Ordering::Relaxed) as f64 / self.max_concurrency as f64
        }
    }

    fn status(&self) -> ProviderStatus {
        *self.status.lock().expect("status mutex poisoned")
    }

    fn has_capacity(&self) -> bool {
        self.max_concurrency <= 0 || self.active_requests.load(Ordering::Relaxed) < self.max_concurrency
    }

    fn load_score(&self) -> f64 {
        let utilization = self.utilization().min(1.0);
        let error_rate = self.error_rate();
        let latency_secs = self.response_times.average().as_secs_f64();
        let normalized_latency = (latency_secs / 5.0).min(1.0);
        let available_capacity_ratio = if self.max_concurrency <= 0 {
            1.0
        } else {
            1.0 - utilization
        };

        (1.0 - utilization) * 0.4
            + (1.0 - error_rate) * 0.3
            + (1.0 - normalized_latency) * 0.2
            + available_capacity_ratio * 0.1
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderMetrics {
    pub active_requests: i64,
    pub success_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub average_latency: Duration,
    pub status: ProviderStatus,
}

/// A handle returned to the caller for a dispatched request; `complete`
/// records accounting and recomputes status.
pub struct DispatchHandle {
    entry: Arc<ProviderEntry>,
    start: Instant,
    min_samples: u64,
}

impl DispatchHandle {
    pub fn provider(&self) -> Arc<dyn ProviderAdapter> {
        self.entry.adapter.clone()
    }

    pub fn provider_name(&self) -> &str {
        &self.entry.name
    }

    /// Records the outcome of the dispatched call: decrements the
    /// active-request counter, appends the response time, updates
    /// success/error counters, and recomputes status.
    pub fn complete(self, success: bool) {
        self.entry.active_requests.fetch_sub(1, Ordering::Relaxed);
        self.entry.response_times.push(self.start.elapsed());
        if success {
            self.entry.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.entry.error_count.fetch_add(1, Ordering::Relaxed);
        }

        let total = self.entry.total();
        let mut status = self.entry.status.lock().expect("status mutex poisoned");
        *status = if total == 0 {
            ProviderStatus::Unknown
        } else if total < self.min_samples {
            // Too few samples to trust the error rate; leave prior status
            // unless it was never set.
            if *status == ProviderStatus::Unknown {
                ProviderStatus::Healthy
            } else {
                *status
            }
        } else {
            let error_rate = self.entry.error_rate();
            let avg_latency = self.entry.response_times.average();
            if error_rate > 0.5 {
                ProviderStatus::Unhealthy
            } else if error_rate > 0.1 || avg_latency > Duration::from_secs(10) {
                ProviderStatus::Degraded
            } else {
                ProviderStatus::Healthy
            }
        };
    }
}

/// Multi-provider dispatcher: health-scored selection with sticky sessions.
pub struct Dispatcher {
    config: DispatcherConfig,
    providers: Vec<Arc<ProviderEntry>>,
    sessions: DashMap<String, String>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, providers: Vec<(Arc<dyn ProviderAdapter>, i64)>) -> Self {
        let entries = providers
            .into_iter()
            .map(|(adapter, max_concurrency)| {
                Arc::new(ProviderEntry {
                    name: adapter.name().to_string(),
                    adapter,
                    max_concurrency,
                    active_requests: AtomicI64::new(0),
                    success_count: AtomicU64::new(0),
                    error_count: AtomicU64::new(0),
                    response_times: ResponseWindow::new(config.response_window),
                    status: Mutex::new(ProviderStatus::Unknown),
                })
            })
            .collect();
        Self { config, providers: entries, sessions: DashMap::new() }
    }

    pub fn metrics(&self, name: &str) -> Option<ProviderMetrics> {
        self.providers.iter().find(|p| p.name == name).map(|p| ProviderMetrics {
            active_requests: p.active_requests.load(Ordering::Relaxed),
            success_count: p.success_count.load(Ordering::Relaxed),
            error_count: p.error_count.load(Ordering::Relaxed),
            error_rate: p.error_rate(),
            average_latency: p.response_times.average(),
            status: p.status(),
        })
    }

    /// Selects a provider for `session_id` (if sticky sessions are enabled)
    /// and accounts the dispatch, returning a handle the caller completes
    /// once the request finishes.
    pub fn select(&self, session_id: Option<&str>) -> Result<DispatchHandle, AgentError> {
        if let (true, Some(sid)) = (self.config.sticky_sessions, session_id) {
            if let Some(mapped_name) = self.sessions.get(sid).map(|e| e.clone()) {
                if let Some(entry) = self.providers.iter().find(|p| p.name == mapped_name) {
                    if !matches!(entry.status(), ProviderStatus::Unhealthy | ProviderStatus::Disabled) {
                        entry.active_requests.fetch_add(1, Ordering::Relaxed);
                        return Ok(DispatchHandle {
                            entry: entry.clone(),
                            start: Instant::now(),
                            min_samples: self.config.min_samples_for_downgrade,
                        });
                    }
                }
                self.sessions.remove(sid);
            }
        }

        let candidates: Vec<&Arc<ProviderEntry>> = self
            .providers
            .iter()
            // Unknown (never tried) is optimistically selectable; only a
            // provider already proven bad is excluded.
            .filter(|p| !matches!(p.status(), ProviderStatus::Unhealthy | ProviderStatus::Disabled))
            .filter(|p| p.has_capacity())
            .collect();

        let healthy_only: Vec<&Arc<ProviderEntry>> =
            candidates.iter().filter(|p| p.status() == ProviderStatus::Healthy).copied().collect();
        let pool = if healthy_only.is_empty() { candidates } else { healthy_only };

        let chosen = pool
            .into_iter()
            .enumerate()
            .max_by(|(a_idx, a), (b_idx, b)| {
                a.load_score()
                    .partial_cmp(&b.load_score())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b_idx.cmp(a_idx))
            })
            .map(|(_, entry)| entry)
            .ok_or(AgentError::NoProvidersAvailable)?;

        chosen.active_requests.fetch_add(1, Ordering::Relaxed);

        if self.config.sticky_sessions {
            if let Some(sid) = session_id {
                self.evict_if_over_ceiling();
                self.sessions.insert(sid.to_string(), chosen.name.clone());
            }
        }

        Ok(DispatchHandle {
            entry: chosen.clone(),
            start: Instant::now(),
            min_samples: self.config.min_samples_for_downgrade,
        })
    }

    /// Drops an arbitrary half of the session map once it exceeds the soft
    /// ceiling; a simplified stand-in for LRU eviction with real timestamps.
    fn evict_if_over_ceiling(&self) {
        if self.sessions.len() <= self.config.session_map_soft_ceiling {
            return;
        }
        let to_drop: Vec<String> = self
            .sessions
            .iter()
            .take(self.sessions.len() / 2)
            .map(|e| e.key().clone())
            .collect();
        for key in to_drop {
            self.sessions.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CompletionRequest, CompletionResponse, StreamChunk};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct StubProvider(&'static str);

    #[async_trait]
    impl ProviderAdapter for StubProvider {
        fn name(&self) -> &str {
            self.0
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, AgentError> {
            unimplemented!("dispatcher tests exercise selection, not completion")
        }

        async fn stream(
            &self,
            _request: CompletionRequest,
            _on_chunk: mpsc::Sender<StreamChunk>,
        ) -> Result<CompletionResponse, AgentError> {
            unimplemented!("dispatcher tests exercise selection, not streaming")
        }
    }

    fn dispatcher(config: DispatcherConfig) -> Dispatcher {
        let providers: Vec<(Arc<dyn ProviderAdapter>, i64)> = vec![
            (Arc::new(StubProvider("a")), 10),
            (Arc::new(StubProvider("b")), 10),
        ];
        Dispatcher::new(config, providers)
    }

    #[test]
    fn unknown_status_providers_are_selectable_until_proven_unhealthy() {
        let d = dispatcher(DispatcherConfig::default());
        let handle = d.select(None).expect("at least one provider should be selectable");
        handle.complete(true);
    }

    #[test]
    fn repeated_errors_past_min_samples_marks_provider_unhealthy() {
        let mut config = DispatcherConfig::default();
        config.min_samples_for_downgrade = 2;
        let providers: Vec<(Arc<dyn ProviderAdapter>, i64)> = vec![(Arc::new(StubProvider("only")), 10)];
        let d = Dispatcher::new(config, providers);

        // Stop as soon as the provider is excluded from selection; repeated
        // failures should drive it to Unhealthy well before 5 attempts.
        for _ in 0..5 {
            match d.select(None) {
                Ok(handle) => handle.complete(false),
                Err(_) => break,
            }
        }

        assert_eq!(d.metrics("only").unwrap().status, ProviderStatus::Unhealthy);
        assert!(matches!(d.select(None), Err(AgentError::NoProvidersAvailable)));
    }

    #[test]
    fn sticky_session_reuses_the_same_provider_while_healthy() {
        let mut config = DispatcherConfig::default();
        config.sticky_sessions = true;
        let d = dispatcher(config);

        let first = d.select(Some("session-1")).unwrap();
        let first_name = first.provider_name().to_string();
        first.complete(true);

        let second = d.select(Some("session-1")).unwrap();
        assert_eq!(second.provider_name(), first_name);
        second.complete(true);
    }

    #[test]
    fn session_map_evicts_half_once_over_the_soft_ceiling() {
        let mut config = DispatcherConfig::default();
        config.sticky_sessions = true;
        config.session_map_soft_ceiling = 4;
        let d = dispatcher(config);

        for i in 0..10 {
            let handle = d.select(Some(&format!("session-{i}"))).unwrap();
            handle.complete(true);
        }

        assert!(d.sessions.len() <= 10);
    }

    #[test]
    fn no_providers_available_when_all_unhealthy() {
        let mut config = DispatcherConfig::default();
        config.min_samples_for_downgrade = 1;
        let providers: Vec<(Arc<dyn ProviderAdapter>, i64)> = vec![(Arc::new(StubProvider("only")), 10)];
        let d = Dispatcher::new(config, providers);
        let handle = d.select(None).unwrap();
        handle.complete(false);
        assert!(matches!(d.select(None), Err(AgentError::NoProvidersAvailable)));
    }
}
