//! Service health monitoring
//!
//! Probes collaborators (ledger, learning engine, any HTTP dependency) on a
//! timer and keeps the latest result per service. Status reporting reads
//! the snapshot and never blocks on a probe.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::EstimatorRegistry;
use crate::ledger::LedgerClient;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Last observed health of one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service_name: String,
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ServiceHealth {
    /// A service that has never been probed
    pub fn unknown(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            status: HealthStatus::Unknown,
            last_check: None,
            response_time_ms: None,
            error_message: None,
        }
    }
}

/// Health check timeouts and retry configuration
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Budget for a single probe attempt
    pub probe_timeout: Duration,
    /// Backoff between failed attempts within one round
    pub retry: RetryPolicy,
    /// Time between probe rounds
    pub interval: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_retries: 2,
                initial_backoff_ms: 500,
                backoff_multiplier: 2.0,
                max_backoff_ms: 5_000,
            },
            interval: Duration::from_secs(30),
        }
    }
}

/// A single collaborator check
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok` when the service is usable, otherwise a reason
    async fn probe(&self) -> Result<(), String>;
}

/// Checks the audit ledger backend
pub struct LedgerProbe {
    ledger: Arc<LedgerClient>,
}

impl LedgerProbe {
    pub fn new(ledger: Arc<LedgerClient>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl HealthProbe for LedgerProbe {
    fn name(&self) -> &str {
        "ledger"
    }

    async fn probe(&self) -> Result<(), String> {
        self.ledger.health().await.map_err(|e| e.to_string())
    }
}

/// Checks that at least one estimator can be built
pub struct EngineProbe {
    registry: Arc<EstimatorRegistry>,
}

impl EngineProbe {
    pub fn new(registry: Arc<EstimatorRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl HealthProbe for EngineProbe {
    fn name(&self) -> &str {
        "learning_engine"
    }

    async fn probe(&self) -> Result<(), String> {
        if self.registry.is_empty() {
            Err("no estimators registered".into())
        } else {
            Ok(())
        }
    }
}

/// GETs a URL; any 2xx response is healthy
pub struct HttpProbe {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<(), String> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("non-success status {}", resp.status()));
        }
        // Read body to ensure server is fully responsive
        resp.bytes().await.map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Periodically probes collaborators and keeps their latest health
pub struct ServiceHealthMonitor {
    probes: Vec<Box<dyn HealthProbe>>,
    config: HealthCheckConfig,
    latest: RwLock<BTreeMap<String, ServiceHealth>>,
    last_round: RwLock<Option<DateTime<Utc>>>,
}

impl ServiceHealthMonitor {
    pub fn new(config: HealthCheckConfig) -> Self {
        Self {
            probes: Vec::new(),
            config,
            latest: RwLock::new(BTreeMap::new()),
            last_round: RwLock::new(None),
        }
    }

    pub fn with_probe(mut self, probe: impl HealthProbe + 'static) -> Self {
        self.probes.push(Box::new(probe));
        self
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Names of every probed service
    pub fn services(&self) -> Vec<String> {
        self.probes.iter().map(|p| p.name().to_string()).collect()
    }

    async fn run_probe(&self, probe: &dyn HealthProbe) -> ServiceHealth {
        let timeout = self.config.probe_timeout;
        let (result, attempts) = self
            .config
            .retry
            .run(
                || async move {
                    let started = Instant::now();
                    match tokio::time::timeout(timeout, probe.probe()).await {
                        Ok(Ok(())) => Ok(started.elapsed()),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err("probe timed out".to_string()),
                    }
                },
                |_| true,
            )
            .await;

        match result {
            Ok(elapsed) => {
                if attempts > 1 {
                    debug!(service = probe.name(), attempts, "Probe recovered");
                }
                ServiceHealth {
                    service_name: probe.name().to_string(),
                    status: HealthStatus::Healthy,
                    last_check: Some(Utc::now()),
                    response_time_ms: Some(elapsed.as_millis() as u64),
                    error_message: None,
                }
            }
            Err(e) => {
                warn!(service = probe.name(), attempts, error = %e, "Service unhealthy");
                ServiceHealth {
                    service_name: probe.name().to_string(),
                    status: HealthStatus::Unhealthy,
                    last_check: Some(Utc::now()),
                    response_time_ms: None,
                    error_message: Some(e),
                }
            }
        }
    }

    /// Probe every service concurrently and store the results
    pub async fn check_all(&self) -> Vec<ServiceHealth> {
        let results =
            futures::future::join_all(self.probes.iter().map(|p| self.run_probe(p.as_ref()))).await;

        let mut latest = self.latest.write().await;
        for health in &results {
            latest.insert(health.service_name.clone(), health.clone());
        }
        drop(latest);
        *self.last_round.write().await = Some(Utc::now());
        results
    }

    /// Latest known health of every probed service
    pub async fn snapshot(&self) -> Vec<ServiceHealth> {
        let latest = self.latest.read().await;
        self.probes
            .iter()
            .map(|p| {
                latest
                    .get(p.name())
                    .cloned()
                    .unwrap_or_else(|| ServiceHealth::unknown(p.name()))
            })
            .collect()
    }

    /// `Unknown` for services that were never probed
    pub async fn status_of(&self, service: &str) -> HealthStatus {
        self.latest
            .read()
            .await
            .get(service)
            .map(|h| h.status)
            .unwrap_or(HealthStatus::Unknown)
    }

    pub async fn last_check(&self) -> Option<DateTime<Utc>> {
        *self.last_round.read().await
    }

    /// Probe on the configured interval until the task is aborted
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.interval);
            loop {
                ticker.tick().await;
                monitor.check_all().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> HealthCheckConfig {
        HealthCheckConfig {
            probe_timeout: Duration::from_millis(100),
            retry: RetryPolicy {
                max_retries: 2,
                initial_backoff_ms: 10,
                backoff_multiplier: 2.0,
                max_backoff_ms: 1_000,
            },
            interval: Duration::from_secs(30),
        }
    }

    /// Fails the first `failures` probes
    struct CountingProbe {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl HealthProbe for CountingProbe {
        fn name(&self) -> &str {
            "counting"
        }
        async fn probe(&self) -> Result<(), String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(format!("failure {n}"))
            } else {
                Ok(())
            }
        }
    }

    /// Always fails and records when each attempt started
    struct TimedProbe {
        starts: Arc<std::sync::Mutex<Vec<tokio::time::Instant>>>,
    }

    #[async_trait]
    impl HealthProbe for TimedProbe {
        fn name(&self) -> &str {
            "timed"
        }
        async fn probe(&self) -> Result<(), String> {
            if let Ok(mut starts) = self.starts.lock() {
                starts.push(tokio::time::Instant::now());
            }
            Err("down".into())
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl HealthProbe for HangingProbe {
        fn name(&self) -> &str {
            "hanging"
        }
        async fn probe(&self) -> Result<(), String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_never_probed_is_unknown() {
        let monitor = ServiceHealthMonitor::new(fast_config()).with_probe(HangingProbe);
        assert_eq!(monitor.status_of("hanging").await, HealthStatus::Unknown);
        assert_eq!(monitor.status_of("nonexistent").await, HealthStatus::Unknown);
        assert_eq!(monitor.snapshot().await[0].status, HealthStatus::Unknown);
        assert_eq!(monitor.last_check().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers() {
        let monitor = ServiceHealthMonitor::new(fast_config()).with_probe(CountingProbe {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let results = monitor.check_all().await;
        assert_eq!(results[0].status, HealthStatus::Healthy);
        assert!(monitor.last_check().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_unhealthy() {
        let monitor = ServiceHealthMonitor::new(fast_config()).with_probe(CountingProbe {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let results = monitor.check_all().await;
        assert_eq!(results[0].status, HealthStatus::Unhealthy);
        assert_eq!(results[0].error_message.as_deref(), Some("failure 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delays_grow_exponentially() {
        let starts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let monitor = ServiceHealthMonitor::new(HealthCheckConfig {
            retry: RetryPolicy {
                max_retries: 4,
                initial_backoff_ms: 10,
                backoff_multiplier: 2.0,
                max_backoff_ms: 30,
            },
            ..fast_config()
        })
        .with_probe(TimedProbe {
            starts: Arc::clone(&starts),
        });
        let results = monitor.check_all().await;
        assert_eq!(results[0].status, HealthStatus::Unhealthy);

        let starts = starts.lock().unwrap();
        let gaps: Vec<u128> = starts
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis())
            .collect();
        // 10, 20, then capped at 30
        assert_eq!(gaps, vec![10, 20, 30, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_times_out() {
        let monitor = ServiceHealthMonitor::new(fast_config()).with_probe(HangingProbe);
        monitor.check_all().await;
        let snapshot = monitor.snapshot().await;
        assert_eq!(snapshot[0].status, HealthStatus::Unhealthy);
        assert_eq!(snapshot[0].error_message.as_deref(), Some("probe timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ledger_and_engine_probes() {
        let backend = MemoryLedger::new().shared();
        let ledger = Arc::new(LedgerClient::new(backend.clone()));
        let monitor = ServiceHealthMonitor::new(fast_config())
            .with_probe(LedgerProbe::new(ledger))
            .with_probe(EngineProbe::new(Arc::new(EstimatorRegistry::with_defaults())));

        monitor.check_all().await;
        assert_eq!(monitor.status_of("ledger").await, HealthStatus::Healthy);
        assert_eq!(monitor.status_of("learning_engine").await, HealthStatus::Healthy);

        backend.set_available(false);
        monitor.check_all().await;
        assert_eq!(monitor.status_of("ledger").await, HealthStatus::Unhealthy);
        assert_eq!(monitor.services(), vec!["ledger", "learning_engine"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_registry_is_unhealthy() {
        let monitor = ServiceHealthMonitor::new(fast_config())
            .with_probe(EngineProbe::new(Arc::new(EstimatorRegistry::new())));
        monitor.check_all().await;
        assert_eq!(monitor.status_of("learning_engine").await, HealthStatus::Unhealthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_probes_on_interval() {
        let monitor = Arc::new(ServiceHealthMonitor::new(fast_config()).with_probe(CountingProbe {
            failures: 0,
            calls: AtomicU32::new(0),
        }));
        let handle = monitor.spawn();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(monitor.status_of("counting").await, HealthStatus::Healthy);
        handle.abort();
    }
}
