//! Wiring of the core services from process configuration

use std::sync::Arc;

use dal_coordination::ledger::{MemoryLedger, RpcLedger, SharedLedgerBackend};
use dal_coordination::{
    EngineProbe, EstimatorRegistry, ExperimentOrchestrator, HttpProbe, LedgerClient, LedgerProbe,
    LedgerResult, ServiceHealthMonitor, SharedOrchestrator,
};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ServerConfig;

/// Everything `serve` runs
pub struct Services {
    pub orchestrator: SharedOrchestrator,
    pub monitor: Arc<ServiceHealthMonitor>,
    /// Set when no remote ledger is configured
    pub embedded_ledger: Option<Arc<MemoryLedger>>,
}

impl Services {
    /// Build the orchestrator, its ledger and its health monitor
    pub fn build(config: &ServerConfig) -> LedgerResult<Self> {
        let (backend, embedded_ledger) = match &config.ledger_url {
            Some(url) => {
                info!(url = %url, "Using remote ledger");
                let remote: SharedLedgerBackend =
                    Arc::new(RpcLedger::new(url.clone(), config.ledger_timeout())?);
                (remote, None)
            }
            None => {
                info!(block_size = config.ledger_block_size, "Using embedded ledger");
                let ledger = MemoryLedger::with_block_size(config.ledger_block_size).shared();
                let local: SharedLedgerBackend = ledger.clone();
                (local, Some(ledger))
            }
        };

        let ledger = Arc::new(LedgerClient::new(backend).with_retry_policy(config.retry.clone()));
        let registry = Arc::new(EstimatorRegistry::with_defaults());

        let mut monitor = ServiceHealthMonitor::new(config.health_check())
            .with_probe(LedgerProbe::new(ledger.clone()))
            .with_probe(EngineProbe::new(registry.clone()));
        for (name, url) in &config.probe_urls {
            monitor = monitor.with_probe(HttpProbe::new(name.clone(), url.clone()));
        }
        let monitor = Arc::new(monitor);

        let orchestrator = ExperimentOrchestrator::new(registry, ledger)
            .with_health_monitor(monitor.clone())
            .shared();

        Ok(Self {
            orchestrator,
            monitor,
            embedded_ledger,
        })
    }

    /// Start the background timers: health probes, voting timeouts and,
    /// for an embedded ledger, block sealing
    pub fn spawn_background(&self, config: &ServerConfig) -> Vec<JoinHandle<()>> {
        let mut tasks = vec![
            self.monitor.spawn(),
            self.orchestrator
                .spawn_voting_sweeper(config.voting_sweep_interval()),
        ];
        if let Some(ledger) = &self.embedded_ledger {
            tasks.push(ledger.spawn_block_producer(config.block_interval()));
        }
        tasks
    }
}
