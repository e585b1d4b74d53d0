use std::sync::Arc;

use dbpulse_collector::connector::ConnectorFactory;
use dbpulse_collector::tunnel::TunnelConfig;
use dbpulse_collector::vault::CredentialVault;

use crate::generator::SuggestionGenerator;
use crate::runs::RunRegistry;
use crate::store::TelemetryStore;
use crate::workflows::{SuggestionOrchestrator, SyncOrchestrator};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TelemetryStore>,
    pub vault: Arc<CredentialVault>,
    pub connectors: Arc<dyn ConnectorFactory>,
    pub sync: Arc<SyncOrchestrator>,
    pub suggestions: Arc<SuggestionOrchestrator>,
    pub runs: Arc<RunRegistry>,
    pub tunnel: Option<TunnelConfig>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        vault: Arc<CredentialVault>,
        connectors: Arc<dyn ConnectorFactory>,
        generator: Arc<dyn SuggestionGenerator>,
        tunnel: Option<TunnelConfig>,
        slow_query_threshold_ms: f64,
    ) -> Self {
        let sync = Arc::new(SyncOrchestrator::new(
            store.clone(),
            vault.clone(),
            connectors.clone(),
            tunnel.clone(),
        ));
        let suggestions = Arc::new(SuggestionOrchestrator::new(
            store.clone(),
            generator,
            slow_query_threshold_ms,
        ));

        Self {
            store,
            vault,
            connectors,
            sync,
            suggestions,
            runs: Arc::new(RunRegistry::new()),
            tunnel,
        }
    }
}
