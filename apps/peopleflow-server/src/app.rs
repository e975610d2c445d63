//! Application state and initialization

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use peopleflow_core::AppConfig;
use peopleflow_tenant::{
    InMemoryAdminAccountService, InMemoryBaselineSeeder, InMemoryInviteMailer,
    InMemorySubscriptionService, InMemoryTenantRepository, LifecycleManager,
    ProvisioningOrchestrator, Reconciler, TenantCache, TenantRepository, UsageTracker,
};
use peopleflow_webhook::BillingWebhookProcessor;

use crate::cli::Args;
use crate::server::Server;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub repository: Arc<dyn TenantRepository>,
    pub lifecycle: Arc<LifecycleManager>,
    pub usage: Arc<UsageTracker>,
    pub cache: Arc<TenantCache>,
    pub provisioning: Arc<ProvisioningOrchestrator>,
    pub webhooks: Arc<BillingWebhookProcessor>,
    pub reconciler: Arc<Reconciler>,
}

impl AppState {
    /// Wire the engine together. Collaborator services (seeder, billing,
    /// accounts, mailer) use the in-process implementations; swap these for
    /// real integrations at deployment.
    pub fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing tenancy engine");

        let repository: Arc<InMemoryTenantRepository> =
            Arc::new(InMemoryTenantRepository::new());
        let usage = Arc::new(UsageTracker::new());
        let cache = Arc::new(TenantCache::new());

        let lifecycle = Arc::new(
            LifecycleManager::new(repository.clone())
                .with_purger(usage.clone())
                .with_purger(cache.clone()),
        );

        let provisioning = Arc::new(ProvisioningOrchestrator::new(
            repository.clone(),
            lifecycle.clone(),
            Arc::new(InMemoryBaselineSeeder::new()),
            Arc::new(InMemorySubscriptionService::new()),
            Arc::new(InMemoryAdminAccountService::new()),
            Arc::new(InMemoryInviteMailer::new()),
        ));

        let webhooks = Arc::new(BillingWebhookProcessor::new(
            lifecycle.clone(),
            config.tenancy.default_grace_period_days,
            config.reconciler.default_retention_days,
        ));

        let reconciler = Arc::new(Reconciler::new(
            repository.clone(),
            lifecycle.clone(),
            usage.clone(),
            config.reconciler.interval(),
            config.reconciler.default_retention_days,
        ));

        Ok(Self {
            config,
            repository,
            lifecycle,
            usage,
            cache,
            provisioning,
            webhooks,
            reconciler,
        })
    }
}

/// Main application
pub struct App {
    args: Args,
    state: AppState,
}

impl App {
    /// Build the application with all dependencies
    pub async fn build(args: Args) -> Result<Self> {
        let mut config = AppConfig::load().context("Failed to load configuration")?;
        if let Some(port) = args.port {
            config.server.port = port;
        }

        let state = AppState::new(config)?;
        Ok(Self { args, state })
    }

    /// Run the server and the reconciliation loop until shutdown.
    pub async fn run(self) -> Result<()> {
        info!("HTTP port: {}", self.state.config.server.port);
        info!(
            "Reconciliation interval: {}s",
            self.state.config.reconciler.interval_seconds
        );

        let shutdown = CancellationToken::new();

        let reconciler_handle = self.state.reconciler.clone().spawn(shutdown.clone());

        let server = Server::new(self.args, self.state)?;
        let result = server.run(shutdown.clone()).await;

        // Stop the reconciler regardless of how the server exited
        shutdown.cancel();
        reconciler_handle
            .await
            .context("Reconciliation loop panicked")?;

        result
    }
}
