use std::sync::Arc;

use config::{Config, TenancyConfig};
use context::{AccessVerifier, JobQueue, JobRunner, ResolverSettings, TenantResolver};
use metrics_exporter_prometheus::PrometheusHandle;
use tenant_core::TenantDirectory;
use tokio::task::JoinHandle;
use tracing::info;

use crate::catalog::{ProductStore, ReindexRequest, Reindexer};

/// Shared state handed to every handler and middleware.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<TenantResolver>,
    pub verifier: AccessVerifier,
    pub directory: Arc<dyn TenantDirectory>,
    pub tenancy: Arc<TenancyConfig>,
    pub products: Arc<ProductStore>,
    pub jobs: JobQueue<ReindexRequest>,
    pub metrics: Option<PrometheusHandle>
}

/// Application state plus the background pieces that outlive a request.
pub struct Services {
    pub state: AppState,
    pub reindexer: Arc<Reindexer>,
    pub job_runner: JoinHandle<()>
}

impl Services {
    /// Wire the resolver, repositories and job runner. Must be called inside
    /// a tokio runtime because the job runner is spawned here.
    pub fn start(config: &Config, directory: Arc<dyn TenantDirectory>, metrics: Option<PrometheusHandle>) -> Self {
        let resolver = TenantResolver::new(directory.clone(), ResolverSettings::from(&config.tenancy));
        let products = Arc::new(ProductStore::new());
        let reindexer = Arc::new(Reindexer::new(products.clone()));

        let (jobs, job_runner) =
            JobRunner::new(directory.clone(), reindexer.clone()).spawn(config.server.job_queue_capacity);
        info!(
            base_domain = %config.tenancy.base_domain,
            dev_fallback = ?config.tenancy.dev_fallback,
            "Services started"
        );

        Self {
            state: AppState {
                resolver: Arc::new(resolver),
                verifier: AccessVerifier::new(),
                directory,
                tenancy: Arc::new(config.tenancy.clone()),
                products,
                jobs,
                metrics
            },
            reindexer,
            job_runner
        }
    }
}
