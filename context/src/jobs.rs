//! Tenant-aware background jobs.
//!
//! A job never inherits the context of whoever enqueued it. The envelope
//! carries the tenant id; the runner loads that tenant, checks it is still
//! active and runs the handler in a fresh execution with the tenant entered.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use errors::{ContextError, InactiveReason, TenancyError};
use serde::{Deserialize, Serialize};
use tenant_core::{TenantDirectory, TenantId};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::execution::TenantContext;
use crate::verifier::AccessVerifier;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job {job_id} references unknown tenant {tenant_id}")]
    TenantNotFound { job_id: Uuid, tenant_id: String },

    #[error("Job {job_id} skipped: tenant {tenant_id} is {reason:?}")]
    TenantInactive {
        job_id: Uuid,
        tenant_id: String,
        reason: InactiveReason
    },

    #[error("Job queue is full")]
    QueueFull,

    #[error("Job queue is closed")]
    QueueClosed,

    #[error("Job {job_id} failed: {reason}")]
    Failed { job_id: Uuid, reason: String },

    #[error(transparent)]
    Tenancy(#[from] TenancyError),

    #[error(transparent)]
    Context(#[from] ContextError)
}

impl JobError {
    fn status(&self) -> &'static str {
        match self {
            Self::TenantNotFound { .. } => "skipped_missing_tenant",
            Self::TenantInactive { .. } => "skipped_inactive",
            Self::QueueFull | Self::QueueClosed => "rejected",
            Self::Failed { .. } | Self::Tenancy(_) | Self::Context(_) => "failed"
        }
    }
}

/// Serializable job envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantJob<P> {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub kind: String,
    pub payload: P,
    pub enqueued_at: DateTime<Utc>
}

impl<P> TenantJob<P> {
    pub fn new(tenant_id: TenantId, kind: impl Into<String>, payload: P) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            kind: kind.into(),
            payload,
            enqueued_at: Utc::now()
        }
    }

    /// Build a job for the tenant active in the calling execution.
    pub fn for_current(kind: impl Into<String>, payload: P) -> Result<Self, TenancyError> {
        let kind = kind.into();
        let tenant = TenantContext::require(&kind)?;
        Ok(Self::new(tenant.id.clone(), kind, payload))
    }
}

#[async_trait]
pub trait JobHandler<P: Send + Sync>: Send + Sync {
    /// Runs with the job's tenant active.
    async fn handle(&self, job: &TenantJob<P>) -> Result<(), JobError>;
}

/// Producer side of a bounded job channel.
#[derive(Debug)]
pub struct JobQueue<P> {
    sender: mpsc::Sender<TenantJob<P>>
}

impl<P> Clone for JobQueue<P> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone()
        }
    }
}

impl<P: Send + 'static> JobQueue<P> {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<TenantJob<P>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueue without waiting; a full queue is reported to the caller.
    pub fn enqueue(&self, job: TenantJob<P>) -> Result<Uuid, JobError> {
        let id = job.id;
        let tenant_id = job.tenant_id.clone();
        self.sender.try_send(job).map_err(|err| {
            let err = match err {
                mpsc::error::TrySendError::Full(_) => JobError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => JobError::QueueClosed
            };
            metrics::counter!("tenancy_jobs_total", "status" => err.status()).increment(1);
            err
        })?;
        info!(job_id = %id, tenant_id = %tenant_id, "Job enqueued");
        Ok(id)
    }

    pub fn enqueue_for_current(&self, kind: impl Into<String>, payload: P) -> Result<Uuid, JobError> {
        self.enqueue(TenantJob::for_current(kind, payload)?)
    }
}

/// Consumer side: re-establishes each job's tenant before running it.
pub struct JobRunner<P> {
    directory: Arc<dyn TenantDirectory>,
    verifier: AccessVerifier,
    handler: Arc<dyn JobHandler<P>>
}

impl<P: Send + Sync + 'static> JobRunner<P> {
    pub fn new(directory: Arc<dyn TenantDirectory>, handler: Arc<dyn JobHandler<P>>) -> Self {
        Self {
            directory,
            verifier: AccessVerifier::new(),
            handler
        }
    }

    /// Run a single job to completion.
    pub async fn run_one(&self, job: &TenantJob<P>) -> Result<(), JobError> {
        let span = info_span!("job", job_id = %job.id, kind = %job.kind, tenant_id = %job.tenant_id);
        let result = self.execute(job).instrument(span).await;
        let status = match &result {
            Ok(()) => "succeeded",
            Err(err) => err.status()
        };
        metrics::counter!("tenancy_jobs_total", "status" => status).increment(1);
        result
    }

    async fn execute(&self, job: &TenantJob<P>) -> Result<(), JobError> {
        let tenant = self
            .directory
            .get(&job.tenant_id)
            .await?
            .ok_or_else(|| JobError::TenantNotFound {
                job_id: job.id,
                tenant_id: job.tenant_id.to_string()
            })?;

        self.verifier
            .verify_tenant_active(&tenant)
            .map_err(|reason| JobError::TenantInactive {
                job_id: job.id,
                tenant_id: tenant.id.to_string(),
                reason
            })?;

        TenantContext::run_as(Arc::new(tenant), self.handler.handle(job)).await?
    }

    /// Drain `receiver` until every producer is dropped.
    pub fn start(self, mut receiver: mpsc::Receiver<TenantJob<P>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Job runner started");
            while let Some(job) = receiver.recv().await {
                match self.run_one(&job).await {
                    Ok(()) => info!(job_id = %job.id, "Job completed"),
                    Err(
                        err @ (JobError::TenantInactive { .. } | JobError::TenantNotFound { .. })
                    ) => warn!(error = %err, "Job skipped"),
                    Err(err) => error!(job_id = %job.id, error = %err, "Job failed")
                }
            }
            info!("Job runner stopped");
        })
    }

    /// Create a queue and start a runner draining it.
    pub fn spawn(self, capacity: usize) -> (JobQueue<P>, JoinHandle<()>) {
        let (queue, receiver) = JobQueue::bounded(capacity);
        (queue, self.start(receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tenant_core::{InMemoryTenantDirectory, Subdomain, Tenant, TenantStatus};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, Option<String>)>>
    }

    #[async_trait]
    impl JobHandler<String> for Recorder {
        async fn handle(&self, job: &TenantJob<String>) -> Result<(), JobError> {
            tokio::task::yield_now().await;
            let active = TenantContext::current_id().map(TenantId::into_inner);
            self.seen.lock().push((job.payload.clone(), active));
            if job.payload == "boom" {
                return Err(JobError::Failed {
                    job_id: job.id,
                    reason: "index unavailable".to_string()
                });
            }
            Ok(())
        }
    }

    fn tid(id: &str) -> TenantId {
        TenantId::new(id.to_string()).unwrap()
    }

    async fn directory() -> Arc<InMemoryTenantDirectory> {
        let directory = Arc::new(InMemoryTenantDirectory::new());
        for (id, status) in [
            ("acme", TenantStatus::Active),
            ("beta", TenantStatus::Active),
            ("gone", TenantStatus::Cancelled)
        ] {
            directory
                .upsert(Tenant::new(tid(id), id, Subdomain::parse(id).unwrap()).with_status(status))
                .await
                .unwrap();
        }
        directory
    }

    #[tokio::test]
    async fn test_job_runs_with_its_own_tenant() {
        let recorder = Arc::new(Recorder::default());
        let runner = JobRunner::new(directory().await, recorder.clone());

        let job = TenantJob::new(tid("acme"), "reindex", "catalog".to_string());
        runner.run_one(&job).await.unwrap();

        let seen = recorder.seen.lock().clone();
        assert_eq!(seen, vec![("catalog".to_string(), Some("acme".to_string()))]);
        assert!(TenantContext::current().is_none());
    }

    #[tokio::test]
    async fn test_job_ignores_enqueuer_context() {
        let recorder = Arc::new(Recorder::default());
        let runner = JobRunner::new(directory().await, recorder.clone());
        let beta = Arc::new(Tenant::new(tid("beta"), "beta", Subdomain::parse("beta").unwrap()));

        TenantContext::run_as(beta, async {
            let job = TenantJob::new(tid("acme"), "reindex", "x".to_string());
            runner.run_one(&job).await.unwrap();
            assert_eq!(TenantContext::current_id(), Some(tid("beta")));
        })
        .await
        .unwrap();

        assert_eq!(recorder.seen.lock()[0].1.as_deref(), Some("acme"));
    }

    #[tokio::test]
    async fn test_inactive_and_missing_tenants_are_skipped() {
        let recorder = Arc::new(Recorder::default());
        let runner = JobRunner::new(directory().await, recorder.clone());

        let cancelled = TenantJob::new(tid("gone"), "reindex", "x".to_string());
        assert!(matches!(
            runner.run_one(&cancelled).await,
            Err(JobError::TenantInactive {
                reason: InactiveReason::Cancelled,
                ..
            })
        ));

        let missing = TenantJob::new(tid("ghost"), "reindex", "x".to_string());
        assert!(matches!(
            runner.run_one(&missing).await,
            Err(JobError::TenantNotFound { .. })
        ));
        assert!(recorder.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_job_still_releases_context() {
        let runner = JobRunner::new(directory().await, Arc::new(Recorder::default()));
        let job = TenantJob::new(tid("acme"), "reindex", "boom".to_string());
        assert!(matches!(runner.run_one(&job).await, Err(JobError::Failed { .. })));
        assert!(TenantContext::current().is_none());
    }

    #[test]
    fn test_for_current_requires_active_tenant() {
        let err = TenantJob::for_current("reindex", ()).unwrap_err();
        assert!(matches!(err, TenancyError::NoTenantActive { .. }));
    }

    #[test]
    fn test_envelope_serializes_tenant_id() {
        let job = TenantJob::new(tid("acme"), "reindex", 7_u32);
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["tenant_id"], "acme");

        let back: TenantJob<u32> = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }

    #[tokio::test]
    async fn test_full_queue_is_reported() {
        let (queue, _receiver) = JobQueue::bounded(1);
        queue
            .enqueue(TenantJob::new(tid("acme"), "reindex", ()))
            .unwrap();
        assert!(matches!(
            queue.enqueue(TenantJob::new(tid("acme"), "reindex", ())),
            Err(JobError::QueueFull)
        ));
    }

    #[tokio::test]
    async fn test_spawned_runner_processes_jobs_for_each_tenant() {
        let recorder = Arc::new(Recorder::default());
        let runner = JobRunner::new(directory().await, recorder.clone());
        let (queue, handle) = runner.spawn(16);

        for i in 0..6 {
            let tenant = if i % 2 == 0 { "acme" } else { "beta" };
            queue
                .enqueue(TenantJob::new(tid(tenant), "reindex", format!("{tenant}-{i}")))
                .unwrap();
        }
        drop(queue);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        let seen = recorder.seen.lock().clone();
        assert_eq!(seen.len(), 6);
        for (payload, active) in seen {
            let active = active.unwrap();
            assert!(payload.starts_with(&active), "{payload} ran as {active}");
        }
    }
}
