//! Execution-scoped tenant context.
//!
//! Every unit of work (an HTTP request, one background job run) gets its own
//! slot through a tokio task-local. Concurrent executions never observe each
//! other's tenant, and code running outside any execution sees no tenant.
//!
//! Within an execution, activations form a stack. [`TenantContext::enter`]
//! hands out a [`TenantGuard`]; releasing it (explicitly through
//! [`TenantGuard::exit`] or by dropping it on an early return, a panic or a
//! cancelled future) restores whatever was active before, including "none".

use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use errors::{ContextError, TenancyError, TenancyResult};
use tenant_core::{Tenant, TenantId};
use tracing::{debug, error, warn};

static NEXT_EXECUTION: AtomicU64 = AtomicU64::new(1);
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static EXECUTION: Execution;
}

struct Execution {
    id: u64,
    frames: RefCell<Frames>
}

impl Execution {
    fn new() -> Self {
        Self {
            id: NEXT_EXECUTION.fetch_add(1, Ordering::Relaxed),
            frames: RefCell::new(Frames::default())
        }
    }
}

#[derive(Default)]
struct Frames {
    current: Option<Arc<Tenant>>,
    stack: Vec<Frame>
}

struct Frame {
    generation: u64,
    previous: Option<Arc<Tenant>>
}

/// Accessors for the current execution's tenant slot.
pub struct TenantContext;

impl TenantContext {
    /// Run `fut` as a new execution that starts with no active tenant.
    pub async fn scope<F: Future>(fut: F) -> F::Output {
        EXECUTION.scope(Execution::new(), fut).await
    }

    /// Synchronous counterpart of [`TenantContext::scope`].
    pub fn sync_scope<R>(f: impl FnOnce() -> R) -> R {
        EXECUTION.sync_scope(Execution::new(), f)
    }

    /// Run `fut` in a fresh execution with `tenant` active for its whole
    /// duration. This is how background work re-establishes its tenant.
    pub async fn run_as<F: Future>(tenant: Arc<Tenant>, fut: F) -> Result<F::Output, ContextError> {
        Self::scope(async move {
            let guard = Self::enter(tenant)?;
            let output = fut.await;
            guard.exit()?;
            Ok(output)
        })
        .await
    }

    /// Activate `tenant` for the current execution.
    pub fn enter(tenant: Arc<Tenant>) -> Result<TenantGuard, ContextError> {
        EXECUTION
            .try_with(|execution| {
                let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
                let mut frames = execution.frames.borrow_mut();
                let previous = frames.current.replace(Arc::clone(&tenant));
                frames.stack.push(Frame {
                    generation,
                    previous
                });
                debug!(
                    tenant_id = %tenant.id,
                    depth = frames.stack.len(),
                    execution = execution.id,
                    "Entered tenant context"
                );
                TenantGuard {
                    execution_id: execution.id,
                    generation,
                    released: false
                }
            })
            .map_err(|_| ContextError::NoExecutionScope)
    }

    pub fn current() -> Option<Arc<Tenant>> {
        EXECUTION
            .try_with(|execution| execution.frames.borrow().current.clone())
            .ok()
            .flatten()
    }

    pub fn current_id() -> Option<TenantId> {
        Self::current().map(|tenant| tenant.id.clone())
    }

    /// The active tenant, or `NoTenantActive` for `record_type`.
    pub fn require(record_type: &str) -> TenancyResult<Arc<Tenant>> {
        Self::current().ok_or_else(|| {
            error!(record_type, "Tenant required but no tenant is active");
            TenancyError::NoTenantActive {
                record_type: record_type.to_string()
            }
        })
    }

    pub fn in_execution() -> bool {
        EXECUTION.try_with(|_| ()).is_ok()
    }

    /// Number of open activations in the current execution.
    pub fn depth() -> usize {
        EXECUTION
            .try_with(|execution| execution.frames.borrow().stack.len())
            .unwrap_or(0)
    }
}

/// Token returned by [`TenantContext::enter`].
///
/// Guards are released in LIFO order. Releasing an outer guard while inner
/// ones are still open unwinds the inner activations too; the inner guards
/// then become stale and releasing them is a no-op error.
#[must_use = "dropping the guard immediately exits the tenant context"]
#[derive(Debug)]
pub struct TenantGuard {
    execution_id: u64,
    generation: u64,
    released: bool
}

impl TenantGuard {
    /// Restore the tenant that was active before the matching `enter`.
    pub fn exit(mut self) -> Result<(), ContextError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), ContextError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let generation = self.generation;
        let guard_execution = self.execution_id;

        EXECUTION
            .try_with(|execution| {
                if execution.id != guard_execution {
                    return Err(ContextError::ForeignExecution {
                        guard_execution,
                        current_execution: execution.id
                    });
                }

                let mut frames = execution.frames.borrow_mut();
                let Some(position) = frames
                    .stack
                    .iter()
                    .rposition(|frame| frame.generation == generation)
                else {
                    return Err(ContextError::StaleGuard { generation });
                };

                let inner = frames.stack.len() - position - 1;
                if inner > 0 {
                    warn!(
                        unwound = inner,
                        execution = execution.id,
                        "Tenant guard released out of order, unwinding inner activations"
                    );
                }

                let mut unwound = frames.stack.split_off(position);
                let frame = unwound.remove(0);
                frames.current = frame.previous;
                debug!(depth = frames.stack.len(), execution = execution.id, "Exited tenant context");
                Ok(())
            })
            .map_err(|_| ContextError::NoExecutionScope)?
    }
}

impl Drop for TenantGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.release() {
            Ok(()) => {}
            // The execution already ended and took its slot with it.
            Err(ContextError::NoExecutionScope) => {}
            Err(ContextError::StaleGuard { .. }) => {}
            Err(err) => error!(error = %err, "Failed to release tenant guard")
        }
    }
}
