//! Best-effort cache warm-up after a tenant switch.

use tally_core::{ClientError, ClientResult, DataKind, TenantId};
use tokio::task::JoinHandle;
use tracing::warn;

/// Outcome of every preload started by one switch.
#[derive(Debug, Clone, PartialEq)]
pub struct PreloadReport {
    pub tenant_id: TenantId,
    pub outcomes: Vec<(DataKind, ClientResult<()>)>,
}

impl PreloadReport {
    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(|(_, r)| r.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&DataKind, &ClientError)> {
        self.outcomes
            .iter()
            .filter_map(|(kind, r)| r.as_ref().err().map(|e| (kind, e)))
    }
}

/// The preloads a switch kicked off. Dropping the handle does not cancel them.
#[derive(Debug)]
pub struct PreloadHandle {
    tenant_id: TenantId,
    tasks: Vec<(DataKind, JoinHandle<ClientResult<()>>)>,
}

impl PreloadHandle {
    pub(crate) fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            tasks: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, kind: DataKind, task: JoinHandle<ClientResult<()>>) {
        self.tasks.push((kind, task));
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn kinds(&self) -> Vec<DataKind> {
        self.tasks.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Waits for every preload to finish.
    pub async fn settled(self) -> PreloadReport {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        for (kind, task) in self.tasks {
            let outcome = match task.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "preload task did not complete");
                    Err(ClientError::http(500, "Preload was interrupted"))
                }
            };
            outcomes.push((kind, outcome));
        }
        PreloadReport {
            tenant_id: self.tenant_id,
            outcomes,
        }
    }
}
