//! Focus-regained trigger for the account-deletion check.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::context::TenantContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Runs [`TenantContext::on_focus_regained`] on every hidden → visible
/// transition of the watched channel. Stops when the sender is dropped or
/// the watcher is.
pub struct FocusWatcher {
    task: JoinHandle<()>,
}

impl FocusWatcher {
    pub fn spawn(context: TenantContext, mut visibility: watch::Receiver<Visibility>) -> Self {
        let mut last = *visibility.borrow_and_update();
        let task = tokio::spawn(async move {
            while visibility.changed().await.is_ok() {
                let now = *visibility.borrow_and_update();
                if last == Visibility::Hidden && now == Visibility::Visible {
                    let outcome = context.on_focus_regained().await;
                    debug!(?outcome, "focus regained");
                }
                last = now;
            }
        });
        Self { task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for FocusWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
