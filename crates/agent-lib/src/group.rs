//! Supervision of a set of long-running loops that live and die together

use anyhow::{anyhow, Result};
use std::future::Future;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs tasks under one cancellation token.
///
/// The first task to fail cancels the token; [`TaskGroup::wait`] still
/// waits for every task and then reports that first error.
pub struct TaskGroup {
    cancel: CancellationToken,
    tasks: JoinSet<(&'static str, Result<()>)>,
}

impl TaskGroup {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            tasks: JoinSet::new(),
        }
    }

    /// Token shared by every task of the group
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.spawn(async move { (name, task.await) });
    }

    pub async fn wait(mut self) -> Result<()> {
        let mut first_error = None;

        while let Some(joined) = self.tasks.join_next().await {
            let (name, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => ("unknown", Err(anyhow!("task panicked: {}", e))),
                Err(_) => continue,
            };

            match result {
                Ok(()) => debug!(task = name, "Task finished"),
                Err(e) => {
                    if first_error.is_none() {
                        warn!(task = name, error = %e, "Task failed, cancelling the group");
                        self.cancel.cancel();
                        first_error = Some(e.context(format!("{} failed", name)));
                    } else {
                        debug!(task = name, error = %e, "Task failed after cancellation");
                    }
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_tasks_exit_cleanly_on_cancel() {
        let cancel = CancellationToken::new();
        let mut group = TaskGroup::new(cancel.clone());
        for name in ["a", "b"] {
            let token = group.token();
            group.spawn(name, async move {
                token.cancelled().await;
                Ok(())
            });
        }

        cancel.cancel();
        assert!(group.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_first_error_cancels_the_rest() {
        let cancel = CancellationToken::new();
        let mut group = TaskGroup::new(cancel.clone());

        let token = group.token();
        group.spawn("waiter", async move {
            token.cancelled().await;
            Ok(())
        });
        group.spawn("failer", async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(anyhow!("boom"))
        });

        let err = tokio::time::timeout(Duration::from_secs(5), group.wait())
            .await
            .unwrap()
            .unwrap_err();

        assert!(cancel.is_cancelled());
        assert!(format!("{:#}", err).contains("boom"));
        assert!(err.to_string().contains("failer"));
    }

    #[tokio::test]
    async fn test_only_first_error_is_reported() {
        let mut group = TaskGroup::new(CancellationToken::new());
        group.spawn("first", async { Err(anyhow!("first error")) });
        let token = group.token();
        group.spawn("second", async move {
            token.cancelled().await;
            Err(anyhow!("second error"))
        });

        let err = group.wait().await.unwrap_err();
        assert!(format!("{:#}", err).contains("first error"));
    }
}
