//! Task management for async service lifecycle.

use std::{future::Future, time::Duration};

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default upper bound on how long a task may take to wind down.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the daemon's background tasks.
///
/// Every task receives a child of the global cancellation token; shutting
/// down cancels the parent and waits for each task up to the shutdown
/// timeout. Tasks that exceed it are detached and reported.
pub struct TaskManager {
    tasks: Vec<TaskInfo>,
    pub global_token: CancellationToken,
    shutdown_timeout: Duration,
}

struct TaskInfo {
    name: String,
    handle: JoinHandle<Result<()>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::with_shutdown_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    pub fn with_shutdown_timeout(shutdown_timeout: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            global_token: CancellationToken::new(),
            shutdown_timeout,
        }
    }

    /// Spawns and registers a task.
    pub fn spawn_task<F, Fut>(&mut self, name: impl Into<String>, task_fn: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let task_token = self.global_token.child_token();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let result = task_fn(task_token).await;
            match &result {
                Ok(()) => info!("Task '{task_name}' completed"),
                Err(e) => error!("Task '{task_name}' failed: {e:#}"),
            }
            result
        });

        info!("Task '{name}' spawned");
        self.tasks.push(TaskInfo { name, handle });
    }

    /// Cancels every task and waits for them in spawn order.
    ///
    /// Returns the first failure, panic or timeout encountered.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        info!("Stopping all {} tasks", self.tasks.len());
        self.global_token.cancel();

        let mut first_error = None;
        for TaskInfo { name, handle } in self.tasks.drain(..) {
            let error = match tokio::time::timeout(self.shutdown_timeout, handle).await {
                Ok(Ok(Ok(()))) => continue,
                Ok(Ok(Err(e))) => {
                    warn!("Task '{name}' failed during shutdown: {e}");
                    e.context(format!("Task '{name}' failed"))
                }
                Ok(Err(e)) => {
                    error!("Task '{name}' panicked: {e}");
                    anyhow::anyhow!("Task '{name}' panicked: {e}")
                }
                Err(_) => {
                    error!(
                        "Task '{name}' did not stop within {:?}, leaving it behind",
                        self.shutdown_timeout
                    );
                    anyhow::anyhow!("Task '{name}' shutdown timeout exceeded")
                }
            };
            first_error.get_or_insert(error);
        }

        match first_error {
            Some(error) => Err(error).context("One or more tasks failed during shutdown"),
            None => {
                info!("All tasks stopped");
                Ok(())
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .iter()
            .any(|task| task.name == name && !task.handle.is_finished())
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    #[tokio::test]
    async fn shutdown_cancels_running_tasks() {
        let mut task_manager = TaskManager::new();
        let observed = Arc::new(AtomicBool::new(false));
        let flag = observed.clone();

        task_manager.spawn_task("waiter", move |token| async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(task_manager.active_count(), 1);
        assert!(task_manager.is_running("waiter"));

        assert_ok!(task_manager.shutdown_all().await);
        assert!(observed.load(Ordering::SeqCst));
        assert_eq!(task_manager.active_count(), 0);
    }

    #[tokio::test]
    async fn failing_task_is_reported() {
        let mut task_manager = TaskManager::new();
        task_manager.spawn_task("ok", |_| async { Ok(()) });
        task_manager.spawn_task("broken", |_| async { anyhow::bail!("device gone") });

        let err = task_manager.shutdown_all().await.unwrap_err();
        assert!(format!("{err:#}").contains("device gone"));
    }

    #[tokio::test]
    async fn stuck_task_times_out() {
        let mut task_manager = TaskManager::with_shutdown_timeout(Duration::from_millis(20));
        task_manager.spawn_task("stuck", |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let err = assert_err!(task_manager.shutdown_all().await);
        assert!(format!("{err:#}").contains("timeout"));
    }

    #[tokio::test]
    async fn tasks_get_child_tokens() {
        let mut task_manager = TaskManager::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        task_manager.spawn_task("child", move |token| async move {
            tx.send(token.is_cancelled()).ok();
            Ok(())
        });
        assert!(!rx.await.unwrap());
        task_manager.shutdown_all().await.unwrap();
    }
}
