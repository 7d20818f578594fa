use anyhow::Result;
use async_trait::async_trait;

use crate::task_manager::TaskManager;

/// Base trait for providers that build components asynchronously.
///
/// # Example
///
/// ```no_run
/// use jdtsd::providers::traits::AsyncProvider;
///
/// struct GreetingProvider;
///
/// #[async_trait::async_trait]
/// impl AsyncProvider<String> for GreetingProvider {
///     async fn provide(&self) -> anyhow::Result<String> {
///         Ok("hello".to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait AsyncProvider<T> {
    async fn provide(&self) -> Result<T>;
}

/// Service started through the [`TaskManager`].
///
/// Higher priorities start first. A critical service failing to start
/// aborts startup; others are skipped with a warning.
///
/// # Example
///
/// ```no_run
/// use jdtsd::providers::traits::ServiceProvider;
/// use jdtsd::task_manager::TaskManager;
/// use anyhow::Result;
///
/// struct HeartbeatService;
///
/// #[async_trait::async_trait]
/// impl ServiceProvider for HeartbeatService {
///     async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
///         task_manager.spawn_task(self.name(), |token| async move {
///             token.cancelled().await;
///             Ok(())
///         });
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str { "HeartbeatService" }
/// }
/// ```
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()>;

    /// Service name for logging and task registration.
    fn name(&self) -> &'static str;

    fn priority(&self) -> i32 {
        0
    }

    fn is_critical(&self) -> bool {
        false
    }
}
