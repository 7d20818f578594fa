//! Application entry point and builder.

use crate::{config::ConfigManager, coordinator::SystemCoordinator};
use anyhow::Result;

/// Runs the daemon: initialize, start services, wait for shutdown.
///
/// # Example
///
/// ```no_run
/// use jdtsd::application::Application;
/// use jdtsd::config::ConfigManager;
///
/// # async fn example() -> anyhow::Result<()> {
/// let mut app = Application::builder()
///     .with_config_manager(ConfigManager::load(None).await?)
///     .build();
///
/// app.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Application {
    pub coordinator: SystemCoordinator,
    config_manager: ConfigManager,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    pub async fn run(&mut self) -> Result<()> {
        self.coordinator
            .initialize(self.config_manager.clone())
            .await?;

        self.coordinator.start_all_services().await?;

        self.coordinator.run_main_loop().await
    }
}

pub struct ApplicationBuilder {
    config_manager: Option<ConfigManager>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            config_manager: None,
        }
    }

    pub fn with_config_manager(mut self, config_manager: ConfigManager) -> Self {
        self.config_manager = Some(config_manager);
        self
    }

    /// Builds the application, falling back to built-in defaults when no
    /// configuration manager was given.
    pub fn build(self) -> Application {
        Application {
            coordinator: SystemCoordinator::new(),
            config_manager: self
                .config_manager
                .unwrap_or_else(ConfigManager::from_defaults),
        }
    }
}
