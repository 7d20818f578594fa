//! # jdtsd
//!
//! A Linux daemon driving a JDTS contact-less temperature sensor.
//!
//! Clients request the sensor's power state and measurement mode through a
//! [`DesiredStateStore`](desired_state::DesiredStateStore). A background
//! [`ControlLoop`](control_loop::ControlLoop) applies pending requests to the
//! device, polls one sample per period and hands the outcome to the
//! presentation side without blocking on it.
//!
//! ## Architecture
//!
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) - service lifecycle
//! - [`EventBus`](event::EventBus) - inter-service communication
//! - [`AppState`](app_context::AppState) - store, sensor proxy and latest status
//! - [`SensorServiceProxy`](proxy::SensorServiceProxy) - device access that
//!   never fails, only reports `None`/`false`
//!
//! ## Example
//!
//! ```no_run
//! use jdtsd::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load_or_default(None).await?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()
//!         .run()
//!         .await
//! }
//! ```

pub mod app_context;
pub mod application;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod control_loop;
pub mod coordinator;
pub mod desired_state;
pub mod drivers;
pub mod event;
pub mod interface;
pub mod providers;
pub mod proxy;
pub mod retry;
pub mod sample;
pub mod task_manager;
