//! Service providers started by the coordinator.

pub mod app_state;
pub mod control;
pub mod dbus;
pub mod presentation;
pub mod traits;

pub use app_state::AppStateProvider;
pub use control::ControlLoopServiceProvider;
pub use dbus::DBusServiceProvider;
pub use presentation::PresentationServiceProvider;
pub use traits::{AsyncProvider, ServiceProvider};
