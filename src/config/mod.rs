pub mod app;
pub mod error;
pub mod loader;
pub mod server;

pub use app::{AppConfig, ClientSettings, LEGACY_SERVER_NAME};
pub use error::ConfigError;
pub use loader::{ConfigFormat, LaunchTarget, ensure_env_loaded, load_config};
pub use server::{ServerDescriptor, ServerTransport};
