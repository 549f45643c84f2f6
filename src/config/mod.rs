pub mod loader;
pub mod schema;

pub use loader::{default_config_path, file_mtime, load_config, load_default_config, save_config, write_atomic};
pub use schema::{
    AccessConfig, AccessMode, AppConfig, LimitsConfig, PatternsConfig, ProviderConfig,
    SandboxConfig, TelegramConfig, WorkspaceConfig,
};
