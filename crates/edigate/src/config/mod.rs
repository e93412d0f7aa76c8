pub mod loader;
pub mod schema;
pub mod settings;

pub use loader::{load_config, load_config_from_str, load_settings_from_str};
pub use schema::{DatabaseConfig, GatewayConfig, PollerConfig, SchedulerConfig};
pub use settings::{
    ConnectionSettings, ErpSettings, EscalationSettings, FileSettingsProvider, ProviderSettings,
    SettingsProvider, StaticSettingsProvider, TelegramSettings,
};
