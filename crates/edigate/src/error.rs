use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EdigateError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    #[error("Rendering error: {0}")]
    Render(#[from] crate::render::RenderError),

    #[error("ERP error: {0}")]
    Erp(#[from] crate::delivery::ErpError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Failed to parse config: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid pattern '{name}': {reason}")]
    InvalidPattern { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, EdigateError>;
