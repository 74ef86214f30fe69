use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file {} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// Merged settings do not deserialize into the settings types.
    #[error("settings do not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("{field} must be 0..={max}, got {value}")]
    OutOfRange { field: String, max: u64, value: u64 },
    #[error("streaming.{0} must be positive")]
    NotPositive(&'static str),
    #[error("no API key for model endpoint {base_url}; set model.api_key or RELAY_MODEL_API_KEY")]
    MissingApiKey { base_url: String },
}

pub type Result<T> = std::result::Result<T, SettingsError>;
