use crate::driver::ChannelBinding;
use thiserror::Error;

/// Application level error type used throughout the crate.
///
/// Every variant except [`VigilError::Transport`] and the I/O wrappers is a
/// configuration error: it is raised synchronously by a registration or
/// resolution call and never travels through an [`Outcome`](crate::Outcome).
#[derive(Error, Debug)]
pub enum VigilError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error while parsing JSON configuration files
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identifier is not registered in the stage it was looked up in
    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    /// Driver channel is not registered
    #[error("Unknown driver channel: {0}")]
    UnknownChannel(ChannelBinding),

    /// Identifier is already registered in the stage
    #[error("Signal already registered: {0}")]
    DuplicateSignal(String),

    /// Driver channel is already registered
    #[error("Driver channel already registered: {0}")]
    DuplicateChannel(ChannelBinding),

    /// Required parameter is absent from a parameter set
    #[error("Missing parameter '{key}' for {context}")]
    MissingParameter { key: &'static str, context: String },

    /// Parameter is present but cannot be parsed
    #[error("Invalid value '{value}' for parameter '{key}': {reason}")]
    InvalidParameter {
        key: String,
        value: String,
        reason: String,
    },

    /// Mask rule would make an alarm (transitively) mask itself
    #[error("Mask cycle: alarm '{alarm}' would be masked through '{via}'")]
    MaskCycle { alarm: String, via: String },

    /// Hardware transport could not be opened
    #[error("Transport error: {0}")]
    Transport(String),
}

impl VigilError {
    /// True for the configuration error taxonomy (bad references, duplicates,
    /// unparsable parameters, mask cycles).
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            VigilError::Config(_)
                | VigilError::UnknownSignal(_)
                | VigilError::UnknownChannel(_)
                | VigilError::DuplicateSignal(_)
                | VigilError::DuplicateChannel(_)
                | VigilError::MissingParameter { .. }
                | VigilError::InvalidParameter { .. }
                | VigilError::MaskCycle { .. }
        )
    }
}

/// Convenient alias over [`Result`] using [`VigilError`]
pub type Result<T> = std::result::Result<T, VigilError>;
