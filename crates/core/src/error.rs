use thiserror::Error;

pub type FlowResult<T> = Result<T, FlowError>;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Audience resolution error: {0}")]
    Audience(String),

    #[error("Interaction log error: {0}")]
    Interactions(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
