use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid config {key}: {reason}")]
    InvalidConfig { key: &'static str, reason: String },

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("batcher {0} is shut down")]
    BatcherClosed(&'static str),
}
