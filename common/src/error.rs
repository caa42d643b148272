use thiserror::Error;

/// Failure talking to one of the remote collaborators, or garbage coming back
/// from one. Never fatal: callers log it and keep their previous state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("unexpected status `{0}`")]
    Status(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

impl FetchError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::Malformed(detail.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("pwm channel `{channel}` rejected duty {duty}: {detail}")]
pub struct HardwareError {
    pub channel: &'static str,
    pub duty: u32,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("boundary `{name}` = {value}s is outside of a day")]
    BoundaryOutOfRange { name: &'static str, value: u32 },
    #[error("boundary `{later}` must come after `{earlier}`")]
    BoundaryOrder {
        earlier: &'static str,
        later: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum LampError {
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
