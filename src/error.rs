use thiserror::Error;

/// Failure kinds that cross the collaborator boundary. Everything else is an
/// `anyhow` error with context.
#[derive(Debug, Error)]
pub enum MailMindError {
    #[error("auth token unavailable: {0}")]
    Auth(String),
    #[error("{service} request failed with status {status}")]
    Fetch { service: &'static str, status: u16 },
    #[error("{0} returned no text")]
    EmptyResponse(&'static str),
    #[error("malformed request item: {0}")]
    MalformedItem(String),
    #[error("cache storage unavailable: {0}")]
    Storage(String),
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
}
