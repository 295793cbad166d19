/// Forwarder error handling
/// - Construction failures (`ClientBuild`, `InvalidEndpoint`) surface before any
/// child process exists; everything else surfaces from `flush`.
#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(reqwest::Error),
    #[error("invalid logging endpoint `{0}`")]
    InvalidEndpoint(String),
    #[error("failed to obtain access token: {0}")]
    Credentials(String),
    #[error("request to logging endpoint failed: {0}")]
    Transport(reqwest::Error),
    #[error("logging endpoint rejected write with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("forwarder is closed")]
    Closed,
}

impl ForwarderError {
    /// Whether another attempt of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ForwarderError::Transport(_) => true,
            ForwarderError::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
