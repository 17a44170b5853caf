use thiserror::Error;

#[derive(Error, Debug)]
pub enum CouncilError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CouncilError {
    /// Whether a federation or router boundary may retry this error
    /// against another candidate. Validation and auth failures are final.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            CouncilError::Unavailable(_)
                | CouncilError::Timeout(_)
                | CouncilError::RateLimited(_)
                | CouncilError::Internal(_)
        )
    }
}

pub type CouncilResult<T> = Result<T, CouncilError>;
