use thiserror::Error;

/// Failures of the CAS login handshake. Fatal for the run unless a snapshot
/// fallback exists.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login response is missing {0}")]
    MissingToken(&'static str),
    #[error("network error during login: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failures fetching one student's profile. Logged and skipped; never aborts
/// the batch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("profile request for {username} returned HTTP {status}")]
    Status {
        username: String,
        status: reqwest::StatusCode,
    },
    #[error("session expired twice while fetching {username}")]
    SessionExpired { username: String },
    #[error("network error fetching {username}: {source}")]
    Transport {
        username: String,
        #[source]
        source: reqwest::Error,
    },
    #[error(transparent)]
    Auth(#[from] AuthError),
}
