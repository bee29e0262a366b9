use thiserror::Error;

#[derive(Error, Debug)]
pub enum CarrierHttpError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("carrier endpoint is not configured")]
    MissingEndpoint,

    #[error("invalid response from carrier: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}
