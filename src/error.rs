use crate::cache::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("state lock poisoned")]
    StateLock,
    #[error("provider endpoint is not configured")]
    MissingEndpoint,
    #[error("cache store error: {0}")]
    Store(#[from] StoreError),
}
