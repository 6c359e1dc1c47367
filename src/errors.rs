// errors.rs
use std::io;
use std::sync::PoisonError;
use thiserror::Error;

/// Crate-wide error type. Every fallible operation in the server core returns
/// this; individual components (codec, stores, policy) never invent their
/// own error enums.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("password hashing error: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),

    #[error("resource lock poisoned")]
    PoisonedLock,

    #[error("failed to bind listening socket: {0}")]
    BindFailed(io::Error),

    #[error("client disconnected: {0}")]
    ClientDisconnected(String),
}

pub type ChatResult<T> = Result<T, ChatError>;

impl<T> From<PoisonError<T>> for ChatError {
    fn from(_: PoisonError<T>) -> Self {
        ChatError::PoisonedLock
    }
}
