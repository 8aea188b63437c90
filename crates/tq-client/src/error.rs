use crate::directory::DirectoryError;
use thiserror::Error;
use tq_core::command::CommandRejected;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Rejected(#[from] CommandRejected),
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}
