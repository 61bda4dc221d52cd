use std::io;

use thiserror::Error;

/// Errors returned by the coil reactor and stream layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying socket or poll operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// `start_recv` was called while a recv was already outstanding.
    #[error("recv already pending")]
    RecvAlreadyPending,
    /// `start_send` was called while a send was already outstanding.
    #[error("send already pending")]
    SendAlreadyPending,
    /// `connect` was asked for more than one concurrent attempt.
    #[error("only one connect attempt at a time is supported (requested {0})")]
    MultiConnect(usize),
    /// Endpoint resolution produced no usable address.
    #[error("cannot resolve {0}:{1}")]
    Resolve(String, u16),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
