//! Error types for the plugin bridge

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Where in the instantiation sequence a plugin failed to come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    Resolving,
    Launching,
    ContactingGroup,
    Connecting,
    Handshake,
    Loading,
    EntryPoint,
}

impl std::fmt::Display for InitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitStage::Resolving => write!(f, "resolving the plugin library"),
            InitStage::Launching => write!(f, "launching the Wine host"),
            InitStage::ContactingGroup => write!(f, "contacting the group host"),
            InitStage::Connecting => write!(f, "connecting the control socket"),
            InitStage::Handshake => write!(f, "awaiting the handshake"),
            InitStage::Loading => write!(f, "loading the plugin library"),
            InitStage::EntryPoint => write!(f, "locating the entry point"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Another process is already listening on '{}'", endpoint.display())]
    AlreadyListening { endpoint: PathBuf },

    #[error("The other side of the socket has disconnected")]
    Disconnected,

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Error while initializing '{}' ({stage})\n  Reason: {reason}", path.display())]
    InitializationFailed {
        path: PathBuf,
        stage: InitStage,
        reason: String,
    },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl BridgeError {
    /// Classifies an I/O error hit while moving a frame. A closed peer shows
    /// up as EOF, a reset, or a broken pipe depending on timing.
    pub fn from_stream_error(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => BridgeError::Disconnected,
            _ => BridgeError::Io(err),
        }
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(self, BridgeError::Disconnected)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
