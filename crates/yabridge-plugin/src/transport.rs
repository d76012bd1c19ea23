//! IPC transport layer
//!
//! Framed message passing over Unix domain sockets. [`MessageTransport`] is
//! the asynchronous flavor used on the main execution contexts,
//! [`Channel`] the blocking flavor used by dispatch threads and the audio
//! thread.

use crate::codec;
use crate::error::{BridgeError, Result};
use crate::endpoint;
use crate::logging::LogSink;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Asynchronous message transport
pub struct MessageTransport {
    stream: UnixStream,
}

impl MessageTransport {
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await.map_err(|e| {
            BridgeError::ConnectionFailed(format!(
                "could not connect to '{}': {e}",
                socket_path.display()
            ))
        })?;
        Ok(Self { stream })
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let data = codec::encode(message)?;
        codec::write_frame_async(&mut self.stream, &data).await
    }

    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<T> {
        let data = codec::read_frame_async(&mut self.stream).await?;
        codec::decode(&data)
    }

    /// Hands the socket over to a blocking [`Channel`].
    pub fn into_channel(self) -> Result<Channel> {
        let stream = self.stream.into_std()?;
        stream.set_nonblocking(false)?;
        Ok(Channel::new(stream))
    }
}

/// Blocking message channel. `receive` parks the calling thread until a full
/// frame arrived or the peer went away.
pub struct Channel {
    stream: StdUnixStream,
}

impl Channel {
    pub fn new(stream: StdUnixStream) -> Self {
        Self { stream }
    }

    pub fn connect(socket_path: &Path) -> Result<Self> {
        let stream = StdUnixStream::connect(socket_path).map_err(|e| {
            BridgeError::ConnectionFailed(format!(
                "could not connect to '{}': {e}",
                socket_path.display()
            ))
        })?;
        Ok(Self { stream })
    }

    pub fn send<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let data = codec::encode(message)?;
        codec::write_frame(&mut self.stream, &data)
    }

    pub fn receive<T: DeserializeOwned>(&mut self) -> Result<T> {
        let data = codec::read_frame(&mut self.stream)?;
        codec::decode(&data)
    }

    /// Closes both directions, waking up a thread blocked in `receive` on
    /// the other end.
    pub fn shutdown(&self) -> Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both)?;
        Ok(())
    }
}

/// Server-side transport listener
pub struct TransportListener {
    listener: UnixListener,
    path: PathBuf,
}

impl TransportListener {
    /// Binds `socket_path`, refusing with [`BridgeError::AlreadyListening`]
    /// if another live process owns it. Must be called from within a Tokio
    /// runtime.
    pub fn bind(socket_path: &Path) -> Result<Self> {
        let listener = endpoint::bind_if_inactive(socket_path)?;
        Self::from_std(listener, socket_path)
    }

    pub fn from_std(listener: std::os::unix::net::UnixListener, socket_path: &Path) -> Result<Self> {
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener: UnixListener::from_std(listener)?,
            path: socket_path.to_path_buf(),
        })
    }

    /// Waits for exactly one peer. Safe to cancel, so it can sit in a
    /// `select!` next to timers.
    pub async fn accept(&self) -> Result<MessageTransport> {
        let (stream, _) = self.listener.accept().await?;
        Ok(MessageTransport::new(stream))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Forwards every complete line read from `reader` to `sink`, prefixed with
/// `prefix`. Returns once the writing side closes the stream. An unterminated
/// trailing line is dropped.
pub async fn relay_lines<R, S>(reader: R, prefix: &str, sink: &S)
where
    R: AsyncRead + Unpin,
    S: LogSink + ?Sized,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) if line.last() != Some(&b'\n') => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end_matches(['\n', '\r']);
                sink.log(&format!("{prefix}{text}"));
            }
            Err(err) => {
                tracing::debug!("Stopped relaying output: {}", err);
                break;
            }
        }
    }
}
