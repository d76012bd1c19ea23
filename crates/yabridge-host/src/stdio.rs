//! Captures the process's own STDOUT and STDERR so everything a plugin
//! prints ends up in the group's log with a recognizable prefix.

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::thread::{self, JoinHandle};
use tokio::net::unix::pipe;
use yabridge_plugin::transport::relay_lines;
use yabridge_plugin::Logger;

/// Redirects one standard stream into a pipe for as long as it lives. The
/// original stream is restored on drop.
pub struct StdIoCapture {
    target_fd: RawFd,
    original: OwnedFd,
    reader: Option<OwnedFd>,
}

impl StdIoCapture {
    pub fn new(target_fd: RawFd) -> io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let reader = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let writer = unsafe { OwnedFd::from_raw_fd(fds[1]) };

        let original = unsafe { libc::dup(target_fd) };
        if original < 0 {
            return Err(io::Error::last_os_error());
        }
        let original = unsafe { OwnedFd::from_raw_fd(original) };

        if unsafe { libc::dup2(writer.as_raw_fd(), target_fd) } < 0 {
            return Err(io::Error::last_os_error());
        }
        // `target_fd` now holds the only write end we need
        drop(writer);

        Ok(Self {
            target_fd,
            original,
            reader: Some(reader),
        })
    }

    pub fn stdout() -> io::Result<Self> {
        Self::new(libc::STDOUT_FILENO)
    }

    pub fn stderr() -> io::Result<Self> {
        Self::new(libc::STDERR_FILENO)
    }

    /// The reading end of the pipe. Can only be taken once.
    pub fn take_reader(&mut self) -> Option<OwnedFd> {
        self.reader.take()
    }

    /// A handle to the stream as it was before capturing, e.g. for the
    /// logger's own output.
    pub fn original_file(&self) -> io::Result<File> {
        Ok(File::from(self.original.try_clone()?))
    }
}

impl Drop for StdIoCapture {
    fn drop(&mut self) {
        unsafe {
            libc::dup2(self.original.as_raw_fd(), self.target_fd);
        }
    }
}

/// Relays both captured streams line by line on a dedicated thread until
/// their write ends close.
pub fn spawn_stdio_relay(
    stdout: OwnedFd,
    stderr: OwnedFd,
    logger: Logger,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("stdio-relay".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    tracing::warn!("Could not start the output relay: {}", err);
                    return;
                }
            };

            runtime.block_on(async {
                let stdout = match pipe::Receiver::from_owned_fd(stdout) {
                    Ok(stdout) => stdout,
                    Err(err) => {
                        tracing::warn!("Could not relay STDOUT: {}", err);
                        return;
                    }
                };
                let stderr = match pipe::Receiver::from_owned_fd(stderr) {
                    Ok(stderr) => stderr,
                    Err(err) => {
                        tracing::warn!("Could not relay STDERR: {}", err);
                        return;
                    }
                };

                tokio::join!(
                    relay_lines(stdout, "[STDOUT] ", &logger),
                    relay_lines(stderr, "[STDERR] ", &logger),
                );
            });
        })
}
