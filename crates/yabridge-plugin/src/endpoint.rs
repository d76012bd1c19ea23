//! Socket endpoint naming and the single-listener policy.

use crate::error::{BridgeError, Result};
use crate::environment::LibArchitecture;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

const PROC_NET_UNIX: &str = "/proc/net/unix";
const ENDPOINT_PREFIX: &str = "yabridge-";
const GROUP_ENDPOINT_PREFIX: &str = "yabridge-group-";
const CONTROL_SOCKET_NAME: &str = "control.sock";

/// Binds `path` unless a live process already listens on it.
///
/// A leftover socket file from a process that exited without cleaning up is
/// removed and the bind is retried once. If the kernel still reports a socket
/// bound to the exact path, the file is left alone and
/// [`BridgeError::AlreadyListening`] is returned so the caller can talk to the
/// existing owner instead.
pub fn bind_if_inactive(path: &Path) -> Result<UnixListener> {
    match UnixListener::bind(path) {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
            if is_endpoint_active(path)? {
                return Err(BridgeError::AlreadyListening {
                    endpoint: path.to_path_buf(),
                });
            }

            tracing::debug!("Reclaiming stale socket endpoint '{}'", path.display());
            fs::remove_file(path)?;
            UnixListener::bind(path).map_err(|e| {
                BridgeError::ConnectionFailed(format!(
                    "could not bind '{}' after removing the stale endpoint: {e}",
                    path.display()
                ))
            })
        }
        Err(err) => Err(BridgeError::ConnectionFailed(format!(
            "could not bind '{}': {err}",
            path.display()
        ))),
    }
}

/// Checks the kernel's table of Unix domain sockets for one bound to `path`.
pub fn is_endpoint_active(path: &Path) -> Result<bool> {
    let table = fs::read_to_string(PROC_NET_UNIX)?;
    Ok(socket_table_contains(&table, path))
}

fn socket_table_contains(table: &str, path: &Path) -> bool {
    let Some(path) = path.to_str() else {
        return false;
    };

    table
        .lines()
        .skip(1)
        .filter_map(socket_path_column)
        .any(|bound| bound == path)
}

/// The eighth column of a `/proc/net/unix` row. Paths may contain spaces, so
/// everything after the seventh field is the path.
fn socket_path_column(line: &str) -> Option<&str> {
    let mut rest = line;
    for _ in 0..7 {
        let (_, tail) = rest.trim_start().split_once(char::is_whitespace)?;
        rest = tail;
    }

    let path = rest.trim();
    (!path.is_empty()).then_some(path)
}

/// `<tmp>/yabridge-group-<name>-<hash of prefix>-<arch>.sock`
pub fn group_endpoint(
    temp_dir: &Path,
    group_name: &str,
    wine_prefix: &Path,
    architecture: LibArchitecture,
) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    wine_prefix.hash(&mut hasher);

    temp_dir.join(format!(
        "{GROUP_ENDPOINT_PREFIX}{group_name}-{:x}-{}.sock",
        hasher.finish(),
        architecture.endpoint_suffix()
    ))
}

/// `<tmp>/yabridge-<plugin name>-<random suffix>`, the directory holding one
/// plugin instance's sockets.
pub fn generate_endpoint_base_dir(temp_dir: &Path, plugin_name: &str) -> PathBuf {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();

    temp_dir.join(format!("{ENDPOINT_PREFIX}{plugin_name}-{suffix}"))
}

pub fn control_endpoint(endpoint_base_dir: &Path) -> PathBuf {
    endpoint_base_dir.join(CONTROL_SOCKET_NAME)
}

/// Log label for a group host, `[<group name>] ` or `[<group name>-x32] `.
pub fn group_logger_prefix(endpoint: &Path) -> String {
    let stem = endpoint
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    let label = stem
        .strip_prefix(GROUP_ENDPOINT_PREFIX)
        .and_then(|rest| {
            let mut parts = rest.rsplitn(3, '-');
            let arch = parts.next()?;
            let _hash = parts.next()?;
            let name = parts.next()?;
            Some(if arch == LibArchitecture::Dll32.endpoint_suffix() {
                format!("{name}-{arch}")
            } else {
                name.to_string()
            })
        })
        .unwrap_or(stem);

    format!("[{label}] ")
}

/// Log label for an individually hosted plugin, derived from its endpoint
/// base directory by dropping the `yabridge-` literal.
pub fn endpoint_logger_prefix(endpoint_base_dir: &Path) -> String {
    let name = endpoint_base_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    match name.strip_prefix(ENDPOINT_PREFIX) {
        Some(id) => format!("[{id}] "),
        None => format!("[{name}] "),
    }
}
