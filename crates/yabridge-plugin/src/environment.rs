//! Wine prefix, loader and temporary directory resolution, plus the plugin
//! library facts needed before a host can be launched.

use crate::error::{BridgeError, InitStage, Result};
use crate::protocol::PluginKind;
use std::ffi::OsString;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub const WINEPREFIX_ENV: &str = "WINEPREFIX";
pub const WINELOADER_ENV: &str = "WINELOADER";
pub const RUNTIME_DIR_ENV: &str = "XDG_RUNTIME_DIR";

const DEFAULT_WINE_LOADER: &str = "wine";
const FALLBACK_TEMP_DIR: &str = "/tmp";
const PREFIX_MARKER_DIR: &str = "dosdevices";

const PE_HEADER_OFFSET_LOCATION: u64 = 0x3c;
const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";
const IMAGE_FILE_MACHINE_I386: u16 = 0x014c;
const IMAGE_FILE_MACHINE_AMD64: u16 = 0x8664;

/// Where the Wine prefix for a plugin came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WinePrefix {
    /// Set explicitly through `WINEPREFIX`.
    Overridden(PathBuf),
    /// The closest ancestor of the plugin that looks like a prefix.
    Detected(PathBuf),
    /// Neither, so Wine falls back to `~/.wine`.
    Default,
}

impl WinePrefix {
    pub fn find(plugin_path: &Path) -> Self {
        Self::resolve(plugin_path, std::env::var_os(WINEPREFIX_ENV))
    }

    pub fn resolve(plugin_path: &Path, override_prefix: Option<OsString>) -> Self {
        if let Some(prefix) = override_prefix.filter(|prefix| !prefix.is_empty()) {
            return WinePrefix::Overridden(PathBuf::from(prefix));
        }

        plugin_path
            .ancestors()
            .skip(1)
            .find(|dir| dir.join(PREFIX_MARKER_DIR).is_dir())
            .map(|dir| WinePrefix::Detected(dir.to_path_buf()))
            .unwrap_or(WinePrefix::Default)
    }

    pub fn path(&self) -> PathBuf {
        match self {
            WinePrefix::Overridden(path) | WinePrefix::Detected(path) => path.clone(),
            WinePrefix::Default => dirs::home_dir().unwrap_or_default().join(".wine"),
        }
    }

    /// Extra environment for a spawned host. Overrides are already in the
    /// inherited environment and the default needs nothing.
    pub fn host_environment(&self) -> Vec<(OsString, OsString)> {
        match self {
            WinePrefix::Detected(path) => {
                vec![(OsString::from(WINEPREFIX_ENV), path.clone().into_os_string())]
            }
            WinePrefix::Overridden(_) | WinePrefix::Default => Vec::new(),
        }
    }
}

/// Bitness of a Windows library, which decides the host binary and is part
/// of the group endpoint name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibArchitecture {
    Dll32,
    Dll64,
}

impl LibArchitecture {
    pub fn endpoint_suffix(self) -> &'static str {
        match self {
            LibArchitecture::Dll32 => "x32",
            LibArchitecture::Dll64 => "x64",
        }
    }

    /// Reads the machine type from a PE image header.
    pub fn detect(path: &Path) -> Result<Self> {
        let resolve_error = |reason: String| BridgeError::InitializationFailed {
            path: path.to_path_buf(),
            stage: InitStage::Resolving,
            reason,
        };

        let mut file = File::open(path).map_err(|e| resolve_error(e.to_string()))?;
        let mut read_header = || -> std::io::Result<([u8; 4], u16)> {
            let mut offset = [0u8; 4];
            file.seek(SeekFrom::Start(PE_HEADER_OFFSET_LOCATION))?;
            file.read_exact(&mut offset)?;

            let mut signature = [0u8; 4];
            let mut machine = [0u8; 2];
            file.seek(SeekFrom::Start(u32::from_le_bytes(offset) as u64))?;
            file.read_exact(&mut signature)?;
            file.read_exact(&mut machine)?;
            Ok((signature, u16::from_le_bytes(machine)))
        };

        let (signature, machine) = read_header()
            .map_err(|e| resolve_error(format!("not a Windows library: {e}")))?;
        if &signature != PE_SIGNATURE {
            return Err(resolve_error("missing PE signature".to_string()));
        }

        match machine {
            IMAGE_FILE_MACHINE_I386 => Ok(LibArchitecture::Dll32),
            IMAGE_FILE_MACHINE_AMD64 => Ok(LibArchitecture::Dll64),
            other => Err(resolve_error(format!(
                "unsupported machine type {other:#06x}"
            ))),
        }
    }
}

/// Everything known about a plugin before any host is contacted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub kind: PluginKind,
    pub windows_library_path: PathBuf,
    pub architecture: LibArchitecture,
    pub wine_prefix: WinePrefix,
}

impl PluginInfo {
    pub fn new(kind: PluginKind, windows_library_path: PathBuf) -> Result<Self> {
        let architecture = LibArchitecture::detect(&windows_library_path)?;
        let wine_prefix = WinePrefix::find(&windows_library_path);
        Ok(Self {
            kind,
            windows_library_path,
            architecture,
            wine_prefix,
        })
    }

    /// Library file name without its extension, used to name endpoints.
    pub fn name(&self) -> String {
        self.windows_library_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plugin".to_string())
    }
}

/// `$WINELOADER` if it points to an executable file, `wine` otherwise.
pub fn wine_loader() -> PathBuf {
    std::env::var_os(WINELOADER_ENV)
        .map(PathBuf::from)
        .filter(|loader| is_executable(loader))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WINE_LOADER))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// `$XDG_RUNTIME_DIR`, or `/tmp` when it's not set.
pub fn temporary_directory() -> PathBuf {
    std::env::var_os(RUNTIME_DIR_ENV)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(FALLBACK_TEMP_DIR))
}
