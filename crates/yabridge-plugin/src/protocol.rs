//! Message catalog shared by the native plugin and the Wine-side host.
//!
//! Every remote operation is a request struct with an associated response
//! type. Requests travel inside [`ControlRequest`] and are answered by exactly
//! one [`ControlResponse`], so adding an operation never touches the
//! transport.

use crate::error::{BridgeError, Result};
use crate::proxy::parameter_changes::YaParameterChanges;
use crate::proxy::plug_view::PlugViewArgs;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Maximum byte length of the platform type strings passed to views.
pub const PLATFORM_TYPE_MAX_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginKind {
    Vst2,
    Vst3,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::Vst2 => write!(f, "vst2"),
            PluginKind::Vst3 => write!(f, "vst3"),
        }
    }
}

impl FromStr for PluginKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "vst2" => Ok(PluginKind::Vst2),
            "vst3" => Ok(PluginKind::Vst3),
            other => Err(BridgeError::ProtocolError(format!(
                "unknown plugin kind '{other}'"
            ))),
        }
    }
}

/// Sent once per instantiation to a group host or a freshly spawned host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRequest {
    pub plugin_kind: PluginKind,
    pub plugin_path: PathBuf,
    pub endpoint_base_dir: PathBuf,
}

/// Lets the requester watch the host process while the plugin initializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResponse {
    pub pid: u32,
}

/// Plugin API result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UniversalResult {
    Ok,
    False,
    InvalidArgument,
    NotImplemented,
    InternalError,
    NotInitialized,
    OutOfMemory,
    NoInterface,
    Other(i32),
}

impl UniversalResult {
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => UniversalResult::Ok,
            1 => UniversalResult::False,
            2 => UniversalResult::InvalidArgument,
            3 => UniversalResult::NotImplemented,
            4 => UniversalResult::InternalError,
            5 => UniversalResult::NotInitialized,
            6 => UniversalResult::OutOfMemory,
            -1 => UniversalResult::NoInterface,
            other => UniversalResult::Other(other),
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            UniversalResult::Ok => 0,
            UniversalResult::False => 1,
            UniversalResult::InvalidArgument => 2,
            UniversalResult::NotImplemented => 3,
            UniversalResult::InternalError => 4,
            UniversalResult::NotInitialized => 5,
            UniversalResult::OutOfMemory => 6,
            UniversalResult::NoInterface => -1,
            UniversalResult::Other(code) => code,
        }
    }

    pub fn is_ok(self) -> bool {
        self == UniversalResult::Ok
    }
}

/// A string whose encoded form never exceeds `MAX` bytes.
///
/// Encoding truncates at the last character boundary within the bound.
/// Decoding rejects anything longer, which caps the allocation a peer can
/// request for these fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundedString<const MAX: usize>(String);

impl<const MAX: usize> BoundedString<MAX> {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The value as it will appear on the other side of the wire.
    pub fn truncated(&self) -> &str {
        if self.0.len() <= MAX {
            return &self.0;
        }

        let mut end = MAX;
        while !self.0.is_char_boundary(end) {
            end -= 1;
        }
        &self.0[..end]
    }
}

impl<const MAX: usize> From<&str> for BoundedString<MAX> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<const MAX: usize> Serialize for BoundedString<MAX> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.truncated())
    }
}

impl<'de, const MAX: usize> Deserialize<'de> for BoundedString<MAX> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        if value.len() > MAX {
            return Err(de::Error::custom(format!(
                "string of {} bytes exceeds the {MAX} byte bound",
                value.len()
            )));
        }
        Ok(Self(value))
    }
}

pub type PlatformType = BoundedString<PLATFORM_TYPE_MAX_LEN>;

/// Associates a request with the response shape it expects.
pub trait Request: Into<ControlRequest> {
    type Response: TryFrom<ControlResponse, Error = BridgeError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsPlatformTypeSupported {
    pub owner_instance_id: u64,
    pub platform_type: PlatformType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attached {
    pub owner_instance_id: u64,
    pub parent: u64,
    pub platform_type: PlatformType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Removed {
    pub owner_instance_id: u64,
}

/// One processing block. The new real-time priority is only attached when it
/// changed since the last time it was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub owner_instance_id: u64,
    pub input_parameter_changes: YaParameterChanges,
    pub new_realtime_priority: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub result: UniversalResult,
    pub output_parameter_changes: YaParameterChanges,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlRequest {
    IsPlatformTypeSupported(IsPlatformTypeSupported),
    Attached(Attached),
    Removed(Removed),
    Process(Process),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlResponse {
    Result(UniversalResult),
    Processed(ProcessResponse),
}

/// First message the host sends over a freshly connected control socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Handshake {
    Loaded {
        plugin_name: String,
        instance_id: u64,
        view: PlugViewArgs,
    },
    Failed {
        reason: String,
    },
}

macro_rules! control_request {
    ($request:ident => $response:ty) => {
        impl From<$request> for ControlRequest {
            fn from(request: $request) -> Self {
                ControlRequest::$request(request)
            }
        }

        impl Request for $request {
            type Response = $response;
        }
    };
}

control_request!(IsPlatformTypeSupported => UniversalResult);
control_request!(Attached => UniversalResult);
control_request!(Removed => UniversalResult);
control_request!(Process => ProcessResponse);

impl TryFrom<ControlResponse> for UniversalResult {
    type Error = BridgeError;

    fn try_from(response: ControlResponse) -> Result<Self> {
        match response {
            ControlResponse::Result(result) => Ok(result),
            other => Err(BridgeError::ProtocolError(format!(
                "expected a result code, got {other:?}"
            ))),
        }
    }
}

impl TryFrom<ControlResponse> for ProcessResponse {
    type Error = BridgeError;

    fn try_from(response: ControlResponse) -> Result<Self> {
        match response {
            ControlResponse::Processed(processed) => Ok(processed),
            other => Err(BridgeError::ProtocolError(format!(
                "expected processing output, got {other:?}"
            ))),
        }
    }
}

impl ControlRequest {
    pub fn owner_instance_id(&self) -> u64 {
        match self {
            ControlRequest::IsPlatformTypeSupported(request) => request.owner_instance_id,
            ControlRequest::Attached(request) => request.owner_instance_id,
            ControlRequest::Removed(request) => request.owner_instance_id,
            ControlRequest::Process(request) => request.owner_instance_id,
        }
    }
}
