//! Native side of the yabridge plugin bridge
//!
//! Windows-only audio plugins run inside a Wine host process. This crate holds
//! everything both processes share (the wire protocol, the socket transport,
//! endpoint management, the interface proxies) and the native-side
//! [`PluginClient`] that starts or joins a host. The Wine side lives in
//! `yabridge-host`.
//!
//! ## Usage
//!
//! ```ignore
//! use yabridge_plugin::{BridgeConfig, Configuration, PluginClient, PluginInfo, PluginKind};
//!
//! let info = PluginInfo::new(PluginKind::Vst3, "/home/me/.wine/drive_c/Synth.vst3".into())?;
//!
//! // Join (or start) the "synths" group host
//! let (client, handle) = PluginClient::load(
//!     BridgeConfig::default(),
//!     info,
//!     &Configuration::grouped("synths"),
//! ).await?;
//!
//! let status = client.process(&inputs, &mut outputs)?;
//! ```

pub mod error;
pub use error::{BridgeError, InitStage, Result};

pub mod codec;
pub mod config;
pub use config::{BridgeConfig, Configuration, HostConfig};

pub mod endpoint;
pub mod environment;
pub use environment::{LibArchitecture, PluginInfo, WinePrefix};

pub mod logging;
pub use logging::{LogSink, Logger};

pub mod protocol;
pub use protocol::{HostRequest, HostResponse, PluginKind, UniversalResult};

pub mod proxy;
pub mod realtime;

pub mod transport;
pub use transport::{Channel, MessageTransport, TransportListener};

mod client;
pub use client::{HostProcess, PluginClient, PluginClientHandle};
