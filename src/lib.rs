//! # yabridge - Windows plugins in Linux hosts
//!
//! Umbrella crate over the two halves of the bridge.
//!
//! ## Architecture
//!
//! - **yabridge-plugin** - Native side: wire codec, socket transport,
//!   endpoint management, interface proxies and the [`PluginClient`] that
//!   starts or joins a Wine host
//! - **yabridge-host** - Wine side: per-plugin host bridges, the group
//!   multiplexer and the `yabridge-host`/`yabridge-group` binaries
//!
//! ## Quick Start
//!
//! ```ignore
//! use yabridge::prelude::*;
//!
//! let info = PluginInfo::new(PluginKind::Vst3, "/home/me/.wine/drive_c/Synth.vst3".into())?;
//! let (client, _handle) =
//!     PluginClient::load(BridgeConfig::default(), info, &Configuration::default()).await?;
//!
//! if let Some(mut view) = client.create_view() {
//!     view.attached(window_id, PLATFORM_TYPE_X11_EMBED_WINDOW_ID);
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - Native side and Wine side
//! - `host` - Wine-side runner (`yabridge-host`)

/// Re-export of yabridge-plugin for direct access
pub use yabridge_plugin as plugin;

#[cfg(feature = "host")]
pub use yabridge_host as host;

pub use yabridge_plugin::{
    BridgeConfig, BridgeError, Channel, Configuration, HostConfig, HostRequest, HostResponse,
    InitStage, LibArchitecture, LogSink, Logger, MessageTransport, PluginClient,
    PluginClientHandle, PluginInfo, PluginKind, Result, TransportListener, UniversalResult,
    WinePrefix,
};

#[cfg(feature = "host")]
pub use yabridge_host::{
    GroupBridge, GroupMonitor, HostBridge, HostedPlugin, PluginBridge, PluginLoader,
    WindowingSystem,
};

pub mod prelude {
    pub use crate::{
        BridgeConfig, BridgeError, Configuration, PluginClient, PluginClientHandle, PluginInfo,
        PluginKind, Result, UniversalResult,
    };
    pub use yabridge_plugin::proxy::plug_view::{
        PLATFORM_TYPE_HWND, PLATFORM_TYPE_X11_EMBED_WINDOW_ID,
    };
    pub use yabridge_plugin::proxy::{
        ParamValueQueue, ParameterChanges, PlugView, YaParameterChanges,
    };

    #[cfg(feature = "host")]
    pub use crate::{GroupBridge, HostConfig, HostedPlugin, PluginLoader};
}
