//! Wine-side runner for yabridge
//!
//! Hosts plugins on behalf of the native `yabridge-plugin` side. The
//! `yabridge-host` binary runs a single [`PluginBridge`]; `yabridge-group`
//! runs a [`GroupBridge`] that multiplexes every plugin of one group over a
//! shared endpoint and exits once it has been idle for a short while.

pub mod bridge;
pub mod group;
pub mod instance;
pub mod main_context;
pub mod stdio;

pub use bridge::{BridgeState, HostBridge, PluginBridge};
pub use group::{GroupBridge, GroupMonitor, PluginId};
pub use instance::{HostedPlugin, LibraryLoader, PluginLoader};
pub use main_context::{
    run_single_bridge, MainContextHandle, MainTask, NoWindowing, TaskSink, WindowingSystem,
};
pub use stdio::StdIoCapture;

// Re-export shared types from yabridge-plugin
pub use yabridge_plugin::{
    BridgeError, HostConfig, HostRequest, HostResponse, InitStage, PluginKind, Result,
    UniversalResult,
};
