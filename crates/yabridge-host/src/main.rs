//! Individual plugin host. Spawned through Wine by the native plugin with
//! the plugin's format, its path and the endpoint base directory to connect
//! back to.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use yabridge_host::{
    run_single_bridge, HostConfig, HostRequest, LibraryLoader, NoWindowing, PluginBridge,
    PluginKind, Result,
};
use yabridge_plugin::logging;

#[derive(Parser, Debug)]
#[command(name = "yabridge-host", version, about = "Hosts a single Windows plugin")]
struct Args {
    /// Plugin format, `vst2` or `vst3`
    kind: PluginKind,

    /// Windows path to the plugin library
    plugin_path: PathBuf,

    /// Directory holding the plugin's sockets
    endpoint_base_dir: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_from_environment();

    let config = HostConfig::default();
    config.validate()?;

    tracing::info!(
        "Initializing '{}' using socket endpoint base directory '{}'",
        args.plugin_path.display(),
        args.endpoint_base_dir.display()
    );
    let bridge = PluginBridge::new(
        HostRequest {
            plugin_kind: args.kind,
            plugin_path: args.plugin_path,
            endpoint_base_dir: args.endpoint_base_dir,
        },
        0,
    );
    if let Err(err) = bridge.initialize(&LibraryLoader, &config) {
        tracing::error!("Error while initializing the plugin: {}", err);
        return Err(err);
    }

    run_single_bridge(Arc::new(bridge), &mut NoWindowing, &config)
}
