//! Group host multiplexer.
//!
//! A group process hosts any number of plugins that share a Wine prefix and
//! architecture. New plugins arrive as [`HostRequest`]s on the group endpoint;
//! each one gets its own dispatch thread while the calling thread drives the
//! shared main context: accepting connections, pumping windowing events and
//! deciding when the group is idle long enough to exit.

use crate::bridge::{HostBridge, PluginBridge};
use crate::instance::PluginLoader;
use crate::main_context::{handle_events, MainContextHandle, MainTask, WindowingSystem};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use yabridge_plugin::{
    endpoint, BridgeError, HostConfig, HostRequest, HostResponse, LogSink, Logger,
    MessageTransport, Result, TransportListener,
};

/// Process-unique, never reused.
pub type PluginId = usize;

struct ActivePlugin {
    thread: JoinHandle<()>,
    bridge: Arc<dyn HostBridge>,
}

type PluginTable = Arc<Mutex<BTreeMap<PluginId, ActivePlugin>>>;

/// Read-only view on the active-plugin table, usable from other threads.
#[derive(Clone)]
pub struct GroupMonitor {
    active_plugins: PluginTable,
}

impl GroupMonitor {
    pub fn active_plugin_count(&self) -> usize {
        self.active_plugins.lock().len()
    }
}

pub struct GroupBridge {
    endpoint: PathBuf,
    config: HostConfig,
    logger: Logger,
    loader: Arc<dyn PluginLoader>,
    windowing: Box<dyn WindowingSystem>,
    listener: Option<UnixListener>,
    active_plugins: PluginTable,
    next_plugin_id: AtomicUsize,
}

impl GroupBridge {
    /// Claims the group endpoint. Fails with
    /// [`BridgeError::AlreadyListening`] when another group process is
    /// already serving it, in which case this process should simply exit.
    pub fn new(
        group_endpoint: &Path,
        config: HostConfig,
        loader: Arc<dyn PluginLoader>,
        windowing: Box<dyn WindowingSystem>,
    ) -> Result<Self> {
        config.validate()?;
        let listener = endpoint::bind_if_inactive(group_endpoint)?;

        Ok(Self {
            endpoint: group_endpoint.to_path_buf(),
            config,
            logger: Logger::for_group(group_endpoint),
            loader,
            windowing,
            listener: Some(listener),
            active_plugins: Arc::new(Mutex::new(BTreeMap::new())),
            next_plugin_id: AtomicUsize::new(0),
        })
    }

    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    pub fn monitor(&self) -> GroupMonitor {
        GroupMonitor {
            active_plugins: self.active_plugins.clone(),
        }
    }

    /// Runs the main context on the calling thread until the group has been
    /// idle for the configured grace period. Only a failure of the group
    /// endpoint itself ends this early.
    pub fn handle_incoming_connections(&mut self) -> Result<()> {
        let listener = self.listener.take().ok_or_else(|| {
            BridgeError::ProtocolError(format!(
                "'{}' is already being served",
                self.endpoint.display()
            ))
        })?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.main_loop(listener))
    }

    async fn main_loop(&mut self, listener: UnixListener) -> Result<()> {
        let listener = TransportListener::from_std(listener, &self.endpoint)?;
        let (tasks_tx, mut tasks_rx) = mpsc::unbounded_channel();

        let mut events = tokio::time::interval(self.config.event_interval);
        events.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Armed after every plugin exit, never before the first one
        let shutdown = tokio::time::sleep(self.config.shutdown_delay);
        tokio::pin!(shutdown);
        let mut shutdown_armed = false;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let transport = accepted.map_err(|err| {
                        self.logger.log(&format!(
                            "Error while listening for incoming connections: {err}"
                        ));
                        err
                    })?;
                    self.accept_connection(transport, &tasks_tx).await;
                }
                Some(task) = tasks_rx.recv() => match task {
                    MainTask::PluginExited(plugin_id) => {
                        self.remove_plugin(plugin_id);
                        shutdown
                            .as_mut()
                            .reset(Instant::now() + self.config.shutdown_delay);
                        shutdown_armed = true;
                    }
                    MainTask::ViewRequest { plugin_id, request, reply } => {
                        let bridge = self
                            .active_plugins
                            .lock()
                            .get(&plugin_id)
                            .map(|plugin| plugin.bridge.clone());
                        if let Some(bridge) = bridge {
                            let _ = reply.send(bridge.handle_main_context_request(request));
                        }
                    }
                },
                _ = events.tick() => {
                    let plugins = self.active_plugins.lock();
                    handle_events(
                        plugins.values().map(|plugin| &plugin.bridge),
                        self.windowing.as_mut(),
                        &self.config,
                    );
                }
                _ = &mut shutdown, if shutdown_armed => {
                    shutdown_armed = false;
                    if self.active_plugins.lock().is_empty() {
                        self.logger
                            .log("All plugins have exited, shutting down the group process");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Answers the request, initializes the bridge and hands it to a fresh
    /// dispatch thread. A plugin that fails to come up is logged and
    /// forgotten.
    async fn accept_connection(
        &self,
        mut transport: MessageTransport,
        tasks: &mpsc::UnboundedSender<MainTask>,
    ) {
        let request: HostRequest = match transport.receive().await {
            Ok(request) => request,
            Err(err) => {
                self.logger
                    .log(&format!("Error while reading a host request: {err}"));
                return;
            }
        };
        let response = HostResponse {
            pid: std::process::id(),
        };
        if let Err(err) = transport.send(&response).await {
            self.logger
                .log(&format!("Error while answering a host request: {err}"));
            return;
        }

        self.logger.log(&format!(
            "Received request to host '{}' using socket endpoint base directory '{}'",
            request.plugin_path.display(),
            request.endpoint_base_dir.display()
        ));

        let plugin_id = self.next_plugin_id.fetch_add(1, Ordering::Relaxed);
        let plugin_path = request.plugin_path.clone();
        let bridge = PluginBridge::new(request, plugin_id as u64);
        if let Err(err) = bridge.initialize(self.loader.as_ref(), &self.config) {
            let message = match err {
                BridgeError::InitializationFailed { .. } => err.to_string(),
                other => format!("Error while initializing '{}': {other}", plugin_path.display()),
            };
            for line in message.lines() {
                self.logger.log(line);
            }
            return;
        }

        if let Err(err) = self.start_dispatch(plugin_id, Arc::new(bridge), tasks.clone()) {
            self.logger.log(&format!(
                "Could not start a dispatch thread for '{}': {err}",
                plugin_path.display()
            ));
        }
    }

    fn start_dispatch(
        &self,
        plugin_id: PluginId,
        bridge: Arc<dyn HostBridge>,
        tasks: mpsc::UnboundedSender<MainTask>,
    ) -> Result<()> {
        // Held across the spawn so the thread can't look itself up before
        // the entry exists
        let mut plugins = self.active_plugins.lock();

        let active_plugins = self.active_plugins.clone();
        let logger = self.logger.clone();
        let thread = thread::Builder::new()
            .name(format!("plugin-{plugin_id}"))
            .spawn(move || {
                let bridge = active_plugins
                    .lock()
                    .get(&plugin_id)
                    .map(|plugin| plugin.bridge.clone());
                let main_context = MainContextHandle::new(plugin_id, Box::new(tasks));
                if let Some(bridge) = bridge {
                    if let Err(err) = bridge.run(&main_context) {
                        logger.log(&format!(
                            "'{}' stopped with an error: {err}",
                            bridge.plugin_path().display()
                        ));
                    }
                }
                main_context.notify_exited();
            })?;

        plugins.insert(plugin_id, ActivePlugin { thread, bridge });
        Ok(())
    }

    /// Runs on the main context, so the plugin's module is released on the
    /// thread that owns the windowing state.
    fn remove_plugin(&self, plugin_id: PluginId) {
        let Some(plugin) = self.active_plugins.lock().remove(&plugin_id) else {
            return;
        };

        if plugin.thread.join().is_err() {
            self.logger.log(&format!(
                "The dispatch thread for '{}' panicked",
                plugin.bridge.plugin_path().display()
            ));
        }
        self.logger.log(&format!(
            "'{}' has exited",
            plugin.bridge.plugin_path().display()
        ));
    }
}
