//! Per-plugin host bridge.
//!
//! A bridge connects back to the native plugin's control socket, loads the
//! plugin, reports the outcome in a [`Handshake`], and then serves control
//! requests until the native side hangs up.

use crate::instance::{HostedPlugin, PluginLoader};
use crate::main_context::MainContextHandle;
use parking_lot::Mutex;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use yabridge_plugin::endpoint;
use yabridge_plugin::protocol::{ControlRequest, ControlResponse, Handshake, ProcessResponse};
use yabridge_plugin::proxy::{PlugView, PlugViewArgs, YaParameterChanges};
use yabridge_plugin::realtime;
use yabridge_plugin::{
    BridgeError, Channel, HostConfig, HostRequest, InitStage, Result, UniversalResult,
};

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Constructed,
    Initializing,
    Running,
    Exited,
}

/// What the group multiplexer and the individual runner need from a bridge.
pub trait HostBridge: Send + Sync {
    fn plugin_path(&self) -> &Path;

    fn state(&self) -> BridgeState;

    /// Serves control requests until the native side disconnects. Blocks the
    /// calling thread. Calls that touch windows are handed to `main_context`.
    fn run(&self, main_context: &MainContextHandle) -> Result<()>;

    /// Main context only.
    fn handle_windowing_events(&self);

    /// Answers a request `run` posted to the main context. Main context only.
    fn handle_main_context_request(&self, request: ControlRequest) -> ControlResponse;
}

pub struct PluginBridge {
    request: HostRequest,
    instance_id: u64,
    state: Mutex<BridgeState>,
    channel: Mutex<Option<Channel>>,
    plugin: Mutex<Option<Box<dyn HostedPlugin>>>,
}

impl PluginBridge {
    pub fn new(request: HostRequest, instance_id: u64) -> Self {
        Self {
            request,
            instance_id,
            state: Mutex::new(BridgeState::Constructed),
            channel: Mutex::new(None),
            plugin: Mutex::new(None),
        }
    }

    /// Connects the control channel, loads the plugin and performs the
    /// handshake. Fails with [`BridgeError::InitializationFailed`], after
    /// which the bridge is `Exited`.
    pub fn initialize(&self, loader: &dyn PluginLoader, config: &HostConfig) -> Result<()> {
        *self.state.lock() = BridgeState::Initializing;

        let result = self.connect_and_load(loader, config);
        *self.state.lock() = match result {
            Ok(()) => BridgeState::Running,
            Err(_) => BridgeState::Exited,
        };
        result
    }

    fn connect_and_load(&self, loader: &dyn PluginLoader, config: &HostConfig) -> Result<()> {
        let control = endpoint::control_endpoint(&self.request.endpoint_base_dir);
        let mut channel = connect_control_channel(&control, config.connect_timeout).map_err(|e| {
            BridgeError::InitializationFailed {
                path: self.request.plugin_path.clone(),
                stage: InitStage::Connecting,
                reason: e.to_string(),
            }
        })?;

        let mut plugin = match loader.load(self.request.plugin_kind, &self.request.plugin_path) {
            Ok(plugin) => plugin,
            Err(err) => {
                let err = match err {
                    BridgeError::InitializationFailed { .. } => err,
                    other => BridgeError::InitializationFailed {
                        path: self.request.plugin_path.clone(),
                        stage: InitStage::Loading,
                        reason: other.to_string(),
                    },
                };
                let _ = channel.send(&Handshake::Failed {
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };

        let handshake = Handshake::Loaded {
            plugin_name: plugin.name().to_string(),
            instance_id: self.instance_id,
            view: PlugViewArgs::from_view(plugin.plug_view()),
        };
        channel
            .send(&handshake)
            .map_err(|e| BridgeError::InitializationFailed {
                path: self.request.plugin_path.clone(),
                stage: InitStage::Handshake,
                reason: e.to_string(),
            })?;

        *self.plugin.lock() = Some(plugin);
        *self.channel.lock() = Some(channel);
        Ok(())
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    fn dispatch(
        &self,
        request: ControlRequest,
        main_context: &MainContextHandle,
    ) -> ControlResponse {
        if request.owner_instance_id() != self.instance_id {
            tracing::warn!(
                "Request for instance {} reached the bridge of instance {}",
                request.owner_instance_id(),
                self.instance_id
            );
            return rejected(&request, UniversalResult::InvalidArgument);
        }

        if !is_windowing_call(&request) {
            return self.execute(request);
        }
        main_context.call(request).unwrap_or_else(|| {
            tracing::warn!(
                "The main context stopped before answering a view call for instance {}",
                self.instance_id
            );
            ControlResponse::Result(UniversalResult::InternalError)
        })
    }

    fn execute(&self, request: ControlRequest) -> ControlResponse {
        let mut plugin = self.plugin.lock();
        let Some(plugin) = plugin.as_mut() else {
            return rejected(&request, UniversalResult::NotInitialized);
        };

        match request {
            ControlRequest::IsPlatformTypeSupported(request) => {
                ControlResponse::Result(with_view(plugin.as_mut(), |view| {
                    view.is_platform_type_supported(request.platform_type.as_str())
                }))
            }
            ControlRequest::Attached(request) => {
                ControlResponse::Result(with_view(plugin.as_mut(), |view| {
                    view.attached(request.parent, request.platform_type.as_str())
                }))
            }
            ControlRequest::Removed(_) => {
                ControlResponse::Result(with_view(plugin.as_mut(), |view| view.removed()))
            }
            ControlRequest::Process(request) => {
                if let Some(priority) = request.new_realtime_priority {
                    apply_realtime_priority(priority);
                }

                let mut outputs = YaParameterChanges::new();
                let result = plugin.process(&request.input_parameter_changes, &mut outputs);
                ControlResponse::Processed(ProcessResponse {
                    result,
                    output_parameter_changes: outputs,
                })
            }
        }
    }
}

impl HostBridge for PluginBridge {
    fn plugin_path(&self) -> &Path {
        &self.request.plugin_path
    }

    fn state(&self) -> BridgeState {
        *self.state.lock()
    }

    fn run(&self, main_context: &MainContextHandle) -> Result<()> {
        let mut channel = self.channel.lock().take().ok_or_else(|| {
            BridgeError::ProtocolError(format!(
                "'{}' has no connected control channel",
                self.request.plugin_path.display()
            ))
        })?;

        let result = loop {
            let request: ControlRequest = match channel.receive() {
                Ok(request) => request,
                Err(BridgeError::Disconnected) => break Ok(()),
                Err(err) => break Err(err),
            };

            let response = self.dispatch(request, main_context);
            match channel.send(&response) {
                Ok(()) => {}
                Err(BridgeError::Disconnected) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        *self.state.lock() = BridgeState::Exited;
        result
    }

    fn handle_windowing_events(&self) {
        if self.state() != BridgeState::Running {
            return;
        }
        // Skip this pass rather than wait behind a processing call
        if let Some(mut plugin) = self.plugin.try_lock() {
            if let Some(plugin) = plugin.as_mut() {
                plugin.handle_windowing_events();
            }
        }
    }

    fn handle_main_context_request(&self, request: ControlRequest) -> ControlResponse {
        self.execute(request)
    }
}

/// Editor calls create and destroy windows, so they must happen on the
/// thread that pumps the windowing messages.
fn is_windowing_call(request: &ControlRequest) -> bool {
    matches!(
        request,
        ControlRequest::IsPlatformTypeSupported(_)
            | ControlRequest::Attached(_)
            | ControlRequest::Removed(_)
    )
}

fn connect_control_channel(path: &Path, timeout: Duration) -> Result<Channel> {
    let deadline = Instant::now() + timeout;
    loop {
        match Channel::connect(path) {
            Ok(channel) => return Ok(channel),
            Err(err) if Instant::now() >= deadline => return Err(err),
            Err(_) => thread::sleep(CONNECT_RETRY_INTERVAL),
        }
    }
}

fn with_view(
    plugin: &mut dyn HostedPlugin,
    call: impl FnOnce(&mut dyn PlugView) -> UniversalResult,
) -> UniversalResult {
    plugin.plug_view().map(call).unwrap_or(UniversalResult::NoInterface)
}

fn rejected(request: &ControlRequest, result: UniversalResult) -> ControlResponse {
    match request {
        ControlRequest::Process(_) => ControlResponse::Processed(ProcessResponse {
            result,
            output_parameter_changes: YaParameterChanges::new(),
        }),
        _ => ControlResponse::Result(result),
    }
}

/// Mirrors the host's audio thread priority onto the thread serving
/// processing calls.
fn apply_realtime_priority(priority: i32) {
    match realtime::set_realtime_priority(true, priority) {
        Ok(()) => tracing::debug!("Set real-time priority to {}", priority),
        Err(err) => tracing::debug!("Could not set real-time priority {}: {}", priority, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::main_context::{run_single_bridge, MainTask, NoWindowing};
    use std::os::unix::net::UnixListener;
    use std::path::PathBuf;
    use std::sync::Arc;
    use yabridge_plugin::protocol::{Attached, Process, Removed};
    use yabridge_plugin::proxy::{call, ChannelMessenger, ParamValueQueue, ParameterChanges};
    use yabridge_plugin::PluginKind;

    /// Names of the threads view calls arrived on.
    type ViewThreads = Arc<Mutex<Vec<String>>>;

    fn record_thread(threads: &ViewThreads) {
        threads
            .lock()
            .push(thread::current().name().unwrap_or_default().to_string());
    }

    struct CountingView {
        calls: ViewThreads,
    }

    impl PlugView for CountingView {
        fn is_platform_type_supported(&mut self, platform_type: &str) -> UniversalResult {
            record_thread(&self.calls);
            if platform_type == "HWND" {
                UniversalResult::Ok
            } else {
                UniversalResult::False
            }
        }

        fn attached(&mut self, _parent: u64, _platform_type: &str) -> UniversalResult {
            record_thread(&self.calls);
            UniversalResult::Ok
        }

        fn removed(&mut self) -> UniversalResult {
            record_thread(&self.calls);
            UniversalResult::Ok
        }
    }

    /// Doubles every incoming automation value.
    struct DoublingPlugin {
        view: CountingView,
    }

    impl HostedPlugin for DoublingPlugin {
        fn name(&self) -> &str {
            "Doubler"
        }

        fn plug_view(&mut self) -> Option<&mut dyn PlugView> {
            Some(&mut self.view)
        }

        fn process(
            &mut self,
            inputs: &dyn ParameterChanges,
            outputs: &mut dyn ParameterChanges,
        ) -> UniversalResult {
            for index in 0..inputs.parameter_count() {
                let Some(queue) = inputs.parameter_data(index) else {
                    continue;
                };
                let output = outputs.add_parameter_data(queue.parameter_id());
                for point in 0..queue.point_count() {
                    if let Ok(point) = queue.point(point) {
                        output.add_point(point.sample_offset, point.value * 2.0);
                    }
                }
            }
            UniversalResult::Ok
        }
    }

    struct TestLoader {
        view_calls: ViewThreads,
    }

    impl PluginLoader for TestLoader {
        fn load(&self, _kind: PluginKind, path: &Path) -> Result<Box<dyn HostedPlugin>> {
            if path.to_string_lossy().contains("broken") {
                return Err(BridgeError::InitializationFailed {
                    path: path.to_path_buf(),
                    stage: InitStage::EntryPoint,
                    reason: "no entry point".to_string(),
                });
            }
            Ok(Box::new(DoublingPlugin {
                view: CountingView {
                    calls: self.view_calls.clone(),
                },
            }))
        }
    }

    fn test_config() -> HostConfig {
        HostConfig {
            connect_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    fn request_in(dir: &Path, plugin: &str) -> HostRequest {
        HostRequest {
            plugin_kind: PluginKind::Vst3,
            plugin_path: PathBuf::from(plugin),
            endpoint_base_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_bridge_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let listener = UnixListener::bind(endpoint::control_endpoint(dir.path())).unwrap();
        let view_calls = ViewThreads::default();
        let loader = TestLoader {
            view_calls: view_calls.clone(),
        };

        let bridge = Arc::new(PluginBridge::new(request_in(dir.path(), "/plugins/Doubler.dll"), 3));
        assert_eq!(bridge.state(), BridgeState::Constructed);
        bridge.initialize(&loader, &test_config()).unwrap();
        assert_eq!(bridge.state(), BridgeState::Running);

        let (stream, _) = listener.accept().unwrap();
        let mut channel = Channel::new(stream);
        let handshake: Handshake = channel.receive().unwrap();
        assert_eq!(
            handshake,
            Handshake::Loaded {
                plugin_name: "Doubler".to_string(),
                instance_id: 3,
                view: PlugViewArgs::new(true),
            }
        );

        let main_context = {
            let bridge: Arc<dyn HostBridge> = bridge.clone();
            thread::Builder::new()
                .name("main-context".to_string())
                .spawn(move || {
                    run_single_bridge(bridge, &mut NoWindowing, &HostConfig::default())
                })
                .unwrap()
        };

        let messenger = ChannelMessenger::new(channel);
        let mut inputs = YaParameterChanges::new();
        inputs.add_parameter_data(1).add_point(16, 0.25);
        let response = call(
            &messenger,
            Process {
                owner_instance_id: 3,
                input_parameter_changes: inputs,
                new_realtime_priority: None,
            },
        )
        .unwrap();
        assert_eq!(response.result, UniversalResult::Ok);
        let queue = response.output_parameter_changes.parameter_data(0).unwrap();
        assert_eq!(queue.point(0).unwrap().value, 0.5);

        let attached = Attached {
            owner_instance_id: 3,
            parent: 0x1234,
            platform_type: "HWND".into(),
        };
        assert_eq!(call(&messenger, attached).unwrap(), UniversalResult::Ok);
        assert_eq!(
            call(&messenger, Removed { owner_instance_id: 3 }).unwrap(),
            UniversalResult::Ok
        );
        // View calls are made on the main context, not the dispatch thread
        assert_eq!(
            *view_calls.lock(),
            vec!["main-context".to_string(), "main-context".to_string()]
        );

        // Wrong owner never reaches the plugin
        assert_eq!(
            call(&messenger, Removed { owner_instance_id: 4 }).unwrap(),
            UniversalResult::InvalidArgument
        );
        assert_eq!(view_calls.lock().len(), 2);

        drop(messenger);
        main_context.join().unwrap().unwrap();
        assert_eq!(bridge.state(), BridgeState::Exited);
    }

    #[test]
    fn test_failed_load_is_reported_to_native_side() {
        let dir = tempfile::tempdir().unwrap();
        let listener = UnixListener::bind(endpoint::control_endpoint(dir.path())).unwrap();
        let loader = TestLoader {
            view_calls: ViewThreads::default(),
        };

        let bridge = PluginBridge::new(request_in(dir.path(), "/plugins/broken.dll"), 1);
        let result = bridge.initialize(&loader, &test_config());
        assert!(matches!(
            result,
            Err(BridgeError::InitializationFailed {
                stage: InitStage::EntryPoint,
                ..
            })
        ));
        assert_eq!(bridge.state(), BridgeState::Exited);

        let (stream, _) = listener.accept().unwrap();
        let handshake: Handshake = Channel::new(stream).receive().unwrap();
        match handshake {
            Handshake::Failed { reason } => assert!(reason.contains("no entry point")),
            other => panic!("Expected a failed handshake, got {:?}", other),
        }
    }

    #[test]
    fn test_unreachable_control_socket_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let loader = TestLoader {
            view_calls: ViewThreads::default(),
        };

        let bridge = PluginBridge::new(request_in(dir.path(), "/plugins/Doubler.dll"), 1);
        let result = bridge.initialize(&loader, &test_config());
        assert!(matches!(
            result,
            Err(BridgeError::InitializationFailed {
                stage: InitStage::Connecting,
                ..
            })
        ));
        let (tasks_tx, _tasks_rx) = crossbeam_channel::unbounded::<MainTask>();
        let main_context = MainContextHandle::new(1, Box::new(tasks_tx));
        assert!(bridge.run(&main_context).is_err());
    }
}
