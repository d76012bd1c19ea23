//! Test helpers and fixtures for yabridge integration tests
//!
//! Plugins are provided by an in-process [`MockLoader`] and group hosts run
//! on a plain thread inside the test process, so no Wine installation is
//! needed. Anything with `broken` in its path fails to load.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use yabridge::host::{GroupBridge, GroupMonitor, HostedPlugin, NoWindowing, PluginLoader};
use yabridge::plugin::endpoint;
use yabridge::prelude::*;
use yabridge::{HostConfig, InitStage, LibArchitecture, WinePrefix};

/// Short enough that idle shutdown doesn't slow the suite down, long enough
/// to observe the group while it waits.
pub const TEST_SHUTDOWN_DELAY: Duration = Duration::from_millis(300);

pub const GROUP_NAME: &str = "test";

/// Platform types the mock views were asked about, in call order.
pub type ViewLog = Arc<Mutex<Vec<String>>>;

pub struct MockView {
    log: ViewLog,
    threads: ViewLog,
}

impl MockView {
    fn record_thread(&self) {
        self.threads
            .lock()
            .push(thread::current().name().unwrap_or_default().to_string());
    }
}

impl PlugView for MockView {
    fn is_platform_type_supported(&mut self, platform_type: &str) -> UniversalResult {
        self.record_thread();
        self.log.lock().push(platform_type.to_string());
        if platform_type == PLATFORM_TYPE_HWND {
            UniversalResult::Ok
        } else {
            UniversalResult::False
        }
    }

    fn attached(&mut self, _parent: u64, platform_type: &str) -> UniversalResult {
        self.record_thread();
        self.log.lock().push(platform_type.to_string());
        UniversalResult::Ok
    }

    fn removed(&mut self) -> UniversalResult {
        self.record_thread();
        UniversalResult::Ok
    }
}

/// Reports every incoming automation point back as output.
pub struct MockPlugin {
    name: String,
    view: MockView,
}

impl HostedPlugin for MockPlugin {
    fn name(&self) -> &str {
        &self.name
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
                    output.add_point(point.sample_offset, point.value);
                }
            }
        }
        UniversalResult::Ok
    }
}

#[derive(Default)]
pub struct MockLoader {
    pub view_log: ViewLog,
    /// Names of the threads every view call ran on.
    pub view_threads: ViewLog,
}

impl PluginLoader for MockLoader {
    fn load(&self, _kind: PluginKind, path: &Path) -> Result<Box<dyn HostedPlugin>> {
        if path.to_string_lossy().contains("broken") {
            return Err(BridgeError::InitializationFailed {
                path: path.to_path_buf(),
                stage: InitStage::EntryPoint,
                reason: "no entry point".to_string(),
            });
        }

        Ok(Box::new(MockPlugin {
            name: path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default(),
            view: MockView {
                log: self.view_log.clone(),
                threads: self.view_threads.clone(),
            },
        }))
    }
}

pub fn test_host_config() -> HostConfig {
    HostConfig {
        connect_timeout: Duration::from_secs(2),
        shutdown_delay: TEST_SHUTDOWN_DELAY,
        capture_stdio: false,
        ..Default::default()
    }
}

/// Native-side settings that keep every socket inside `temp_dir`.
pub fn test_bridge_config(temp_dir: &Path) -> BridgeConfig {
    BridgeConfig {
        handshake_timeout: Duration::from_secs(5),
        temp_dir: temp_dir.to_path_buf(),
        ..Default::default()
    }
}

pub fn test_wine_prefix(temp_dir: &Path) -> WinePrefix {
    WinePrefix::Detected(temp_dir.join("prefix"))
}

/// A 64-bit VST3 plugin in the test prefix, without touching the disk.
pub fn test_plugin(temp_dir: &Path, path: &str) -> PluginInfo {
    PluginInfo {
        kind: PluginKind::Vst3,
        windows_library_path: PathBuf::from(path),
        architecture: LibArchitecture::Dll64,
        wine_prefix: test_wine_prefix(temp_dir),
    }
}

/// The endpoint a plugin from [`test_plugin`] looks for its group on.
pub fn test_group_endpoint(temp_dir: &Path) -> PathBuf {
    endpoint::group_endpoint(
        temp_dir,
        GROUP_NAME,
        &test_wine_prefix(temp_dir).path(),
        LibArchitecture::Dll64,
    )
}

pub struct RunningGroup {
    pub monitor: GroupMonitor,
    pub thread: JoinHandle<Result<()>>,
}

/// Binds the group endpoint on the calling thread, then serves it from a
/// new one.
pub fn spawn_group(temp_dir: &Path, loader: Arc<MockLoader>) -> RunningGroup {
    spawn_group_with(temp_dir, loader, test_host_config())
}

pub fn spawn_group_with(
    temp_dir: &Path,
    loader: Arc<MockLoader>,
    config: HostConfig,
) -> RunningGroup {
    let mut group = GroupBridge::new(
        &test_group_endpoint(temp_dir),
        config,
        loader,
        Box::new(NoWindowing),
    )
    .expect("Failed to bind the group endpoint");
    let monitor = group.monitor();

    let thread = thread::Builder::new()
        .name("test-group".to_string())
        .spawn(move || group.handle_incoming_connections())
        .expect("Failed to spawn the group thread");

    RunningGroup { monitor, thread }
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
