//! Plugin client for the native side of the bridge.
//!
//! Launches a dedicated Wine host or joins a group host, waits for the host
//! to connect back and report the plugin as loaded, then forwards plugin
//! calls over the control channel.

use crate::config::{BridgeConfig, Configuration};
use crate::endpoint;
use crate::environment::PluginInfo;
use crate::error::{BridgeError, InitStage, Result};
use crate::logging::{LogSink, Logger};
use crate::protocol::{Handshake, HostRequest, HostResponse, Process, UniversalResult};
use crate::proxy::{
    call, ChannelMessenger, Messenger, ParameterChanges, PlugViewArgs, PlugViewProxy,
    YaParameterChanges,
};
use crate::realtime::{self, PrioritySync};
use crate::transport::{relay_lines, MessageTransport, TransportListener};
use parking_lot::Mutex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;

/// How often a launching host is checked for an early exit.
const WATCHDOG_INTERVAL: Duration = Duration::from_millis(100);
const GROUP_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// A Wine process hosting (or about to host) the plugin.
pub trait HostProcess: Send {
    fn pid(&self) -> u32;
    fn running(&mut self) -> bool;
    fn terminate(&mut self);
}

/// A `yabridge-host` process owned by exactly one plugin.
struct IndividualHost {
    child: Child,
    pid: u32,
}

impl IndividualHost {
    fn spawn(
        config: &BridgeConfig,
        info: &PluginInfo,
        request: &HostRequest,
        logger: Arc<Logger>,
    ) -> Result<Self> {
        let mut command = Command::new(&config.wine_loader);
        command
            .arg(config.host_binary_for(info.architecture))
            .arg(request.plugin_kind.to_string())
            .arg(&request.plugin_path)
            .arg(&request.endpoint_base_dir)
            .envs(info.wine_prefix.host_environment())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| BridgeError::InitializationFailed {
            path: info.windows_library_path.clone(),
            stage: InitStage::Launching,
            reason: format!("could not run '{}': {e}", config.wine_loader.display()),
        })?;
        let pid = child.id().unwrap_or_default();
        relay_child_output(&mut child, logger);

        Ok(Self { child, pid })
    }
}

impl HostProcess for IndividualHost {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// A shared `yabridge-group` process. It outlives any single plugin, so it is
/// only observed, never terminated.
struct GroupHost {
    pid: u32,
}

impl GroupHost {
    /// Asks the group host to take the plugin, starting the group first if
    /// nothing answers on its endpoint.
    async fn connect(
        config: &BridgeConfig,
        info: &PluginInfo,
        group_name: &str,
        request: &HostRequest,
        logger: Arc<Logger>,
    ) -> Result<Self> {
        let group_endpoint = endpoint::group_endpoint(
            &config.temp_dir,
            group_name,
            &info.wine_prefix.path(),
            info.architecture,
        );

        if let Ok(response) = request_group_host(&group_endpoint, request).await {
            return Ok(Self { pid: response.pid });
        }

        tracing::info!(
            "No group host is listening on '{}', starting a new one",
            group_endpoint.display()
        );
        let mut command = Command::new(&config.wine_loader);
        command
            .arg(config.group_host_binary_for(info.architecture))
            .arg(&group_endpoint)
            .envs(info.wine_prefix.host_environment())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| BridgeError::InitializationFailed {
            path: info.windows_library_path.clone(),
            stage: InitStage::Launching,
            reason: format!("could not run '{}': {e}", config.wine_loader.display()),
        })?;
        relay_child_output(&mut child, logger);

        // If another plugin raced us to start this group, our process exits
        // on its own and the retries below reach the winner instead.
        let deadline = Instant::now() + config.handshake_timeout;
        loop {
            tokio::time::sleep(GROUP_RETRY_INTERVAL).await;
            match request_group_host(&group_endpoint, request).await {
                Ok(response) => return Ok(Self { pid: response.pid }),
                Err(err) if Instant::now() >= deadline => {
                    return Err(BridgeError::InitializationFailed {
                        path: info.windows_library_path.clone(),
                        stage: InitStage::ContactingGroup,
                        reason: format!(
                            "the group host at '{}' never answered: {err}",
                            group_endpoint.display()
                        ),
                    });
                }
                Err(err) => tracing::trace!("Group host not ready yet: {}", err),
            }
        }
    }
}

impl HostProcess for GroupHost {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn running(&mut self) -> bool {
        PathBuf::from(format!("/proc/{}", self.pid)).exists()
    }

    fn terminate(&mut self) {}
}

async fn request_group_host(group_endpoint: &Path, request: &HostRequest) -> Result<HostResponse> {
    let mut transport = MessageTransport::connect(group_endpoint).await?;
    transport.send(request).await?;
    transport.receive().await
}

fn relay_child_output(child: &mut Child, logger: Arc<Logger>) {
    if let Some(stdout) = child.stdout.take() {
        let logger = logger.clone();
        tokio::spawn(async move { relay_lines(stdout, "[Wine STDOUT] ", &*logger).await });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move { relay_lines(stderr, "[Wine STDERR] ", &*logger).await });
    }
}

/// Drives `operation` while making sure the host is still alive and the
/// initialization deadline hasn't passed.
async fn watch_host<T>(
    operation: impl Future<Output = Result<T>>,
    host: &mut dyn HostProcess,
    deadline: Instant,
    plugin_path: &Path,
    stage: InitStage,
) -> Result<T> {
    tokio::pin!(operation);
    let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);
    let failed = |reason: String| BridgeError::InitializationFailed {
        path: plugin_path.to_path_buf(),
        stage,
        reason,
    };

    loop {
        tokio::select! {
            result = &mut operation => return result,
            _ = watchdog.tick() => {
                if !host.running() {
                    return Err(failed(format!(
                        "the Wine host process (pid {}) exited during initialization",
                        host.pid()
                    )));
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                return Err(failed(
                    "timed out waiting for the Wine host, check the log for errors".to_string(),
                ));
            }
        }
    }
}

/// Handle to a bridged plugin. Cheap to share between the host's threads;
/// every call is one complete exchange over the control channel.
pub struct PluginClient {
    messenger: Arc<dyn Messenger>,
    plugin_name: String,
    instance_id: u64,
    view_args: PlugViewArgs,
    priority_sync: Mutex<PrioritySync>,
}

/// Owner handle for the host process and the endpoint directory.
///
/// Cleans up on drop.
pub struct PluginClientHandle {
    host: Option<Box<dyn HostProcess>>,
    endpoint_base_dir: PathBuf,
}

impl PluginClient {
    /// Hosts the plugin described by `info` in its own Wine process, or in
    /// the group named by `configuration`.
    ///
    /// Returns client (for plugin calls) and handle (for cleanup).
    pub async fn load(
        config: BridgeConfig,
        info: PluginInfo,
        configuration: &Configuration,
    ) -> Result<(Self, PluginClientHandle)> {
        config.validate()?;
        let deadline = Instant::now() + config.handshake_timeout;

        let endpoint_base_dir = endpoint::generate_endpoint_base_dir(&config.temp_dir, &info.name());
        std::fs::create_dir_all(&endpoint_base_dir)?;
        let mut handle = PluginClientHandle {
            host: None,
            endpoint_base_dir: endpoint_base_dir.clone(),
        };

        let logger = Arc::new(Logger::for_endpoint(&endpoint_base_dir));
        let listener = TransportListener::bind(&endpoint::control_endpoint(&endpoint_base_dir))?;
        let request = HostRequest {
            plugin_kind: info.kind,
            plugin_path: info.windows_library_path.clone(),
            endpoint_base_dir,
        };

        let host: Box<dyn HostProcess> = match &configuration.group {
            Some(group) => {
                Box::new(GroupHost::connect(&config, &info, group, &request, logger.clone()).await?)
            }
            None => Box::new(IndividualHost::spawn(&config, &info, &request, logger.clone())?),
        };
        logger.log(&format!(
            "Hosting '{}' in Wine process {}",
            info.windows_library_path.display(),
            host.pid()
        ));
        let host = handle.host.insert(host);

        let plugin_path = info.windows_library_path.as_path();
        let mut transport = watch_host(
            listener.accept(),
            host.as_mut(),
            deadline,
            plugin_path,
            InitStage::Connecting,
        )
        .await?;
        let handshake = watch_host(
            transport.receive::<Handshake>(),
            host.as_mut(),
            deadline,
            plugin_path,
            InitStage::Handshake,
        )
        .await
        .map_err(|err| match err {
            BridgeError::InitializationFailed { .. } => err,
            other => BridgeError::InitializationFailed {
                path: plugin_path.to_path_buf(),
                stage: InitStage::Handshake,
                reason: other.to_string(),
            },
        })?;

        let (plugin_name, instance_id, view_args) = match handshake {
            Handshake::Loaded {
                plugin_name,
                instance_id,
                view,
            } => (plugin_name, instance_id, view),
            Handshake::Failed { reason } => {
                return Err(BridgeError::InitializationFailed {
                    path: plugin_path.to_path_buf(),
                    stage: InitStage::Loading,
                    reason,
                });
            }
        };
        tracing::debug!("'{}' loaded as instance {}", plugin_name, instance_id);

        let messenger = Arc::new(ChannelMessenger::new(transport.into_channel()?));
        let client = Self::new(
            messenger,
            plugin_name,
            instance_id,
            view_args,
            config.priority_sync_interval,
        );
        Ok((client, handle))
    }

    pub fn new(
        messenger: Arc<dyn Messenger>,
        plugin_name: String,
        instance_id: u64,
        view_args: PlugViewArgs,
        priority_sync_interval: Duration,
    ) -> Self {
        Self {
            messenger,
            plugin_name,
            instance_id,
            view_args,
            priority_sync: Mutex::new(PrioritySync::new(priority_sync_interval)),
        }
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Runs one processing block on the plugin. Call from the host's audio
    /// thread so its scheduling priority can be mirrored on the Wine side.
    pub fn process(
        &self,
        inputs: &dyn ParameterChanges,
        outputs: &mut dyn ParameterChanges,
    ) -> Result<UniversalResult> {
        let new_realtime_priority = self
            .priority_sync
            .lock()
            .poll(std::time::Instant::now(), realtime::get_realtime_priority);

        let response = call(
            &*self.messenger,
            Process {
                owner_instance_id: self.instance_id,
                input_parameter_changes: YaParameterChanges::from_changes(inputs),
                new_realtime_priority,
            },
        )?;

        response.output_parameter_changes.write_back_outputs(outputs);
        Ok(response.result)
    }

    /// The plugin's editor view, if it has one.
    pub fn create_view(&self) -> Option<PlugViewProxy> {
        self.view_args.supported.then(|| {
            PlugViewProxy::new(self.instance_id, self.view_args, self.messenger.clone())
        })
    }
}

impl PluginClientHandle {
    pub fn endpoint_base_dir(&self) -> &Path {
        &self.endpoint_base_dir
    }

    pub fn host_pid(&self) -> Option<u32> {
        self.host.as_ref().map(|host| host.pid())
    }
}

impl Drop for PluginClientHandle {
    fn drop(&mut self) {
        if let Some(mut host) = self.host.take() {
            host.terminate();
        }
        let _ = std::fs::remove_dir_all(&self.endpoint_base_dir);
    }
}
