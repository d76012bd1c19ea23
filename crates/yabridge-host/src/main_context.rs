//! The main execution context's windowing side.
//!
//! Everything that touches windows happens on the thread that drives the main
//! context: editor calls posted by dispatch threads, plugins handling their
//! window events, draining the native message queue, and tearing down plugin
//! modules.

use crate::bridge::HostBridge;
use crate::group::PluginId;
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc::UnboundedSender;
use yabridge_plugin::protocol::{ControlRequest, ControlResponse};
use yabridge_plugin::{BridgeError, HostConfig, Result};

/// The process-wide native message queue.
pub trait WindowingSystem: Send {
    /// Dispatches one pending message. Returns `false` when the queue is
    /// empty.
    fn dispatch_next_message(&mut self) -> bool;
}

/// For hosts without a native message queue.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWindowing;

impl WindowingSystem for NoWindowing {
    fn dispatch_next_message(&mut self) -> bool {
        false
    }
}

/// Dispatches at most `max_messages` pending messages and returns how many
/// were handled. Whatever is left waits for the next event pass, so a single
/// plugin flooding the queue can't starve the rest.
pub fn pump_messages(windowing: &mut dyn WindowingSystem, max_messages: usize) -> usize {
    let mut dispatched = 0;
    while dispatched < max_messages && windowing.dispatch_next_message() {
        dispatched += 1;
    }
    dispatched
}

/// One event pass: every bridge services its own windows first, then the
/// shared queue is drained up to the configured bound.
pub fn handle_events<'a>(
    bridges: impl IntoIterator<Item = &'a Arc<dyn HostBridge>>,
    windowing: &mut dyn WindowingSystem,
    config: &HostConfig,
) -> usize {
    for bridge in bridges {
        bridge.handle_windowing_events();
    }
    pump_messages(windowing, config.max_windowing_messages)
}

/// Hosts one bridge the way `yabridge-host` does: the bridge serves requests
/// on its own dispatch thread while the calling thread handles windowing
/// events and the view calls the bridge posts back, until the bridge exits.
pub fn run_single_bridge(
    bridge: Arc<dyn HostBridge>,
    windowing: &mut dyn WindowingSystem,
    config: &HostConfig,
) -> Result<()> {
    let (tasks_tx, tasks_rx) = crossbeam_channel::unbounded();
    let dispatch = {
        let bridge = bridge.clone();
        thread::Builder::new()
            .name("plugin-dispatch".to_string())
            .spawn(move || {
                let main_context = MainContextHandle::new(0, Box::new(tasks_tx));
                let result = bridge.run(&main_context);
                main_context.notify_exited();
                result
            })?
    };

    loop {
        match tasks_rx.recv_timeout(config.event_interval) {
            Ok(MainTask::PluginExited(_)) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(MainTask::ViewRequest { request, reply, .. }) => {
                let _ = reply.send(bridge.handle_main_context_request(request));
            }
            Err(RecvTimeoutError::Timeout) => {
                handle_events(std::iter::once(&bridge), windowing, config);
            }
        }
    }

    let result = dispatch
        .join()
        .map_err(|_| BridgeError::ProtocolError("the dispatch thread panicked".to_string()))?;
    tracing::info!("'{}' has exited", bridge.plugin_path().display());
    result
}

/// Work posted back onto the main context from other threads.
#[derive(Debug)]
pub enum MainTask {
    /// A dispatch thread returned. The plugin is removed from the table and
    /// its module unloaded on the main context's thread.
    PluginExited(PluginId),
    /// A windowing call the dispatch thread can't make itself. The response
    /// goes back through `reply`.
    ViewRequest {
        plugin_id: PluginId,
        request: ControlRequest,
        reply: Sender<ControlResponse>,
    },
}

/// Anything a dispatch thread can post [`MainTask`]s through.
pub trait TaskSink: Send + Sync {
    /// Returns `false` once the main context is gone.
    fn post(&self, task: MainTask) -> bool;
}

impl TaskSink for UnboundedSender<MainTask> {
    fn post(&self, task: MainTask) -> bool {
        self.send(task).is_ok()
    }
}

impl TaskSink for Sender<MainTask> {
    fn post(&self, task: MainTask) -> bool {
        self.send(task).is_ok()
    }
}

/// A dispatch thread's way back onto the main context.
pub struct MainContextHandle {
    plugin_id: PluginId,
    sink: Box<dyn TaskSink>,
}

impl MainContextHandle {
    pub fn new(plugin_id: PluginId, sink: Box<dyn TaskSink>) -> Self {
        Self { plugin_id, sink }
    }

    pub fn plugin_id(&self) -> PluginId {
        self.plugin_id
    }

    /// Runs `request` on the main context and blocks until it answered.
    /// `None` if the main context stopped before replying.
    pub fn call(&self, request: ControlRequest) -> Option<ControlResponse> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let posted = self.sink.post(MainTask::ViewRequest {
            plugin_id: self.plugin_id,
            request,
            reply: reply_tx,
        });
        if !posted {
            return None;
        }
        reply_rx.recv().ok()
    }

    pub fn notify_exited(self) {
        self.sink.post(MainTask::PluginExited(self.plugin_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeState;
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use yabridge_plugin::protocol::Removed;
    use yabridge_plugin::UniversalResult;

    /// Makes one view call halfway through a fixed lifetime.
    struct IdleBridge {
        lifetime: Duration,
        event_passes: AtomicUsize,
        view_threads: Mutex<Vec<String>>,
    }

    impl HostBridge for IdleBridge {
        fn plugin_path(&self) -> &Path {
            Path::new("/plugins/Idle.dll")
        }

        fn state(&self) -> BridgeState {
            BridgeState::Running
        }

        fn run(&self, main_context: &MainContextHandle) -> Result<()> {
            thread::sleep(self.lifetime / 2);
            let response = main_context.call(ControlRequest::Removed(Removed {
                owner_instance_id: 0,
            }));
            assert_eq!(response, Some(ControlResponse::Result(UniversalResult::Ok)));
            thread::sleep(self.lifetime / 2);
            Ok(())
        }

        fn handle_windowing_events(&self) {
            self.event_passes.fetch_add(1, Ordering::SeqCst);
        }

        fn handle_main_context_request(&self, _request: ControlRequest) -> ControlResponse {
            self.view_threads
                .lock()
                .push(thread::current().name().unwrap_or_default().to_string());
            ControlResponse::Result(UniversalResult::Ok)
        }
    }

    /// Windowing queue with a fixed backlog.
    struct Backlog {
        pending: usize,
        dispatched: usize,
    }

    impl WindowingSystem for Backlog {
        fn dispatch_next_message(&mut self) -> bool {
            if self.pending == 0 {
                return false;
            }
            self.pending -= 1;
            self.dispatched += 1;
            true
        }
    }

    #[test]
    fn test_backlog_is_drained_in_bounded_passes() {
        let mut backlog = Backlog {
            pending: 50,
            dispatched: 0,
        };

        assert_eq!(pump_messages(&mut backlog, 20), 20);
        assert_eq!(backlog.pending, 30);
        assert_eq!(pump_messages(&mut backlog, 20), 20);
        assert_eq!(pump_messages(&mut backlog, 20), 10);
        assert_eq!(pump_messages(&mut backlog, 20), 0);
        assert_eq!(backlog.dispatched, 50);
    }

    #[test]
    fn test_no_windowing_has_nothing_to_dispatch() {
        assert_eq!(pump_messages(&mut NoWindowing, 20), 0);
    }

    #[test]
    fn test_single_bridge_pumps_events_until_exit() {
        let bridge = Arc::new(IdleBridge {
            lifetime: Duration::from_millis(200),
            event_passes: AtomicUsize::new(0),
            view_threads: Mutex::new(Vec::new()),
        });
        let mut backlog = Backlog {
            pending: 1000,
            dispatched: 0,
        };
        let config = HostConfig {
            event_interval: Duration::from_millis(10),
            max_windowing_messages: 5,
            ..Default::default()
        };

        run_single_bridge(bridge.clone(), &mut backlog, &config).unwrap();

        let passes = bridge.event_passes.load(Ordering::SeqCst);
        assert!(passes > 0);
        // Never more than the bound per pass
        assert_eq!(backlog.dispatched, passes * 5);
    }

    #[test]
    fn test_single_bridge_view_calls_run_on_calling_thread() {
        let bridge = Arc::new(IdleBridge {
            lifetime: Duration::from_millis(100),
            event_passes: AtomicUsize::new(0),
            view_threads: Mutex::new(Vec::new()),
        });

        let runner = {
            let bridge = bridge.clone();
            thread::Builder::new()
                .name("main-context".to_string())
                .spawn(move || {
                    run_single_bridge(bridge, &mut NoWindowing, &HostConfig::default())
                })
                .unwrap()
        };
        runner.join().unwrap().unwrap();

        assert_eq!(*bridge.view_threads.lock(), vec!["main-context".to_string()]);
    }

    #[test]
    fn test_call_without_main_context_fails() {
        let (tasks_tx, tasks_rx) = crossbeam_channel::unbounded::<MainTask>();
        drop(tasks_rx);
        let main_context = MainContextHandle::new(3, Box::new(tasks_tx));

        let request = ControlRequest::Removed(Removed {
            owner_instance_id: 3,
        });
        assert_eq!(main_context.call(request), None);
        assert_eq!(main_context.plugin_id(), 3);
    }
}
