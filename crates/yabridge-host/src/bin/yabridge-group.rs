//! Group host. Spawned through Wine by the first plugin of a group with the
//! group's socket path; later plugins of the same group connect to it
//! instead of starting their own host.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use yabridge_host::stdio::{spawn_stdio_relay, StdIoCapture};
use yabridge_host::{BridgeError, GroupBridge, HostConfig, LibraryLoader, NoWindowing, Result};
use yabridge_plugin::{logging, LogSink, Logger};

#[derive(Parser, Debug)]
#[command(name = "yabridge-group", version, about = "Hosts a group of Windows plugins")]
struct Args {
    /// Socket the group listens on for new plugins
    group_socket_path: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = HostConfig::default();
    let logger = Logger::for_group(&args.group_socket_path);

    // Both captures live until main returns
    let mut captures = None;
    if config.capture_stdio {
        let mut stdout = StdIoCapture::stdout()?;
        let mut stderr = StdIoCapture::stderr()?;
        logging::init_with_stderr(Some(stderr.original_file()?));

        if let (Some(stdout_reader), Some(stderr_reader)) =
            (stdout.take_reader(), stderr.take_reader())
        {
            spawn_stdio_relay(stdout_reader, stderr_reader, logger.clone())?;
        }
        captures = Some((stdout, stderr));
    } else {
        logging::init_from_environment();
    }

    let mut group = match GroupBridge::new(
        &args.group_socket_path,
        config,
        Arc::new(LibraryLoader),
        Box::new(NoWindowing),
    ) {
        Ok(group) => group,
        Err(BridgeError::AlreadyListening { endpoint }) => {
            logger.log(&format!(
                "Another process is already listening on '{}', shutting down",
                endpoint.display()
            ));
            return Ok(());
        }
        Err(err) => {
            logger.log(&format!("Could not set up the group host: {err}"));
            return Err(err);
        }
    };

    logger.log(&format!(
        "Group host is up and running, now accepting incoming connections on '{}'",
        args.group_socket_path.display()
    ));
    let result = group.handle_incoming_connections();
    drop(captures);
    result
}
