//! Local stand-ins for interfaces whose real implementation lives in the
//! other process.
//!
//! Each proxy either holds a snapshot that was built from a local
//! implementation (and answers reads from it without a round trip), or
//! forwards calls through a [`Messenger`] when the authoritative state is
//! remote.

pub mod param_value_queue;
pub mod parameter_changes;
pub mod plug_view;

pub use param_value_queue::{ParamValueQueue, ParameterPoint, YaParamValueQueue};
pub use parameter_changes::{ParameterChanges, YaParameterChanges};
pub use plug_view::{PlugView, PlugViewArgs, PlugViewProxy};

use crate::error::Result;
use crate::protocol::{ControlRequest, ControlResponse, Request};
use crate::transport::Channel;
use parking_lot::Mutex;

/// Performs one complete request/response exchange.
pub trait Messenger: Send + Sync {
    fn send_message(&self, request: ControlRequest) -> Result<ControlResponse>;
}

/// Typed round trip: the response is checked against the shape `R` expects.
pub fn call<R: Request>(messenger: &dyn Messenger, request: R) -> Result<R::Response> {
    let response = messenger.send_message(request.into())?;
    R::Response::try_from(response)
}

/// [`Messenger`] over a blocking [`Channel`]. The lock keeps exactly one
/// exchange in flight, so responses never need correlation ids.
pub struct ChannelMessenger {
    channel: Mutex<Channel>,
}

impl ChannelMessenger {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel: Mutex::new(channel),
        }
    }
}

impl Messenger for ChannelMessenger {
    fn send_message(&self, request: ControlRequest) -> Result<ControlResponse> {
        let mut channel = self.channel.lock();
        channel.send(&request)?;
        channel.receive()
    }
}

impl Drop for ChannelMessenger {
    fn drop(&mut self) {
        let _ = self.channel.get_mut().shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ControlResponse, Removed, UniversalResult};
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_channel_messenger_roundtrip() {
        let (native, wine) = UnixStream::pair().unwrap();
        let messenger = ChannelMessenger::new(Channel::new(native));

        let responder = std::thread::spawn(move || {
            let mut channel = Channel::new(wine);
            let request: ControlRequest = channel.receive().unwrap();
            assert_eq!(request.owner_instance_id(), 3);
            channel
                .send(&ControlResponse::Result(UniversalResult::False))
                .unwrap();
        });

        let result = call(&messenger, Removed { owner_instance_id: 3 }).unwrap();
        assert_eq!(result, UniversalResult::False);
        responder.join().unwrap();
    }
}
