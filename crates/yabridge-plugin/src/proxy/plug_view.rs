//! Editor view interface and its proxy.

use super::{call, Messenger};
use crate::protocol::{Attached, IsPlatformTypeSupported, PlatformType, Removed, UniversalResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Platform type hosts use for X11 window embedding.
pub const PLATFORM_TYPE_X11_EMBED_WINDOW_ID: &str = "X11EmbedWindowID";
/// Platform type Windows plugins understand.
pub const PLATFORM_TYPE_HWND: &str = "HWND";

pub trait PlugView: Send {
    fn is_platform_type_supported(&mut self, platform_type: &str) -> UniversalResult;
    /// `parent` is an opaque native window handle.
    fn attached(&mut self, parent: u64, platform_type: &str) -> UniversalResult;
    fn removed(&mut self) -> UniversalResult;
}

/// Whether an object exposes an editor view. Decided once when the proxy is
/// created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlugViewArgs {
    pub supported: bool,
}

impl PlugViewArgs {
    pub fn new(supported: bool) -> Self {
        Self { supported }
    }

    pub fn from_view(view: Option<&mut dyn PlugView>) -> Self {
        Self {
            supported: view.is_some(),
        }
    }
}

/// The Wine side only knows about `HWND`, so the X11 embedding type is
/// translated before it crosses the wire.
pub fn to_windows_platform_type(platform_type: &str) -> &str {
    if platform_type == PLATFORM_TYPE_X11_EMBED_WINDOW_ID {
        PLATFORM_TYPE_HWND
    } else {
        platform_type
    }
}

/// Native-side stand-in for a view owned by a plugin instance in the host.
pub struct PlugViewProxy {
    owner_instance_id: u64,
    args: PlugViewArgs,
    messenger: Arc<dyn Messenger>,
}

impl PlugViewProxy {
    pub fn new(owner_instance_id: u64, args: PlugViewArgs, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            owner_instance_id,
            args,
            messenger,
        }
    }

    pub fn owner_instance_id(&self) -> u64 {
        self.owner_instance_id
    }

    pub fn args(&self) -> PlugViewArgs {
        self.args
    }

    fn result_of(&self, operation: &str, result: crate::Result<UniversalResult>) -> UniversalResult {
        result.unwrap_or_else(|err| {
            tracing::error!(
                "Error while forwarding {} for instance {}: {}",
                operation,
                self.owner_instance_id,
                err
            );
            UniversalResult::InternalError
        })
    }
}

impl PlugView for PlugViewProxy {
    fn is_platform_type_supported(&mut self, platform_type: &str) -> UniversalResult {
        let request = IsPlatformTypeSupported {
            owner_instance_id: self.owner_instance_id,
            platform_type: PlatformType::new(to_windows_platform_type(platform_type)),
        };
        let result = call(&*self.messenger, request);
        self.result_of("IPlugView::isPlatformTypeSupported", result)
    }

    fn attached(&mut self, parent: u64, platform_type: &str) -> UniversalResult {
        let request = Attached {
            owner_instance_id: self.owner_instance_id,
            parent,
            platform_type: PlatformType::new(to_windows_platform_type(platform_type)),
        };
        let result = call(&*self.messenger, request);
        self.result_of("IPlugView::attached", result)
    }

    fn removed(&mut self) -> UniversalResult {
        let request = Removed {
            owner_instance_id: self.owner_instance_id,
        };
        let result = call(&*self.messenger, request);
        self.result_of("IPlugView::removed", result)
    }
}
