//! Hosted plugin trait and the library-backed loader.

use std::path::{Path, PathBuf};
use yabridge_plugin::proxy::{ParameterChanges, PlugView};
use yabridge_plugin::{BridgeError, InitStage, PluginKind, Result, UniversalResult};

/// A plugin instance living in this process.
pub trait HostedPlugin: Send {
    fn name(&self) -> &str;

    /// The editor view, if the plugin has one.
    fn plug_view(&mut self) -> Option<&mut dyn PlugView>;

    fn process(
        &mut self,
        inputs: &dyn ParameterChanges,
        outputs: &mut dyn ParameterChanges,
    ) -> UniversalResult;

    /// Lets the plugin handle pending events for its own windows. Always
    /// called from the main execution context.
    fn handle_windowing_events(&mut self) {}
}

/// Turns a plugin path into a live instance. Called on the main execution
/// context so library initialization happens on the windowing thread.
pub trait PluginLoader: Send + Sync {
    fn load(&self, kind: PluginKind, path: &Path) -> Result<Box<dyn HostedPlugin>>;
}

const VST2_ENTRY_POINTS: &[&[u8]] = &[b"VSTPluginMain\0", b"main\0"];
const VST3_ENTRY_POINTS: &[&[u8]] = &[b"GetPluginFactory\0"];

/// Opens the plugin library and checks that it exports the entry point for
/// its format. The module stays loaded until the instance is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibraryLoader;

impl PluginLoader for LibraryLoader {
    fn load(&self, kind: PluginKind, path: &Path) -> Result<Box<dyn HostedPlugin>> {
        let library = unsafe {
            libloading::Library::new(path).map_err(|e| BridgeError::InitializationFailed {
                path: path.to_path_buf(),
                stage: InitStage::Loading,
                reason: format!("Failed to load library: {}", e),
            })?
        };

        let entry_points = match kind {
            PluginKind::Vst2 => VST2_ENTRY_POINTS,
            PluginKind::Vst3 => VST3_ENTRY_POINTS,
        };
        let exports_entry_point = entry_points.iter().any(|symbol| {
            let entry: std::result::Result<libloading::Symbol<unsafe extern "C" fn()>, _> =
                unsafe { library.get(symbol) };
            entry.is_ok()
        });
        if !exports_entry_point {
            return Err(BridgeError::InitializationFailed {
                path: path.to_path_buf(),
                stage: InitStage::EntryPoint,
                reason: format!("'{}' is not a {} plugin", path.display(), kind),
            });
        }

        Ok(Box::new(LibraryPlugin {
            name: path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_path_buf(),
            _library: library,
        }))
    }
}

/// A loaded plugin module. The format specific call surfaces sit on top of
/// the entry point and are provided elsewhere.
struct LibraryPlugin {
    name: String,
    path: PathBuf,
    _library: libloading::Library,
}

impl HostedPlugin for LibraryPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn plug_view(&mut self) -> Option<&mut dyn PlugView> {
        None
    }

    fn process(
        &mut self,
        _inputs: &dyn ParameterChanges,
        _outputs: &mut dyn ParameterChanges,
    ) -> UniversalResult {
        tracing::trace!("No processing surface bound for '{}'", self.path.display());
        UniversalResult::NotImplemented
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_fails_to_load() {
        let result = LibraryLoader.load(PluginKind::Vst3, Path::new("/nonexistent/Plugin.dll"));
        match result {
            Err(BridgeError::InitializationFailed { path, stage, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/Plugin.dll"));
                assert_eq!(stage, InitStage::Loading);
            }
            Err(other) => panic!("Expected InitializationFailed, got {:?}", other),
            Ok(_) => panic!("Loading a missing library should fail"),
        }
    }

    #[test]
    fn test_non_library_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.dll");
        std::fs::write(&path, "not a shared object").unwrap();

        assert!(matches!(
            LibraryLoader.load(PluginKind::Vst2, &path),
            Err(BridgeError::InitializationFailed {
                stage: InitStage::Loading,
                ..
            })
        ));
    }
}
