use std::fmt;
use std::path::{Path, PathBuf};

use libloading::Library;
use vst2_sys::PluginMainProc;

use crate::error::LoadError;

/// Entry symbols tried in order. `main` is what pre-2.4 SDKs exported.
#[cfg(not(target_os = "macos"))]
const ENTRY_SYMBOLS: &[&[u8]] = &[b"VSTPluginMain\0", b"main\0"];
#[cfg(target_os = "macos")]
const ENTRY_SYMBOLS: &[&[u8]] = &[b"VSTPluginMain\0", b"main_macho\0", b"main\0"];

/// An opened plug-in binary together with its resolved entry point.
///
/// Dropping the value unloads the library, so it must outlive every
/// descriptor the entry point produced.
pub struct PluginLibrary {
    path: PathBuf,
    entry: PluginMainProc,
    _library: Library,
}

impl PluginLibrary {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        validate_path(path)?;

        let binary = resolve_bundle_path(path);
        if !binary.exists() {
            return Err(LoadError::LibraryNotFound {
                path: path.to_path_buf(),
                source: None,
            });
        }

        let library = unsafe { Library::new(&binary) }.map_err(|source| LoadError::LibraryNotFound {
            path: path.to_path_buf(),
            source: Some(source),
        })?;

        let entry = ENTRY_SYMBOLS
            .iter()
            .find_map(|symbol| unsafe { library.get::<PluginMainProc>(symbol) }.ok().map(|entry| *entry))
            .ok_or_else(|| LoadError::EntryPointNotFound(path.to_path_buf()))?;

        tracing::debug!(path = %binary.display(), "plugin library opened");
        Ok(Self {
            path: path.to_path_buf(),
            entry,
            _library: library,
        })
    }

    pub fn entry_point(&self) -> PluginMainProc {
        self.entry
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for PluginLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLibrary").field("path", &self.path).finish()
    }
}

fn validate_path(path: &Path) -> Result<(), LoadError> {
    let Some(text) = path.to_str() else {
        return Err(LoadError::PathInvalid(path.to_path_buf()));
    };
    if text.is_empty() || text.contains('\0') {
        return Err(LoadError::PathInvalid(path.to_path_buf()));
    }
    Ok(())
}

/// Maps a macOS `.vst` bundle directory to the binary inside it.
fn resolve_bundle_path(path: &Path) -> PathBuf {
    if path.is_dir() && path.extension().and_then(|ext| ext.to_str()) == Some("vst") {
        if let Some(stem) = path.file_stem() {
            let inner = path.join("Contents").join("MacOS").join(stem);
            if inner.exists() {
                return inner;
            }
        }
    }
    path.to_path_buf()
}
