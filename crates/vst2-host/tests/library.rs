use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use libloading::{Library, Symbol};
use vst2_host::{HostRegistry, LoadError, PluginLibrary};

/// Finds the cdylib cargo builds for a path dependency of this test.
fn built_library(crate_name: &str) -> Result<PathBuf> {
    let exe = env::current_exe()?;
    let prefix = format!("{}{crate_name}", env::consts::DLL_PREFIX);
    let dirs: Vec<&Path> = exe.ancestors().skip(1).take(2).collect();
    for dir in dirs {
        let Ok(entries) = fs::read_dir(dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            let name_matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&prefix));
            let is_dylib = path.extension().and_then(|ext| ext.to_str()) == Some(env::consts::DLL_EXTENSION);
            if name_matches && is_dylib {
                return Ok(path);
            }
        }
    }
    anyhow::bail!("no {prefix}*.{} next to {}", env::consts::DLL_EXTENSION, exe.display())
}

/// Second handle on the same library, kept open so its counters stay
/// readable after the host releases its own handle.
struct Counters {
    library: Library,
}

impl Counters {
    fn open(path: &Path) -> Result<Self> {
        let library = unsafe { Library::new(path) }?;
        Ok(Self { library })
    }

    fn read(&self, symbol: &[u8]) -> Result<usize> {
        let counter: Symbol<extern "C" fn() -> usize> = unsafe { self.library.get(symbol) }?;
        Ok(counter())
    }

    fn opened(&self) -> Result<usize> {
        self.read(b"vst2_test_plugin_opened\0")
    }

    fn closed(&self) -> Result<usize> {
        self.read(b"vst2_test_plugin_closed\0")
    }
}

#[test]
fn shared_library_loads_and_unloads_cleanly() -> Result<()> {
    let path = built_library("vst2_test_plugin").context("test plugin cdylib not built")?;
    let counters = Counters::open(&path)?;
    let opened = counters.opened()?;
    let closed = counters.closed()?;

    let library = PluginLibrary::open(&path)?;
    assert_eq!(library.path(), path.as_path());
    drop(library);

    let registry = HostRegistry::default();
    let plugin = registry.load(&path)?;
    assert_eq!(plugin.path(), Some(path.as_path()));
    assert_eq!(plugin.effect_name(), "Test Plugin");
    assert_eq!(registry.live_instances(), 1);
    assert_eq!(counters.opened()?, opened + 1);
    assert_eq!(counters.closed()?, closed);

    plugin.set_sample_rate(48_000.0)?;
    plugin.set_block_size(64)?;
    plugin.turn_on()?;
    let inputs = vec![vec![0.25f32; 64], vec![-0.25; 64]];
    let mut outputs = vec![vec![0.0f32; 64]; 2];
    plugin.process_replacing(&[], &inputs, &mut outputs, 64)?;
    assert_eq!(outputs, inputs);

    plugin.unload();
    assert_eq!(registry.live_instances(), 0);
    assert_eq!(counters.opened()?, opened + 1);
    assert_eq!(counters.closed()?, closed + 1);

    {
        let first = registry.load(&path)?;
        let second = registry.load(&path)?;
        assert_ne!(first.id(), second.id());
        assert_eq!(registry.live_instances(), 2);
        assert_eq!(counters.opened()?, opened + 3);
    }
    assert_eq!(registry.live_instances(), 0);
    assert_eq!(counters.closed()?, closed + 3);

    registry.shutdown()?;
    Ok(())
}

#[test]
fn library_without_entry_point_is_rejected() -> Result<()> {
    let path = built_library("vst2_no_entry").context("entry-less cdylib not built")?;

    match PluginLibrary::open(&path) {
        Err(LoadError::EntryPointNotFound(reported)) => assert_eq!(reported, path),
        other => panic!("expected a missing entry point, got {other:?}"),
    }

    let registry = HostRegistry::default();
    assert!(matches!(registry.load(&path), Err(LoadError::EntryPointNotFound(_))));
    assert_eq!(registry.live_instances(), 0);
    Ok(())
}
