#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use vst2_host::{HostListener, HostRegistry, IoConfiguration, Vst2Plugin};
use vst2_test_plugin::{FakePluginConfig, Probe, VSTPluginMain};

/// Instantiates the test plug-in with `config` on the current thread.
pub fn instantiate(registry: &HostRegistry, config: FakePluginConfig) -> Result<(Vst2Plugin, Arc<Probe>)> {
    let probe = config.install();
    let plugin = unsafe { registry.instantiate(VSTPluginMain) }?;
    Ok((plugin, probe))
}

/// Suspended plug-in configured for 48 kHz and 512 frame blocks.
pub fn prepared(registry: &HostRegistry, config: FakePluginConfig) -> Result<(Vst2Plugin, Arc<Probe>)> {
    let (plugin, probe) = instantiate(registry, config)?;
    plugin.set_sample_rate(48_000.0)?;
    plugin.set_block_size(512)?;
    Ok((plugin, probe))
}

pub fn sine(frames: usize, frequency: f32, sample_rate: f32) -> Vec<f32> {
    (0..frames)
        .map(|n| (2.0 * std::f32::consts::PI * frequency * n as f32 / sample_rate).sin())
        .collect()
}

/// Listener writing into the plug-in probe log, so host and plug-in side
/// notifications land in one ordered sequence.
pub struct ProbeListener {
    pub probe: Arc<Probe>,
    pub io_changes: Mutex<Vec<IoConfiguration>>,
}

impl ProbeListener {
    pub fn new(probe: &Arc<Probe>) -> Arc<Self> {
        Arc::new(Self {
            probe: Arc::clone(probe),
            io_changes: Mutex::new(Vec::new()),
        })
    }
}

impl HostListener for ProbeListener {
    fn io_changed(&self, config: IoConfiguration) {
        self.probe.note("listener-io-changed");
        self.io_changes.lock().push(config);
    }
}
