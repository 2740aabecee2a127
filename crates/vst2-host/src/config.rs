use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Capability strings a plug-in may ask the host about via `audioMasterCanDo`.
pub mod host_can_do {
    pub const SEND_VST_EVENTS: &str = "sendVstEvents";
    pub const SEND_VST_MIDI_EVENT: &str = "sendVstMidiEvent";
    pub const SEND_VST_TIME_INFO: &str = "sendVstTimeInfo";
    pub const RECEIVE_VST_EVENTS: &str = "receiveVstEvents";
    pub const RECEIVE_VST_MIDI_EVENT: &str = "receiveVstMidiEvent";
    pub const REPORT_CONNECTION_CHANGES: &str = "reportConnectionChanges";
    pub const ACCEPT_IO_CHANGES: &str = "acceptIOChanges";
    pub const SIZE_WINDOW: &str = "sizeWindow";
    pub const OFFLINE: &str = "offline";
    pub const OPEN_FILE_SELECTOR: &str = "openFileSelector";
    pub const CLOSE_FILE_SELECTOR: &str = "closeFileSelector";
    pub const START_STOP_PROCESS: &str = "startStopProcess";
    pub const SHELL_CATEGORY: &str = "shellCategory";
    pub const SEND_VST_MIDI_EVENT_FLAG_IS_REALTIME: &str = "sendVstMidiEventFlagIsRealtime";
}

/// Table answering `audioMasterCanDo` queries. Unknown strings are unsupported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostCapabilities {
    entries: BTreeMap<String, bool>,
}

impl HostCapabilities {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.entries.get(capability).copied().unwrap_or(false)
    }

    pub fn set(&mut self, capability: impl Into<String>, supported: bool) {
        self.entries.insert(capability.into(), supported);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries.iter().map(|(name, supported)| (name.as_str(), *supported))
    }
}

impl Default for HostCapabilities {
    fn default() -> Self {
        use host_can_do::*;

        let mut table = Self::empty();
        for (name, supported) in [
            (SEND_VST_EVENTS, true),
            (SEND_VST_MIDI_EVENT, true),
            (SEND_VST_TIME_INFO, true),
            (RECEIVE_VST_EVENTS, true),
            (RECEIVE_VST_MIDI_EVENT, true),
            (REPORT_CONNECTION_CHANGES, false),
            (ACCEPT_IO_CHANGES, true),
            (SIZE_WINDOW, true),
            (OFFLINE, false),
            (OPEN_FILE_SELECTOR, false),
            (CLOSE_FILE_SELECTOR, false),
            (START_STOP_PROCESS, true),
            (SHELL_CATEGORY, false),
            (SEND_VST_MIDI_EVENT_FLAG_IS_REALTIME, false),
        ] {
            table.set(name, supported);
        }
        table
    }
}

/// Host identity and defaults handed to every plug-in loaded by a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Answer to `audioMasterGetVendorString`.
    pub vendor: String,
    /// Answer to `audioMasterGetProductString`.
    pub product: String,
    pub vendor_version: i32,
    /// Tempo reported through `VstTimeInfo` until the caller sets one.
    pub default_tempo: f64,
    pub capabilities: HostCapabilities,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            vendor: "vst2-host".to_string(),
            product: "vst2-host".to_string(),
            vendor_version: 10,
            default_tempo: 120.0,
            capabilities: HostCapabilities::default(),
        }
    }
}

impl HostConfig {
    pub fn builder() -> HostConfigBuilder {
        HostConfigBuilder::default()
    }

    /// Default on-disk location, `<config dir>/vst2-host/host.json`.
    pub fn default_path() -> Option<PathBuf> {
        let mut base = dirs::config_dir()?;
        base.push("vst2-host");
        base.push("host.json");
        Some(base)
    }

    pub fn load_from(path: impl AsRef<Path>) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// Loads the configuration from [`Self::default_path`], falling back to
    /// defaults when the file is missing or unreadable.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!(?err, path = %path.display(), "failed to read host config");
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(path, json)
    }
}

/// Fluent construction of a [`HostConfig`].
#[derive(Debug, Default, Clone)]
pub struct HostConfigBuilder {
    config: HostConfig,
}

impl HostConfigBuilder {
    pub fn vendor(mut self, vendor: impl Into<String>) -> Self {
        self.config.vendor = vendor.into();
        self
    }

    pub fn product(mut self, product: impl Into<String>) -> Self {
        self.config.product = product.into();
        self
    }

    pub fn vendor_version(mut self, version: i32) -> Self {
        self.config.vendor_version = version;
        self
    }

    pub fn default_tempo(mut self, tempo: f64) -> Self {
        self.config.default_tempo = tempo;
        self
    }

    pub fn capability(mut self, name: impl Into<String>, supported: bool) -> Self {
        self.config.capabilities.set(name, supported);
        self
    }

    pub fn build(self) -> HostConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_answers_known_and_unknown_capabilities() {
        let caps = HostCapabilities::default();
        assert!(caps.supports(host_can_do::SEND_VST_MIDI_EVENT));
        assert!(caps.supports(host_can_do::START_STOP_PROCESS));
        assert!(!caps.supports(host_can_do::OFFLINE));
        assert!(!caps.supports("unknownCapability"));
    }

    #[test]
    fn builder_overrides_identity_and_capabilities() {
        let config = HostConfig::builder()
            .vendor("Acme")
            .product("Bench")
            .vendor_version(7)
            .capability(host_can_do::OFFLINE, true)
            .build();
        assert_eq!(config.vendor, "Acme");
        assert_eq!(config.product, "Bench");
        assert_eq!(config.vendor_version, 7);
        assert!(config.capabilities.supports(host_can_do::OFFLINE));
        assert_eq!(config.default_tempo, 120.0);
    }

    #[test]
    fn config_survives_json_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("host.json");
        let config = HostConfig::builder().vendor("Disk").default_tempo(96.0).build();
        config.save_to(&path).expect("save");
        let loaded = HostConfig::load_from(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: HostConfig = serde_json::from_str(r#"{ "vendor": "Partial" }"#).expect("parse");
        assert_eq!(config.vendor, "Partial");
        assert_eq!(config.vendor_version, 10);
        assert!(config.capabilities.supports(host_can_do::SEND_VST_EVENTS));
    }
}
