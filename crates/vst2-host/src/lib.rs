//! VST 2.x plug-in hosting.
//!
//! The crate loads plug-in binaries, answers the callbacks they make into
//! the host and drives their processing. A [`HostRegistry`] carries the
//! host identity and tracks live instances. Each [`Vst2Plugin`] owns one
//! opened plug-in together with the library it came from.
//!
//! Audio is passed without copying: the caller's channel slices are bound
//! into per-instance pointer arrays for the duration of a process call.
//! MIDI is queued or passed per call and delivered as one `VstEvents` batch
//! right before the plug-in processes.

pub mod audio_buffer;
pub mod buffers;
mod callback;
pub mod config;
pub mod editor;
mod error;
pub mod events;
mod instance;
pub mod listener;
mod loader;
pub mod persistence;
mod registry;
mod state;
pub mod time_info;
pub mod version;

pub use vst2_sys as ffi;

pub use audio_buffer::AudioBuffer;
pub use buffers::{InputChannels, OutputChannels, Sample};
pub use callback::{host_callback, HostOpcode};
pub use config::{HostCapabilities, HostConfig, HostConfigBuilder};
pub use editor::{EditorCommand, EditorEvent, EditorWindow, HeadlessWindow};
pub use error::{BufferError, Direction, HostError, LoadError};
pub use events::{MidiMessage, ShortMidiEvent};
pub use instance::{ChunkKind, PinProperties, PluginCanDo, PluginCategory, Vst2Plugin};
pub use listener::{ChannelListener, HostEvent, HostListener, IoConfiguration};
pub use loader::PluginLibrary;
pub use persistence::{Bank, Preset, PresetError, PresetFileInfo, PresetOptions};
pub use registry::{HostRegistry, InstanceId};
pub use time_info::TimeSignature;
pub use version::VstVersion;
