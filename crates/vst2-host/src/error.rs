use std::path::PathBuf;

use thiserror::Error;

use crate::persistence::PresetError;

/// Errors raised while turning a library path into a live plug-in.
///
/// Every variant is terminal: the library (if it was opened) has already
/// been released by the time the error reaches the caller.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("plugin path is not usable: {0}")]
    PathInvalid(PathBuf),
    #[error("failed to open plugin library {path}")]
    LibraryNotFound {
        path: PathBuf,
        #[source]
        source: Option<libloading::Error>,
    },
    #[error("plugin library {0} exports neither VSTPluginMain nor main")]
    EntryPointNotFound(PathBuf),
    #[error("plugin instantiation failed: {0}")]
    InstantiationFailed(String),
}

/// Errors raised while binding audio buffers for a process call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("{direction} channel {channel} holds {len} samples but {frames} frames were requested")]
    InvalidChannelPointer {
        direction: Direction,
        channel: usize,
        len: usize,
        frames: usize,
    },
    #[error("plugin expects {expected} {direction} channels, got {actual}")]
    ConfigurationMismatch {
        direction: Direction,
        expected: usize,
        actual: usize,
    },
}

/// Buffer direction, used in error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// Errors that can occur while driving a loaded plug-in.
#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("invalid plugin state: {0}")]
    InvalidState(String),
    #[error("{kind} index {index} out of range (0..{len})")]
    IndexOutOfRange {
        kind: &'static str,
        index: usize,
        len: usize,
    },
    #[error("unsupported by plugin: {0}")]
    Unsupported(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("editor error: {0}")]
    Editor(String),
    #[error(transparent)]
    Preset(#[from] PresetError),
}

impl HostError {
    pub(crate) fn index(kind: &'static str, index: usize, len: usize) -> Self {
        HostError::IndexOutOfRange { kind, index, len }
    }
}
