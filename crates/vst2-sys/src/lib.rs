#![cfg_attr(not(test), no_std)]
//! Hand-written bindings for the VST 2.4 plug-in ABI.
//!
//! Only the host-facing subset is described here: the effect descriptor,
//! the event and time structures exchanged through the dispatcher and the
//! opcode/flag constants. Layouts follow `aeffect.h`/`aeffectx.h` with the
//! platform default packing used by 64-bit and 32-bit builds.

use cty::{c_char, c_void};

/// `'VstP'`, the magic every valid [`AEffect`] starts with.
pub const VST_MAGIC: i32 = i32::from_be_bytes(*b"VstP");

/// Protocol version reported by hosts implementing VST 2.4.
pub const VST_VERSION_2_4: i32 = 2400;

/// Callback the plug-in uses to talk to the host.
pub type HostCallbackProc = unsafe extern "C" fn(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize;

/// Entry point exported as `VSTPluginMain` (or `main` by older plug-ins).
pub type PluginMainProc = unsafe extern "C" fn(host: HostCallbackProc) -> *mut AEffect;

pub type DispatcherProc = unsafe extern "C" fn(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize;

pub type ProcessProc =
    unsafe extern "C" fn(effect: *mut AEffect, inputs: *mut *mut f32, outputs: *mut *mut f32, frames: i32);

pub type ProcessDoubleProc =
    unsafe extern "C" fn(effect: *mut AEffect, inputs: *mut *mut f64, outputs: *mut *mut f64, frames: i32);

pub type SetParameterProc = unsafe extern "C" fn(effect: *mut AEffect, index: i32, value: f32);

pub type GetParameterProc = unsafe extern "C" fn(effect: *mut AEffect, index: i32) -> f32;

/// Plug-in descriptor returned by the entry point.
///
/// The plug-in owns this structure for its whole lifetime. The host only
/// reads it, with the exception of `resvd1` which is reserved for host use.
#[repr(C)]
pub struct AEffect {
    pub magic: i32,
    pub dispatcher: Option<DispatcherProc>,
    /// Accumulating process call. Deprecated in 2.4.
    pub process: Option<ProcessProc>,
    pub set_parameter: Option<SetParameterProc>,
    pub get_parameter: Option<GetParameterProc>,
    pub num_programs: i32,
    pub num_params: i32,
    pub num_inputs: i32,
    pub num_outputs: i32,
    pub flags: i32,
    /// Reserved for the host.
    pub resvd1: isize,
    /// Reserved for the host.
    pub resvd2: isize,
    pub initial_delay: i32,
    pub real_qualities: i32,
    pub off_qualities: i32,
    pub io_ratio: f32,
    pub object: *mut c_void,
    pub user: *mut c_void,
    pub unique_id: i32,
    pub version: i32,
    pub process_replacing: Option<ProcessProc>,
    pub process_double_replacing: Option<ProcessDoubleProc>,
    pub future: [c_char; 56],
}

/// Generic event header. Concrete events share its first four fields.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct VstEvent {
    pub event_type: i32,
    pub byte_size: i32,
    pub delta_frames: i32,
    pub flags: i32,
    pub data: [c_char; 16],
}

/// Variable length event list. `events` really holds `num_events` entries.
#[repr(C)]
pub struct VstEvents {
    pub num_events: i32,
    pub reserved: isize,
    pub events: [*mut VstEvent; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VstMidiEvent {
    pub event_type: i32,
    pub byte_size: i32,
    pub delta_frames: i32,
    pub flags: i32,
    pub note_length: i32,
    pub note_offset: i32,
    pub midi_data: [u8; 4],
    pub detune: i8,
    pub note_off_velocity: u8,
    pub reserved1: u8,
    pub reserved2: u8,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct VstMidiSysexEvent {
    pub event_type: i32,
    pub byte_size: i32,
    pub delta_frames: i32,
    pub flags: i32,
    pub dump_bytes: i32,
    pub resvd1: isize,
    pub sysex_dump: *mut c_char,
    pub resvd2: isize,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VstTimeInfo {
    pub sample_pos: f64,
    pub sample_rate: f64,
    pub nano_seconds: f64,
    pub ppq_pos: f64,
    pub tempo: f64,
    pub bar_start_pos: f64,
    pub cycle_start_pos: f64,
    pub cycle_end_pos: f64,
    pub time_sig_numerator: i32,
    pub time_sig_denominator: i32,
    pub smpte_offset: i32,
    pub smpte_frame_rate: i32,
    pub samples_to_next_clock: i32,
    pub flags: i32,
}

/// Editor rectangle returned through `effEditGetRect`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ERect {
    pub top: i16,
    pub left: i16,
    pub bottom: i16,
    pub right: i16,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct VstPinProperties {
    pub label: [c_char; string_len::MAX_LABEL],
    pub flags: i32,
    pub arrangement_type: i32,
    pub short_label: [c_char; string_len::MAX_SHORT_LABEL],
    pub future: [c_char; 48],
}

impl Default for VstPinProperties {
    fn default() -> Self {
        Self {
            label: [0; string_len::MAX_LABEL],
            flags: 0,
            arrangement_type: 0,
            short_label: [0; string_len::MAX_SHORT_LABEL],
            future: [0; 48],
        }
    }
}

/// Opcodes sent from the host to the plug-in dispatcher.
pub mod effect_opcode {
    pub const OPEN: i32 = 0;
    pub const CLOSE: i32 = 1;
    pub const SET_PROGRAM: i32 = 2;
    pub const GET_PROGRAM: i32 = 3;
    pub const SET_PROGRAM_NAME: i32 = 4;
    pub const GET_PROGRAM_NAME: i32 = 5;
    pub const GET_PARAM_LABEL: i32 = 6;
    pub const GET_PARAM_DISPLAY: i32 = 7;
    pub const GET_PARAM_NAME: i32 = 8;
    pub const SET_SAMPLE_RATE: i32 = 10;
    pub const SET_BLOCK_SIZE: i32 = 11;
    pub const MAINS_CHANGED: i32 = 12;
    pub const EDIT_GET_RECT: i32 = 13;
    pub const EDIT_OPEN: i32 = 14;
    pub const EDIT_CLOSE: i32 = 15;
    pub const EDIT_IDLE: i32 = 19;
    pub const GET_CHUNK: i32 = 23;
    pub const SET_CHUNK: i32 = 24;
    pub const PROCESS_EVENTS: i32 = 25;
    pub const CAN_BE_AUTOMATED: i32 = 26;
    pub const GET_PROGRAM_NAME_INDEXED: i32 = 29;
    pub const GET_INPUT_PROPERTIES: i32 = 33;
    pub const GET_OUTPUT_PROPERTIES: i32 = 34;
    pub const GET_PLUG_CATEGORY: i32 = 35;
    pub const SET_BYPASS: i32 = 44;
    pub const GET_EFFECT_NAME: i32 = 45;
    pub const GET_VENDOR_STRING: i32 = 47;
    pub const GET_PRODUCT_STRING: i32 = 48;
    pub const GET_VENDOR_VERSION: i32 = 49;
    pub const CAN_DO: i32 = 51;
    pub const GET_TAIL_SIZE: i32 = 52;
    pub const GET_VST_VERSION: i32 = 58;
    pub const START_PROCESS: i32 = 71;
    pub const STOP_PROCESS: i32 = 72;
}

/// Opcodes sent from the plug-in to the host callback (`audioMaster*`).
pub mod host_opcode {
    pub const AUTOMATE: i32 = 0;
    pub const VERSION: i32 = 1;
    pub const CURRENT_ID: i32 = 2;
    pub const IDLE: i32 = 3;
    /// Deprecated in 2.4.
    pub const PIN_CONNECTED: i32 = 4;
    /// Deprecated in 2.4.
    pub const WANT_MIDI: i32 = 6;
    pub const GET_TIME: i32 = 7;
    pub const PROCESS_EVENTS: i32 = 8;
    pub const IO_CHANGED: i32 = 13;
    /// Deprecated in 2.4.
    pub const NEED_IDLE: i32 = 14;
    pub const SIZE_WINDOW: i32 = 15;
    pub const GET_SAMPLE_RATE: i32 = 16;
    pub const GET_BLOCK_SIZE: i32 = 17;
    pub const GET_INPUT_LATENCY: i32 = 18;
    pub const GET_OUTPUT_LATENCY: i32 = 19;
    pub const GET_CURRENT_PROCESS_LEVEL: i32 = 23;
    pub const GET_AUTOMATION_STATE: i32 = 24;
    pub const GET_VENDOR_STRING: i32 = 32;
    pub const GET_PRODUCT_STRING: i32 = 33;
    pub const GET_VENDOR_VERSION: i32 = 34;
    pub const VENDOR_SPECIFIC: i32 = 35;
    pub const CAN_DO: i32 = 37;
    pub const GET_LANGUAGE: i32 = 38;
    pub const GET_DIRECTORY: i32 = 41;
    pub const UPDATE_DISPLAY: i32 = 42;
    pub const BEGIN_EDIT: i32 = 43;
    pub const END_EDIT: i32 = 44;
    pub const OPEN_FILE_SELECTOR: i32 = 45;
    pub const CLOSE_FILE_SELECTOR: i32 = 46;
}

/// Bits of [`AEffect::flags`].
pub mod effect_flags {
    pub const HAS_EDITOR: i32 = 1 << 0;
    pub const CAN_REPLACING: i32 = 1 << 4;
    pub const PROGRAM_CHUNKS: i32 = 1 << 5;
    pub const IS_SYNTH: i32 = 1 << 8;
    pub const NO_SOUND_IN_STOP: i32 = 1 << 9;
    pub const CAN_DOUBLE_REPLACING: i32 = 1 << 12;
}

/// Bits of [`VstTimeInfo::flags`].
pub mod time_info_flags {
    pub const TRANSPORT_CHANGED: i32 = 1;
    pub const TRANSPORT_PLAYING: i32 = 1 << 1;
    pub const TRANSPORT_CYCLE_ACTIVE: i32 = 1 << 2;
    pub const TRANSPORT_RECORDING: i32 = 1 << 3;
    pub const AUTOMATION_WRITING: i32 = 1 << 6;
    pub const AUTOMATION_READING: i32 = 1 << 7;
    pub const NANOS_VALID: i32 = 1 << 8;
    pub const PPQ_POS_VALID: i32 = 1 << 9;
    pub const TEMPO_VALID: i32 = 1 << 10;
    pub const BARS_VALID: i32 = 1 << 11;
    pub const CYCLE_POS_VALID: i32 = 1 << 12;
    pub const TIME_SIG_VALID: i32 = 1 << 13;
    pub const SMPTE_VALID: i32 = 1 << 14;
    pub const CLOCK_VALID: i32 = 1 << 15;
}

pub mod event_type {
    pub const MIDI: i32 = 1;
    pub const SYSEX: i32 = 6;
}

/// Bits of [`VstPinProperties::flags`].
pub mod pin_flags {
    pub const IS_ACTIVE: i32 = 1;
    pub const IS_STEREO: i32 = 1 << 1;
    pub const USE_SPEAKER: i32 = 1 << 2;
}

pub mod process_level {
    pub const UNKNOWN: isize = 0;
    pub const USER: isize = 1;
    pub const REALTIME: isize = 2;
    pub const PREFETCH: isize = 3;
    pub const OFFLINE: isize = 4;
}

pub mod automation_state {
    pub const UNSUPPORTED: isize = 0;
    pub const OFF: isize = 1;
    pub const READ: isize = 2;
    pub const WRITE: isize = 3;
    pub const READ_WRITE: isize = 4;
}

pub mod language {
    pub const ENGLISH: isize = 1;
    pub const GERMAN: isize = 2;
    pub const FRENCH: isize = 3;
    pub const ITALIAN: isize = 4;
    pub const SPANISH: isize = 5;
    pub const JAPANESE: isize = 6;
}

/// Maximum string lengths, excluding the terminating NUL.
///
/// Many plug-ins ignore these, hosts should hand out larger buffers.
pub mod string_len {
    pub const MAX_PROG_NAME: usize = 24;
    pub const MAX_PARAM_STR: usize = 8;
    pub const MAX_VENDOR_STR: usize = 64;
    pub const MAX_PRODUCT_STR: usize = 64;
    pub const MAX_EFFECT_NAME: usize = 32;
    pub const MAX_LABEL: usize = 64;
    pub const MAX_SHORT_LABEL: usize = 8;
}

#[cfg(all(test, target_pointer_width = "64"))]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};

    #[test]
    fn layouts_match_sdk_on_64_bit() {
        assert_eq!(size_of::<AEffect>(), 192);
        assert_eq!(offset_of!(AEffect, resvd1), 64);
        assert_eq!(offset_of!(AEffect, unique_id), 112);
        assert_eq!(size_of::<VstTimeInfo>(), 88);
        assert_eq!(size_of::<VstEvent>(), 32);
        assert_eq!(size_of::<VstMidiEvent>(), 32);
        assert_eq!(size_of::<VstMidiSysexEvent>(), 48);
        assert_eq!(size_of::<VstEvents>(), 32);
        assert_eq!(size_of::<VstPinProperties>(), 128);
        assert_eq!(size_of::<ERect>(), 8);
    }

    #[test]
    fn magic_spells_vstp() {
        assert_eq!(VST_MAGIC, 0x5673_7450);
    }
}
