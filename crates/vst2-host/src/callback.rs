//! The `audioMasterCallback` handed to every plug-in.
//!
//! Plug-ins call it synchronously, usually from inside one of their own
//! functions the host is currently running. The callback resolves the
//! instance through the descriptor's `resvd1` slot, answers from the
//! instance state or the registry configuration, and never lets a panic
//! unwind into foreign code.

use std::ffi::{c_char, c_void, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use vst2_sys::{
    automation_state, host_opcode as op, language, process_level, string_len, AEffect,
    VstEvents, VST_VERSION_2_4,
};

use crate::config::HostConfig;
use crate::listener::HostListener;
use crate::registry::instantiating_registry;
use crate::state::InstanceShared;

/// Host opcodes this host understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOpcode {
    Automate,
    Version,
    CurrentId,
    Idle,
    GetTime,
    ProcessEvents,
    IoChanged,
    SizeWindow,
    GetSampleRate,
    GetBlockSize,
    GetInputLatency,
    GetOutputLatency,
    GetCurrentProcessLevel,
    GetAutomationState,
    GetVendorString,
    GetProductString,
    GetVendorVersion,
    CanDo,
    GetLanguage,
    GetDirectory,
    UpdateDisplay,
    BeginEdit,
    EndEdit,
    OpenFileSelector,
    CloseFileSelector,
}

impl HostOpcode {
    pub fn from_raw(opcode: i32) -> Option<Self> {
        Some(match opcode {
            op::AUTOMATE => HostOpcode::Automate,
            op::VERSION => HostOpcode::Version,
            op::CURRENT_ID => HostOpcode::CurrentId,
            op::IDLE => HostOpcode::Idle,
            op::GET_TIME => HostOpcode::GetTime,
            op::PROCESS_EVENTS => HostOpcode::ProcessEvents,
            op::IO_CHANGED => HostOpcode::IoChanged,
            op::SIZE_WINDOW => HostOpcode::SizeWindow,
            op::GET_SAMPLE_RATE => HostOpcode::GetSampleRate,
            op::GET_BLOCK_SIZE => HostOpcode::GetBlockSize,
            op::GET_INPUT_LATENCY => HostOpcode::GetInputLatency,
            op::GET_OUTPUT_LATENCY => HostOpcode::GetOutputLatency,
            op::GET_CURRENT_PROCESS_LEVEL => HostOpcode::GetCurrentProcessLevel,
            op::GET_AUTOMATION_STATE => HostOpcode::GetAutomationState,
            op::GET_VENDOR_STRING => HostOpcode::GetVendorString,
            op::GET_PRODUCT_STRING => HostOpcode::GetProductString,
            op::GET_VENDOR_VERSION => HostOpcode::GetVendorVersion,
            op::CAN_DO => HostOpcode::CanDo,
            op::GET_LANGUAGE => HostOpcode::GetLanguage,
            op::GET_DIRECTORY => HostOpcode::GetDirectory,
            op::UPDATE_DISPLAY => HostOpcode::UpdateDisplay,
            op::BEGIN_EDIT => HostOpcode::BeginEdit,
            op::END_EDIT => HostOpcode::EndEdit,
            op::OPEN_FILE_SELECTOR => HostOpcode::OpenFileSelector,
            op::CLOSE_FILE_SELECTOR => HostOpcode::CloseFileSelector,
            _ => return None,
        })
    }

    /// SDK name of the opcode, for logs.
    pub fn name(self) -> &'static str {
        match self {
            HostOpcode::Automate => "audioMasterAutomate",
            HostOpcode::Version => "audioMasterVersion",
            HostOpcode::CurrentId => "audioMasterCurrentId",
            HostOpcode::Idle => "audioMasterIdle",
            HostOpcode::GetTime => "audioMasterGetTime",
            HostOpcode::ProcessEvents => "audioMasterProcessEvents",
            HostOpcode::IoChanged => "audioMasterIOChanged",
            HostOpcode::SizeWindow => "audioMasterSizeWindow",
            HostOpcode::GetSampleRate => "audioMasterGetSampleRate",
            HostOpcode::GetBlockSize => "audioMasterGetBlockSize",
            HostOpcode::GetInputLatency => "audioMasterGetInputLatency",
            HostOpcode::GetOutputLatency => "audioMasterGetOutputLatency",
            HostOpcode::GetCurrentProcessLevel => "audioMasterGetCurrentProcessLevel",
            HostOpcode::GetAutomationState => "audioMasterGetAutomationState",
            HostOpcode::GetVendorString => "audioMasterGetVendorString",
            HostOpcode::GetProductString => "audioMasterGetProductString",
            HostOpcode::GetVendorVersion => "audioMasterGetVendorVersion",
            HostOpcode::CanDo => "audioMasterCanDo",
            HostOpcode::GetLanguage => "audioMasterGetLanguage",
            HostOpcode::GetDirectory => "audioMasterGetDirectory",
            HostOpcode::UpdateDisplay => "audioMasterUpdateDisplay",
            HostOpcode::BeginEdit => "audioMasterBeginEdit",
            HostOpcode::EndEdit => "audioMasterEndEdit",
            HostOpcode::OpenFileSelector => "audioMasterOpenFileSelector",
            HostOpcode::CloseFileSelector => "audioMasterCloseFileSelector",
        }
    }
}

/// Entry point the plug-in calls for every host service.
///
/// # Safety
/// Must only be called by plug-ins created through this crate, with
/// arguments following the VST 2.4 conventions for `opcode`.
pub unsafe extern "C" fn host_callback(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: forwarded from the plug-in under the contract above.
        unsafe { dispatch(effect, opcode, index, value, ptr, opt) }
    }));
    match outcome {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(opcode, "host callback panicked, answering 0");
            0
        }
    }
}

unsafe fn dispatch(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize {
    let Some(request) = HostOpcode::from_raw(opcode) else {
        tracing::trace!(opcode, index, value, "unhandled host opcode");
        return 0;
    };
    let instance = InstanceShared::from_effect(effect);
    tracing::trace!(opcode = request.name(), index, value, attached = instance.is_some(), "host callback");

    match request {
        HostOpcode::Version => VST_VERSION_2_4 as isize,
        HostOpcode::Automate => notify(instance, |listener| listener.parameter_automated(index, opt)),
        HostOpcode::BeginEdit => notify(instance, |listener| listener.begin_edit(index)),
        HostOpcode::EndEdit => notify(instance, |listener| listener.end_edit(index)),
        HostOpcode::GetTime => instance.map_or(0, |shared| shared.time_info(value as i32) as isize),
        HostOpcode::ProcessEvents => {
            instance.map_or(0, |shared| shared.forward_events(ptr as *const VstEvents))
        }
        HostOpcode::IoChanged => instance.map_or(0, |shared| shared.io_changed()),
        HostOpcode::SizeWindow => {
            instance.map_or(0, |shared| shared.resize_editor(index, value as i32) as isize)
        }
        HostOpcode::GetSampleRate => instance.map_or(0, |shared| {
            let guard = shared.lock();
            let sample_rate = guard.borrow().sample_rate;
            sample_rate as isize
        }),
        HostOpcode::GetBlockSize => instance.map_or(0, |shared| {
            let guard = shared.lock();
            let block_size = guard.borrow().block_size;
            block_size as isize
        }),
        HostOpcode::GetVendorString => {
            with_config(instance, |config| copy_string(ptr, &config.vendor, string_len::MAX_VENDOR_STR))
        }
        HostOpcode::GetProductString => {
            with_config(instance, |config| copy_string(ptr, &config.product, string_len::MAX_PRODUCT_STR))
        }
        HostOpcode::GetVendorVersion => with_config(instance, |config| config.vendor_version as isize),
        HostOpcode::CanDo => {
            if ptr.is_null() {
                return 0;
            }
            let capability = CStr::from_ptr(ptr as *const c_char).to_string_lossy();
            let supported = with_config(instance, |config| config.capabilities.supports(&capability));
            tracing::trace!(%capability, supported, "host can-do query");
            supported as isize
        }
        HostOpcode::GetLanguage => language::ENGLISH,
        HostOpcode::GetCurrentProcessLevel => process_level::UNKNOWN,
        HostOpcode::GetAutomationState => automation_state::UNSUPPORTED,
        HostOpcode::CurrentId
        | HostOpcode::Idle
        | HostOpcode::UpdateDisplay
        | HostOpcode::OpenFileSelector
        | HostOpcode::CloseFileSelector
        | HostOpcode::GetDirectory
        | HostOpcode::GetInputLatency
        | HostOpcode::GetOutputLatency => 0,
    }
}

/// Runs `f` against the owner of `instance`. Answers 1 when the owner is
/// still alive, 0 otherwise.
fn notify<F>(instance: Option<&InstanceShared>, f: F) -> isize
where
    F: FnOnce(&dyn HostListener),
{
    match instance.and_then(InstanceShared::listener) {
        Some(listener) => {
            f(listener.as_ref());
            1
        }
        None => 0,
    }
}

/// Resolves the configuration answering a request: the instance's registry,
/// the registry instantiating on this thread, or the defaults.
fn with_config<R>(instance: Option<&InstanceShared>, f: impl FnOnce(&HostConfig) -> R) -> R {
    if let Some(shared) = instance {
        return f(shared.registry.config());
    }
    match instantiating_registry() {
        Some(registry) => f(Arc::as_ref(&registry).config()),
        None => f(&HostConfig::default()),
    }
}

/// Copies `text` into a plug-in supplied buffer of `max_len` bytes plus NUL.
unsafe fn copy_string(ptr: *mut c_void, text: &str, max_len: usize) -> isize {
    if ptr.is_null() {
        return 0;
    }
    let bytes = text.as_bytes();
    let len = bytes.len().min(max_len - 1);
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, len);
    *(ptr as *mut u8).add(len) = 0;
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::ptr;

    fn call(opcode: i32, index: i32, value: isize, data: *mut c_void) -> isize {
        unsafe { host_callback(ptr::null_mut(), opcode, index, value, data, 0.0) }
    }

    #[test]
    fn version_is_answered_without_an_instance() {
        assert_eq!(call(op::VERSION, 0, 0, ptr::null_mut()), 2400);
    }

    #[test]
    fn unknown_opcodes_answer_zero() {
        assert_eq!(call(9999, 1, 2, ptr::null_mut()), 0);
        assert_eq!(call(op::WANT_MIDI, 0, 0, ptr::null_mut()), 0);
    }

    #[test]
    fn detached_requests_fall_back_to_defaults() {
        let known = CString::new("sendVstMidiEvent").expect("cstring");
        let unknown = CString::new("unknownCapability").expect("cstring");
        assert_eq!(call(op::CAN_DO, 0, 0, known.as_ptr() as *mut c_void), 1);
        assert_eq!(call(op::CAN_DO, 0, 0, unknown.as_ptr() as *mut c_void), 0);
        assert_eq!(call(op::GET_VENDOR_VERSION, 0, 0, ptr::null_mut()), 10);
        assert_eq!(call(op::GET_SAMPLE_RATE, 0, 0, ptr::null_mut()), 0);
        assert_eq!(call(op::GET_TIME, 0, 0, ptr::null_mut()), 0);
        assert_eq!(call(op::AUTOMATE, 0, 0, ptr::null_mut()), 0);
    }

    #[test]
    fn identity_strings_are_truncated_and_terminated() {
        let mut buffer = [0xAAu8; 80];
        let long = "x".repeat(200);
        let written = unsafe { copy_string(buffer.as_mut_ptr().cast(), &long, string_len::MAX_VENDOR_STR) };
        assert_eq!(written, 1);
        assert_eq!(buffer[62], b'x');
        assert_eq!(buffer[63], 0);
        assert_eq!(buffer[64], 0xAA);
    }

    #[test]
    fn opcode_names_round_trip_through_raw_values() {
        assert_eq!(HostOpcode::from_raw(op::IO_CHANGED), Some(HostOpcode::IoChanged));
        assert_eq!(HostOpcode::IoChanged.name(), "audioMasterIOChanged");
        assert_eq!(HostOpcode::from_raw(op::NEED_IDLE), None);
    }
}
