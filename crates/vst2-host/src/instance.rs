use std::ffi::{c_char, c_void, CString};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Arc, Weak};

use vst2_sys::{
    effect_flags, effect_opcode as eff, pin_flags, string_len, AEffect, PluginMainProc,
    VstPinProperties, VST_MAGIC,
};

use crate::buffers::{InputChannels, OutputChannels, Sample};
use crate::callback::host_callback;
use crate::error::{HostError, LoadError};
use crate::events::{EventBatch, MidiMessage};
use crate::listener::HostListener;
use crate::loader::PluginLibrary;
use crate::registry::{HostRegistry, InstanceId, InstantiationScope};
use crate::state::{InstanceShared, StateGuard};
use crate::time_info::TimeSignature;
use crate::version::VstVersion;

/// Scratch size for strings read from plug-ins. Well above every SDK limit,
/// since plenty of plug-ins write past those.
const STRING_BUFFER_LEN: usize = 256;

/// Which state blob `effGetChunk`/`effSetChunk` address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Bank,
    Program,
}

impl ChunkKind {
    fn index(self) -> i32 {
        match self {
            ChunkKind::Bank => 0,
            ChunkKind::Program => 1,
        }
    }
}

/// Plug-in category reported by `effGetPlugCategory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginCategory {
    Unknown,
    Effect,
    Synth,
    Analysis,
    Mastering,
    Spacializer,
    RoomFx,
    SurroundFx,
    Restoration,
    OfflineProcess,
    Shell,
    Generator,
}

impl PluginCategory {
    pub fn from_raw(raw: isize) -> Self {
        match raw {
            1 => PluginCategory::Effect,
            2 => PluginCategory::Synth,
            3 => PluginCategory::Analysis,
            4 => PluginCategory::Mastering,
            5 => PluginCategory::Spacializer,
            6 => PluginCategory::RoomFx,
            7 => PluginCategory::SurroundFx,
            8 => PluginCategory::Restoration,
            9 => PluginCategory::OfflineProcess,
            10 => PluginCategory::Shell,
            11 => PluginCategory::Generator,
            _ => PluginCategory::Unknown,
        }
    }
}

/// Capability strings a host may ask a plug-in about through `effCanDo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginCanDo {
    SendVstEvents,
    SendVstMidiEvent,
    ReceiveVstEvents,
    ReceiveVstMidiEvent,
    ReceiveVstTimeInfo,
    Offline,
    MidiProgramNames,
    Bypass,
}

impl PluginCanDo {
    pub fn as_str(self) -> &'static str {
        match self {
            PluginCanDo::SendVstEvents => "sendVstEvents",
            PluginCanDo::SendVstMidiEvent => "sendVstMidiEvent",
            PluginCanDo::ReceiveVstEvents => "receiveVstEvents",
            PluginCanDo::ReceiveVstMidiEvent => "receiveVstMidiEvent",
            PluginCanDo::ReceiveVstTimeInfo => "receiveVstTimeInfo",
            PluginCanDo::Offline => "offline",
            PluginCanDo::MidiProgramNames => "midiProgramNames",
            PluginCanDo::Bypass => "bypass",
        }
    }

    pub const ALL: [PluginCanDo; 8] = [
        PluginCanDo::SendVstEvents,
        PluginCanDo::SendVstMidiEvent,
        PluginCanDo::ReceiveVstEvents,
        PluginCanDo::ReceiveVstMidiEvent,
        PluginCanDo::ReceiveVstTimeInfo,
        PluginCanDo::Offline,
        PluginCanDo::MidiProgramNames,
        PluginCanDo::Bypass,
    ];
}

/// Description of one input or output pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinProperties {
    pub label: String,
    pub short_label: String,
    pub flags: i32,
}

impl PinProperties {
    pub fn is_active(&self) -> bool {
        self.flags & pin_flags::IS_ACTIVE != 0
    }

    pub fn is_stereo(&self) -> bool {
        self.flags & pin_flags::IS_STEREO != 0
    }
}

/// A loaded and opened VST 2.x plug-in.
///
/// Every call takes the instance lock, so the handle can be shared between
/// an audio thread and an editor thread. The plug-in itself is still only
/// entered by one thread at a time.
pub struct Vst2Plugin {
    shared: Arc<InstanceShared>,
    version: VstVersion,
    library: Option<PluginLibrary>,
    closed: bool,
}

// The descriptor is only touched under the instance lock.
unsafe impl Send for Vst2Plugin {}
unsafe impl Sync for Vst2Plugin {}

impl Vst2Plugin {
    /// Opens the library at `path`, instantiates and opens the plug-in.
    pub fn load(registry: &HostRegistry, path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let library = PluginLibrary::open(path)?;
        // SAFETY: the entry point comes from a library exporting the VST symbol.
        let mut plugin = unsafe { Self::from_entry_point(registry, library.entry_point()) }?;
        plugin.library = Some(library);
        Ok(plugin)
    }

    /// Instantiates a plug-in from an entry point that is already loaded.
    ///
    /// On failure nothing is kept: no instance is registered, and the caller
    /// still owns (and drops) the library the entry came from.
    ///
    /// # Safety
    /// `entry` must behave like a VST 2.x `VSTPluginMain`.
    pub unsafe fn from_entry_point(registry: &HostRegistry, entry: PluginMainProc) -> Result<Self, LoadError> {
        let inner = registry.inner();
        let effect = {
            let _scope = InstantiationScope::enter(inner);
            let effect = entry(host_callback);
            validate_descriptor(effect)?;
            // The slot is ours. Make sure nothing stale is dereferenced while
            // `effOpen` runs.
            (*effect).resvd1 = 0;
            raw_dispatch(effect, eff::OPEN, 0, 0, ptr::null_mut(), 0.0);
            effect
        };

        let id = inner.allocate_id();
        let shared = Arc::new(InstanceShared::new(id, Arc::clone(inner), effect));
        shared.attach();
        inner.register(&shared);

        let version = VstVersion::from_raw(raw_dispatch(effect, eff::GET_VST_VERSION, 0, 0, ptr::null_mut(), 0.0) as i32);
        if let VstVersion::Unknown(raw) = version {
            tracing::warn!(instance = id.0, raw, "plugin reports an unknown VST version, treating it as 2.0");
        }
        tracing::debug!(
            instance = id.0,
            unique_id = %unique_id_string((*effect).unique_id),
            %version,
            inputs = (*effect).num_inputs,
            outputs = (*effect).num_outputs,
            "plugin opened"
        );

        Ok(Self {
            shared,
            version,
            library: None,
            closed: false,
        })
    }

    /// Closes the plug-in and unloads its library.
    pub fn unload(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.close_editor();
        if let Err(err) = self.turn_off() {
            tracing::warn!(?err, "failed to suspend plugin before closing");
        }
        {
            let _guard = self.shared.lock();
            // SAFETY: the plug-in is open; nothing touches `effect` afterwards.
            unsafe { raw_dispatch(self.effect(), eff::CLOSE, 0, 0, ptr::null_mut(), 0.0) };
        }
        self.shared.registry.unregister(self.shared.id);
        {
            let guard = self.shared.lock();
            let mut state = guard.borrow_mut();
            state.listener = None;
            state.editor = None;
            state.midi_queue.clear();
        }
        // `shared` is declared before `library`, so the instance state is
        // dropped first and the library unloads last.
        if let Some(library) = &self.library {
            tracing::debug!(path = %library.path().display(), "plugin closed, unloading library");
        }
    }

    pub fn id(&self) -> InstanceId {
        self.shared.id
    }

    pub fn path(&self) -> Option<&Path> {
        self.library.as_ref().map(PluginLibrary::path)
    }

    pub fn library_path(&self) -> Option<PathBuf> {
        self.path().map(Path::to_path_buf)
    }

    pub(crate) fn effect(&self) -> *mut AEffect {
        self.shared.effect()
    }

    fn descriptor(&self) -> &AEffect {
        // SAFETY: the descriptor lives until `shutdown` closes the plug-in.
        unsafe { &*self.effect() }
    }

    pub(crate) fn lock(&self) -> StateGuard<'_> {
        self.shared.lock()
    }

    /// Calls the plug-in dispatcher under the instance lock. Callers pass
    /// `ptr` sized for whatever `opcode` writes.
    pub(crate) fn dispatch(&self, opcode: i32, index: i32, value: isize, ptr: *mut c_void, opt: f32) -> isize {
        let _guard = self.lock();
        // SAFETY: the plug-in is open for the lifetime of `self`.
        unsafe { raw_dispatch(self.effect(), opcode, index, value, ptr, opt) }
    }

    fn dispatch_string(&self, opcode: i32, index: i32) -> String {
        let mut buffer = [0u8; STRING_BUFFER_LEN];
        self.dispatch(opcode, index, 0, buffer.as_mut_ptr().cast(), 0.0);
        string_from_buffer(&buffer)
    }

    // Owner callbacks

    /// Routes plug-in notifications to `listener`. Only a weak reference is
    /// kept: dropping the listener silently stops delivery.
    pub fn set_listener(&self, listener: Weak<dyn HostListener>) {
        let guard = self.lock();
        guard.borrow_mut().listener = Some(listener);
    }

    pub fn clear_listener(&self) {
        let guard = self.lock();
        guard.borrow_mut().listener = None;
    }

    // Configuration

    /// Sets the sample rate. Only allowed while suspended.
    pub fn set_sample_rate(&self, sample_rate: f32) -> Result<(), HostError> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(HostError::InvalidArgument(format!("sample rate must be positive, got {sample_rate}")));
        }
        let guard = self.lock();
        self.require_suspended(&guard, "sample rate")?;
        guard.borrow_mut().sample_rate = sample_rate;
        // SAFETY: the plug-in is open and the lock is held.
        unsafe { raw_dispatch(self.effect(), eff::SET_SAMPLE_RATE, 0, 0, ptr::null_mut(), sample_rate) };
        Ok(())
    }

    /// Sets the maximum block size. Only allowed while suspended.
    pub fn set_block_size(&self, block_size: usize) -> Result<(), HostError> {
        if block_size == 0 || block_size > i32::MAX as usize {
            return Err(HostError::InvalidArgument(format!("block size must be positive, got {block_size}")));
        }
        let guard = self.lock();
        self.require_suspended(&guard, "block size")?;
        guard.borrow_mut().block_size = block_size as i32;
        // SAFETY: the plug-in is open and the lock is held.
        unsafe { raw_dispatch(self.effect(), eff::SET_BLOCK_SIZE, 0, block_size as isize, ptr::null_mut(), 0.0) };
        Ok(())
    }

    pub fn sample_rate(&self) -> f32 {
        self.lock().borrow().sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.lock().borrow().block_size.max(0) as usize
    }

    pub fn set_tempo(&self, tempo: f64) -> Result<(), HostError> {
        if !(tempo.is_finite() && tempo > 0.0) {
            return Err(HostError::InvalidArgument(format!("tempo must be positive, got {tempo}")));
        }
        self.lock().borrow_mut().transport.tempo = tempo;
        Ok(())
    }

    pub fn tempo(&self) -> f64 {
        self.lock().borrow().transport.tempo
    }

    pub fn set_time_signature(&self, numerator: i32, denominator: i32) -> Result<(), HostError> {
        if numerator <= 0 || denominator <= 0 || !(denominator as u32).is_power_of_two() {
            return Err(HostError::InvalidArgument(format!(
                "invalid time signature {numerator}/{denominator}"
            )));
        }
        self.lock().borrow_mut().transport.time_signature = TimeSignature::new(numerator, denominator);
        Ok(())
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.lock().borrow().transport.time_signature
    }

    /// Rewinds the transport reported through `audioMasterGetTime`.
    pub fn reset_transport(&self) {
        self.lock().borrow_mut().transport.sample_position = 0.0;
    }

    fn require_suspended(&self, guard: &StateGuard<'_>, what: &str) -> Result<(), HostError> {
        if guard.borrow().resumed {
            return Err(HostError::InvalidState(format!("{what} can only be changed while suspended")));
        }
        Ok(())
    }

    // Lifecycle

    pub fn is_resumed(&self) -> bool {
        self.lock().borrow().resumed
    }

    pub fn is_processing(&self) -> bool {
        self.lock().borrow().processing
    }

    /// `effMainsChanged(1)`.
    pub fn resume(&self) -> Result<(), HostError> {
        let guard = self.lock();
        if guard.borrow().resumed {
            return Ok(());
        }
        // SAFETY: the plug-in is open and the lock is held.
        unsafe { raw_dispatch(self.effect(), eff::MAINS_CHANGED, 0, 1, ptr::null_mut(), 0.0) };
        let mut state = guard.borrow_mut();
        state.resumed = true;
        state.set_playing(true);
        tracing::debug!(instance = self.shared.id.0, "plugin resumed");
        Ok(())
    }

    /// `effMainsChanged(0)`, stopping processing first when needed.
    pub fn suspend(&self) -> Result<(), HostError> {
        let guard = self.lock();
        if !guard.borrow().resumed {
            return Ok(());
        }
        if guard.borrow().processing {
            self.stop_process()?;
        }
        // SAFETY: the plug-in is open and the lock is held.
        unsafe { raw_dispatch(self.effect(), eff::MAINS_CHANGED, 0, 0, ptr::null_mut(), 0.0) };
        let mut state = guard.borrow_mut();
        state.resumed = false;
        state.set_playing(false);
        tracing::debug!(instance = self.shared.id.0, "plugin suspended");
        Ok(())
    }

    /// `effStartProcess`, available from VST 2.3.
    pub fn start_process(&self) -> Result<(), HostError> {
        if !self.version.supports_start_stop() {
            return Err(HostError::Unsupported(format!("startProcess needs VST 2.3, plugin is {}", self.version)));
        }
        let guard = self.lock();
        if !guard.borrow().resumed {
            return Err(HostError::InvalidState("plugin must be resumed before startProcess".into()));
        }
        if guard.borrow().processing {
            return Ok(());
        }
        // SAFETY: the plug-in is open and the lock is held.
        unsafe { raw_dispatch(self.effect(), eff::START_PROCESS, 0, 0, ptr::null_mut(), 0.0) };
        guard.borrow_mut().processing = true;
        Ok(())
    }

    /// `effStopProcess`, available from VST 2.3.
    pub fn stop_process(&self) -> Result<(), HostError> {
        if !self.version.supports_start_stop() {
            return Err(HostError::Unsupported(format!("stopProcess needs VST 2.3, plugin is {}", self.version)));
        }
        let guard = self.lock();
        if !guard.borrow().processing {
            return Ok(());
        }
        // SAFETY: the plug-in is open and the lock is held.
        unsafe { raw_dispatch(self.effect(), eff::STOP_PROCESS, 0, 0, ptr::null_mut(), 0.0) };
        guard.borrow_mut().processing = false;
        Ok(())
    }

    /// Resumes, then starts processing on plug-ins that know about it.
    pub fn turn_on(&self) -> Result<(), HostError> {
        self.resume()?;
        if self.version.supports_start_stop() {
            self.start_process()?;
        }
        Ok(())
    }

    /// Stops processing where supported, then suspends.
    pub fn turn_off(&self) -> Result<(), HostError> {
        if self.version.supports_start_stop() {
            self.stop_process()?;
        }
        self.suspend()
    }

    // Processing

    /// Queues a message for the start of the next process call.
    pub fn queue_midi_message(&self, message: MidiMessage) {
        self.queue_midi_message_at(message, 0);
    }

    /// Queues a message `delta_frames` into the next process call. Offsets
    /// past the end of that block are delivered on its last frame.
    pub fn queue_midi_message_at(&self, message: MidiMessage, delta_frames: u32) {
        self.lock().borrow_mut().midi_queue.push((delta_frames, message));
    }

    /// Replacing single precision process. Outputs are overwritten.
    pub fn process_replacing<I, O>(&self, midi: &[MidiMessage], inputs: &I, outputs: &mut O, frames: usize) -> Result<(), HostError>
    where
        I: InputChannels<f32> + ?Sized,
        O: OutputChannels<f32> + ?Sized,
    {
        let Some(process) = self.descriptor().process_replacing else {
            return Err(HostError::Unsupported("plugin has no processReplacing".into()));
        };
        self.run_process(midi, inputs, outputs, frames, |effect, ins, outs, n| unsafe {
            process(effect, ins, outs, n)
        })
    }

    /// Accumulating process. The plug-in adds into `outputs`; clear them
    /// first if their previous content is not wanted.
    pub fn process<I, O>(&self, midi: &[MidiMessage], inputs: &I, outputs: &mut O, frames: usize) -> Result<(), HostError>
    where
        I: InputChannels<f32> + ?Sized,
        O: OutputChannels<f32> + ?Sized,
    {
        if self.version.additive_process_removed() {
            return Err(HostError::Unsupported("accumulating process is not available to VST 2.4 plugins".into()));
        }
        let Some(process) = self.descriptor().process else {
            return Err(HostError::Unsupported("plugin has no accumulating process".into()));
        };
        self.run_process(midi, inputs, outputs, frames, |effect, ins, outs, n| unsafe {
            process(effect, ins, outs, n)
        })
    }

    /// Replacing double precision process.
    pub fn process_double_replacing<I, O>(&self, midi: &[MidiMessage], inputs: &I, outputs: &mut O, frames: usize) -> Result<(), HostError>
    where
        I: InputChannels<f64> + ?Sized,
        O: OutputChannels<f64> + ?Sized,
    {
        if !self.can_double_replacing() {
            return Err(HostError::Unsupported("plugin cannot process double precision".into()));
        }
        let Some(process) = self.descriptor().process_double_replacing else {
            return Err(HostError::Unsupported("plugin has no processDoubleReplacing".into()));
        };
        self.run_process(midi, inputs, outputs, frames, |effect, ins, outs, n| unsafe {
            process(effect, ins, outs, n)
        })
    }

    fn run_process<T, I, O, F>(&self, midi: &[MidiMessage], inputs: &I, outputs: &mut O, frames: usize, call: F) -> Result<(), HostError>
    where
        T: Sample,
        I: InputChannels<T> + ?Sized,
        O: OutputChannels<T> + ?Sized,
        F: FnOnce(*mut AEffect, *mut *mut T, *mut *mut T, i32),
    {
        let guard = self.lock();
        let (ins, outs, queued) = {
            let mut state = guard.borrow_mut();
            if !state.resumed {
                return Err(HostError::InvalidState("plugin must be resumed before processing".into()));
            }
            if state.in_process {
                return Err(HostError::InvalidState("process called from inside a process call".into()));
            }
            if state.block_size > 0 && frames > state.block_size as usize {
                return Err(HostError::InvalidArgument(format!(
                    "{frames} frames exceed the negotiated block size of {}",
                    state.block_size
                )));
            }
            let pair = state
                .channels
                .pair_mut::<T>()
                .ok_or_else(|| HostError::Unsupported("no channel arrays for this precision".into()))?;
            let ins = pair.inputs.bind_inputs(inputs, frames)?;
            let outs = match pair.outputs.bind_outputs(outputs, frames) {
                Ok(outs) => outs,
                Err(err) => {
                    pair.inputs.release();
                    return Err(err.into());
                }
            };
            state.in_process = true;
            (ins, outs, std::mem::take(&mut state.midi_queue))
        };

        let last_frame = frames.saturating_sub(1).min(u32::MAX as usize) as u32;
        let mut batch = EventBatch::build_timed(
            queued
                .iter()
                .map(|(delta, message)| ((*delta).min(last_frame), message))
                .chain(midi.iter().map(|message| (0, message))),
        );
        if !batch.is_empty() {
            // SAFETY: the plug-in is open and the lock is held.
            unsafe { batch.dispatch_to(self.effect()) };
        }
        call(self.effect(), ins, outs, frames as i32);

        let pending_io_change = {
            let mut state = guard.borrow_mut();
            state.in_process = false;
            state.transport.advance(frames);
            if let Some(pair) = state.channels.pair_mut::<T>() {
                pair.release();
            }
            state.pending_io_change
        };
        let released = batch.release();
        tracing::trace!(instance = self.shared.id.0, frames, events = released, "process block");

        if pending_io_change {
            self.shared.apply_io_change(&guard);
        }
        Ok(())
    }

    // Parameters

    pub fn num_params(&self) -> usize {
        self.descriptor().num_params.max(0) as usize
    }

    fn check_param(&self, index: usize) -> Result<i32, HostError> {
        let len = self.num_params();
        if index >= len {
            return Err(HostError::index("parameter", index, len));
        }
        Ok(index as i32)
    }

    pub fn parameter(&self, index: usize) -> Result<f32, HostError> {
        let index = self.check_param(index)?;
        let Some(get_parameter) = self.descriptor().get_parameter else {
            return Err(HostError::Unsupported("plugin has no getParameter".into()));
        };
        let _guard = self.lock();
        // SAFETY: the plug-in is open, the index is in range and the lock is held.
        Ok(unsafe { get_parameter(self.effect(), index) })
    }

    /// Passes `value` to the plug-in untouched. VST expects 0.0..=1.0.
    pub fn set_parameter(&self, index: usize, value: f32) -> Result<(), HostError> {
        let index = self.check_param(index)?;
        let Some(set_parameter) = self.descriptor().set_parameter else {
            return Err(HostError::Unsupported("plugin has no setParameter".into()));
        };
        let _guard = self.lock();
        // SAFETY: the plug-in is open, the index is in range and the lock is held.
        unsafe { set_parameter(self.effect(), index, value) };
        Ok(())
    }

    pub fn parameter_name(&self, index: usize) -> Result<String, HostError> {
        let index = self.check_param(index)?;
        Ok(self.dispatch_string(eff::GET_PARAM_NAME, index))
    }

    /// Unit label, e.g. "dB".
    pub fn parameter_label(&self, index: usize) -> Result<String, HostError> {
        let index = self.check_param(index)?;
        Ok(self.dispatch_string(eff::GET_PARAM_LABEL, index))
    }

    /// Current value formatted by the plug-in.
    pub fn parameter_display(&self, index: usize) -> Result<String, HostError> {
        let index = self.check_param(index)?;
        Ok(self.dispatch_string(eff::GET_PARAM_DISPLAY, index))
    }

    pub fn is_parameter_automatable(&self, index: usize) -> Result<bool, HostError> {
        let index = self.check_param(index)?;
        Ok(self.dispatch(eff::CAN_BE_AUTOMATED, index, 0, ptr::null_mut(), 0.0) != 0)
    }

    // Programs

    pub fn num_programs(&self) -> usize {
        self.descriptor().num_programs.max(0) as usize
    }

    fn check_program(&self, index: usize) -> Result<i32, HostError> {
        let len = self.num_programs();
        if index >= len {
            return Err(HostError::index("program", index, len));
        }
        Ok(index as i32)
    }

    pub fn program(&self) -> usize {
        self.dispatch(eff::GET_PROGRAM, 0, 0, ptr::null_mut(), 0.0).max(0) as usize
    }

    pub fn set_program(&self, index: usize) -> Result<(), HostError> {
        let index = self.check_program(index)?;
        self.dispatch(eff::SET_PROGRAM, 0, index as isize, ptr::null_mut(), 0.0);
        Ok(())
    }

    /// Name of the current program.
    pub fn program_name(&self) -> String {
        self.dispatch_string(eff::GET_PROGRAM_NAME, 0)
    }

    /// Renames the current program. Names are cut to the SDK limit of 24 bytes.
    pub fn set_program_name(&self, name: &str) -> Result<(), HostError> {
        let truncated = truncate_utf8(name, string_len::MAX_PROG_NAME);
        let name = CString::new(truncated)
            .map_err(|_| HostError::InvalidArgument("program name contains a NUL byte".into()))?;
        let mut buffer = [0u8; STRING_BUFFER_LEN];
        buffer[..name.as_bytes().len()].copy_from_slice(name.as_bytes());
        self.dispatch(eff::SET_PROGRAM_NAME, 0, 0, buffer.as_mut_ptr().cast(), 0.0);
        Ok(())
    }

    /// Name of any program without switching to it. `None` when the
    /// plug-in does not support the query.
    pub fn program_name_indexed(&self, index: usize) -> Result<Option<String>, HostError> {
        let index = self.check_program(index)?;
        let mut buffer = [0u8; STRING_BUFFER_LEN];
        let supported = self.dispatch(eff::GET_PROGRAM_NAME_INDEXED, index, 0, buffer.as_mut_ptr().cast(), 0.0);
        Ok((supported != 0).then(|| string_from_buffer(&buffer)))
    }

    // Metadata

    pub fn effect_name(&self) -> String {
        self.dispatch_string(eff::GET_EFFECT_NAME, 0)
    }

    pub fn vendor_name(&self) -> String {
        self.dispatch_string(eff::GET_VENDOR_STRING, 0)
    }

    pub fn product_string(&self) -> String {
        self.dispatch_string(eff::GET_PRODUCT_STRING, 0)
    }

    pub fn vendor_version(&self) -> i32 {
        self.dispatch(eff::GET_VENDOR_VERSION, 0, 0, ptr::null_mut(), 0.0) as i32
    }

    pub fn unique_id(&self) -> i32 {
        self.descriptor().unique_id
    }

    /// Unique id as the four characters it is usually built from.
    pub fn unique_id_string(&self) -> String {
        unique_id_string(self.unique_id())
    }

    /// Plug-in defined version number.
    pub fn plugin_version(&self) -> i32 {
        self.descriptor().version
    }

    pub fn vst_version(&self) -> VstVersion {
        self.version
    }

    pub fn initial_delay(&self) -> i32 {
        self.descriptor().initial_delay
    }

    pub fn tail_size(&self) -> i32 {
        self.dispatch(eff::GET_TAIL_SIZE, 0, 0, ptr::null_mut(), 0.0) as i32
    }

    pub fn num_inputs(&self) -> usize {
        self.descriptor().num_inputs.max(0) as usize
    }

    pub fn num_outputs(&self) -> usize {
        self.descriptor().num_outputs.max(0) as usize
    }

    pub fn category(&self) -> PluginCategory {
        PluginCategory::from_raw(self.dispatch(eff::GET_PLUG_CATEGORY, 0, 0, ptr::null_mut(), 0.0))
    }

    pub fn input_properties(&self, index: usize) -> Result<Option<PinProperties>, HostError> {
        if index >= self.num_inputs() {
            return Err(HostError::index("input", index, self.num_inputs()));
        }
        Ok(self.pin_properties(eff::GET_INPUT_PROPERTIES, index as i32))
    }

    pub fn output_properties(&self, index: usize) -> Result<Option<PinProperties>, HostError> {
        if index >= self.num_outputs() {
            return Err(HostError::index("output", index, self.num_outputs()));
        }
        Ok(self.pin_properties(eff::GET_OUTPUT_PROPERTIES, index as i32))
    }

    fn pin_properties(&self, opcode: i32, index: i32) -> Option<PinProperties> {
        let mut properties = VstPinProperties::default();
        let supported = self.dispatch(opcode, index, 0, ptr::addr_of_mut!(properties).cast(), 0.0);
        if supported == 0 {
            return None;
        }
        Some(PinProperties {
            label: c_chars_to_string(&properties.label),
            short_label: c_chars_to_string(&properties.short_label),
            flags: properties.flags,
        })
    }

    // Chunks

    /// Copies the plug-in's opaque state out of its own buffer.
    pub fn chunk(&self, kind: ChunkKind) -> Result<Vec<u8>, HostError> {
        if !self.accepts_programs_as_chunks() {
            return Err(HostError::Unsupported("plugin does not store its state in chunks".into()));
        }
        let mut data: *mut c_void = ptr::null_mut();
        let _guard = self.lock();
        // SAFETY: the plug-in is open and the lock is held.
        let len = unsafe {
            raw_dispatch(self.effect(), eff::GET_CHUNK, kind.index(), 0, ptr::addr_of_mut!(data).cast(), 0.0)
        };
        if len <= 0 || data.is_null() {
            return Ok(Vec::new());
        }
        // SAFETY: the plug-in promises `len` readable bytes at `data` until its
        // next call. The buffer stays plug-in owned and is never freed here.
        Ok(unsafe { std::slice::from_raw_parts(data as *const u8, len as usize) }.to_vec())
    }

    pub fn set_chunk(&self, kind: ChunkKind, data: &[u8]) -> Result<(), HostError> {
        if !self.accepts_programs_as_chunks() {
            return Err(HostError::Unsupported("plugin does not store its state in chunks".into()));
        }
        self.dispatch(eff::SET_CHUNK, kind.index(), data.len() as isize, data.as_ptr() as *mut c_void, 0.0);
        Ok(())
    }

    // Capabilities

    fn has_flag(&self, flag: i32) -> bool {
        self.descriptor().flags & flag != 0
    }

    pub fn has_editor(&self) -> bool {
        self.has_flag(effect_flags::HAS_EDITOR)
    }

    pub fn can_replacing(&self) -> bool {
        self.has_flag(effect_flags::CAN_REPLACING)
    }

    pub fn accepts_programs_as_chunks(&self) -> bool {
        self.has_flag(effect_flags::PROGRAM_CHUNKS)
    }

    pub fn is_synth(&self) -> bool {
        self.has_flag(effect_flags::IS_SYNTH)
    }

    /// False when the plug-in declares it stays silent on silent input.
    pub fn produces_sound_in_stop(&self) -> bool {
        !self.has_flag(effect_flags::NO_SOUND_IN_STOP)
    }

    pub fn can_double_replacing(&self) -> bool {
        self.has_flag(effect_flags::CAN_DOUBLE_REPLACING)
    }

    /// Asks the plug-in through `effCanDo`. "Don't know" counts as no.
    pub fn can_do(&self, capability: &str) -> bool {
        let Ok(name) = CString::new(capability) else {
            return false;
        };
        self.dispatch(eff::CAN_DO, 0, 0, name.as_ptr() as *mut c_void, 0.0) > 0
    }

    pub fn can_do_capability(&self, capability: PluginCanDo) -> bool {
        self.can_do(capability.as_str())
    }

    /// Answer this host gives plug-ins for `capability`.
    pub fn host_can_do(&self, capability: &str) -> bool {
        self.shared.registry.config().capabilities.supports(capability)
    }

    pub fn set_bypass(&self, bypass: bool) -> bool {
        self.dispatch(eff::SET_BYPASS, 0, bypass as isize, ptr::null_mut(), 0.0) != 0
    }
}

impl Drop for Vst2Plugin {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Vst2Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vst2Plugin")
            .field("id", &self.shared.id)
            .field("version", &self.version)
            .field("path", &self.path())
            .finish()
    }
}

/// # Safety
/// `effect` must point to a live descriptor.
pub(crate) unsafe fn raw_dispatch(effect: *mut AEffect, opcode: i32, index: i32, value: isize, ptr: *mut c_void, opt: f32) -> isize {
    match (*effect).dispatcher {
        Some(dispatcher) => dispatcher(effect, opcode, index, value, ptr, opt),
        None => 0,
    }
}

unsafe fn validate_descriptor(effect: *mut AEffect) -> Result<(), LoadError> {
    if effect.is_null() {
        return Err(LoadError::InstantiationFailed("entry point returned a null descriptor".into()));
    }
    let magic = (*effect).magic;
    if magic != VST_MAGIC {
        return Err(LoadError::InstantiationFailed(format!("bad descriptor magic {magic:#010x}")));
    }
    if (*effect).dispatcher.is_none() {
        return Err(LoadError::InstantiationFailed("descriptor has no dispatcher".into()));
    }
    Ok(())
}

pub(crate) fn unique_id_string(id: i32) -> String {
    id.to_be_bytes()
        .iter()
        .map(|&byte| if byte.is_ascii_graphic() || byte == b' ' { byte as char } else { '?' })
        .collect()
}

fn string_from_buffer(buffer: &[u8]) -> String {
    let end = buffer.iter().position(|&byte| byte == 0).unwrap_or(buffer.len());
    String::from_utf8_lossy(&buffer[..end]).into_owned()
}

fn c_chars_to_string(chars: &[c_char]) -> String {
    let bytes: Vec<u8> = chars.iter().map(|&c| c as u8).collect();
    string_from_buffer(&bytes)
}

fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_id_renders_as_four_characters() {
        assert_eq!(unique_id_string(i32::from_be_bytes(*b"Abcd")), "Abcd");
        assert_eq!(unique_id_string(0x0001_4142), "??AB");
    }

    #[test]
    fn strings_stop_at_the_first_nul() {
        assert_eq!(string_from_buffer(b"Gain\0junk"), "Gain");
        assert_eq!(string_from_buffer(b"NoTerminator"), "NoTerminator");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_utf8("short", 24), "short");
        assert_eq!(truncate_utf8("ééééé", 5), "éé");
    }

    #[test]
    fn string_scratch_exceeds_every_sdk_limit() {
        for limit in [
            string_len::MAX_PROG_NAME,
            string_len::MAX_PARAM_STR,
            string_len::MAX_VENDOR_STR,
            string_len::MAX_PRODUCT_STR,
            string_len::MAX_EFFECT_NAME,
            string_len::MAX_LABEL,
            string_len::MAX_SHORT_LABEL,
        ] {
            assert!(STRING_BUFFER_LEN >= limit * 2, "limit {limit}");
        }
    }

    #[test]
    fn string_queries_go_through_the_internal_dispatcher() {
        let registry = HostRegistry::default();
        let _probe = vst2_test_plugin::FakePluginConfig::default().install();
        let plugin = unsafe { Vst2Plugin::from_entry_point(&registry, vst2_test_plugin::VSTPluginMain) }.unwrap();
        assert_eq!(plugin.product_string(), vst2_test_plugin::PRODUCT_NAME);
        assert_eq!(plugin.dispatch_string(eff::GET_PARAM_NAME, 3), "Param 3");
    }

    #[test]
    fn category_maps_unknown_values() {
        assert_eq!(PluginCategory::from_raw(2), PluginCategory::Synth);
        assert_eq!(PluginCategory::from_raw(99), PluginCategory::Unknown);
    }
}
