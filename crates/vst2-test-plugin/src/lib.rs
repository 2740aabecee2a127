//! A VST 2.x plug-in whose behavior is configured per instantiation.
//!
//! Install a [`FakePluginConfig`] on the current thread, then call
//! [`VSTPluginMain`] (directly or through a host). The next instance created
//! on that thread picks the configuration up and reports everything it sees
//! through the returned [`Probe`].

use std::cell::RefCell;
use std::ffi::{c_char, c_void, CStr};
use std::ptr;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use vst2_sys::{
    effect_flags, effect_opcode as eff, event_type, host_opcode as master, pin_flags, AEffect,
    ERect, HostCallbackProc, VstEvent, VstEvents, VstMidiEvent, VstMidiSysexEvent,
    VstPinProperties, VstTimeInfo, VST_MAGIC,
};

pub const EFFECT_NAME: &str = "Test Plugin";
pub const VENDOR_NAME: &str = "vst2-host tests";
pub const PRODUCT_NAME: &str = "Test Plugin Product";
pub const VENDOR_VERSION: isize = 1000;
pub const EDITOR_SIZE: (i16, i16) = (320, 240);

/// What the entry point hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    Normal,
    /// Returns a null descriptor.
    Null,
    /// Returns a descriptor whose magic is wrong.
    BadMagic,
}

/// Host calls made from inside `processReplacing`.
#[derive(Debug, Clone, Default)]
pub struct ProcessScript {
    /// Changes the layout to `(inputs, outputs)` and reports it through
    /// `audioMasterIOChanged` during the first process call.
    pub io_change: Option<(i32, i32)>,
    /// Raw MIDI messages sent to the host with `audioMasterProcessEvents`.
    pub send_events: Vec<Vec<u8>>,
    /// Request mask passed to `audioMasterGetTime`.
    pub time_request: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct FakePluginConfig {
    pub mode: EntryMode,
    pub unique_id: i32,
    pub plugin_version: i32,
    pub vst_version: isize,
    pub num_inputs: i32,
    pub num_outputs: i32,
    pub num_params: i32,
    pub num_programs: i32,
    pub flags: i32,
    pub initial_delay: i32,
    pub automate_on_set: bool,
    pub chunk: Vec<u8>,
    pub script: ProcessScript,
}

impl Default for FakePluginConfig {
    fn default() -> Self {
        Self {
            mode: EntryMode::Normal,
            unique_id: i32::from_be_bytes(*b"TsT1"),
            plugin_version: 1,
            vst_version: 2400,
            num_inputs: 2,
            num_outputs: 2,
            num_params: 4,
            num_programs: 3,
            flags: effect_flags::CAN_REPLACING,
            initial_delay: 0,
            automate_on_set: false,
            chunk: Vec::new(),
            script: ProcessScript::default(),
        }
    }
}

impl FakePluginConfig {
    pub fn synth() -> Self {
        Self {
            num_inputs: 0,
            flags: effect_flags::CAN_REPLACING | effect_flags::IS_SYNTH,
            ..Self::default()
        }
    }

    pub fn with_flags(mut self, flags: i32) -> Self {
        self.flags |= flags;
        self
    }

    /// Installs the configuration for the next instantiation on this thread.
    pub fn install(self) -> Arc<Probe> {
        let probe = Arc::new(Probe::default());
        NEXT_CONFIG.with(|slot| *slot.borrow_mut() = Some((self, Arc::clone(&probe))));
        probe
    }
}

/// Everything the plug-in observed, shared with the test that installed it.
#[derive(Debug, Default)]
pub struct Probe {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub process_calls: AtomicUsize,
    pub edit_opened: AtomicUsize,
    pub edit_closed: AtomicUsize,
    pub edit_idles: AtomicUsize,
    pub start_process: AtomicUsize,
    pub stop_process: AtomicUsize,
    /// `audioMasterVersion` as answered while the entry point ran.
    pub host_version: AtomicIsize,
    /// `audioMasterCanDo("sendVstMidiEvent")` while the entry point ran.
    pub host_can_send_midi: AtomicIsize,
    pub host_vendor: Mutex<String>,
    pub mains_changes: Mutex<Vec<isize>>,
    pub sample_rates: Mutex<Vec<f32>>,
    pub block_sizes: Mutex<Vec<isize>>,
    /// Number of events in each `effProcessEvents` call.
    pub event_batches: Mutex<Vec<usize>>,
    /// Raw bytes of every event received.
    pub received: Mutex<Vec<Vec<u8>>>,
    /// `deltaFrames` of every event received, in the same order.
    pub received_deltas: Mutex<Vec<i32>>,
    /// First input and output channel pointer of each process call.
    pub channel_pointers: Mutex<Vec<(usize, usize)>>,
    /// Copy of the time info returned by the host, `None` for null.
    pub time_infos: Mutex<Vec<Option<VstTimeInfo>>>,
    pub time_info_addresses: Mutex<Vec<usize>>,
    /// Return values of host callbacks made from inside process.
    pub host_returns: Mutex<Vec<(&'static str, isize)>>,
    /// Ordered notes of what happened, shared with test listeners.
    pub log: Mutex<Vec<String>>,
    pub last_chunk_index: AtomicIsize,
    pub bypass: AtomicIsize,
}

impl Probe {
    pub fn note(&self, entry: impl Into<String>) {
        self.log.lock().push(entry.into());
    }

    pub fn live(&self) -> usize {
        self.opened.load(Ordering::SeqCst) - self.closed.load(Ordering::SeqCst)
    }
}

/// Process-wide open and close counts, readable through the exported
/// functions below once the crate is loaded as a shared library.
static OPENED_TOTAL: AtomicUsize = AtomicUsize::new(0);
static CLOSED_TOTAL: AtomicUsize = AtomicUsize::new(0);

#[no_mangle]
pub extern "C" fn vst2_test_plugin_opened() -> usize {
    OPENED_TOTAL.load(Ordering::SeqCst)
}

#[no_mangle]
pub extern "C" fn vst2_test_plugin_closed() -> usize {
    CLOSED_TOTAL.load(Ordering::SeqCst)
}

thread_local! {
    static NEXT_CONFIG: RefCell<Option<(FakePluginConfig, Arc<Probe>)>> = const { RefCell::new(None) };
}

#[repr(C)]
struct Plugin {
    effect: AEffect,
    host: HostCallbackProc,
    config: FakePluginConfig,
    probe: Arc<Probe>,
    params: Vec<f32>,
    program: usize,
    program_names: Vec<String>,
    chunk: Vec<u8>,
    rect: ERect,
    io_change_done: bool,
}

/// Entry point.
///
/// # Safety
/// `host` must be a valid VST 2.x host callback.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn VSTPluginMain(host: HostCallbackProc) -> *mut AEffect {
    let (config, probe) = NEXT_CONFIG
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| (FakePluginConfig::default(), Arc::new(Probe::default())));

    probe.host_version.store(host(ptr::null_mut(), master::VERSION, 0, 0, ptr::null_mut(), 0.0), Ordering::SeqCst);
    let capability = c"sendVstMidiEvent";
    probe
        .host_can_send_midi
        .store(host(ptr::null_mut(), master::CAN_DO, 0, 0, capability.as_ptr() as *mut c_void, 0.0), Ordering::SeqCst);
    let mut vendor = [0u8; 128];
    host(ptr::null_mut(), master::GET_VENDOR_STRING, 0, 0, vendor.as_mut_ptr().cast(), 0.0);
    *probe.host_vendor.lock() = read_c_string(vendor.as_ptr().cast());

    match config.mode {
        EntryMode::Null => return ptr::null_mut(),
        EntryMode::BadMagic => {
            // Never closed, a host rejects it right away.
            let plugin = Box::leak(Plugin::boxed(host, config, probe));
            plugin.effect.magic = i32::from_be_bytes(*b"Nope");
            return &mut plugin.effect;
        }
        EntryMode::Normal => {}
    }

    let plugin = Box::into_raw(Plugin::boxed(host, config, probe));
    ptr::addr_of_mut!((*plugin).effect)
}

impl Plugin {
    fn boxed(host: HostCallbackProc, config: FakePluginConfig, probe: Arc<Probe>) -> Box<Self> {
        let effect = AEffect {
            magic: VST_MAGIC,
            dispatcher: Some(dispatcher),
            process: Some(process_accumulating),
            set_parameter: Some(set_parameter),
            get_parameter: Some(get_parameter),
            num_programs: config.num_programs,
            num_params: config.num_params,
            num_inputs: config.num_inputs,
            num_outputs: config.num_outputs,
            flags: config.flags,
            resvd1: 0,
            resvd2: 0,
            initial_delay: config.initial_delay,
            real_qualities: 0,
            off_qualities: 0,
            io_ratio: 1.0,
            object: ptr::null_mut(),
            user: ptr::null_mut(),
            unique_id: config.unique_id,
            version: config.plugin_version,
            process_replacing: Some(process_replacing),
            process_double_replacing: if config.flags & effect_flags::CAN_DOUBLE_REPLACING != 0 {
                Some(process_double_replacing)
            } else {
                None
            },
            future: [0; 56],
        };
        let params = vec![0.0; config.num_params.max(0) as usize];
        let program_names = (0..config.num_programs.max(0)).map(|index| format!("Program {}", index + 1)).collect();
        let chunk = config.chunk.clone();
        Box::new(Self {
            effect,
            host,
            config,
            probe,
            params,
            program: 0,
            program_names,
            chunk,
            rect: ERect {
                top: 0,
                left: 0,
                bottom: EDITOR_SIZE.1,
                right: EDITOR_SIZE.0,
            },
            io_change_done: false,
        })
    }
}

/// The descriptor is the first field, so its address is the plug-in's.
unsafe fn plugin<'a>(effect: *mut AEffect) -> &'a mut Plugin {
    &mut *(effect as *mut Plugin)
}

unsafe fn read_c_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

unsafe fn write_c_string(ptr: *mut c_void, text: &str, max_len: usize) {
    if ptr.is_null() || max_len == 0 {
        return;
    }
    let bytes = text.as_bytes();
    let len = bytes.len().min(max_len - 1);
    ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, len);
    *(ptr as *mut u8).add(len) = 0;
}

unsafe extern "C" fn dispatcher(effect: *mut AEffect, opcode: i32, index: i32, value: isize, ptr: *mut c_void, opt: f32) -> isize {
    let this = plugin(effect);
    let probe = Arc::clone(&this.probe);
    match opcode {
        eff::OPEN => {
            probe.opened.fetch_add(1, Ordering::SeqCst);
            OPENED_TOTAL.fetch_add(1, Ordering::SeqCst);
            0
        }
        eff::CLOSE => {
            probe.closed.fetch_add(1, Ordering::SeqCst);
            CLOSED_TOTAL.fetch_add(1, Ordering::SeqCst);
            drop(Box::from_raw(effect as *mut Plugin));
            0
        }
        eff::SET_PROGRAM => {
            if value >= 0 && (value as usize) < this.program_names.len() {
                this.program = value as usize;
            }
            0
        }
        eff::GET_PROGRAM => this.program as isize,
        eff::SET_PROGRAM_NAME => {
            let name = read_c_string(ptr as *const c_char);
            if let Some(slot) = this.program_names.get_mut(this.program) {
                *slot = name;
            }
            0
        }
        eff::GET_PROGRAM_NAME => {
            let name = this.program_names.get(this.program).cloned().unwrap_or_default();
            write_c_string(ptr, &name, 24);
            0
        }
        eff::GET_PROGRAM_NAME_INDEXED => match this.program_names.get(index.max(0) as usize) {
            Some(name) => {
                write_c_string(ptr, name, 24);
                1
            }
            None => 0,
        },
        eff::GET_PARAM_NAME => {
            write_c_string(ptr, &format!("Param {index}"), 8);
            0
        }
        eff::GET_PARAM_LABEL => {
            write_c_string(ptr, "%", 8);
            0
        }
        eff::GET_PARAM_DISPLAY => {
            let value = this.params.get(index.max(0) as usize).copied().unwrap_or(0.0);
            write_c_string(ptr, &format!("{:.0}", value * 100.0), 8);
            0
        }
        eff::CAN_BE_AUTOMATED => 1,
        eff::SET_SAMPLE_RATE => {
            probe.sample_rates.lock().push(opt);
            0
        }
        eff::SET_BLOCK_SIZE => {
            probe.block_sizes.lock().push(value);
            0
        }
        eff::MAINS_CHANGED => {
            probe.mains_changes.lock().push(value);
            0
        }
        eff::START_PROCESS => {
            probe.start_process.fetch_add(1, Ordering::SeqCst);
            0
        }
        eff::STOP_PROCESS => {
            probe.stop_process.fetch_add(1, Ordering::SeqCst);
            0
        }
        eff::EDIT_GET_RECT => {
            if this.effect.flags & effect_flags::HAS_EDITOR == 0 || ptr.is_null() {
                return 0;
            }
            *(ptr as *mut *mut ERect) = &mut this.rect;
            1
        }
        eff::EDIT_OPEN => {
            probe.edit_opened.fetch_add(1, Ordering::SeqCst);
            1
        }
        eff::EDIT_CLOSE => {
            probe.edit_closed.fetch_add(1, Ordering::SeqCst);
            0
        }
        eff::EDIT_IDLE => {
            probe.edit_idles.fetch_add(1, Ordering::SeqCst);
            0
        }
        eff::GET_CHUNK => {
            probe.last_chunk_index.store(index as isize, Ordering::SeqCst);
            if ptr.is_null() {
                return 0;
            }
            *(ptr as *mut *mut c_void) = this.chunk.as_mut_ptr().cast();
            this.chunk.len() as isize
        }
        eff::SET_CHUNK => {
            probe.last_chunk_index.store(index as isize, Ordering::SeqCst);
            this.chunk = if ptr.is_null() || value <= 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts(ptr as *const u8, value as usize).to_vec()
            };
            0
        }
        eff::PROCESS_EVENTS => {
            receive_events(&probe, ptr as *const VstEvents);
            1
        }
        eff::GET_INPUT_PROPERTIES | eff::GET_OUTPUT_PROPERTIES => {
            if ptr.is_null() {
                return 0;
            }
            let direction = if opcode == eff::GET_INPUT_PROPERTIES { "In" } else { "Out" };
            let properties = &mut *(ptr as *mut VstPinProperties);
            write_c_string(properties.label.as_mut_ptr().cast(), &format!("{direction} {}", index + 1), 64);
            write_c_string(properties.short_label.as_mut_ptr().cast(), &format!("{direction}{}", index + 1), 8);
            properties.flags = pin_flags::IS_ACTIVE | pin_flags::IS_STEREO;
            1
        }
        eff::GET_PLUG_CATEGORY => {
            if this.effect.flags & effect_flags::IS_SYNTH != 0 {
                2
            } else {
                1
            }
        }
        eff::SET_BYPASS => {
            probe.bypass.store(value, Ordering::SeqCst);
            1
        }
        eff::GET_EFFECT_NAME => {
            write_c_string(ptr, EFFECT_NAME, 32);
            1
        }
        eff::GET_VENDOR_STRING => {
            write_c_string(ptr, VENDOR_NAME, 64);
            1
        }
        eff::GET_PRODUCT_STRING => {
            write_c_string(ptr, PRODUCT_NAME, 64);
            1
        }
        eff::GET_VENDOR_VERSION => VENDOR_VERSION,
        eff::CAN_DO => match read_c_string(ptr as *const c_char).as_str() {
            "receiveVstEvents" | "receiveVstMidiEvent" | "bypass" => 1,
            "offline" => -1,
            _ => 0,
        },
        eff::GET_TAIL_SIZE => 0,
        eff::GET_VST_VERSION => this.config.vst_version,
        _ => 0,
    }
}

unsafe fn receive_events(probe: &Probe, events: *const VstEvents) {
    if events.is_null() {
        probe.event_batches.lock().push(0);
        return;
    }
    let count = (*events).num_events.max(0) as usize;
    let slots = ptr::addr_of!((*events).events) as *const *const VstEvent;
    let mut received = probe.received.lock();
    let mut deltas = probe.received_deltas.lock();
    for index in 0..count {
        let event = *slots.add(index);
        if event.is_null() {
            continue;
        }
        deltas.push((*event).delta_frames);
        match (*event).event_type {
            event_type::MIDI => {
                let midi = &*(event as *const VstMidiEvent);
                received.push(midi.midi_data[..3].to_vec());
            }
            event_type::SYSEX => {
                let sysex = &*(event as *const VstMidiSysexEvent);
                let dump = std::slice::from_raw_parts(sysex.sysex_dump as *const u8, sysex.dump_bytes.max(0) as usize);
                received.push(dump.to_vec());
            }
            _ => {}
        }
    }
    probe.event_batches.lock().push(count);
}

unsafe extern "C" fn set_parameter(effect: *mut AEffect, index: i32, value: f32) {
    let this = plugin(effect);
    if let Some(slot) = this.params.get_mut(index.max(0) as usize) {
        *slot = value;
    }
    if this.config.automate_on_set {
        let host = this.host;
        host(effect, master::BEGIN_EDIT, index, 0, ptr::null_mut(), 0.0);
        host(effect, master::AUTOMATE, index, 0, ptr::null_mut(), value);
        host(effect, master::END_EDIT, index, 0, ptr::null_mut(), 0.0);
    }
}

unsafe extern "C" fn get_parameter(effect: *mut AEffect, index: i32) -> f32 {
    plugin(effect).params.get(index.max(0) as usize).copied().unwrap_or(0.0)
}

/// Runs the scripted host calls. The descriptor is re-read afterwards
/// because an io change rewrites it.
unsafe fn run_script(effect: *mut AEffect) {
    let (host, probe, script, io_change_done) = {
        let this = plugin(effect);
        (this.host, Arc::clone(&this.probe), this.config.script.clone(), this.io_change_done)
    };

    if let (Some((inputs, outputs)), false) = (script.io_change, io_change_done) {
        {
            let this = plugin(effect);
            this.effect.num_inputs = inputs;
            this.effect.num_outputs = outputs;
            this.io_change_done = true;
        }
        probe.note("io-change-call");
        let result = host(effect, master::IO_CHANGED, 0, 0, ptr::null_mut(), 0.0);
        probe.host_returns.lock().push(("ioChanged", result));
        probe.note("io-change-returned");
    }

    if !script.send_events.is_empty() {
        send_events(host, effect, &script.send_events, &probe);
    }

    if let Some(request) = script.time_request {
        let info = host(effect, master::GET_TIME, 0, request as isize, ptr::null_mut(), 0.0) as *const VstTimeInfo;
        probe.time_info_addresses.lock().push(info as usize);
        probe.time_infos.lock().push(info.as_ref().copied());
    }
}

#[repr(C)]
struct OutgoingEvents {
    num_events: i32,
    reserved: isize,
    events: [*mut VstEvent; 16],
}

unsafe fn send_events(host: HostCallbackProc, effect: *mut AEffect, messages: &[Vec<u8>], probe: &Probe) {
    let mut midi: Vec<VstMidiEvent> = Vec::new();
    let mut sysex: Vec<VstMidiSysexEvent> = Vec::new();
    let mut dumps: Vec<Vec<u8>> = Vec::new();
    for message in messages.iter().take(16) {
        if message.first() == Some(&0xF0) {
            dumps.push(message.clone());
        } else {
            let mut data = [0u8; 4];
            for (slot, byte) in data.iter_mut().zip(message.iter().take(3)) {
                *slot = *byte;
            }
            midi.push(VstMidiEvent {
                event_type: event_type::MIDI,
                byte_size: std::mem::size_of::<VstMidiEvent>() as i32,
                midi_data: data,
                ..VstMidiEvent::default()
            });
        }
    }
    for dump in &mut dumps {
        sysex.push(VstMidiSysexEvent {
            event_type: event_type::SYSEX,
            byte_size: std::mem::size_of::<VstMidiSysexEvent>() as i32,
            delta_frames: 0,
            flags: 0,
            dump_bytes: dump.len() as i32,
            resvd1: 0,
            sysex_dump: dump.as_mut_ptr().cast(),
            resvd2: 0,
        });
    }

    let mut list = OutgoingEvents {
        num_events: 0,
        reserved: 0,
        events: [ptr::null_mut(); 16],
    };
    let pointers = midi
        .iter_mut()
        .map(|event| event as *mut VstMidiEvent as *mut VstEvent)
        .chain(sysex.iter_mut().map(|event| event as *mut VstMidiSysexEvent as *mut VstEvent));
    for (slot, pointer) in list.events.iter_mut().zip(pointers) {
        *slot = pointer;
        list.num_events += 1;
    }
    let result = host(effect, master::PROCESS_EVENTS, 0, 0, ptr::addr_of_mut!(list).cast(), 0.0);
    probe.host_returns.lock().push(("processEvents", result));
}

unsafe fn channels<'a, T>(array: *mut *mut T, count: i32, frames: usize) -> Vec<&'a mut [T]> {
    if array.is_null() {
        return Vec::new();
    }
    (0..count.max(0) as usize)
        .map(|index| std::slice::from_raw_parts_mut(*array.add(index), frames))
        .collect()
}

unsafe fn record_pointers<T>(probe: &Probe, inputs: *mut *mut T, outputs: *mut *mut T, num_inputs: i32, num_outputs: i32) {
    let first = |array: *mut *mut T, count: i32| {
        if array.is_null() || count <= 0 {
            0
        } else {
            *array as usize
        }
    };
    probe
        .channel_pointers
        .lock()
        .push((first(inputs, num_inputs), first(outputs, num_outputs)));
}

/// Copies each input to the output of the same index and silences the rest.
unsafe fn render<T: Copy + Default + std::ops::Add<Output = T>>(
    effect: *mut AEffect,
    inputs: *mut *mut T,
    outputs: *mut *mut T,
    frames: i32,
    accumulate: bool,
) {
    let (num_inputs, num_outputs, probe) = {
        let this = plugin(effect);
        (this.effect.num_inputs, this.effect.num_outputs, Arc::clone(&this.probe))
    };
    probe.process_calls.fetch_add(1, Ordering::SeqCst);
    probe.note("process-begin");
    record_pointers(&probe, inputs, outputs, num_inputs, num_outputs);

    let frames = frames.max(0) as usize;
    let ins = channels(inputs, num_inputs, frames);
    let mut outs = channels(outputs, num_outputs, frames);
    for (index, out) in outs.iter_mut().enumerate() {
        match ins.get(index) {
            Some(input) => {
                for (sample, &value) in out.iter_mut().zip(input.iter()) {
                    *sample = if accumulate { *sample + value } else { value };
                }
            }
            None if !accumulate => out.fill(T::default()),
            None => {}
        }
    }
    drop(outs);
    drop(ins);

    run_script(effect);
    probe.note("process-end");
}

unsafe extern "C" fn process_replacing(effect: *mut AEffect, inputs: *mut *mut f32, outputs: *mut *mut f32, frames: i32) {
    render(effect, inputs, outputs, frames, false);
}

unsafe extern "C" fn process_accumulating(effect: *mut AEffect, inputs: *mut *mut f32, outputs: *mut *mut f32, frames: i32) {
    render(effect, inputs, outputs, frames, true);
}

unsafe extern "C" fn process_double_replacing(effect: *mut AEffect, inputs: *mut *mut f64, outputs: *mut *mut f64, frames: i32) {
    render(effect, inputs, outputs, frames, false);
}
