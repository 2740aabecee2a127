//! MIDI event bridge.
//!
//! Host to plug-in: an [`EventBatch`] packs a slice of [`MidiMessage`]s into
//! the variable length `VstEvents` list handed to `effProcessEvents`.
//! Plug-in to host: [`for_each_event`] walks a list received through
//! `audioMasterProcessEvents`.

use std::marker::PhantomData;
use std::mem::{offset_of, size_of};
use std::ptr;

use vst2_sys::{
    effect_opcode, event_type, AEffect, VstEvent, VstEvents, VstMidiEvent, VstMidiSysexEvent,
};

const SYSEX_START: u8 = 0xF0;

/// A MIDI message queued for a plug-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    /// Channel or system message of up to three bytes. Unused bytes are zero.
    Short([u8; 3]),
    /// System exclusive dump, including the leading `0xF0`.
    SysEx(Vec<u8>),
}

impl MidiMessage {
    /// Builds a channel message from its command nibble and channel.
    pub fn short(command: u8, channel: u8, data1: u8, data2: u8) -> Self {
        MidiMessage::Short([
            (command & 0xF0) | (channel & 0x0F),
            data1 & 0x7F,
            data2 & 0x7F,
        ])
    }

    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::short(0x90, channel, note, velocity)
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self::short(0x80, channel, note, velocity)
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self::short(0xB0, channel, controller, value)
    }

    /// Classifies raw bytes by their status byte.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [] => None,
            [SYSEX_START, ..] => Some(MidiMessage::SysEx(bytes.to_vec())),
            _ => {
                let mut data = [0u8; 3];
                let len = bytes.len().min(3);
                data[..len].copy_from_slice(&bytes[..len]);
                Some(MidiMessage::Short(data))
            }
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            MidiMessage::Short(data) => data,
            MidiMessage::SysEx(data) => data,
        }
    }

    pub fn is_sysex(&self) -> bool {
        matches!(self, MidiMessage::SysEx(_))
    }
}

/// Short MIDI message sent upward by a plug-in, split into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortMidiEvent {
    /// High nibble of the status byte, e.g. `0x90` for note on.
    pub command: u8,
    pub channel: u8,
    pub data1: u8,
    pub data2: u8,
}

impl ShortMidiEvent {
    pub fn from_midi_data(data: [u8; 4]) -> Self {
        Self {
            command: data[0] & 0xF0,
            channel: data[0] & 0x0F,
            data1: data[1],
            data2: data[2],
        }
    }
}

/// Event decoded from a list the plug-in handed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingEvent<'a> {
    Midi(ShortMidiEvent),
    SysEx(&'a [u8]),
}

enum EventRecord {
    Midi(Box<VstMidiEvent>),
    SysEx(Box<VstMidiSysexEvent>),
}

impl EventRecord {
    fn midi(data: &[u8; 3], delta_frames: i32) -> Self {
        EventRecord::Midi(Box::new(VstMidiEvent {
            event_type: event_type::MIDI,
            byte_size: size_of::<VstMidiEvent>() as i32,
            delta_frames,
            midi_data: [data[0], data[1], data[2], 0],
            ..VstMidiEvent::default()
        }))
    }

    fn sysex(dump: &[u8], delta_frames: i32) -> Self {
        EventRecord::SysEx(Box::new(VstMidiSysexEvent {
            event_type: event_type::SYSEX,
            byte_size: size_of::<VstMidiSysexEvent>() as i32,
            delta_frames,
            flags: 0,
            dump_bytes: dump.len() as i32,
            resvd1: 0,
            // Aliases the caller's buffer. Plug-ins only read sysex dumps.
            sysex_dump: dump.as_ptr() as *mut _,
            resvd2: 0,
        }))
    }

    fn as_event_ptr(&mut self) -> *mut VstEvent {
        match self {
            EventRecord::Midi(event) => &mut **event as *mut VstMidiEvent as *mut VstEvent,
            EventRecord::SysEx(event) => &mut **event as *mut VstMidiSysexEvent as *mut VstEvent,
        }
    }
}

/// A packed `VstEvents` list built for one process call.
///
/// The batch borrows the messages it was built from, so sysex payloads stay
/// valid for as long as the plug-in can see them.
pub struct EventBatch<'a> {
    records: Vec<EventRecord>,
    header: Vec<usize>,
    _messages: PhantomData<&'a [u8]>,
}

impl<'a> EventBatch<'a> {
    /// Builds a batch whose events all sit at the start of the block.
    pub fn build<I>(messages: I) -> Self
    where
        I: IntoIterator<Item = &'a MidiMessage>,
    {
        Self::build_timed(messages.into_iter().map(|message| (0, message)))
    }

    /// Builds a batch from `(delta_frames, message)` pairs. Offsets are
    /// relative to the start of the block and are not reordered.
    pub fn build_timed<I>(messages: I) -> Self
    where
        I: IntoIterator<Item = (u32, &'a MidiMessage)>,
    {
        let mut records: Vec<EventRecord> = messages
            .into_iter()
            .map(|(delta, message)| {
                let delta = delta.min(i32::MAX as u32) as i32;
                match message {
                    MidiMessage::Short(data) => EventRecord::midi(data, delta),
                    MidiMessage::SysEx(dump) => EventRecord::sysex(dump, delta),
                }
            })
            .collect();

        let slots_offset = offset_of!(VstEvents, events);
        let bytes = (slots_offset + records.len() * size_of::<*mut VstEvent>()).max(size_of::<VstEvents>());
        let mut header = vec![0usize; bytes.div_ceil(size_of::<usize>())];

        let base = header.as_mut_ptr() as *mut VstEvents;
        // SAFETY: `header` is zeroed, pointer aligned and large enough for the
        // fixed fields plus one slot per record.
        unsafe {
            ptr::addr_of_mut!((*base).num_events).write(records.len() as i32);
            ptr::addr_of_mut!((*base).reserved).write(0);
            let slots = (base as *mut u8).add(slots_offset) as *mut *mut VstEvent;
            for (index, record) in records.iter_mut().enumerate() {
                slots.add(index).write(record.as_event_ptr());
            }
        }

        Self {
            records,
            header,
            _messages: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Pointer to the packed list, valid while the batch is alive.
    pub fn as_ptr(&self) -> *const VstEvents {
        self.header.as_ptr() as *const VstEvents
    }

    fn as_mut_ptr(&mut self) -> *mut VstEvents {
        self.header.as_mut_ptr() as *mut VstEvents
    }

    /// Delivers the batch through `effProcessEvents`.
    ///
    /// # Safety
    /// `effect` must point to a live, opened plug-in.
    pub unsafe fn dispatch_to(&mut self, effect: *mut AEffect) -> isize {
        let Some(dispatcher) = (*effect).dispatcher else {
            return 0;
        };
        dispatcher(
            effect,
            effect_opcode::PROCESS_EVENTS,
            0,
            0,
            self.as_mut_ptr().cast(),
            0.0,
        )
    }

    /// Frees every per-event record and reports how many were released.
    pub fn release(mut self) -> usize {
        let freed = self.records.len();
        self.records.clear();
        freed
    }
}

/// Walks an event list received from a plug-in.
///
/// # Safety
/// `events` must be null or point to a well formed `VstEvents` list whose
/// entries stay valid for the duration of the call.
pub unsafe fn for_each_event<F>(events: *const VstEvents, mut visit: F) -> usize
where
    F: FnMut(IncomingEvent<'_>),
{
    if events.is_null() {
        return 0;
    }
    let count = ptr::addr_of!((*events).num_events).read().max(0) as usize;
    let slots = (events as *const u8).add(offset_of!(VstEvents, events)) as *const *const VstEvent;
    let mut visited = 0;
    for index in 0..count {
        let event = slots.add(index).read();
        if event.is_null() {
            continue;
        }
        match (*event).event_type {
            event_type::MIDI => {
                let midi = &*(event as *const VstMidiEvent);
                visit(IncomingEvent::Midi(ShortMidiEvent::from_midi_data(midi.midi_data)));
            }
            event_type::SYSEX => {
                let sysex = &*(event as *const VstMidiSysexEvent);
                if sysex.sysex_dump.is_null() || sysex.dump_bytes <= 0 {
                    continue;
                }
                let dump = std::slice::from_raw_parts(sysex.sysex_dump as *const u8, sysex.dump_bytes as usize);
                visit(IncomingEvent::SysEx(dump));
            }
            other => {
                tracing::trace!(event_type = other, "ignoring unsupported VST event");
                continue;
            }
        }
        visited += 1;
    }
    visited
}
