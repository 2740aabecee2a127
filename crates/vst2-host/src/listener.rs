use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::events::ShortMidiEvent;

/// I/O layout reported by a plug-in through `audioMasterIOChanged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoConfiguration {
    pub num_inputs: i32,
    pub num_outputs: i32,
    pub initial_delay: i32,
    pub num_params: i32,
}

/// Receives notifications a plug-in sends up through the host callback.
///
/// Callbacks run synchronously on whatever thread the plug-in calls back
/// from, frequently the audio thread in the middle of a process call.
/// Implementations should hand the data off instead of doing real work.
pub trait HostListener: Send + Sync {
    /// A parameter changed on the plug-in side, usually from its editor.
    fn parameter_automated(&self, _index: i32, _value: f32) {}

    fn midi_received(&self, _event: ShortMidiEvent) {}

    fn sysex_received(&self, _dump: &[u8]) {}

    fn io_changed(&self, _config: IoConfiguration) {}

    /// Start of a parameter edit gesture.
    fn begin_edit(&self, _index: i32) {}

    /// End of a parameter edit gesture.
    fn end_edit(&self, _index: i32) {}
}

/// Everything a [`ChannelListener`] forwards.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    ParameterAutomated { index: i32, value: f32 },
    Midi(ShortMidiEvent),
    SysEx(Vec<u8>),
    IoChanged(IoConfiguration),
    BeginEdit(i32),
    EndEdit(i32),
}

/// Listener that queues every notification on a channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    events: Sender<HostEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, Receiver<HostEvent>) {
        let (events, receiver) = unbounded();
        (Self { events }, receiver)
    }

    fn send(&self, event: HostEvent) {
        // A dropped receiver just means nobody is interested any more.
        let _ = self.events.send(event);
    }
}

impl HostListener for ChannelListener {
    fn parameter_automated(&self, index: i32, value: f32) {
        self.send(HostEvent::ParameterAutomated { index, value });
    }

    fn midi_received(&self, event: ShortMidiEvent) {
        self.send(HostEvent::Midi(event));
    }

    fn sysex_received(&self, dump: &[u8]) {
        self.send(HostEvent::SysEx(dump.to_vec()));
    }

    fn io_changed(&self, config: IoConfiguration) {
        self.send(HostEvent::IoChanged(config));
    }

    fn begin_edit(&self, index: i32) {
        self.send(HostEvent::BeginEdit(index));
    }

    fn end_edit(&self, index: i32) {
        self.send(HostEvent::EndEdit(index));
    }
}
