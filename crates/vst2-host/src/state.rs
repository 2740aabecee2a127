//! Per-instance host state.
//!
//! One [`InstanceShared`] exists per loaded plug-in. Its address is stored
//! in the plug-in's `resvd1` field, which is how the host callback finds the
//! instance a request belongs to. All mutable data sits in
//! [`InstanceState`] behind a reentrant lock: a plug-in calling back while
//! the host is inside one of its functions re-enters on the same thread,
//! while a second thread (an editor loop, for instance) has to wait.

use std::cell::RefCell;
use std::mem;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use vst2_sys::{effect_flags, AEffect, VstEvents, VstTimeInfo};

use crate::buffers::ChannelPointers;
use crate::editor::EditorWindow;
use crate::events::{self, IncomingEvent, MidiMessage};
use crate::listener::{HostListener, IoConfiguration};
use crate::registry::{InstanceId, RegistryInner};
use crate::time_info::{fill_time_info, TimeQuery, Transport};

pub(crate) type StateGuard<'a> = ReentrantMutexGuard<'a, RefCell<InstanceState>>;

pub(crate) struct InstanceState {
    pub listener: Option<Weak<dyn HostListener>>,
    pub sample_rate: f32,
    pub block_size: i32,
    pub transport: Transport,
    pub transport_changed: bool,
    pub channels: ChannelPointers,
    /// Boxed so the address handed to the plug-in never moves.
    pub time_info: Box<VstTimeInfo>,
    pub in_process: bool,
    pub pending_io_change: bool,
    pub resumed: bool,
    pub processing: bool,
    pub editor: Option<Arc<dyn EditorWindow>>,
    /// Queued messages with their offset into the next block.
    pub midi_queue: Vec<(u32, MidiMessage)>,
}

impl InstanceState {
    fn new(tempo: f64, channels: ChannelPointers) -> Self {
        Self {
            listener: None,
            sample_rate: 0.0,
            block_size: 0,
            transport: Transport::new(tempo),
            transport_changed: false,
            channels,
            time_info: Box::default(),
            in_process: false,
            pending_io_change: false,
            resumed: false,
            processing: false,
            editor: None,
            midi_queue: Vec::new(),
        }
    }

    pub fn listener(&self) -> Option<Arc<dyn HostListener>> {
        self.listener.as_ref().and_then(Weak::upgrade)
    }

    pub fn set_playing(&mut self, playing: bool) {
        if self.transport.playing != playing {
            self.transport.playing = playing;
            self.transport_changed = true;
        }
    }
}

pub(crate) struct InstanceShared {
    pub id: InstanceId,
    pub registry: Arc<RegistryInner>,
    effect: *mut AEffect,
    pub state: ReentrantMutex<RefCell<InstanceState>>,
}

// `effect` stays valid until the plug-in is closed, which happens strictly
// before the last reference to this value goes away.
unsafe impl Send for InstanceShared {}
unsafe impl Sync for InstanceShared {}

impl InstanceShared {
    /// # Safety
    /// `effect` must point to an opened plug-in that outlives the value.
    pub unsafe fn new(id: InstanceId, registry: Arc<RegistryInner>, effect: *mut AEffect) -> Self {
        let tempo = registry.config().default_tempo;
        let channels = channel_layout(effect);
        Self {
            id,
            registry,
            effect,
            state: ReentrantMutex::new(RefCell::new(InstanceState::new(tempo, channels))),
        }
    }

    pub fn effect(&self) -> *mut AEffect {
        self.effect
    }

    pub fn lock(&self) -> StateGuard<'_> {
        self.state.lock()
    }

    /// Resolves the instance attached to `effect`, if any.
    ///
    /// # Safety
    /// `effect` must be null or point to a live descriptor whose `resvd1` is
    /// either zero or was set by [`InstanceShared::attach`].
    pub unsafe fn from_effect<'a>(effect: *mut AEffect) -> Option<&'a InstanceShared> {
        if effect.is_null() {
            return None;
        }
        let slot = (*effect).resvd1;
        if slot == 0 {
            return None;
        }
        Some(&*(slot as *const InstanceShared))
    }

    /// Publishes this instance through the descriptor's host slot.
    ///
    /// # Safety
    /// The caller must keep `self` alive for as long as the plug-in can
    /// call back.
    pub unsafe fn attach(self: &Arc<Self>) {
        (*self.effect).resvd1 = Arc::as_ptr(self) as isize;
    }

    pub fn listener(&self) -> Option<Arc<dyn HostListener>> {
        let guard = self.lock();
        let listener = guard.borrow().listener();
        listener
    }

    pub fn io_configuration(&self) -> IoConfiguration {
        // SAFETY: the descriptor is live for the lifetime of `self`.
        let effect = unsafe { &*self.effect };
        IoConfiguration {
            num_inputs: effect.num_inputs,
            num_outputs: effect.num_outputs,
            initial_delay: effect.initial_delay,
            num_params: effect.num_params,
        }
    }

    /// Refreshes the reusable time info for `request` and returns its address.
    pub fn time_info(&self, request: i32) -> *mut VstTimeInfo {
        let guard = self.lock();
        let mut state = guard.borrow_mut();
        let query = TimeQuery {
            transport: state.transport,
            sample_rate: f64::from(state.sample_rate),
            transport_changed: mem::take(&mut state.transport_changed),
            system_nanos: system_nanos(),
        };
        fill_time_info(&mut state.time_info, &query, request);
        &mut *state.time_info as *mut VstTimeInfo
    }

    /// Forwards events the plug-in sent upward. Returns 1 when someone
    /// was listening.
    ///
    /// # Safety
    /// `events` must be null or a valid `VstEvents` list.
    pub unsafe fn forward_events(&self, events: *const VstEvents) -> isize {
        let Some(listener) = self.listener() else {
            return 0;
        };
        events::for_each_event(events, |event| match event {
            IncomingEvent::Midi(midi) => listener.midi_received(midi),
            IncomingEvent::SysEx(dump) => listener.sysex_received(dump),
        });
        1
    }

    /// Handles `audioMasterIOChanged`.
    ///
    /// While a process call is running the arrays it bound are still in
    /// use, so the change is only recorded and applied once that call
    /// returns.
    pub fn io_changed(&self) -> isize {
        let guard = self.lock();
        {
            let mut state = guard.borrow_mut();
            if state.in_process {
                state.pending_io_change = true;
                tracing::debug!(instance = self.id.0, "deferring io change until process returns");
                return 1;
            }
        }
        self.apply_io_change(&guard);
        1
    }

    /// Reallocates the channel arrays for the current layout, then notifies
    /// the listener. Runs under the instance lock.
    pub fn apply_io_change(&self, guard: &StateGuard<'_>) {
        let config = self.io_configuration();
        let listener = {
            let mut state = guard.borrow_mut();
            state.pending_io_change = false;
            // SAFETY: the descriptor is live for the lifetime of `self`.
            state.channels = unsafe { channel_layout(self.effect) };
            state.listener()
        };
        tracing::debug!(
            instance = self.id.0,
            inputs = config.num_inputs,
            outputs = config.num_outputs,
            delay = config.initial_delay,
            "plugin io configuration changed"
        );
        if let Some(listener) = listener {
            listener.io_changed(config);
        }
    }

    /// Handles `audioMasterSizeWindow`.
    pub fn resize_editor(&self, width: i32, height: i32) -> bool {
        let guard = self.lock();
        let editor = guard.borrow().editor.clone();
        match editor {
            Some(window) if width > 0 && height > 0 => window.resize(width as u32, height as u32),
            _ => false,
        }
    }
}

/// Pointer arrays matching the descriptor's current layout.
///
/// # Safety
/// `effect` must point to a live descriptor.
unsafe fn channel_layout(effect: *const AEffect) -> ChannelPointers {
    let effect = &*effect;
    ChannelPointers::allocate(
        effect.num_inputs.max(0) as usize,
        effect.num_outputs.max(0) as usize,
        effect.flags & effect_flags::CAN_DOUBLE_REPLACING != 0,
    )
}

fn system_nanos() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as f64)
        .unwrap_or(0.0)
}
