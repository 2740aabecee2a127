use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use raw_window_handle::RawWindowHandle;
use vst2_sys::{effect_opcode as eff, ERect};

use crate::error::HostError;
use crate::instance::Vst2Plugin;

/// Smallest editor size handed to a window, whatever the plug-in reports.
pub const MIN_EDITOR_SIZE: u32 = 100;

/// Default idle period of [`HeadlessWindow`].
pub const IDLE_TICK: Duration = Duration::from_millis(25);

/// Platform window an editor is embedded into.
///
/// `run` blocks in the window's event loop and calls `idle` periodically
/// until the window closes. Every other method may be called from any
/// thread while `run` is active.
pub trait EditorWindow: Send + Sync {
    /// Native parent the plug-in attaches its view to. `None` opens the
    /// editor without a parent.
    fn parent_handle(&self) -> Option<RawWindowHandle>;
    fn set_title(&self, title: &str);
    /// Returns whether the window actually changed size.
    fn resize(&self, width: u32, height: u32) -> bool;
    fn run(&self, idle: &mut dyn FnMut());
    fn request_close(&self);
}

/// Commands sent to a running window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorCommand {
    Close,
    RequestResize { width: u32, height: u32 },
}

/// Events reported by a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    Opened,
    Resized { width: u32, height: u32 },
    Closed,
}

/// Cloneable receiving end shared by several observers.
#[derive(Debug, Clone)]
pub struct SharedReceiver<T> {
    inner: Arc<Mutex<Receiver<T>>>,
}

impl<T> SharedReceiver<T> {
    pub fn new(rx: Receiver<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rx)),
        }
    }

    pub fn try_recv(&self) -> Option<T> {
        self.inner.lock().try_recv().ok()
    }

    pub fn drain(&self) -> Vec<T> {
        let guard = self.inner.lock();
        let mut events = Vec::new();
        while let Ok(event) = guard.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Window without any native surface. The loop is a timer driven by a
/// command channel, which is enough for plug-ins that draw nothing and for
/// exercising the editor lifecycle.
pub struct HeadlessWindow {
    commands: Sender<EditorCommand>,
    command_rx: Receiver<EditorCommand>,
    events: Sender<EditorEvent>,
    event_rx: SharedReceiver<EditorEvent>,
    tick: Duration,
    max_ticks: Option<usize>,
    title: Mutex<String>,
    size: Mutex<Option<(u32, u32)>>,
}

impl HeadlessWindow {
    pub fn new() -> Self {
        let (commands, command_rx) = unbounded();
        let (events, event_rx) = unbounded();
        Self {
            commands,
            command_rx,
            events,
            event_rx: SharedReceiver::new(event_rx),
            tick: IDLE_TICK,
            max_ticks: None,
            title: Mutex::new(String::new()),
            size: Mutex::new(None),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Closes the window on its own after `ticks` idle calls.
    pub fn close_after(mut self, ticks: usize) -> Self {
        self.max_ticks = Some(ticks);
        self
    }

    pub fn commands(&self) -> Sender<EditorCommand> {
        self.commands.clone()
    }

    pub fn events(&self) -> SharedReceiver<EditorEvent> {
        self.event_rx.clone()
    }

    pub fn title(&self) -> String {
        self.title.lock().clone()
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        *self.size.lock()
    }

    fn apply_size(&self, width: u32, height: u32) -> bool {
        let mut size = self.size.lock();
        if *size == Some((width, height)) {
            return false;
        }
        *size = Some((width, height));
        let _ = self.events.send(EditorEvent::Resized { width, height });
        true
    }
}

impl Default for HeadlessWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl EditorWindow for HeadlessWindow {
    fn parent_handle(&self) -> Option<RawWindowHandle> {
        None
    }

    fn set_title(&self, title: &str) {
        *self.title.lock() = title.to_owned();
    }

    fn resize(&self, width: u32, height: u32) -> bool {
        self.apply_size(width, height)
    }

    fn run(&self, idle: &mut dyn FnMut()) {
        let _ = self.events.send(EditorEvent::Opened);
        let mut ticks = 0usize;
        loop {
            if self.max_ticks.is_some_and(|max| ticks >= max) {
                break;
            }
            idle();
            ticks += 1;
            match self.command_rx.recv_timeout(self.tick) {
                Ok(EditorCommand::Close) => break,
                Ok(EditorCommand::RequestResize { width, height }) => {
                    self.apply_size(width, height);
                }
                Err(RecvTimeoutError::Timeout) => {}
                // Unreachable while `self` holds a sender.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        let _ = self.events.send(EditorEvent::Closed);
    }

    fn request_close(&self) {
        let _ = self.commands.send(EditorCommand::Close);
    }
}

/// Native pointer a VST2 editor expects as its parent.
pub fn native_parent(handle: RawWindowHandle) -> Result<*mut c_void, HostError> {
    match handle {
        RawWindowHandle::Win32(handle) => Ok(handle.hwnd.get() as *mut c_void),
        RawWindowHandle::AppKit(handle) => Ok(handle.ns_view.as_ptr()),
        RawWindowHandle::Xlib(handle) => Ok(handle.window as *mut c_void),
        RawWindowHandle::Xcb(handle) => Ok(handle.window.get() as usize as *mut c_void),
        other => Err(HostError::Editor(format!("unsupported parent window {other:?}"))),
    }
}

impl Vst2Plugin {
    /// Opens the plug-in editor inside `window` and blocks until it closes.
    ///
    /// The instance lock is not held while the window loop runs, so audio
    /// processing continues on other threads. Each idle tick takes it
    /// briefly.
    pub fn open_editor(&self, title: &str, window: Arc<dyn EditorWindow>) -> Result<(), HostError> {
        if !self.has_editor() {
            return Err(HostError::Unsupported("plugin has no editor".into()));
        }
        let parent = match window.parent_handle() {
            Some(handle) => native_parent(handle)?,
            None => ptr::null_mut(),
        };
        {
            let guard = self.lock();
            let mut state = guard.borrow_mut();
            if state.editor.is_some() {
                return Err(HostError::InvalidState("editor is already open".into()));
            }
            state.editor = Some(Arc::clone(&window));
        }

        let (width, height) = self.editor_rect().unwrap_or((0, 0));
        window.resize(width.max(MIN_EDITOR_SIZE), height.max(MIN_EDITOR_SIZE));
        window.set_title(title);

        if self.dispatch(eff::EDIT_OPEN, 0, 0, parent, 0.0) == 0 {
            tracing::debug!(instance = self.id().0, "effEditOpen returned 0");
        }
        // Some plug-ins only know their size once the view exists.
        if let Some((width, height)) = self.editor_rect() {
            window.resize(width.max(MIN_EDITOR_SIZE), height.max(MIN_EDITOR_SIZE));
        }
        tracing::debug!(instance = self.id().0, title, "editor opened");

        window.run(&mut || self.edit_idle());

        self.dispatch(eff::EDIT_CLOSE, 0, 0, ptr::null_mut(), 0.0);
        self.lock().borrow_mut().editor = None;
        tracing::debug!(instance = self.id().0, "editor closed");
        Ok(())
    }

    /// Asks the open editor window, if any, to close.
    pub fn close_editor(&self) {
        let editor = self.lock().borrow().editor.clone();
        if let Some(window) = editor {
            window.request_close();
        }
    }

    pub fn is_editor_open(&self) -> bool {
        self.lock().borrow().editor.is_some()
    }

    /// `effEditIdle`.
    pub fn edit_idle(&self) {
        self.dispatch(eff::EDIT_IDLE, 0, 0, ptr::null_mut(), 0.0);
    }

    /// Editor size reported by `effEditGetRect`.
    pub fn editor_rect(&self) -> Option<(u32, u32)> {
        let mut rect: *mut ERect = ptr::null_mut();
        let _guard = self.lock();
        // SAFETY: the plug-in is open and the lock is held.
        unsafe {
            crate::instance::raw_dispatch(self.effect(), eff::EDIT_GET_RECT, 0, 0, ptr::addr_of_mut!(rect).cast(), 0.0);
        }
        if rect.is_null() {
            return None;
        }
        // SAFETY: the rect is plug-in owned and only valid until its next
        // call, so it is copied before the lock is released.
        let rect = unsafe { *rect };
        let width = i32::from(rect.right) - i32::from(rect.left);
        let height = i32::from(rect.bottom) - i32::from(rect.top);
        (width > 0 && height > 0).then_some((width as u32, height as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn headless_window_stops_after_tick_limit() {
        let window = HeadlessWindow::new().with_tick(Duration::from_millis(1)).close_after(3);
        let calls = AtomicUsize::new(0);
        window.run(&mut || {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(window.events().drain(), vec![EditorEvent::Opened, EditorEvent::Closed]);
    }

    #[test]
    fn close_request_ends_the_loop() {
        let window = HeadlessWindow::new().with_tick(Duration::from_millis(1));
        window.request_close();
        let mut calls = 0;
        window.run(&mut || calls += 1);
        assert_eq!(calls, 1);
    }

    #[test]
    fn resize_reports_only_real_changes() {
        let window = HeadlessWindow::new();
        assert!(window.resize(300, 200));
        assert!(!window.resize(300, 200));
        assert_eq!(window.size(), Some((300, 200)));
        assert_eq!(window.events().drain(), vec![EditorEvent::Resized { width: 300, height: 200 }]);
    }

    #[test]
    fn title_is_recorded() {
        let window = HeadlessWindow::new();
        window.set_title("Test Synth");
        assert_eq!(window.title(), "Test Synth");
    }

    #[test]
    fn unsupported_parent_is_rejected() {
        let handle = raw_window_handle::WebWindowHandle::new(1);
        assert!(matches!(native_parent(RawWindowHandle::Web(handle)), Err(HostError::Editor(_))));
    }
}
