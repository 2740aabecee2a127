use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use vst2_sys::PluginMainProc;

use crate::config::HostConfig;
use crate::error::{HostError, LoadError};
use crate::instance::Vst2Plugin;
use crate::state::InstanceShared;

/// Identifier of a plug-in instance within its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl InstanceId {
    fn next(counter: &AtomicU64) -> Self {
        InstanceId(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Host-wide state shared by every plug-in loaded through one registry.
///
/// The registry owns the host identity answered to plug-ins and keeps track
/// of live instances. Each instance holds a reference to it, so callbacks
/// can always reach the configuration through the instance they belong to.
#[derive(Clone)]
pub struct HostRegistry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    config: HostConfig,
    next_id: AtomicU64,
    instances: Mutex<HashMap<InstanceId, Weak<InstanceShared>>>,
}

impl RegistryInner {
    pub(crate) fn config(&self) -> &HostConfig {
        &self.config
    }

    pub(crate) fn allocate_id(&self) -> InstanceId {
        InstanceId::next(&self.next_id)
    }

    pub(crate) fn register(&self, shared: &Arc<InstanceShared>) {
        self.instances.lock().insert(shared.id, Arc::downgrade(shared));
    }

    pub(crate) fn unregister(&self, id: InstanceId) {
        self.instances.lock().remove(&id);
    }
}

impl HostRegistry {
    pub fn new(config: HostConfig) -> Self {
        tracing::debug!(vendor = %config.vendor, product = %config.product, "host registry created");
        Self {
            inner: Arc::new(RegistryInner {
                config,
                next_id: AtomicU64::new(0),
                instances: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    /// Loads and opens the plug-in stored at `path`.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Vst2Plugin, LoadError> {
        Vst2Plugin::load(self, path)
    }

    /// Instantiates a plug-in whose entry point is already linked in.
    ///
    /// # Safety
    /// `entry` must behave like a VST 2.x `VSTPluginMain`.
    pub unsafe fn instantiate(&self, entry: PluginMainProc) -> Result<Vst2Plugin, LoadError> {
        Vst2Plugin::from_entry_point(self, entry)
    }

    /// Number of instances loaded through this registry that are still alive.
    pub fn live_instances(&self) -> usize {
        self.inner
            .instances
            .lock()
            .values()
            .filter(|instance| instance.strong_count() > 0)
            .count()
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<_> = self.inner.instances.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Tears the registry down. Fails while plug-ins loaded through it are
    /// still alive; they keep the shared state around until unloaded.
    pub fn shutdown(self) -> Result<(), HostError> {
        let live = self.live_instances();
        if live > 0 {
            tracing::warn!(live, "host registry shut down with live plugins");
            return Err(HostError::InvalidState(format!(
                "{live} plugin instance(s) still loaded"
            )));
        }
        tracing::debug!("host registry shut down");
        Ok(())
    }

    pub(crate) fn inner(&self) -> &Arc<RegistryInner> {
        &self.inner
    }
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}

impl std::fmt::Debug for HostRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRegistry")
            .field("vendor", &self.inner.config.vendor)
            .field("live_instances", &self.live_instances())
            .finish()
    }
}

thread_local! {
    static INSTANTIATING: RefCell<Option<Arc<RegistryInner>>> = const { RefCell::new(None) };
}

/// Marks the current thread as instantiating a plug-in for `registry`.
///
/// Plug-ins call back while their entry point runs, before the host had a
/// chance to attach instance state. Those callbacks find the registry here.
pub(crate) struct InstantiationScope {
    previous: Option<Arc<RegistryInner>>,
}

impl InstantiationScope {
    pub(crate) fn enter(registry: &Arc<RegistryInner>) -> Self {
        let previous = INSTANTIATING.with(|slot| slot.borrow_mut().replace(Arc::clone(registry)));
        Self { previous }
    }
}

impl Drop for InstantiationScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        INSTANTIATING.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Registry of the instantiation in progress on this thread, if any.
pub(crate) fn instantiating_registry() -> Option<Arc<RegistryInner>> {
    INSTANTIATING.with(|slot| slot.borrow().clone())
}
