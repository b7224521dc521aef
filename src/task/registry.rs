use crate::compress::Compressor;
use crate::partition::Partitioner;
use crate::partition::Planner;
use crate::scheduler::Scheduler;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

/// the shared components a task run wires together. schedulers are
/// registered once; partitioner, planner and compressor may be replaced.
#[derive(Clone)]
pub enum Component {
    Scheduler(Arc<Scheduler>),
    Partitioner(Arc<Mutex<Partitioner>>),
    Planner(Arc<Planner>),
    Compressor(Arc<dyn Compressor>),
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Component::Scheduler(_) => "scheduler",
            Component::Partitioner(_) => "partitioner",
            Component::Planner(_) => "planner",
            Component::Compressor(_) => "compressor",
        };
        write!(f, "Component({})", name)
    }
}

type Listener = Box<dyn Fn(&Component) + Send + Sync>;

/// one-time-or-replace component store with synchronous registration
/// listeners. listeners must be non-blocking.
#[derive(Default)]
pub struct ComponentRegistry {
    components: Mutex<BTreeMap<String, Component>>,
    listeners: Mutex<BTreeMap<String, Vec<Listener>>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// returns false when the name is taken and replace is off
    pub fn register(&self, name: &str, component: Component, replace: bool) -> bool {
        {
            let mut components = self.components.lock().expect("registry lock");
            if components.contains_key(name) && !replace {
                log::error!("component '{}' already registered", name);
                return false;
            }
            if components.contains_key(name) {
                log::warn!("replacing existing component '{}'", name);
            }
            components.insert(name.to_string(), component.clone());
        }
        log::info!("registered component '{}': {:?}", name, component);
        self.notify(name, &component);
        true
    }

    pub fn get(&self, name: &str) -> Option<Component> {
        self.components
            .lock()
            .expect("registry lock")
            .get(name)
            .cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.components
            .lock()
            .expect("registry lock")
            .contains_key(name)
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self
            .components
            .lock()
            .expect("registry lock")
            .remove(name)
            .is_some();
        if removed {
            log::info!("unregistered component '{}'", name);
        }
        removed
    }

    pub fn add_listener(&self, name: &str, listener: Listener) {
        self.listeners
            .lock()
            .expect("registry lock")
            .entry(name.to_string())
            .or_default()
            .push(listener);
    }

    fn notify(&self, name: &str, component: &Component) {
        let listeners = self.listeners.lock().expect("registry lock");
        if let Some(callbacks) = listeners.get(name) {
            for callback in callbacks {
                callback(component);
            }
        }
    }
}
