use crate::core::Core;
use bedrock::logging::{self, Logger};
use hashbrown::HashMap;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub type ComponentUid = u64;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SemanticVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl SemanticVersion {
    pub const fn new(major: u16, minor: u16, patch: u16) -> SemanticVersion {
        SemanticVersion { major, minor, patch }
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A server-side feature module. Components are registered by the runner
/// manifest, instantiated exactly once, and wired into the event and
/// extension fabric during the load sequence:
///
/// 1. `on_load` for every component, in registration order;
/// 2. `on_init` once all components exist (cross-component lookups);
/// 3. `on_ready` after the server is live.
pub trait Component: Any {
    fn uid(&self) -> ComponentUid;
    fn name(&self) -> &'static str;
    fn version(&self) -> SemanticVersion;

    /// Hands the shared handle back as `Any` for typed lookups.
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;

    fn on_load(&self, _core: &Rc<Core>) {}
    fn on_init(&self, _components: &ComponentList) {}
    fn on_ready(&self) {}

    /// Another component is being removed; drop any handles to it.
    fn on_free(&self, _uid: ComponentUid) {}

    /// Full mode restart: drop all entities, keep configuration.
    fn reset(&self) {}

    /// Final teardown before the component is dropped.
    fn free(&self) {}
}

/// Compile-time binding of a component type to its uid, for typed queries.
pub trait ComponentInfo: Component {
    const UID: ComponentUid;
}

/// Registration-ordered component table.
pub struct ComponentList {
    entries: RefCell<Vec<Rc<dyn Component>>>,
    by_uid: RefCell<HashMap<ComponentUid, usize>>,
    log: Logger,
}

impl ComponentList {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(log: L) -> ComponentList {
        ComponentList {
            entries: RefCell::new(Vec::new()),
            by_uid: RefCell::new(HashMap::new()),
            log: logging::child_or_discard(log),
        }
    }

    /// Adds a component. A duplicate uid is a deployment mistake: the
    /// newcomer is rejected and the server keeps running without it.
    pub fn register(&self, component: Rc<dyn Component>) -> bool {
        let uid = component.uid();
        let mut by_uid = self.by_uid.borrow_mut();
        if by_uid.contains_key(&uid) {
            logging::error!(self.log, "duplicate component uid, skipping";
                            "name" => component.name(),
                            "uid" => format!("{:#018x}", uid));
            return false;
        }

        logging::info!(self.log, "component registered";
                       "name" => component.name(),
                       "version" => %component.version());
        let mut entries = self.entries.borrow_mut();
        by_uid.insert(uid, entries.len());
        entries.push(component);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    fn snapshot(&self) -> Vec<Rc<dyn Component>> {
        self.entries.borrow().clone()
    }

    pub fn by_uid(&self, uid: ComponentUid) -> Option<Rc<dyn Component>> {
        let by_uid = self.by_uid.borrow();
        let index = *by_uid.get(&uid)?;
        self.entries.borrow().get(index).cloned()
    }

    /// Typed lookup by the component's compile-time uid.
    pub fn query<C: ComponentInfo>(&self) -> Option<Rc<C>> {
        let component = self.by_uid(C::UID)?;
        component.into_any().downcast::<C>().ok()
    }

    /// Runs the load sequence against the core.
    pub fn load_all(&self, core: &Rc<Core>) {
        for component in self.snapshot() {
            logging::debug!(self.log, "loading component"; "name" => component.name());
            component.on_load(core);
        }
        for component in self.snapshot() {
            component.on_init(self);
        }
    }

    pub fn ready_all(&self) {
        for component in self.snapshot() {
            component.on_ready();
        }
    }

    pub fn reset_all(&self) {
        for component in self.snapshot() {
            component.reset();
        }
    }

    /// Removes one component: everyone else gets `on_free` so stale
    /// handles drop, then the component itself is torn down.
    pub fn remove(&self, uid: ComponentUid) -> bool {
        let index = match self.by_uid.borrow_mut().remove(&uid) {
            Some(index) => index,
            None => return false,
        };

        let component = self.entries.borrow_mut().remove(index);

        // Re-index everything after the removed slot.
        {
            let entries = self.entries.borrow();
            let mut by_uid = self.by_uid.borrow_mut();
            for (new_index, entry) in entries.iter().enumerate() {
                by_uid.insert(entry.uid(), new_index);
            }
        }

        for other in self.snapshot() {
            other.on_free(uid);
        }
        component.free();
        true
    }

    pub fn free_all(&self) {
        let components = self.snapshot();
        self.entries.borrow_mut().clear();
        self.by_uid.borrow_mut().clear();
        for component in components {
            component.free();
        }
    }
}
