use hashbrown::HashMap;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Identifies an extension type. Values are component-chosen 64-bit
/// constants, stable across builds and unique per extension kind.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct ExtensionId(pub u64);

impl fmt::Debug for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ExtensionId({:#018x})", self.0)
    }
}

/// State a component hangs off an entity it does not own. The host treats
/// extensions as opaque; only the owning component reads their contents.
/// Storage is shared (`Rc`), so freeing happens when the last handle drops.
pub trait Extension: Any {
    /// Hands the shared handle back as `Any` for typed downcasts.
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;

    /// Invoked on owner respawn. Wipes per-round state, keeps identity.
    fn reset(&self) {}
}

/// Compile-time binding of an extension type to its id.
pub trait ExtensionInfo: Extension {
    const EXTENSION_ID: ExtensionId;
}

/// Per-entity table of extensions keyed by [`ExtensionId`].
#[derive(Default)]
pub struct Extensions {
    table: RefCell<HashMap<u64, Rc<dyn Extension>>>,
}

impl Extensions {
    pub fn new() -> Extensions {
        Extensions {
            table: RefCell::new(HashMap::new()),
        }
    }

    /// Inserts under the type's own id. Fails when the key is taken.
    pub fn add<E: ExtensionInfo>(&self, ext: Rc<E>) -> bool {
        self.add_raw(E::EXTENSION_ID, ext)
    }

    /// Inserts under an explicit id. Fails when the key is taken.
    pub fn add_raw(&self, id: ExtensionId, ext: Rc<dyn Extension>) -> bool {
        let mut table = self.table.borrow_mut();
        if table.contains_key(&id.0) {
            return false;
        }
        table.insert(id.0, ext);
        true
    }

    /// Typed lookup by the extension's registered id.
    pub fn query<E: ExtensionInfo>(&self) -> Option<Rc<E>> {
        let ext = self.table.borrow().get(&E::EXTENSION_ID.0)?.clone();
        ext.into_any().downcast::<E>().ok()
    }

    pub fn contains(&self, id: ExtensionId) -> bool {
        self.table.borrow().contains_key(&id.0)
    }

    pub fn remove(&self, id: ExtensionId) -> bool {
        self.table.borrow_mut().remove(&id.0).is_some()
    }

    pub fn len(&self) -> usize {
        self.table.borrow().len()
    }

    /// Calls `reset` on every extension (player respawn).
    pub fn reset_all(&self) {
        let snapshot: Vec<Rc<dyn Extension>> = self.table.borrow().values().cloned().collect();
        for ext in snapshot {
            ext.reset();
        }
    }

    /// Drops every extension (entity destruction).
    pub fn clear(&self) {
        self.table.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Tally {
        value: Cell<i32>,
    }

    impl Extension for Tally {
        fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
            self
        }

        fn reset(&self) {
            self.value.set(0);
        }
    }

    impl ExtensionInfo for Tally {
        const EXTENSION_ID: ExtensionId = ExtensionId(0x1111_2222_3333_4444);
    }

    struct Marker;

    impl Extension for Marker {
        fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
            self
        }
    }

    impl ExtensionInfo for Marker {
        const EXTENSION_ID: ExtensionId = ExtensionId(0x5555_6666_7777_8888);
    }

    #[test]
    fn test_add_and_query() {
        let extensions = Extensions::new();
        assert!(extensions.add(Rc::new(Tally { value: Cell::new(3) })));
        assert!(extensions.add(Rc::new(Marker)));

        let tally = extensions.query::<Tally>().unwrap();
        assert_eq!(tally.value.get(), 3);
        assert!(extensions.query::<Marker>().is_some());
    }

    #[test]
    fn test_duplicate_key_refused() {
        let extensions = Extensions::new();
        assert!(extensions.add(Rc::new(Tally { value: Cell::new(0) })));
        assert!(!extensions.add(Rc::new(Tally { value: Cell::new(9) })));

        let tally = extensions.query::<Tally>().unwrap();
        assert_eq!(tally.value.get(), 0);
    }

    #[test]
    fn test_missing_key() {
        let extensions = Extensions::new();
        extensions.add(Rc::new(Marker));
        assert!(extensions.query::<Tally>().is_none());
    }

    #[test]
    fn test_reset_all() {
        let extensions = Extensions::new();
        extensions.add(Rc::new(Tally { value: Cell::new(42) }));
        extensions.reset_all();
        assert_eq!(extensions.query::<Tally>().unwrap().value.get(), 0);
    }

    #[test]
    fn test_identity_survives_reset() {
        let extensions = Extensions::new();
        extensions.add(Rc::new(Tally { value: Cell::new(1) }));
        let before = extensions.query::<Tally>().unwrap();
        extensions.reset_all();
        let after = extensions.query::<Tally>().unwrap();
        assert!(Rc::ptr_eq(&before, &after));
    }
}
