use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Insertion-ordered registry of event handlers.
///
/// Handlers are held weakly; the owning component controls their lifetime.
/// Dispatch walks a snapshot of the list, so handlers may add or remove
/// registrations (including their own) mid-dispatch and the change takes
/// effect from the next dispatch onwards.
pub struct EventDispatcher<H: ?Sized> {
    handlers: RefCell<Vec<Weak<H>>>,
}

impl<H: ?Sized> EventDispatcher<H> {
    pub fn new() -> EventDispatcher<H> {
        EventDispatcher {
            handlers: RefCell::new(Vec::new()),
        }
    }

    /// Registers a handler. Duplicate registrations are refused.
    pub fn add(&self, handler: &Rc<H>) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        handlers.retain(|weak| weak.strong_count() > 0);

        let present = handlers
            .iter()
            .filter_map(|weak| weak.upgrade())
            .any(|existing| Rc::ptr_eq(&existing, handler));
        if present {
            return false;
        }

        handlers.push(Rc::downgrade(handler));
        true
    }

    /// Removes a handler registration.
    pub fn remove(&self, handler: &Rc<H>) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|weak| match weak.upgrade() {
            Some(existing) => !Rc::ptr_eq(&existing, handler),
            None => false,
        });
        before != handlers.len()
    }

    /// Number of live registrations.
    pub fn count(&self) -> usize {
        self.handlers
            .borrow()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    fn snapshot(&self) -> Vec<Rc<H>> {
        self.handlers
            .borrow()
            .iter()
            .filter_map(|weak| weak.upgrade())
            .collect()
    }

    /// Invokes every handler; return values are ignored.
    pub fn dispatch<F: FnMut(&H)>(&self, mut f: F) {
        for handler in self.snapshot() {
            f(&handler);
        }
    }

    /// Invokes handlers in order until one returns `false` (veto). Returns
    /// `true` when every handler agreed or the list was empty.
    pub fn stop_at_false<F: FnMut(&H) -> bool>(&self, mut f: F) -> bool {
        for handler in self.snapshot() {
            if !f(&handler) {
                return false;
            }
        }
        true
    }

    /// Invokes handlers in order until one returns `true` (consumed).
    /// Returns `false` when no handler claimed the event.
    pub fn stop_at_true<F: FnMut(&H) -> bool>(&self, mut f: F) -> bool {
        for handler in self.snapshot() {
            if f(&handler) {
                return true;
            }
        }
        false
    }
}

impl<H: ?Sized> Default for EventDispatcher<H> {
    fn default() -> EventDispatcher<H> {
        EventDispatcher::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    trait Probe {
        fn poke(&self) -> bool;
    }

    struct Counter {
        hits: Cell<u32>,
        answer: bool,
    }

    impl Probe for Counter {
        fn poke(&self) -> bool {
            self.hits.set(self.hits.get() + 1);
            self.answer
        }
    }

    fn counter(answer: bool) -> Rc<Counter> {
        Rc::new(Counter {
            hits: Cell::new(0),
            answer,
        })
    }

    #[test]
    fn test_dispatch_order_and_dedup() {
        let dispatcher: EventDispatcher<dyn Probe> = EventDispatcher::new();
        let a = counter(true);
        let b = counter(true);

        let a_dyn: Rc<dyn Probe> = a.clone();
        let b_dyn: Rc<dyn Probe> = b.clone();
        assert!(dispatcher.add(&a_dyn));
        assert!(dispatcher.add(&b_dyn));
        assert!(!dispatcher.add(&a_dyn));
        assert_eq!(dispatcher.count(), 2);

        dispatcher.dispatch(|h| {
            h.poke();
        });
        assert_eq!(a.hits.get(), 1);
        assert_eq!(b.hits.get(), 1);
    }

    #[test]
    fn test_stop_at_false() {
        let dispatcher: EventDispatcher<dyn Probe> = EventDispatcher::new();
        let first = counter(true);
        let veto = counter(false);
        let last = counter(true);

        for handler in [
            first.clone() as Rc<dyn Probe>,
            veto.clone() as Rc<dyn Probe>,
            last.clone() as Rc<dyn Probe>,
        ]
        .iter()
        {
            dispatcher.add(handler);
        }

        assert!(!dispatcher.stop_at_false(|h| h.poke()));
        assert_eq!(first.hits.get(), 1);
        assert_eq!(veto.hits.get(), 1);
        assert_eq!(last.hits.get(), 0);
    }

    #[test]
    fn test_stop_at_true() {
        let dispatcher: EventDispatcher<dyn Probe> = EventDispatcher::new();
        let miss = counter(false);
        let hit = counter(true);
        let never = counter(true);

        for handler in [
            miss.clone() as Rc<dyn Probe>,
            hit.clone() as Rc<dyn Probe>,
            never.clone() as Rc<dyn Probe>,
        ]
        .iter()
        {
            dispatcher.add(handler);
        }

        assert!(dispatcher.stop_at_true(|h| h.poke()));
        assert_eq!(never.hits.get(), 0);
    }

    #[test]
    fn test_empty_semantics() {
        let dispatcher: EventDispatcher<dyn Probe> = EventDispatcher::new();
        assert!(dispatcher.stop_at_false(|h| h.poke()));
        assert!(!dispatcher.stop_at_true(|h| h.poke()));
    }

    #[test]
    fn test_dropped_handler_pruned() {
        let dispatcher: EventDispatcher<dyn Probe> = EventDispatcher::new();
        let keep = counter(true);
        let keep_dyn: Rc<dyn Probe> = keep.clone();
        dispatcher.add(&keep_dyn);

        {
            let transient = counter(true);
            let transient_dyn: Rc<dyn Probe> = transient.clone();
            dispatcher.add(&transient_dyn);
            assert_eq!(dispatcher.count(), 2);
        }

        assert_eq!(dispatcher.count(), 1);
        dispatcher.dispatch(|h| {
            h.poke();
        });
        assert_eq!(keep.hits.get(), 1);
    }

    #[test]
    fn test_remove_during_dispatch_takes_effect_next() {
        struct SelfRemover {
            dispatcher: Rc<EventDispatcher<dyn Probe>>,
            this: RefCell<Option<Rc<dyn Probe>>>,
            hits: Cell<u32>,
        }

        impl Probe for SelfRemover {
            fn poke(&self) -> bool {
                self.hits.set(self.hits.get() + 1);
                if let Some(this) = self.this.borrow().as_ref() {
                    self.dispatcher.remove(this);
                }
                true
            }
        }

        let dispatcher = Rc::new(EventDispatcher::new());
        let remover = Rc::new(SelfRemover {
            dispatcher: dispatcher.clone(),
            this: RefCell::new(None),
            hits: Cell::new(0),
        });
        let remover_dyn: Rc<dyn Probe> = remover.clone();
        *remover.this.borrow_mut() = Some(remover_dyn.clone());
        dispatcher.add(&remover_dyn);

        dispatcher.dispatch(|h| {
            h.poke();
        });
        dispatcher.dispatch(|h| {
            h.poke();
        });
        assert_eq!(remover.hits.get(), 1);
    }
}
