use crate::events::EventDispatcher;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Handlers observing allocation and destruction of pool slots.
pub trait PoolEventHandler<T> {
    fn on_created(&self, _id: usize, _entry: &Rc<T>) {}
    fn on_destroyed(&self, _id: usize, _entry: &Rc<T>) {}
}

struct Slot<T> {
    entry: Rc<T>,
    locks: Cell<u32>,
    doomed: Cell<bool>,
}

/// Fixed-capacity slot allocator handing out stable small integer ids.
///
/// Allocation always takes the lowest free index. A slot can be locked to
/// defer destruction: `release` on a locked slot only marks it doomed, and
/// the last `unlock` completes the removal. Doomed slots keep their id
/// reserved (no reuse) but are skipped by iteration.
pub struct Pool<T> {
    slots: RefCell<Vec<Option<Slot<T>>>>,
    count: Cell<usize>,
    events: EventDispatcher<dyn PoolEventHandler<T>>,
}

impl<T> Pool<T> {
    pub fn new(capacity: usize) -> Pool<T> {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Pool {
            slots: RefCell::new(slots),
            count: Cell::new(0),
            events: EventDispatcher::new(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Number of live (non-doomed) entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.count.get()
    }

    #[inline]
    pub fn events(&self) -> &EventDispatcher<dyn PoolEventHandler<T>> {
        &self.events
    }

    /// Constructs an entry in the lowest free slot, passing the assigned id
    /// to the constructor. Returns `None` when the pool is full.
    pub fn emplace_with<F: FnOnce(usize) -> T>(&self, ctor: F) -> Option<usize> {
        let id = {
            let slots = self.slots.borrow();
            slots.iter().position(|slot| slot.is_none())?
        };

        let entry = Rc::new(ctor(id));
        self.slots.borrow_mut()[id] = Some(Slot {
            entry: entry.clone(),
            locks: Cell::new(0),
            doomed: Cell::new(false),
        });
        self.count.set(self.count.get() + 1);

        self.events.dispatch(|handler| handler.on_created(id, &entry));
        Some(id)
    }

    /// Returns the entry handle. Doomed-but-locked slots still resolve so
    /// that handlers holding a release lock observe a live entity.
    #[inline]
    pub fn get(&self, id: usize) -> Option<Rc<T>> {
        let slots = self.slots.borrow();
        slots.get(id)?.as_ref().map(|slot| slot.entry.clone())
    }

    /// Whether the id currently resolves to a live, non-doomed entry.
    #[inline]
    pub fn is_live(&self, id: usize) -> bool {
        let slots = self.slots.borrow();
        match slots.get(id).and_then(|slot| slot.as_ref()) {
            Some(slot) => !slot.doomed.get(),
            None => false,
        }
    }

    /// Increments the release lock on a slot.
    pub fn lock(&self, id: usize) {
        let slots = self.slots.borrow();
        if let Some(slot) = slots.get(id).and_then(|slot| slot.as_ref()) {
            slot.locks.set(slot.locks.get() + 1);
        }
    }

    /// Decrements the release lock. Returns whether the slot is still alive
    /// afterwards; `false` means a deferred release just completed and the
    /// caller must not touch the entry again.
    pub fn unlock(&self, id: usize) -> bool {
        let destroy = {
            let slots = self.slots.borrow();
            match slots.get(id).and_then(|slot| slot.as_ref()) {
                Some(slot) => {
                    let locks = slot.locks.get().saturating_sub(1);
                    slot.locks.set(locks);
                    locks == 0 && slot.doomed.get()
                }
                None => return false,
            }
        };

        if destroy {
            self.destroy(id);
            return false;
        }
        true
    }

    /// Marks the slot for destruction. Destruction happens immediately when
    /// no release lock is held (or `force` is set), otherwise it is deferred
    /// to the last `unlock`. Returns whether the id referenced an entry.
    pub fn release(&self, id: usize, force: bool) -> bool {
        let destroy = {
            let slots = self.slots.borrow();
            match slots.get(id).and_then(|slot| slot.as_ref()) {
                Some(slot) => {
                    if slot.doomed.get() && !force {
                        return true;
                    }
                    slot.doomed.set(true);
                    slot.locks.get() == 0 || force
                }
                None => return false,
            }
        };

        if destroy {
            self.destroy(id);
        }
        true
    }

    /// Ascending snapshot of live ids. Safe to hold across calls that mutate
    /// the pool; resolve each id with `get` and skip the holes.
    pub fn ids(&self) -> Vec<usize> {
        let slots = self.slots.borrow();
        slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| match slot {
                Some(slot) if !slot.doomed.get() => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Visits every live entry in id order. Entries created or released by
    /// the callback do not disturb the walk.
    pub fn for_each<F: FnMut(usize, &Rc<T>)>(&self, mut f: F) {
        for id in self.ids() {
            if let Some(entry) = self.get(id) {
                if self.is_live(id) {
                    f(id, &entry);
                }
            }
        }
    }

    /// Releases every entry, forcing deferred slots out as well.
    pub fn clear(&self) {
        let all: Vec<usize> = {
            let slots = self.slots.borrow();
            slots
                .iter()
                .enumerate()
                .filter_map(|(id, slot)| slot.as_ref().map(|_| id))
                .collect()
        };

        for id in all {
            self.release(id, true);
        }
    }

    fn destroy(&self, id: usize) {
        let slot = {
            let mut slots = self.slots.borrow_mut();
            match slots.get_mut(id).and_then(|slot| slot.take()) {
                Some(slot) => slot,
                None => return,
            }
        };

        self.count.set(self.count.get().saturating_sub(1));
        self.events.dispatch(|handler| handler.on_destroyed(id, &slot.entry));
    }
}

/// Keeps a pool slot alive for the duration of a handler dispatch. If the
/// subject is released mid-dispatch, the drop of the guard completes the
/// destruction.
pub struct ScopedLock<'a, T> {
    pool: &'a Pool<T>,
    id: usize,
    pub entry: Rc<T>,
}

impl<'a, T> ScopedLock<'a, T> {
    pub fn new(pool: &'a Pool<T>, id: usize) -> Option<ScopedLock<'a, T>> {
        let entry = pool.get(id)?;
        pool.lock(id);
        Some(ScopedLock { pool, id, entry })
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }
}

impl<'a, T> Drop for ScopedLock<'a, T> {
    fn drop(&mut self) {
        self.pool.unlock(self.id);
    }
}
