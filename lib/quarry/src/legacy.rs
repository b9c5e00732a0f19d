use std::cell::RefCell;

/// Maps a small finite legacy id window onto the unbounded internal pool
/// id space. Scripting surfaces expose `[min, max)` per pool (sometimes per
/// player), while the server allocates real ids without such limits.
pub struct FiniteIdMapper {
    min: i32,
    max: i32,
    invalid: i32,
    not_found: i32,
    ids: RefCell<Vec<i32>>,
}

impl FiniteIdMapper {
    /// The invalid legacy id returned in errors.
    pub const INVALID: i32 = -1;
    /// The invalid real id returned in errors.
    pub const NOT_FOUND: i32 = 0;

    pub fn new(min: i32, max: i32) -> FiniteIdMapper {
        FiniteIdMapper::with_sentinels(min, max, Self::INVALID, Self::NOT_FOUND)
    }

    pub fn with_sentinels(min: i32, max: i32, invalid: i32, not_found: i32) -> FiniteIdMapper {
        assert!(max > min, "Legacy id window must be non-empty");
        FiniteIdMapper {
            min,
            max,
            invalid,
            not_found,
            ids: RefCell::new(vec![not_found; (max - min) as usize]),
        }
    }

    #[inline]
    pub fn invalid(&self) -> i32 {
        self.invalid
    }

    #[inline]
    pub fn not_found(&self) -> i32 {
        self.not_found
    }

    /// Requests the lowest free legacy id, or `invalid` when the window is
    /// exhausted.
    pub fn reserve(&self) -> i32 {
        let ids = self.ids.borrow();
        for (index, &real) in ids.iter().enumerate() {
            if real == self.not_found {
                return index as i32 + self.min;
            }
        }
        self.invalid
    }

    /// Stores the given real id under a legacy id. Out-of-window ids are
    /// ignored.
    pub fn set(&self, legacy: i32, real: i32) {
        if legacy >= self.min && legacy < self.max {
            self.ids.borrow_mut()[(legacy - self.min) as usize] = real;
        }
    }

    /// Releases a legacy id.
    pub fn release(&self, legacy: i32) {
        if legacy >= self.min && legacy < self.max {
            self.ids.borrow_mut()[(legacy - self.min) as usize] = self.not_found;
        }
    }

    /// Finds the legacy id for a real id by linear scan, or `invalid`.
    pub fn to_legacy(&self, real: i32) -> i32 {
        let ids = self.ids.borrow();
        for (index, &stored) in ids.iter().enumerate() {
            if stored == real {
                return index as i32 + self.min;
            }
        }
        self.invalid
    }

    /// Finds the real id for a legacy id, or `not_found`.
    pub fn from_legacy(&self, legacy: i32) -> i32 {
        if legacy < self.min || legacy >= self.max {
            return self.not_found;
        }
        self.ids.borrow()[(legacy - self.min) as usize]
    }

    /// Releases the whole window.
    pub fn clear(&self) {
        let mut ids = self.ids.borrow_mut();
        for slot in ids.iter_mut() {
            *slot = self.not_found;
        }
    }
}
