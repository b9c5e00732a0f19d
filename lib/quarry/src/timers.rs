use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Receiver for timer callbacks. `free` fires exactly once, when the timer
/// is swept out of the subsystem.
pub trait TimerHandler {
    fn timeout(&self, timer: &Timer);
    fn free(&self, _timer: &Timer) {}
}

pub struct Timer {
    running: Cell<bool>,
    calls_left: Cell<u32>,
    interval: Duration,
    next_fire: Cell<Instant>,
    handler: Rc<dyn TimerHandler>,
}

impl Timer {
    fn new(
        handler: Rc<dyn TimerHandler>,
        initial: Duration,
        interval: Duration,
        count: u32,
        now: Instant,
    ) -> Timer {
        Timer {
            running: Cell::new(true),
            calls_left: Cell::new(count),
            interval,
            next_fire: Cell::new(now + initial),
            handler,
        }
    }

    #[inline]
    pub fn running(&self) -> bool {
        self.running.get()
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Remaining calls; 0 means the timer repeats forever.
    #[inline]
    pub fn calls_left(&self) -> u32 {
        self.calls_left.get()
    }

    #[inline]
    pub fn remaining(&self, now: Instant) -> Duration {
        self.next_fire.get().saturating_duration_since(now)
    }

    /// Stops the timer. A callback in flight completes; the sweep removes
    /// the timer on the next tick.
    #[inline]
    pub fn kill(&self) {
        self.running.set(false);
    }

    /// Post-callback bookkeeping. Returns whether the timer lives on.
    fn trigger(&self) -> bool {
        if !self.running.get() {
            return false;
        }
        let calls = self.calls_left.get();
        if calls == 0 {
            // Repeat forever.
            return true;
        }
        self.calls_left.set(calls - 1);
        if calls == 1 {
            self.running.set(false);
        }
        self.running.get()
    }
}

/// Insertion-ordered timer list driven by the tick loop. The count stays
/// small, so a linear sweep per tick beats maintaining a heap.
pub struct Timers {
    list: RefCell<Vec<Rc<Timer>>>,
}

impl Timers {
    pub fn new() -> Timers {
        Timers {
            list: RefCell::new(Vec::new()),
        }
    }

    /// Registers a timer firing first after `initial`, then every
    /// `interval`, `count` times in total (0 = forever).
    pub fn create(
        &self,
        handler: Rc<dyn TimerHandler>,
        initial: Duration,
        interval: Duration,
        count: u32,
        now: Instant,
    ) -> Rc<Timer> {
        let timer = Rc::new(Timer::new(handler, initial, interval, count, now));
        self.list.borrow_mut().push(timer.clone());
        timer
    }

    pub fn create_repeating(
        &self,
        handler: Rc<dyn TimerHandler>,
        interval: Duration,
        now: Instant,
    ) -> Rc<Timer> {
        self.create(handler, interval, interval, 0, now)
    }

    pub fn create_once(
        &self,
        handler: Rc<dyn TimerHandler>,
        delay: Duration,
        now: Instant,
    ) -> Rc<Timer> {
        self.create(handler, delay, delay, 1, now)
    }

    /// Number of timers still scheduled to fire.
    pub fn running_count(&self) -> usize {
        self.list.borrow().iter().filter(|timer| timer.running()).count()
    }

    /// Fires due timers and sweeps out dead ones. The reschedule subtracts
    /// the overshoot so cadence is kept regardless of tick jitter.
    pub fn tick(&self, now: Instant) {
        let snapshot: Vec<Rc<Timer>> = self.list.borrow().clone();

        for timer in snapshot {
            if !timer.running() {
                continue;
            }
            if now < timer.next_fire.get() {
                continue;
            }

            let overshoot = now.duration_since(timer.next_fire.get());
            timer.handler.timeout(&timer);
            if timer.trigger() {
                let correction = overshoot.min(timer.interval);
                timer.next_fire.set(now + timer.interval - correction);
            }
        }

        let mut swept = Vec::new();
        self.list.borrow_mut().retain(|timer| {
            if timer.running() {
                true
            } else {
                swept.push(timer.clone());
                false
            }
        });
        for timer in swept {
            timer.handler.free(&timer);
        }
    }
}

impl Default for Timers {
    fn default() -> Timers {
        Timers::new()
    }
}
