//! Hierarchical timer wheel.
//!
//! A timer wheel is a ring buffer of event lists plus a cursor; as the cursor
//! advances past a slot, the slot's events fire. The hierarchical variant
//! layers eight wheels of 256 slots at increasing granularity: an event whose
//! delay does not fit the innermost wheel is parked on an outer level and
//! promoted inward one slot's worth at a time as the inner wheel completes
//! rotations. Scheduling, cancellation, and each tick of advancement are
//! constant-time.
//!
//! The wheel is optimized for high occupancy and cheap cancellation, on the
//! assumption that most scheduled events (retries, timeouts) never fire.
//! [`TimerWheel::schedule_in_range`] lets callers trade deadline precision
//! for fewer promotions.
//!
//! # Ordering
//!
//! All events scheduled for tick X fire before any event scheduled for tick
//! X+1. Within one slot, events fire in insertion order (FIFO).
//!
//! # Re-entrancy
//!
//! Event callbacks may schedule and cancel events on the wheel that is firing
//! them. They must not call [`TimerWheel::advance`] on it; doing so panics.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use tracing::{debug, trace};

use crate::error::Error;

/// An unsigned count of abstract time units advanced by the owning loop.
///
/// The message loop advances its wheel in milliseconds.
pub type Tick = u64;

const WIDTH_BITS: u32 = 8;
const NUM_LEVELS: usize = ((64 + WIDTH_BITS - 1) / WIDTH_BITS) as usize;
const MAX_LEVEL: usize = NUM_LEVELS - 1;
const NUM_SLOTS: usize = 1 << WIDTH_BITS;
const MASK: Tick = (NUM_SLOTS - 1) as Tick;

/// User hooks carried by a scheduled event.
///
/// `fire` runs when the wheel reaches the event's tick. `on_cancel` and
/// `on_abort` run when the whole wheel is cancelled or aborted; cancelling a
/// single event through [`TimerWheel::cancel_event`] invokes neither.
pub trait TimerEvent {
    /// The event's deadline was reached.
    fn fire(&mut self);

    /// The owning wheel was cancelled wholesale.
    fn on_cancel(&mut self, _error: Error) {}

    /// The owning wheel was aborted wholesale.
    fn on_abort(&mut self) {}
}

struct FnTimerEvent<F: FnMut()> {
    f: F,
}

impl<F: FnMut()> TimerEvent for FnTimerEvent<F> {
    fn fire(&mut self) {
        (self.f)();
    }
}

/// Wraps a closure as an event that only reacts to firing.
#[must_use]
pub fn fn_event(f: impl FnMut() + 'static) -> Box<dyn TimerEvent> {
    Box::new(FnTimerEvent { f })
}

/// Identifies a scheduled event for cancellation and rescheduling.
///
/// Handles stay valid until the event fires or is removed; ids are never
/// reused, so a stale handle is simply inert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    id: u64,
}

impl TimerHandle {
    /// Returns the event id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

struct Entry {
    scheduled_at: Tick,
    // Bumped on every relink; slot references carrying an older epoch are
    // stale and skipped on drain.
    epoch: u64,
    hooks: Box<dyn TimerEvent>,
}

type SlotRef = (u64, u64);

struct Core {
    now: [Tick; NUM_LEVELS],
    ticks_pending: Tick,
    slots: Vec<Vec<VecDeque<SlotRef>>>,
    entries: HashMap<u64, Entry>,
    next_id: u64,
}

impl Core {
    fn new(now: Tick) -> Self {
        let mut levels = [0; NUM_LEVELS];
        for (i, level_now) in levels.iter_mut().enumerate() {
            *level_now = now >> (WIDTH_BITS as usize * i);
        }
        Self {
            now: levels,
            ticks_pending: 0,
            slots: (0..NUM_LEVELS)
                .map(|_| (0..NUM_SLOTS).map(|_| VecDeque::new()).collect())
                .collect(),
            entries: HashMap::new(),
            next_id: 0,
        }
    }

    // Places an already-registered entry `delta` ticks ahead, folding in the
    // phase of each level the delta overflows.
    fn link(&mut self, id: u64, delta: Tick) {
        debug_assert!(delta > 0, "link requires a positive delta");
        let scheduled_at = self.now[0] + delta;

        let mut level = 0;
        let mut d = delta;
        while d >= NUM_SLOTS as Tick {
            d = (d + (self.now[level] & MASK)) >> WIDTH_BITS;
            level += 1;
        }
        let slot = ((self.now[level] + d) & MASK) as usize;

        let entry = self.entries.get_mut(&id).expect("linking unknown entry");
        entry.scheduled_at = scheduled_at;
        entry.epoch += 1;
        let epoch = entry.epoch;
        self.slots[level][slot].push_back((id, epoch));
        trace!(id, scheduled_at, level, slot, "timer linked");
    }

    fn live(&self, id: u64, epoch: u64) -> bool {
        self.entries.get(&id).is_some_and(|e| e.epoch == epoch)
    }
}

/// Hierarchical timer wheel: eight levels of 256 slots each.
///
/// Interior mutability lets event callbacks schedule and cancel on the wheel
/// that is currently firing them; only [`TimerWheel::advance`] itself is
/// non-reentrant.
pub struct TimerWheel {
    core: RefCell<Core>,
    advancing: Cell<bool>,
}

impl TimerWheel {
    /// Creates a wheel whose clock starts at `now`.
    #[must_use]
    pub fn new(now: Tick) -> Self {
        Self {
            core: RefCell::new(Core::new(now)),
            advancing: Cell::new(false),
        }
    }

    /// Returns the externally observable tick.
    ///
    /// During event execution this is the tick the event was scheduled to run
    /// on, not the tick the clock is being advanced to.
    #[must_use]
    pub fn now(&self) -> Tick {
        self.core.borrow().now[0]
    }

    /// Returns the number of scheduled events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.borrow().entries.len()
    }

    /// Returns true if no events are scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.borrow().entries.is_empty()
    }

    /// Returns true if `handle` refers to a scheduled event.
    #[must_use]
    pub fn is_active(&self, handle: TimerHandle) -> bool {
        self.core.borrow().entries.contains_key(&handle.id)
    }

    /// Returns the absolute tick `handle` is scheduled for, if active.
    #[must_use]
    pub fn scheduled_at(&self, handle: TimerHandle) -> Option<Tick> {
        self.core.borrow().entries.get(&handle.id).map(|e| e.scheduled_at)
    }

    /// Schedules `event` to fire `delta` ticks from now.
    ///
    /// # Panics
    ///
    /// Panics if `delta` is zero.
    pub fn schedule(&self, event: Box<dyn TimerEvent>, delta: Tick) -> TimerHandle {
        assert!(delta > 0, "schedule requires a positive delta");
        let mut core = self.core.borrow_mut();
        let id = core.next_id;
        core.next_id += 1;
        core.entries.insert(
            id,
            Entry {
                scheduled_at: 0,
                epoch: 0,
                hooks: event,
            },
        );
        core.link(id, delta);
        TimerHandle { id }
    }

    /// Schedules a closure to fire `delta` ticks from now.
    pub fn schedule_fn(&self, delta: Tick, f: impl FnMut() + 'static) -> TimerHandle {
        self.schedule(fn_event(f), delta)
    }

    /// Schedules `event` to fire between `start` and `end` ticks from now.
    ///
    /// The wheel picks the coarsest deadline within the range so the event
    /// lands on the smallest level covering it, minimizing promotions.
    ///
    /// # Panics
    ///
    /// Panics unless `0 < start < end`.
    pub fn schedule_in_range(
        &self,
        event: Box<dyn TimerEvent>,
        start: Tick,
        end: Tick,
    ) -> TimerHandle {
        assert!(start > 0 && end > start, "schedule_in_range requires 0 < start < end");
        self.schedule(event, Self::range_delta(start, end))
    }

    /// Re-links an active event `delta` ticks from now.
    ///
    /// Returns false if the handle no longer refers to a scheduled event.
    ///
    /// # Panics
    ///
    /// Panics if `delta` is zero.
    pub fn reschedule(&self, handle: TimerHandle, delta: Tick) -> bool {
        assert!(delta > 0, "reschedule requires a positive delta");
        let mut core = self.core.borrow_mut();
        if !core.entries.contains_key(&handle.id) {
            return false;
        }
        core.link(handle.id, delta);
        true
    }

    /// Re-links an active event into `[start, end]` ticks from now.
    ///
    /// If the event's remaining delay already falls inside the range this is
    /// a no-op, avoiding relink churn for repeatedly-armed timeouts.
    ///
    /// # Panics
    ///
    /// Panics unless `0 < start < end`.
    pub fn reschedule_in_range(&self, handle: TimerHandle, start: Tick, end: Tick) -> bool {
        assert!(start > 0 && end > start, "reschedule_in_range requires 0 < start < end");
        {
            let core = self.core.borrow();
            let Some(entry) = core.entries.get(&handle.id) else {
                return false;
            };
            let remaining = entry.scheduled_at.saturating_sub(core.now[0]);
            if remaining >= start && remaining <= end {
                return true;
            }
        }
        self.reschedule(handle, Self::range_delta(start, end))
    }

    // The coarsest delta inside [start, end]: keep the high-order bits the
    // two bounds share across level boundaries, zero the rest of `end`.
    fn range_delta(start: Tick, end: Tick) -> Tick {
        let mut mask: Tick = !0;
        while (start & mask) != (end & mask) {
            mask <<= WIDTH_BITS;
        }
        let delta = end & (mask >> WIDTH_BITS);
        debug_assert!(delta > 0);
        delta
    }

    /// Removes a scheduled event without invoking any of its hooks.
    ///
    /// Returns true if the event was scheduled.
    pub fn cancel_event(&self, handle: TimerHandle) -> bool {
        // The hook box may own arbitrary state; drop it outside the borrow.
        let removed = self.core.borrow_mut().entries.remove(&handle.id);
        match removed {
            Some(entry) => {
                trace!(id = handle.id, "timer cancelled");
                drop(entry);
                true
            }
            None => false,
        }
    }

    /// Advances the clock by `delta` ticks, firing every event due at or
    /// before the new time.
    ///
    /// # Panics
    ///
    /// Panics if `delta` is zero (unless resuming a throttled advance), or if
    /// called from within an event callback.
    pub fn advance(&self, delta: Tick) {
        let done = self.advance_limited(delta, usize::MAX);
        debug_assert!(done);
    }

    /// Advances the clock by `delta` ticks, firing at most `max_execute`
    /// events.
    ///
    /// Returns false if the execution budget ran out before the clock reached
    /// the target; the caller must then call `advance_limited(0, ...)` until
    /// it returns true. `delta == 0` is only legal on such a resume call.
    ///
    /// # Panics
    ///
    /// Panics on a zero `delta` with no throttled advance pending, and when
    /// called from within an event callback.
    pub fn advance_limited(&self, delta: Tick, max_execute: usize) -> bool {
        assert!(
            !self.advancing.get(),
            "advance called from within an event callback"
        );
        self.advancing.set(true);
        let mut budget = max_execute;
        let done = self.advance_level(delta, &mut budget, 0);
        self.advancing.set(false);
        done
    }

    fn advance_level(&self, mut delta: Tick, budget: &mut usize, level: usize) -> bool {
        if self.core.borrow().ticks_pending > 0 {
            if level == 0 {
                self.core.borrow_mut().ticks_pending += delta;
            }
            // Finish the interrupted slot before consuming new ticks.
            let now = self.core.borrow().now[level];
            if !self.process_current_slot(now, budget, level) {
                return false;
            }
            if level == 0 {
                let mut core = self.core.borrow_mut();
                delta = core.ticks_pending - 1;
                core.ticks_pending = 0;
            } else {
                return true;
            }
        } else {
            assert!(delta > 0, "advance requires a positive delta");
        }

        while delta > 0 {
            delta -= 1;
            let now = {
                let mut core = self.core.borrow_mut();
                core.now[level] += 1;
                core.now[level]
            };
            if !self.process_current_slot(now, budget, level) {
                self.core.borrow_mut().ticks_pending = delta + 1;
                return false;
            }
        }
        true
    }

    fn process_current_slot(&self, now: Tick, budget: &mut usize, level: usize) -> bool {
        let slot_index = (now & MASK) as usize;

        // A full inner rotation promotes one outer slot's worth of events.
        if slot_index == 0 && level < MAX_LEVEL && !self.advance_level(1, budget, level + 1) {
            return false;
        }

        loop {
            let popped = self.core.borrow_mut().slots[level][slot_index].pop_front();
            let Some((id, epoch)) = popped else { break };

            enum Disposition {
                Stale,
                Promote(Tick),
                Fire,
            }

            let disposition = {
                let core = self.core.borrow();
                match core.entries.get(&id) {
                    Some(e) if e.epoch == epoch => {
                        if level > 0 && core.now[0] < e.scheduled_at {
                            Disposition::Promote(e.scheduled_at - core.now[0])
                        } else {
                            Disposition::Fire
                        }
                    }
                    _ => Disposition::Stale,
                }
            };

            match disposition {
                Disposition::Stale => {}
                Disposition::Promote(residual) => {
                    self.core.borrow_mut().link(id, residual);
                }
                Disposition::Fire => {
                    let entry = self
                        .core
                        .borrow_mut()
                        .entries
                        .remove(&id)
                        .expect("entry vanished during drain");
                    trace!(id, scheduled_at = entry.scheduled_at, "timer fired");
                    let mut hooks = entry.hooks;
                    hooks.fire();
                    *budget -= 1;
                    if *budget == 0 {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Returns the smallest delay, bounded by `max`, at which the wheel is
    /// guaranteed to have work; `0` if a throttled advance is pending.
    #[must_use]
    pub fn ticks_to_next_event(&self, max: Tick) -> Tick {
        let core = self.core.borrow();
        if core.ticks_pending > 0 {
            return 0;
        }
        Self::next_event_at_level(&core, max, 0)
    }

    // Scans every slot of `level` in ring order; recurses outward only when
    // the level holds no live entry.
    fn next_event_at_level(core: &Core, max: Tick, level: usize) -> Tick {
        let now0 = core.now[0];
        let mut min: Option<Tick> = None;
        for i in 0..NUM_SLOTS {
            let slot_index = ((core.now[level] + 1 + i as Tick) & MASK) as usize;
            for &(id, epoch) in &core.slots[level][slot_index] {
                if core.live(id, epoch) {
                    let d = core.entries[&id].scheduled_at.saturating_sub(now0);
                    min = Some(min.map_or(d, |m| m.min(d)));
                }
            }
        }
        match min {
            Some(d) => d.min(max),
            None if level < MAX_LEVEL => Self::next_event_at_level(core, max, level + 1),
            None => max,
        }
    }

    /// Removes every scheduled event, invoking `on_cancel` with a copy of
    /// `error` on each, in level/slot order.
    pub fn cancel(&self, error: Error) {
        let drained = self.drain_all();
        debug!(count = drained.len(), "timer wheel cancelled");
        for mut hooks in drained {
            hooks.on_cancel(error.clone());
        }
    }

    /// Removes every scheduled event, invoking `on_abort` on each, in
    /// level/slot order.
    pub fn abort(&self) {
        let drained = self.drain_all();
        debug!(count = drained.len(), "timer wheel aborted");
        for mut hooks in drained {
            hooks.on_abort();
        }
    }

    // Unlinks everything and returns the hooks in deterministic level/slot
    // order. Hooks run after the borrow is released, so cancel handlers may
    // schedule fresh events; those survive the sweep.
    fn drain_all(&self) -> Vec<Box<dyn TimerEvent>> {
        let mut core = self.core.borrow_mut();
        let mut drained = Vec::with_capacity(core.entries.len());
        for level in 0..NUM_LEVELS {
            for slot in 0..NUM_SLOTS {
                while let Some((id, epoch)) = core.slots[level][slot].pop_front() {
                    if core.live(id, epoch) {
                        let entry = core.entries.remove(&id).expect("live entry missing");
                        drained.push(entry.hooks);
                    }
                }
            }
        }
        debug_assert!(core.entries.is_empty());
        drained
    }
}

impl std::fmt::Debug for TimerWheel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.borrow();
        f.debug_struct("TimerWheel")
            .field("now", &core.now[0])
            .field("len", &core.entries.len())
            .field("ticks_pending", &core.ticks_pending)
            .finish()
    }
}
