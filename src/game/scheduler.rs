//! Delayed-action scheduler
//!
//! Per-process timer queue driven by the tick loop. Timers live in a slot
//! arena; a [`TimerHandle`] names a slot plus the generation it was issued
//! for, so cancelling (or firing a one-shot) invalidates every outstanding
//! copy of the handle. Heap entries whose handle went stale are skipped.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

/// Handle to a scheduled action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct ActiveTimer<A> {
    action: A,
    /// Re-arm interval for repeating timers
    interval: Option<Duration>,
}

#[derive(Debug)]
struct Slot<A> {
    generation: u32,
    timer: Option<ActiveTimer<A>>,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Pending {
    fire_at: Duration,
    /// Tie-breaker so equal fire times run in scheduling order
    order: u64,
    handle: TimerHandle,
}

/// Timer queue over actions of type `A`
#[derive(Debug)]
pub struct Scheduler<A> {
    now: Duration,
    slots: Vec<Slot<A>>,
    free: Vec<u32>,
    queue: BinaryHeap<Reverse<Pending>>,
    next_order: u64,
}

impl<A: Clone> Scheduler<A> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            slots: Vec::new(),
            free: Vec::new(),
            queue: BinaryHeap::new(),
            next_order: 0,
        }
    }

    /// Time elapsed on this scheduler's clock
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Schedule `action` to fire after `delay`. With `repeat`, it fires every
    /// `delay` until cancelled.
    pub fn schedule(&mut self, action: A, delay: Duration, repeat: bool) -> TimerHandle {
        let timer = ActiveTimer {
            action,
            interval: repeat.then_some(delay),
        };

        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.timer = Some(timer);
                TimerHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    timer: Some(timer),
                });
                TimerHandle {
                    index,
                    generation: 0,
                }
            }
        };

        self.push(handle, self.now + delay);
        handle
    }

    /// Cancel a timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        if !self.is_active(handle) {
            return false;
        }
        self.release(handle.index);
        true
    }

    pub fn is_active(&self, handle: TimerHandle) -> bool {
        self.slots
            .get(handle.index as usize)
            .map(|slot| slot.generation == handle.generation && slot.timer.is_some())
            .unwrap_or(false)
    }

    /// Time left before `handle` fires, if it is still active
    pub fn remaining(&self, handle: TimerHandle) -> Option<Duration> {
        if !self.is_active(handle) {
            return None;
        }
        self.queue
            .iter()
            .filter(|Reverse(p)| p.handle == handle)
            .map(|Reverse(p)| p.fire_at.saturating_sub(self.now))
            .min()
    }

    /// Number of active timers
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.timer.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advance the clock by `dt` and return every action that came due, in
    /// fire-time order.
    pub fn advance(&mut self, dt: Duration) -> Vec<A> {
        self.now += dt;
        let mut fired = Vec::new();

        while let Some(Reverse(next)) = self.queue.peek() {
            if next.fire_at > self.now {
                break;
            }
            let Some(Reverse(due)) = self.queue.pop() else {
                break;
            };
            if !self.is_active(due.handle) {
                continue;
            }

            let slot = &self.slots[due.handle.index as usize];
            let Some(timer) = slot.timer.as_ref() else {
                continue;
            };
            fired.push(timer.action.clone());
            let interval = timer.interval;

            match interval {
                // Zero interval would refire forever within one advance
                Some(interval) if !interval.is_zero() => {
                    self.push(due.handle, due.fire_at + interval);
                }
                _ => self.release(due.handle.index),
            }
        }

        fired
    }

    fn push(&mut self, handle: TimerHandle, fire_at: Duration) {
        let order = self.next_order;
        self.next_order += 1;
        self.queue.push(Reverse(Pending {
            fire_at,
            order,
            handle,
        }));
    }

    fn release(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.timer = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
    }
}

impl<A: Clone> Default for Scheduler<A> {
    fn default() -> Self {
        Self::new()
    }
}
