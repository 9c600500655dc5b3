//! The event loop collaborator that §6 of the design treats as external:
//! timers and a deferred-work queue that every action completion and SSM
//! delayed transition is scheduled through.
//!
//! The library is single-threaded and cooperative (no device state ever
//! crosses a thread boundary), so unlike `executor`'s multi-threaded,
//! `Arc<Mutex<_>>`-based runtime this reactor is built on `Rc<RefCell<_>>`.
//! A single [`Reactor`] instance is expected to be shared (by `Rc`) between
//! a `Device` and every SSM / driver it spawns.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub type Callback = Box<dyn FnOnce()>;

/// Handle returned by [`Reactor::add_timeout`]. Passing it to
/// [`Reactor::cancel_timeout`] prevents the callback from firing, provided it
/// has not already run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutId(u64);

struct Timeout {
    id: TimeoutId,
    deadline: Instant,
    callback: Option<Callback>,
}

impl PartialEq for Timeout {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for Timeout {}

impl Ord for Timeout {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the earliest deadline first.
        other.deadline.cmp(&self.deadline)
    }
}
impl PartialOrd for Timeout {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    timeouts: BinaryHeap<Timeout>,
    cancelled: std::collections::HashSet<u64>,
    idle: VecDeque<Callback>,
    now: Option<Instant>,
}

/// A cooperative, single-threaded reactor providing timers and a
/// defer-to-next-iteration idle queue.
///
/// Cloning is cheap (`Rc` bump) and gives every clone a view of the same
/// underlying queues, mirroring how a single process-wide main loop is
/// shared by every device in the original library.
#[derive(Clone, Default)]
pub struct Reactor {
    inner: Rc<RefCell<Inner>>,
}

impl Reactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `callback` to run after `millis` milliseconds of reactor
    /// time. Cancelling the device action that owns this timer should call
    /// [`Reactor::cancel_timeout`] with the returned id.
    pub fn add_timeout(&self, millis: u64, callback: impl FnOnce() + 'static) -> TimeoutId {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = TimeoutId(inner.next_id);
        let deadline = self.now_inner(&mut inner) + Duration::from_millis(millis);
        inner.timeouts.push(Timeout {
            id,
            deadline,
            callback: Some(Box::new(callback)),
        });
        id
    }

    /// Cancels a pending timeout. A no-op if it already fired or was already
    /// cancelled; cancelling twice is harmless.
    pub fn cancel_timeout(&self, id: TimeoutId) {
        self.inner.borrow_mut().cancelled.insert(id.0);
    }

    /// Queues `callback` to run on the next reactor iteration, never
    /// reentrantly from within the caller's stack frame. This is the
    /// mechanism every action completion is delivered through.
    pub fn defer_idle(&self, callback: impl FnOnce() + 'static) {
        self.inner.borrow_mut().idle.push_back(Box::new(callback));
    }

    fn now_inner(&self, inner: &mut Inner) -> Instant {
        *inner.now.get_or_insert_with(Instant::now)
    }

    /// Runs every idle callback queued so far (including ones enqueued by
    /// earlier callbacks in this same drain), then returns. Does not touch
    /// timers. Used by tests and by single-shot embeddings that only care
    /// about deferred completions.
    pub fn drain_idle(&self) {
        loop {
            let next = self.inner.borrow_mut().idle.pop_front();
            match next {
                Some(cb) => cb(),
                None => break,
            }
        }
    }

    /// Advances the virtual clock by `millis` and fires every timer whose
    /// deadline has passed, then drains the idle queue. Intended for
    /// deterministic tests that cannot afford to sleep in real time.
    pub fn advance(&self, millis: u64) {
        {
            let mut inner = self.inner.borrow_mut();
            let now = self.now_inner(&mut inner);
            inner.now = Some(now + Duration::from_millis(millis));
        }
        self.fire_ready();
        self.drain_idle();
    }

    /// Runs one real-time iteration: sleeps until the next timer (if sooner
    /// than `max_wait`), fires ready timers, then drains idle work.
    pub fn iterate(&self, max_wait: Duration) {
        let wait = {
            let mut inner = self.inner.borrow_mut();
            let now = self.now_inner(&mut inner);
            inner
                .timeouts
                .peek()
                .map(|t| t.deadline.saturating_duration_since(now))
                .map(|d| d.min(max_wait))
                .unwrap_or(max_wait)
        };
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        {
            let mut inner = self.inner.borrow_mut();
            inner.now = Some(Instant::now());
        }
        self.fire_ready();
        self.drain_idle();
    }

    fn fire_ready(&self) {
        loop {
            let ready = {
                let mut inner = self.inner.borrow_mut();
                let now = self.now_inner(&mut inner);
                match inner.timeouts.peek() {
                    Some(t) if t.deadline <= now => {
                        let mut t = inner.timeouts.pop().unwrap();
                        let cancelled = inner.cancelled.remove(&t.id.0);
                        t.callback.take().filter(|_| !cancelled)
                    }
                    _ => None,
                }
            };
            match ready {
                Some(cb) => cb(),
                None => break,
            }
        }
    }

    /// True if there is no pending timer or idle work left.
    pub fn is_idle(&self) -> bool {
        let inner = self.inner.borrow();
        inner.timeouts.is_empty() && inner.idle.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn idle_runs_after_current_stack_unwinds() {
        let reactor = Reactor::new();
        let ran = Rc::new(Cell::new(false));
        let ran2 = ran.clone();
        reactor.defer_idle(move || ran2.set(true));
        assert!(!ran.get());
        reactor.drain_idle();
        assert!(ran.get());
    }

    #[test]
    fn timeout_fires_only_after_advance() {
        let reactor = Reactor::new();
        let fired = Rc::new(Cell::new(false));
        let fired2 = fired.clone();
        reactor.add_timeout(50, move || fired2.set(true));
        reactor.advance(49);
        assert!(!fired.get());
        reactor.advance(1);
        assert!(fired.get());
    }

    #[test]
    fn cancelled_timeout_never_fires() {
        let reactor = Reactor::new();
        let fired = Rc::new(Cell::new(false));
        let fired2 = fired.clone();
        let id = reactor.add_timeout(10, move || fired2.set(true));
        reactor.cancel_timeout(id);
        reactor.advance(100);
        assert!(!fired.get());
    }

    #[test]
    fn double_cancel_is_harmless() {
        let reactor = Reactor::new();
        let id = reactor.add_timeout(10, || {});
        reactor.cancel_timeout(id);
        reactor.cancel_timeout(id);
        reactor.advance(100);
        assert!(reactor.is_idle());
    }
}
