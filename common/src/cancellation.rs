use std::cell::RefCell;
use std::rc::Rc;

/// A cooperative cancellation signal, shared by `Rc` between an async
/// action's caller and whatever is carrying it out.
///
/// Unlike `executor::cancellation::CancellationToken` (an `async_trait` with
/// a `wait()` future, suited to a multi-threaded runtime) this is a plain
/// callback register: the library is single-threaded, so there is never a
/// need to park a task on it. [`CancellationToken::cancel`] is idempotent -
/// firing it a second time before the first has been observed is a no-op.
///
/// Every interested party - the device base (to schedule the driver's
/// `cancel` vfunc) and every SSM with a pending delayed transition (to drop
/// its own timer) - registers independently with [`on_cancel`], so unlike a
/// single-shot signal this fans a single cancellation out to any number of
/// observers.
///
/// [`on_cancel`]: CancellationToken::on_cancel
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Rc<RefCell<Inner>>,
}

#[derive(Default)]
struct Inner {
    cancelled: bool,
    observers: Vec<Box<dyn FnOnce()>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.borrow().cancelled
    }

    /// Fires the token. Every observer registered with
    /// [`CancellationToken::on_cancel`] runs exactly once, synchronously,
    /// from this call, in registration order. Calling `cancel` again
    /// afterwards is a harmless no-op.
    pub fn cancel(&self) {
        let observers = {
            let mut inner = self.inner.borrow_mut();
            if inner.cancelled {
                return;
            }
            inner.cancelled = true;
            std::mem::take(&mut inner.observers)
        };
        for observer in observers {
            observer();
        }
    }

    /// Registers `observer` to run the moment the token is cancelled. If the
    /// token is already cancelled, `observer` runs immediately. Any number
    /// of observers may be registered; all of them run.
    pub fn on_cancel(&self, observer: impl FnOnce() + 'static) {
        let already_cancelled = self.inner.borrow().cancelled;
        if already_cancelled {
            observer();
        } else {
            self.inner.borrow_mut().observers.push(Box::new(observer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn observer_fires_once_on_cancel() {
        let token = CancellationToken::new();
        let count = Rc::new(Cell::new(0));
        let count2 = count.clone();
        token.on_cancel(move || count2.set(count2.get() + 1));
        token.cancel();
        token.cancel();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn already_cancelled_is_observable() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn multiple_observers_all_fire() {
        let token = CancellationToken::new();
        let a = Rc::new(Cell::new(false));
        let b = Rc::new(Cell::new(false));
        let (a2, b2) = (a.clone(), b.clone());
        token.on_cancel(move || a2.set(true));
        token.on_cancel(move || b2.set(true));
        token.cancel();
        assert!(a.get());
        assert!(b.get());
    }
}
