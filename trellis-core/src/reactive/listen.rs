//! Listener registry.
//!
//! An [`Emitter`] keeps listeners in registration order and identifies them
//! by `Rc` pointer identity: registering the same `Rc` twice is a no-op and
//! removal takes the same `Rc`. Any state a listener needs (the "context" of
//! a callback) is captured by the closure itself.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A shared event callback.
pub type Listener<E> = Rc<dyn Fn(&E)>;

/// What a value exposes when it can change without being rewritten.
///
/// A cell holding such a value forwards its emissions as changes of the cell.
pub type ChangeSource = Rc<Emitter<()>>;

/// Per-event-type listener registry.
pub struct Emitter<E> {
    listeners: RefCell<Vec<Listener<E>>>,
}

impl<E> Emitter<E> {
    /// Create an emitter without listeners.
    pub fn new() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
        }
    }

    /// Register a listener.
    ///
    /// Returns `false` if this exact listener is already registered.
    pub fn on(&self, listener: Listener<E>) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Remove a listener previously passed to [`on`](Self::on).
    pub fn off(&self, listener: &Listener<E>) -> bool {
        let removed = {
            let mut listeners = self.listeners.borrow_mut();
            listeners
                .iter()
                .position(|l| same_listener(l, listener))
                .map(|index| listeners.remove(index))
        };
        // Dropped outside the borrow: the closure may own the last handle
        // to a cell whose teardown touches this emitter.
        removed.is_some()
    }

    /// Remove every listener.
    pub fn clear(&self) {
        let listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        drop(listeners);
    }

    /// Invoke every listener in registration order.
    ///
    /// The list is snapshotted first: listeners added or removed while
    /// emitting take effect from the next emission.
    pub fn emit(&self, event: &E) {
        let listeners = self.listeners.borrow().clone();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.borrow().is_empty()
    }
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Compare listeners by the address of their closure, ignoring vtables.
pub(crate) fn same_listener<E: ?Sized, F: ?Sized>(a: &Rc<E>, b: &Rc<F>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell as Counter;

    #[test]
    fn duplicate_registration_is_ignored() {
        let emitter = Emitter::<i32>::new();
        let hits = Rc::new(Counter::new(0));

        let listener: Listener<i32> = {
            let hits = hits.clone();
            Rc::new(move |_| hits.set(hits.get() + 1))
        };

        assert!(emitter.on(listener.clone()));
        assert!(!emitter.on(listener.clone()));
        assert_eq!(emitter.len(), 1);

        emitter.emit(&1);
        assert_eq!(hits.get(), 1);

        assert!(emitter.off(&listener));
        assert!(!emitter.off(&listener));
        emitter.emit(&2);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let emitter = Emitter::<&'static str>::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let log = log.clone();
            emitter.on(Rc::new(move |event: &&'static str| {
                log.borrow_mut().push(format!("{tag}:{event}"));
            }));
        }

        emitter.emit(&"go");
        assert_eq!(*log.borrow(), vec!["first:go", "second:go", "third:go"]);
    }

    #[test]
    fn listener_may_unregister_itself_while_emitting() {
        let emitter = Rc::new(Emitter::<()>::new());
        let hits = Rc::new(Counter::new(0));
        let slot: Rc<RefCell<Option<Listener<()>>>> = Rc::new(RefCell::new(None));

        let listener: Listener<()> = {
            let emitter = Rc::downgrade(&emitter);
            let hits = hits.clone();
            let slot = slot.clone();
            Rc::new(move |_| {
                hits.set(hits.get() + 1);
                if let (Some(emitter), Some(me)) = (emitter.upgrade(), slot.borrow().clone()) {
                    emitter.off(&me);
                }
            })
        };
        *slot.borrow_mut() = Some(listener.clone());
        emitter.on(listener);

        emitter.emit(&());
        emitter.emit(&());
        assert_eq!(hits.get(), 1);
        assert!(emitter.is_empty());
    }
}
