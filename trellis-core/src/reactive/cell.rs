//! Cells
//!
//! A [`Cell`] is either *plain* (it holds a value written from outside) or
//! *computed* (its value is a formula over other cells). Both kinds share
//! one handle type and one runtime protocol.
//!
//! # Example
//!
//! ```rust
//! use trellis_core::{Cell, Runtime};
//!
//! let runtime = Runtime::new();
//! let a = Cell::new_in(&runtime, 1);
//! let b = Cell::new_in(&runtime, 2);
//! let c = {
//!     let (a, b) = (a.clone(), b.clone());
//!     Cell::computed_in(&runtime, move || a.read() + b.read())
//! };
//!
//! assert_eq!(c.read(), 3);
//! a.write(5).unwrap();
//! assert_eq!(c.read(), 7);
//! ```
//!
//! # Reads
//!
//! Reading a computed cell that nothing observes evaluates its formula on
//! demand and caches the result for the rest of the pass ("lazy"). Once a
//! cell has slaves or change listeners it is *active*: it subscribes to its
//! masters and is recomputed by release passes instead.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::event::{ChangeEvent, ErrorEvent, Notification};
use super::listen::{same_listener, ChangeSource, Emitter, Listener};
use super::runtime::{ReadFailure, Reactive, Rewire, Runtime};
use crate::error::{BoxError, CellError};
use crate::graph::{CellId, Node, NodeKind};

/// A computed cell's formula.
pub type Formula<T> = Rc<dyn Fn() -> Result<T, BoxError>>;

/// Decides whether two values count as the same (no change).
pub type Equality<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Listener receiving both changes and errors of a cell.
pub type SubscribeListener<T> = Rc<dyn for<'a> Fn(Notification<'a, T>)>;

type ReadMap<T> = Rc<dyn Fn(&T) -> T>;
type Inverse<T> = Rc<dyn Fn(T)>;
type Validator<T> = Rc<dyn Fn(&T) -> Result<(), BoxError>>;
type Nested<T> = Rc<dyn Fn(&T) -> Option<ChangeSource>>;

/// Default equality: `==`, except that a value unequal to itself (NaN)
/// equals any other such value.
#[allow(clippy::eq_op)]
pub fn same_value<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b || (a != a && b != b)
}

/// A reactive cell.
///
/// Handles are cheap to clone and share one cell. The cell lives as long as
/// any handle does; formulas that read other cells keep those cells alive
/// through the handles they capture.
pub struct Cell<T: 'static> {
    inner: Rc<CellInner<T>>,
}

struct CellInner<T: 'static> {
    id: CellId,
    kind: NodeKind,
    runtime: Runtime,
    formula: Option<Formula<T>>,
    hooks: Hooks<T>,
    state: RefCell<ValueState<T>>,
    changes: Emitter<ChangeEvent<T>>,
    errors: Emitter<ErrorEvent>,
    subscriptions: RefCell<Vec<Subscription<T>>>,
    /// Forwards emissions of a nested value's change source.
    nested_listener: Listener<()>,
}

struct Hooks<T> {
    owner: Option<Rc<dyn Any>>,
    read: Option<ReadMap<T>>,
    write: Option<Inverse<T>>,
    validate: Option<Validator<T>>,
    equality: Equality<T>,
    nested: Option<Nested<T>>,
}

struct ValueState<T> {
    /// Latest value, `None` until a computed cell first evaluates.
    value: Option<T>,
    /// Value as of the last commit.
    fixed_value: Option<T>,
    initial_value: Option<T>,
    pending: Option<PendingChange<T>>,
    /// Last failure of this cell's own evaluation.
    error: Option<CellError>,
}

/// Writes made to a plain cell since its last commit, collapsed.
struct PendingChange<T> {
    /// Value before the first write of the chain.
    old_value: T,
    writes: u32,
    /// False once the value object itself changed while pending.
    cancellable: bool,
}

struct Subscription<T: 'static> {
    listener: SubscribeListener<T>,
    change: Listener<ChangeEvent<T>>,
    error: Listener<ErrorEvent>,
}

enum Source<T> {
    Value(T),
    Formula(Formula<T>),
}

impl<T: Clone + PartialEq + 'static> Cell<T> {
    /// Create a plain cell in the current thread's runtime.
    pub fn new(value: T) -> Self {
        Self::new_in(&Runtime::current(), value)
    }

    pub fn new_in(runtime: &Runtime, value: T) -> Self {
        CellBuilder::value(value).create(runtime.clone())
    }

    /// Create a computed cell in the current thread's runtime.
    ///
    /// The formula runs on first read, not here.
    pub fn computed(formula: impl Fn() -> T + 'static) -> Self {
        Self::computed_in(&Runtime::current(), formula)
    }

    pub fn computed_in(runtime: &Runtime, formula: impl Fn() -> T + 'static) -> Self {
        CellBuilder::computed(formula).create(runtime.clone())
    }

    /// Create a computed cell whose formula can fail.
    pub fn try_computed<E>(formula: impl Fn() -> Result<T, E> + 'static) -> Self
    where
        E: Into<BoxError>,
    {
        Self::try_computed_in(&Runtime::current(), formula)
    }

    pub fn try_computed_in<E>(runtime: &Runtime, formula: impl Fn() -> Result<T, E> + 'static) -> Self
    where
        E: Into<BoxError>,
    {
        CellBuilder::try_computed(formula).create(runtime.clone())
    }

    /// Start building a plain cell with options.
    pub fn builder(value: T) -> CellBuilder<T> {
        CellBuilder::value(value)
    }

    pub fn id(&self) -> CellId {
        self.inner.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    pub fn is_computed(&self) -> bool {
        self.inner.kind == NodeKind::Computed
    }

    /// Whether this computed cell is subscribed to its masters.
    pub fn is_active(&self) -> bool {
        self.inner.runtime.is_active(self.inner.id)
    }

    /// Topological level, 0 for plain cells and cells without masters.
    pub fn level(&self) -> usize {
        self.inner
            .runtime
            .with_node(self.inner.id, Node::level)
            .unwrap_or(0)
    }

    /// The owner given at construction, if it has type `O`.
    pub fn owner<O: Any>(&self) -> Option<Rc<O>> {
        self.inner.hooks.owner.clone()?.downcast::<O>().ok()
    }

    /// The value the cell was created with (plain cells only).
    pub fn initial_value(&self) -> Option<T> {
        self.inner.state.borrow().initial_value.clone()
    }

    /// Read the current value.
    ///
    /// Pending writes are released first, and a formula reading this cell
    /// records it as a master.
    ///
    /// # Panics
    ///
    /// Panics if the cell has no value: a computed cell whose formula has
    /// failed every time so far. Inside a formula the failure becomes that
    /// formula's error instead. Use [`try_read`](Self::try_read) to handle it.
    pub fn read(&self) -> T {
        match self.try_read() {
            Ok(value) => value,
            Err(error) => {
                if self.inner.runtime.in_formula() {
                    panic::resume_unwind(Box::new(ReadFailure(error)));
                }
                panic!("{error}")
            }
        }
    }

    /// Read the current value, or the error that keeps the cell from
    /// having one.
    pub fn try_read(&self) -> Result<T, CellError> {
        let inner = &self.inner;
        let runtime = &inner.runtime;
        runtime.flush();

        let in_cycle = runtime.is_evaluating(inner.id);
        if !in_cycle {
            inner.refresh_if_stale();
        }
        runtime.track(inner.id);
        inner.current(in_cycle)
    }

    /// Read without recording a dependency.
    pub fn read_untracked(&self) -> T {
        self.inner.runtime.untracked(|| self.read())
    }

    /// Write a new value.
    ///
    /// Returns `Ok(false)` when the value equals the current one. The change
    /// is released on the next flush; several writes within one turn are
    /// reported as a single change.
    pub fn write(&self, value: T) -> Result<bool, CellError> {
        let inner = &self.inner;
        if inner.kind == NodeKind::Computed {
            if inner.hooks.write.is_none() {
                return Err(CellError::ImmutableWrite { cell: inner.id });
            }
            // Compare against the current value, not a lazy cache.
            inner.runtime.flush();
            if !inner.runtime.is_evaluating(inner.id) {
                inner.refresh_if_stale();
            }
        }

        let unchanged = inner
            .state
            .borrow()
            .value
            .as_ref()
            .is_some_and(|old| (inner.hooks.equality)(old, &value));
        if unchanged {
            return Ok(false);
        }
        if let Some(validate) = &inner.hooks.validate {
            validate(&value).map_err(CellError::validation)?;
        }

        match &inner.hooks.write {
            Some(write) if inner.kind == NodeKind::Computed => write(value),
            _ => inner.replace_value(value),
        }
        Ok(true)
    }

    /// Write a value derived from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<bool, CellError> {
        let current = self.read_untracked();
        self.write(f(&current))
    }

    /// Whether the value changed in the most recent release pass.
    pub fn changed(&self) -> bool {
        let runtime = &self.inner.runtime;
        runtime.flush();
        runtime.changed(self.inner.id)
    }

    /// Register a change listener. A computed cell becomes active.
    pub fn on_change(&self, listener: Listener<ChangeEvent<T>>) -> bool {
        let runtime = &self.inner.runtime;
        runtime.flush();

        let added = self.inner.changes.on(listener);
        if added && self.is_computed() {
            runtime.activate(self.inner.id);
        }
        added
    }

    pub fn off_change(&self, listener: &Listener<ChangeEvent<T>>) -> bool {
        let runtime = &self.inner.runtime;
        runtime.flush();

        let removed = self.inner.changes.off(listener);
        if removed {
            runtime.deactivate_if_unobserved(self.inner.id);
        }
        removed
    }

    /// Register an error listener. Errors of masters reach it too.
    pub fn on_error(&self, listener: Listener<ErrorEvent>) -> bool {
        self.inner.runtime.flush();
        self.inner.errors.on(listener)
    }

    pub fn off_error(&self, listener: &Listener<ErrorEvent>) -> bool {
        self.inner.runtime.flush();
        self.inner.errors.off(listener)
    }

    /// Register one listener for both changes and errors.
    pub fn subscribe(&self, listener: SubscribeListener<T>) -> bool {
        let known = self
            .inner
            .subscriptions
            .borrow()
            .iter()
            .any(|s| same_listener(&s.listener, &listener));
        if known {
            return false;
        }

        let change: Listener<ChangeEvent<T>> = {
            let listener = listener.clone();
            Rc::new(move |event: &ChangeEvent<T>| listener(Notification::Change(event)))
        };
        let error: Listener<ErrorEvent> = {
            let listener = listener.clone();
            Rc::new(move |event: &ErrorEvent| listener(Notification::Error(event)))
        };
        self.inner.subscriptions.borrow_mut().push(Subscription {
            listener,
            change: change.clone(),
            error: error.clone(),
        });

        self.on_error(error);
        self.on_change(change);
        true
    }

    pub fn unsubscribe(&self, listener: &SubscribeListener<T>) -> bool {
        let subscription = {
            let mut subscriptions = self.inner.subscriptions.borrow_mut();
            subscriptions
                .iter()
                .position(|s| same_listener(&s.listener, listener))
                .map(|index| subscriptions.remove(index))
        };
        let Some(subscription) = subscription else {
            return false;
        };

        self.off_change(&subscription.change);
        self.off_error(&subscription.error);
        true
    }

    /// Drop this cell's listeners and cut its edges to dependents.
    ///
    /// An active computed cell also disposes the cells observing it. The
    /// handle stays usable as a fresh, unobserved cell.
    pub fn dispose(&self) {
        let runtime = &self.inner.runtime;
        runtime.flush();
        runtime.dispose(self.inner.id);
    }
}

impl<T: 'static> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Cell");
        debug.field("id", &self.inner.id).field("kind", &self.inner.kind);
        match self.inner.state.try_borrow() {
            Ok(state) => debug.field("value", &state.value),
            Err(_) => debug.field("value", &"<borrowed>"),
        };
        debug.finish()
    }
}

impl<T: Clone + PartialEq + 'static> CellInner<T> {
    fn current(&self, in_cycle: bool) -> Result<T, CellError> {
        let value = {
            let state = self.state.borrow();
            match &state.value {
                Some(value) => value.clone(),
                None if in_cycle => return Err(CellError::CircularDependency { cell: self.id }),
                None => {
                    return Err(state
                        .error
                        .clone()
                        .unwrap_or(CellError::Unresolved { cell: self.id }))
                }
            }
        };
        Ok(match &self.hooks.read {
            Some(map) => map(&value),
            None => value,
        })
    }

    /// Re-run the formula of a lazy computed cell whose inputs changed.
    fn refresh_if_stale(&self) {
        let runtime = &self.runtime;
        if self.kind == NodeKind::Computed && !runtime.is_active(self.id) && runtime.is_stale(self.id) {
            self.refresh();
        }
    }

    fn run_formula(&self) -> Result<T, CellError> {
        let formula = self
            .formula
            .as_ref()
            .ok_or(CellError::Unresolved { cell: self.id })?;
        let value = formula().map_err(|err| CellError::formula(self.id, err))?;
        if let Some(validate) = &self.hooks.validate {
            validate(&value).map_err(|err| CellError::formula(self.id, err))?;
        }
        Ok(value)
    }

    /// Store a freshly computed value.
    ///
    /// Returns the previous value when it differs.
    fn store(&self, value: T) -> Option<Option<T>> {
        let mut state = self.state.borrow_mut();
        state.error = None;
        let same = state
            .value
            .as_ref()
            .is_some_and(|old| (self.hooks.equality)(old, &value));
        if same {
            return None;
        }
        state.fixed_value = Some(value.clone());
        Some(state.value.replace(value))
    }

    fn fail(&self, error: CellError) {
        self.state.borrow_mut().error = Some(error.clone());
        self.runtime.handle_error(self.id, error);
    }

    fn emit_change(&self, old_value: Option<T>) {
        if self.changes.is_empty() {
            return;
        }
        let value = self.state.borrow().value.clone();
        if let (Some(old_value), Some(value)) = (old_value, value) {
            self.changes.emit(&ChangeEvent {
                target: self.id,
                old_value,
                value,
            });
        }
    }

    /// Set a plain cell's value and extend, start or cancel its pending
    /// change.
    fn replace_value(&self, value: T) {
        let old = self.state.borrow_mut().value.replace(value.clone());
        self.runtime.advance_epoch();
        self.rewire_nested(old.as_ref(), Some(&value));
        let Some(old) = old else {
            return;
        };

        enum Step {
            Start,
            Extend,
            Cancel,
        }

        let step = {
            let mut state = self.state.borrow_mut();
            let back_to_fixed = state
                .fixed_value
                .as_ref()
                .is_some_and(|fixed| (self.hooks.equality)(fixed, &value));
            let step = match &state.pending {
                None => Step::Start,
                Some(pending) if pending.cancellable && back_to_fixed => Step::Cancel,
                Some(_) => Step::Extend,
            };
            match step {
                Step::Start => {
                    state.pending = Some(PendingChange {
                        old_value: old,
                        writes: 1,
                        cancellable: true,
                    });
                }
                Step::Extend => {
                    if let Some(pending) = state.pending.as_mut() {
                        pending.writes += 1;
                    }
                }
                Step::Cancel => state.pending = None,
            }
            step
        };

        match step {
            Step::Start => self.runtime.enqueue_change(self.id),
            Step::Cancel => self.runtime.cancel_change(self.id),
            Step::Extend => {}
        }
    }

    /// The held value changed in place.
    fn on_value_change(&self) {
        let start = {
            let mut state = self.state.borrow_mut();
            let at_fixed = match (&state.value, &state.fixed_value) {
                (Some(value), Some(fixed)) => (self.hooks.equality)(value, fixed),
                _ => false,
            };
            if let Some(pending) = state.pending.as_mut() {
                pending.writes += 1;
                if at_fixed {
                    pending.cancellable = false;
                }
                false
            } else if let Some(value) = state.value.clone() {
                state.pending = Some(PendingChange {
                    old_value: value,
                    writes: 1,
                    cancellable: false,
                });
                true
            } else {
                false
            }
        };
        self.runtime.advance_epoch();
        if start {
            self.runtime.enqueue_change(self.id);
        }
    }

    fn rewire_nested(&self, old: Option<&T>, new: Option<&T>) {
        let Some(project) = &self.hooks.nested else {
            return;
        };
        if let Some(source) = old.and_then(|value| project(value)) {
            source.off(&self.nested_listener);
        }
        if let Some(source) = new.and_then(|value| project(value)) {
            source.on(self.nested_listener.clone());
        }
    }
}

impl<T: Clone + PartialEq + 'static> Reactive for CellInner<T> {
    fn commit(&self) {
        let old_value = {
            let mut state = self.state.borrow_mut();
            let Some(pending) = state.pending.take() else {
                return;
            };
            state.fixed_value = state.value.clone();
            trace!(cell = %self.id, writes = pending.writes, "commit");
            pending.old_value
        };

        let runtime = &self.runtime;
        runtime.fix(self.id);
        runtime.mark_changed(self.id);
        runtime.advance_epoch();
        // Slaves are queued before listeners run, so a listener that
        // unwinds cannot strand them.
        runtime.invalidate_slaves(self.id);
        self.emit_change(Some(old_value));
    }

    fn recalc(&self) {
        let runtime = &self.runtime;
        if let Err(error) = runtime.begin_recalc(self.id) {
            self.fail(error);
            return;
        }

        let (frame, result) = runtime.evaluate(self.id, || self.run_formula());
        if runtime.rewire(self.id, frame) == Rewire::Deferred {
            return;
        }
        runtime.fix(self.id);

        match result {
            Ok(value) => {
                if let Some(old_value) = self.store(value) {
                    trace!(cell = %self.id, "recalculated");
                    runtime.mark_changed(self.id);
                    runtime.advance_epoch();
                    runtime.invalidate_slaves(self.id);
                    self.emit_change(old_value);
                }
            }
            Err(error) => self.fail(error),
        }
    }

    fn refresh(&self) {
        let runtime = &self.runtime;
        let (frame, result) = runtime.evaluate(self.id, || self.run_formula());
        runtime.record_masters(self.id, frame);

        match result {
            Ok(value) => {
                if self.store(value).is_some() {
                    runtime.mark_changed(self.id);
                }
            }
            Err(error) => self.fail(error),
        }
    }

    fn emit_error(&self, event: &ErrorEvent) {
        self.errors.emit(event);
    }

    fn has_change_listeners(&self) -> bool {
        !self.changes.is_empty()
    }

    fn clear_listeners(&self) {
        self.changes.clear();
        self.errors.clear();
        let subscriptions = std::mem::take(&mut *self.subscriptions.borrow_mut());
        drop(subscriptions);
    }
}

impl<T: 'static> Drop for CellInner<T> {
    fn drop(&mut self) {
        if let (Some(project), Some(value)) = (&self.hooks.nested, &self.state.get_mut().value) {
            if let Some(source) = project(value) {
                source.off(&self.nested_listener);
            }
        }
        self.runtime.forget(self.id);
    }
}

/// Builder for cells with options.
///
/// ```rust
/// use trellis_core::{Cell, CellBuilder, Runtime};
///
/// let runtime = Runtime::new();
/// let percent = Cell::builder(50)
///     .runtime(&runtime)
///     .validate(|value: &i32| {
///         if (0..=100).contains(value) {
///             Ok(())
///         } else {
///             Err(format!("{value} is out of range"))
///         }
///     })
///     .build()
///     .unwrap();
///
/// assert!(percent.write(150).is_err());
/// assert_eq!(percent.read(), 50);
/// ```
pub struct CellBuilder<T: 'static> {
    source: Source<T>,
    runtime: Option<Runtime>,
    owner: Option<Rc<dyn Any>>,
    read: Option<ReadMap<T>>,
    write: Option<Inverse<T>>,
    validate: Option<Validator<T>>,
    equality: Option<Equality<T>>,
    nested: Option<Nested<T>>,
    on_change: Option<Listener<ChangeEvent<T>>>,
    on_error: Option<Listener<ErrorEvent>>,
}

impl<T: Clone + PartialEq + 'static> CellBuilder<T> {
    fn with_source(source: Source<T>) -> Self {
        Self {
            source,
            runtime: None,
            owner: None,
            read: None,
            write: None,
            validate: None,
            equality: None,
            nested: None,
            on_change: None,
            on_error: None,
        }
    }

    /// Build a plain cell holding `value`.
    pub fn value(value: T) -> Self {
        Self::with_source(Source::Value(value))
    }

    /// Build a computed cell.
    pub fn computed(formula: impl Fn() -> T + 'static) -> Self {
        Self::with_source(Source::Formula(Rc::new(move || -> Result<T, BoxError> {
            Ok(formula())
        })))
    }

    /// Build a computed cell whose formula can fail.
    pub fn try_computed<E>(formula: impl Fn() -> Result<T, E> + 'static) -> Self
    where
        E: Into<BoxError>,
    {
        Self::with_source(Source::Formula(Rc::new(move || -> Result<T, BoxError> {
            formula().map_err(Into::into)
        })))
    }

    /// Place the cell in `runtime` instead of the current thread's one.
    pub fn runtime(mut self, runtime: &Runtime) -> Self {
        self.runtime = Some(runtime.clone());
        self
    }

    /// Attach an arbitrary owner, retrievable with [`Cell::owner`].
    pub fn owner<O: Any>(mut self, owner: Rc<O>) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Transform every value handed out by reads.
    pub fn read(mut self, map: impl Fn(&T) -> T + 'static) -> Self {
        self.read = Some(Rc::new(map));
        self
    }

    /// Make a computed cell writable by redirecting writes to `inverse`.
    pub fn write(mut self, inverse: impl Fn(T) + 'static) -> Self {
        self.write = Some(Rc::new(inverse));
        self
    }

    /// Reject values before they are stored.
    ///
    /// Writes fail with [`CellError::Validation`]; a computed result that
    /// fails validation is reported as a formula error.
    pub fn validate<E>(mut self, validate: impl Fn(&T) -> Result<(), E> + 'static) -> Self
    where
        E: Into<BoxError>,
    {
        self.validate = Some(Rc::new(move |value: &T| -> Result<(), BoxError> {
            validate(value).map_err(Into::into)
        }));
        self
    }

    /// Replace [`same_value`] as the change test.
    pub fn equality(mut self, equality: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.equality = Some(Rc::new(equality));
        self
    }

    /// Treat values that expose a [`ChangeSource`] as observable: their
    /// emissions count as changes of the cell.
    pub fn nested(mut self, project: impl Fn(&T) -> Option<ChangeSource> + 'static) -> Self {
        self.nested = Some(Rc::new(project));
        self
    }

    pub fn on_change(mut self, listener: impl Fn(&ChangeEvent<T>) + 'static) -> Self {
        self.on_change = Some(Rc::new(listener));
        self
    }

    pub fn on_error(mut self, listener: impl Fn(&ErrorEvent) + 'static) -> Self {
        self.on_error = Some(Rc::new(listener));
        self
    }

    /// Create the cell.
    ///
    /// Fails if a plain cell's initial value does not pass validation.
    pub fn build(self) -> Result<Cell<T>, CellError> {
        if let (Source::Value(value), Some(validate)) = (&self.source, &self.validate) {
            validate(value).map_err(CellError::validation)?;
        }
        let runtime = self.runtime.clone().unwrap_or_else(Runtime::current);
        Ok(self.create(runtime))
    }

    fn create(self, runtime: Runtime) -> Cell<T> {
        let Self {
            source,
            owner,
            read,
            write,
            validate,
            equality,
            nested,
            on_change,
            on_error,
            ..
        } = self;

        let (kind, formula, value) = match source {
            Source::Value(value) => (NodeKind::Plain, None, Some(value)),
            Source::Formula(formula) => (NodeKind::Computed, Some(formula), None),
        };
        let id = CellId::new();

        let inner = Rc::new_cyclic(|weak: &Weak<CellInner<T>>| {
            let weak = weak.clone();
            let nested_listener: Listener<()> = Rc::new(move |_: &()| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_value_change();
                }
            });

            CellInner {
                id,
                kind,
                runtime: runtime.clone(),
                formula,
                hooks: Hooks {
                    owner,
                    read,
                    write,
                    validate,
                    equality: equality.unwrap_or_else(|| Rc::new(same_value::<T>) as Equality<T>),
                    nested,
                },
                state: RefCell::new(ValueState {
                    value: value.clone(),
                    fixed_value: value.clone(),
                    initial_value: value,
                    pending: None,
                    error: None,
                }),
                changes: Emitter::new(),
                errors: Emitter::new(),
                subscriptions: RefCell::new(Vec::new()),
                nested_listener,
            }
        });

        let weak: Weak<dyn Reactive> = Rc::downgrade(&inner) as Weak<dyn Reactive>;
        runtime.register(Node::new(id, kind), weak);

        let initial = inner.state.borrow().value.clone();
        inner.rewire_nested(None, initial.as_ref());

        let cell = Cell { inner };
        if let Some(listener) = on_error {
            cell.on_error(listener);
        }
        if let Some(listener) = on_change {
            cell.on_change(listener);
        }
        trace!(cell = %id, ?kind, "cell created");
        cell
    }
}
