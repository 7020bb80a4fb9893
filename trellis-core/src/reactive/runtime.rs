//! Reactive Runtime
//!
//! The runtime is the central coordinator behind every cell. It owns the
//! dependency graph, the release plan and the dependency tracker, and it
//! runs release passes.
//!
//! # How It Works
//!
//! 1. When a cell is created, it registers with the runtime. The runtime
//!    keeps a weak reference only; dropping the last handle unregisters it.
//!
//! 2. A write queues the cell at level 0 and asks the runtime's
//!    [`NextTick`] for a deferred flush.
//!
//! 3. A release pass drains the plan level by level:
//!    a. Level 0 commits pending changes of plain cells
//!    b. Higher levels re-run formulas of computed cells
//!    c. Every committed change queues the cell's slaves at their own level
//!
//! 4. Reads, listener registration and disposal flush synchronously first,
//!    so callers always observe settled state.
//!
//! # Threading
//!
//! Cells are `!Send`. Each thread has its own default runtime
//! ([`Runtime::current`]); isolated runtimes can be created with
//! [`Runtime::new`] and handed to cells explicitly.

use std::any::Any;
use std::cell::{Cell as Flag, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use super::context::{EvaluationContext, Frame};
use super::event::ErrorEvent;
use super::tick::{NextTick, TurnQueue};
use crate::config::RuntimeConfig;
use crate::error::{CellError, FormulaPanic};
use crate::graph::{CellId, Graph, GraphSnapshot, Node, ReleasePlan};

/// The typed half of a cell, as seen by the runtime.
pub(crate) trait Reactive {
    /// Commit the pending change chain (level 0).
    fn commit(&self);

    /// Re-run the formula during a release pass.
    fn recalc(&self);

    /// Re-run the formula outside the release plan (lazy read, activation).
    fn refresh(&self);

    /// Hand an error event to this cell's own listeners.
    fn emit_error(&self, event: &ErrorEvent);

    fn has_change_listeners(&self) -> bool;

    /// Drop every listener and subscription.
    fn clear_listeners(&self);
}

/// Unwind payload of a failed read inside a formula.
pub(crate) struct ReadFailure(pub CellError);

/// Outcome of re-wiring a cell after its formula ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rewire {
    /// The cell stays at its level; its result can be committed.
    Settled,
    /// The cell moved up and was queued again at its new level.
    Deferred,
}

thread_local! {
    static CURRENT: Runtime = Runtime::new();
}

/// Handle to a cell runtime. Clones share the same runtime.
#[derive(Clone)]
pub struct Runtime {
    shared: Rc<Shared>,
}

struct Shared {
    config: RuntimeConfig,
    graph: RefCell<Graph>,
    plan: RefCell<ReleasePlan>,
    registry: RefCell<HashMap<CellId, Weak<dyn Reactive>>>,
    context: EvaluationContext,
    /// Completed release passes, starting at 1.
    pass: Flag<u64>,
    /// Advanced by every write and committed change. Lazy caches stamped
    /// with an older epoch are stale.
    epoch: Flag<u64>,
    releasing: Flag<bool>,
    flush_armed: Flag<bool>,
    tick: Rc<dyn NextTick>,
    /// Set when the runtime owns its tick and can end the turn itself.
    turn_queue: Option<Rc<TurnQueue>>,
}

/// Clears the releasing flag even when a listener unwinds.
struct ReleaseGuard<'a>(&'a Flag<bool>);

impl<'a> ReleaseGuard<'a> {
    fn enter(flag: &'a Flag<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Runtime {
    /// Create a runtime whose deferred flushes run on [`end_turn`](Self::end_turn).
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let queue = Rc::new(TurnQueue::new());
        Self::build(config, queue.clone(), Some(queue))
    }

    /// Create a runtime that defers flushes through `tick`.
    pub fn with_tick(config: RuntimeConfig, tick: impl NextTick + 'static) -> Self {
        Self::build(config, Rc::new(tick), None)
    }

    fn build(config: RuntimeConfig, tick: Rc<dyn NextTick>, turn_queue: Option<Rc<TurnQueue>>) -> Self {
        Self {
            shared: Rc::new(Shared {
                config,
                graph: RefCell::new(Graph::new()),
                plan: RefCell::new(ReleasePlan::new()),
                registry: RefCell::new(HashMap::new()),
                context: EvaluationContext::new(),
                pass: Flag::new(1),
                epoch: Flag::new(1),
                releasing: Flag::new(false),
                flush_armed: Flag::new(false),
                tick,
                turn_queue,
            }),
        }
    }

    /// The runtime cells use when none is given explicitly.
    pub fn current() -> Self {
        CURRENT.with(Runtime::clone)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Number of the next release pass.
    pub fn pass(&self) -> u64 {
        self.shared.pass.get()
    }

    /// Check if a release pass is running.
    pub fn is_releasing(&self) -> bool {
        self.shared.releasing.get()
    }

    /// Check if writes are waiting to be released.
    pub fn has_pending(&self) -> bool {
        self.shared.plan.borrow().has_work()
    }

    /// Number of live cells.
    pub fn cell_count(&self) -> usize {
        self.shared.registry.borrow().len()
    }

    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    /// Run a release pass now, unless one is already running.
    pub fn flush(&self) {
        self.release();
    }

    /// End the current turn: run deferred flushes.
    ///
    /// With an external [`NextTick`] the runtime does not own the turn, so
    /// this flushes directly.
    pub fn end_turn(&self) {
        match &self.shared.turn_queue {
            Some(queue) => {
                queue.run();
            }
            None => self.flush(),
        }
    }

    /// Run `f` without recording its reads as dependencies.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _quiet = self.shared.context.untracked();
        f()
    }

    /// Serializable view of the dependency graph.
    pub fn snapshot(&self) -> GraphSnapshot {
        self.shared.graph.borrow().snapshot(self.pass())
    }

    // Registry

    pub(crate) fn register(&self, node: Node, cell: Weak<dyn Reactive>) {
        let id = node.id();
        self.shared.graph.borrow_mut().add_node(node);
        self.shared.registry.borrow_mut().insert(id, cell);
    }

    /// Remove a cell whose last handle was dropped.
    pub(crate) fn forget(&self, id: CellId) {
        self.shared.registry.borrow_mut().remove(&id);
        self.shared.plan.borrow_mut().remove(id);

        let removed = self.shared.graph.borrow_mut().remove_node(id);
        if let Some(node) = removed {
            if node.is_active() {
                for master in node.masters() {
                    self.deactivate_if_unobserved(*master);
                }
            }
        }
        trace!(cell = %id, "cell dropped");
    }

    fn lookup(&self, id: CellId) -> Option<Rc<dyn Reactive>> {
        self.shared.registry.borrow().get(&id).and_then(Weak::upgrade)
    }

    pub(crate) fn with_node<R>(&self, id: CellId, f: impl FnOnce(&Node) -> R) -> Option<R> {
        self.shared.graph.borrow().get_node(id).map(f)
    }

    fn with_node_mut<R>(&self, id: CellId, f: impl FnOnce(&mut Node) -> R) -> Option<R> {
        self.shared.graph.borrow_mut().get_node_mut(id).map(f)
    }

    // Tracking

    pub(crate) fn is_evaluating(&self, id: CellId) -> bool {
        self.shared.context.is_evaluating(id)
    }

    pub(crate) fn in_formula(&self) -> bool {
        self.shared.context.in_evaluation()
    }

    /// Record a read of `id` by the formula being evaluated, if any.
    pub(crate) fn track(&self, id: CellId) {
        let level = self.shared.graph.borrow().level(id);
        self.shared.context.track(id, level);
    }

    /// Run a formula for `id`, recording its reads.
    ///
    /// Panics are turned into errors; a failed read of another cell
    /// surfaces as that cell's error.
    pub(crate) fn evaluate<T>(
        &self,
        id: CellId,
        formula: impl FnOnce() -> Result<T, CellError>,
    ) -> (Frame, Result<T, CellError>) {
        let guard = self.shared.context.enter(id);
        let result = panic::catch_unwind(AssertUnwindSafe(formula))
            .unwrap_or_else(|payload| Err(panic_error(id, payload)));
        (guard.finish(), result)
    }

    // Evaluation bookkeeping

    pub(crate) fn is_active(&self, id: CellId) -> bool {
        self.with_node(id, Node::is_active).unwrap_or(false)
    }

    /// Whether a lazy read of `id` must recompute.
    pub(crate) fn is_stale(&self, id: CellId) -> bool {
        let epoch = self.shared.epoch.get();
        self.with_node(id, |node| node.evaluated_at != epoch)
            .unwrap_or(true)
    }

    /// Invalidate every lazy cache. Called on writes and committed changes.
    pub(crate) fn advance_epoch(&self) {
        let epoch = &self.shared.epoch;
        epoch.set(epoch.get() + 1);
    }

    /// Store the masters found by an evaluation outside the release plan.
    ///
    /// No edges are touched: the cell is either inactive or about to
    /// register with its masters.
    pub(crate) fn record_masters(&self, id: CellId, frame: Frame) {
        let epoch = self.shared.epoch.get();
        self.with_node_mut(id, |node| {
            node.replace_masters(frame.masters, frame.level);
            node.evaluated_at = epoch;
        });
    }

    /// Stamp a recalculation of `id` and run the circuit breaker.
    pub(crate) fn begin_recalc(&self, id: CellId) -> Result<(), CellError> {
        let stamp = self.pass() + 1;
        let limit = self.shared.config.circularity_limit;

        let tripped = self
            .with_node_mut(id, |node| {
                if node.version == stamp {
                    node.circularity_counter += 1;
                } else {
                    node.circularity_counter = 1;
                }
                node.version = stamp;

                let tripped = node.circularity_counter >= limit;
                if tripped {
                    node.fixed = true;
                }
                tripped
            })
            .unwrap_or(false);

        if tripped {
            warn!(cell = %id, limit, "circular dependency detected");
            return Err(CellError::CircularDependency { cell: id });
        }
        Ok(())
    }

    /// Apply the masters found by a recalculation.
    ///
    /// Active cells have their edges diffed: dropped masters first, then new
    /// ones. A cell that moved up a level is queued again there and must not
    /// commit yet.
    pub(crate) fn rewire(&self, id: CellId, frame: Frame) -> Rewire {
        let Frame { masters, level, .. } = frame;

        let wiring = self.with_node_mut(id, |node| {
            let old_level = node.level;
            let old_masters = node.replace_masters(masters.clone(), level);
            (old_masters, old_level, node.active)
        });
        let Some((old_masters, old_level, active)) = wiring else {
            return Rewire::Settled;
        };

        if active {
            for master in old_masters.iter().filter(|m| !masters.contains(*m)) {
                self.unregister_slave(*master, id);
            }
            for master in masters.iter().filter(|m| !old_masters.contains(*m)) {
                self.register_slave(*master, id);
            }
        }

        if level > old_level {
            trace!(cell = %id, from = old_level, to = level, "level raised");
            self.shared.plan.borrow_mut().enqueue(level, id);
            return Rewire::Deferred;
        }
        Rewire::Settled
    }

    pub(crate) fn fix(&self, id: CellId) {
        self.with_node_mut(id, |node| node.fixed = true);
    }

    /// Record that the committed value of `id` changed.
    pub(crate) fn mark_changed(&self, id: CellId) {
        let epoch = if self.is_releasing() {
            self.pass() + 1
        } else {
            self.pass()
        };
        self.with_node_mut(id, |node| node.changed_at = Some(epoch));
    }

    /// Whether `id` changed in the most recent release pass.
    pub(crate) fn changed(&self, id: CellId) -> bool {
        let pass = self.pass();
        self.with_node(id, |node| node.changed_at == Some(pass))
            .unwrap_or(false)
    }

    /// Queue every settled slave of `id` at its own level.
    pub(crate) fn invalidate_slaves(&self, id: CellId) {
        let mut graph = self.shared.graph.borrow_mut();
        let mut plan = self.shared.plan.borrow_mut();

        let slaves: Vec<CellId> = graph
            .get_node(id)
            .map(|node| node.slaves().iter().copied().collect())
            .unwrap_or_default();

        for slave in slaves {
            if let Some(node) = graph.get_node_mut(slave) {
                if node.fixed {
                    node.fixed = false;
                    plan.enqueue(node.level, slave);
                }
            }
        }
    }

    // Writes

    /// Queue the pending change of a plain cell.
    pub(crate) fn enqueue_change(&self, id: CellId) {
        self.with_node_mut(id, |node| node.fixed = false);
        self.shared.plan.borrow_mut().enqueue(0, id);
        self.arm_flush();
    }

    /// Drop a pending change that was written back to its committed value.
    pub(crate) fn cancel_change(&self, id: CellId) {
        self.shared.plan.borrow_mut().cancel(0, id);
        self.fix(id);
        trace!(cell = %id, "pending change cancelled");
    }

    fn arm_flush(&self) {
        let shared = &self.shared;
        if shared.releasing.get() || shared.flush_armed.get() {
            return;
        }
        shared.flush_armed.set(true);

        let weak = Rc::downgrade(shared);
        shared.tick.schedule(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.flush_armed.set(false);
                Runtime { shared }.flush();
            }
        }));
    }

    /// Drain the plan.
    ///
    /// If a listener unwinds, the plan keeps what was left, including the
    /// slaves of the cell whose listener failed, and the pass number does
    /// not advance. The next flush resumes the same pass.
    fn release(&self) {
        let shared = &self.shared;
        if shared.releasing.get() || !shared.plan.borrow().has_work() {
            return;
        }
        let _releasing = ReleaseGuard::enter(&shared.releasing);
        let pass = shared.pass.get();
        let mut processed = 0usize;

        loop {
            let next = shared.plan.borrow_mut().next();
            let Some((level, id)) = next else {
                break;
            };
            let Some(cell) = self.lookup(id) else {
                continue;
            };

            trace!(cell = %id, level, pass, "release");
            if self.with_node(id, Node::is_computed).unwrap_or(false) {
                cell.recalc();
            } else {
                cell.commit();
            }
            processed += 1;
        }

        shared.plan.borrow_mut().reset();
        shared.pass.set(pass + 1);
        debug!(pass, processed, "release pass complete");
    }

    // Activation

    /// Subscribe a computed cell to its masters, evaluating it if stale.
    pub(crate) fn activate(&self, id: CellId) {
        let Some(cell) = self.lookup(id) else {
            return;
        };
        let was_active = self
            .with_node_mut(id, |node| std::mem::replace(&mut node.active, true))
            .unwrap_or(true);
        if was_active {
            return;
        }

        if self.is_stale(id) {
            cell.refresh();
        }
        let masters = self.with_node(id, |node| node.masters.clone()).unwrap_or_default();
        for master in masters {
            self.register_slave(master, id);
        }
        trace!(cell = %id, "activated");
    }

    pub(crate) fn deactivate(&self, id: CellId) {
        let was_active = self
            .with_node_mut(id, |node| std::mem::replace(&mut node.active, false))
            .unwrap_or(false);
        if !was_active {
            return;
        }

        let masters = self.with_node(id, |node| node.masters.clone()).unwrap_or_default();
        for master in masters {
            self.unregister_slave(master, id);
        }
        trace!(cell = %id, "deactivated");
    }

    /// Deactivate a computed cell nothing observes any more.
    pub(crate) fn deactivate_if_unobserved(&self, id: CellId) {
        let candidate = self
            .with_node(id, |node| node.is_computed() && node.is_active() && node.slaves().is_empty())
            .unwrap_or(false);
        if !candidate {
            return;
        }
        let listened = self
            .lookup(id)
            .map(|cell| cell.has_change_listeners())
            .unwrap_or(false);
        if !listened {
            self.deactivate(id);
        }
    }

    fn register_slave(&self, master: CellId, slave: CellId) {
        let activate = {
            let mut graph = self.shared.graph.borrow_mut();
            graph.add_edge(master, slave);
            graph
                .get_node(master)
                .map(|node| node.is_computed() && !node.is_active())
                .unwrap_or(false)
        };
        if activate {
            self.activate(master);
        }
    }

    fn unregister_slave(&self, master: CellId, slave: CellId) {
        self.shared.graph.borrow_mut().remove_edge(master, slave);
        self.deactivate_if_unobserved(master);
    }

    // Errors

    /// Raise `error` at `id` and deliver it through the slave graph.
    pub(crate) fn handle_error(&self, id: CellId, error: CellError) {
        warn!(cell = %id, error = %error, "cell failed");
        let event = ErrorEvent::new(id, error);
        self.deliver_error(id, &event);
    }

    fn deliver_error(&self, id: CellId, event: &ErrorEvent) {
        let first_visit = self
            .with_node_mut(id, |node| {
                if node.last_error == Some(event.id()) {
                    false
                } else {
                    node.last_error = Some(event.id());
                    true
                }
            })
            .unwrap_or(false);
        if !first_visit {
            return;
        }

        if let Some(cell) = self.lookup(id) {
            cell.emit_error(event);
        }

        let slaves: Vec<CellId> = self
            .with_node(id, |node| node.slaves().iter().copied().collect())
            .unwrap_or_default();
        for slave in slaves {
            if event.is_propagation_stopped() {
                break;
            }
            self.deliver_error(slave, event);
        }
    }

    // Disposal

    /// Detach `id` from the graph.
    ///
    /// Only an active cell takes its slaves down with it; the slaves of a
    /// plain or lazy cell keep their own observers and just lose the edge.
    pub(crate) fn dispose(&self, id: CellId) {
        let mut visited = HashSet::new();
        self.dispose_from(id, &mut visited);
    }

    fn dispose_from(&self, id: CellId, visited: &mut HashSet<CellId>) {
        if !visited.insert(id) {
            return;
        }
        if let Some(cell) = self.lookup(id) {
            cell.clear_listeners();
        }

        let (active, slaves) = self
            .with_node(id, |node| {
                let slaves: Vec<CellId> = node.slaves().iter().copied().collect();
                (node.is_active(), slaves)
            })
            .unwrap_or_default();
        if active {
            for slave in slaves {
                self.dispose_from(slave, visited);
            }
        }

        self.detach_slaves(id);
        self.deactivate_if_unobserved(id);
        self.shared.plan.borrow_mut().remove(id);

        self.with_node_mut(id, |node| {
            node.fixed = true;
            node.last_error = None;
            if !node.active {
                node.replace_masters(Default::default(), 0);
                node.version = 0;
                node.evaluated_at = 0;
            }
        });
        debug!(cell = %id, active, "disposed");
    }

    /// Cut every `id -> slave` edge on both sides.
    fn detach_slaves(&self, id: CellId) {
        let mut graph = self.shared.graph.borrow_mut();
        let slaves = graph
            .get_node_mut(id)
            .map(|node| std::mem::take(&mut node.slaves))
            .unwrap_or_default();
        for slave in slaves {
            if let Some(node) = graph.get_node_mut(slave) {
                node.remove_master(id);
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("pass", &self.pass())
            .field("releasing", &self.is_releasing())
            .field("cells", &self.cell_count())
            .field("config", &self.shared.config)
            .finish()
    }
}

fn panic_error(id: CellId, payload: Box<dyn Any + Send>) -> CellError {
    if let Some(ReadFailure(error)) = payload.downcast_ref::<ReadFailure>() {
        return error.clone();
    }
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    CellError::formula(id, Box::new(FormulaPanic(message)))
}
