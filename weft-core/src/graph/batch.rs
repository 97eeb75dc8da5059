//! Batch Coordinator
//!
//! Writes do not run anything directly. They stage the computations that
//! read the written source into the open batch frame, and the frame is
//! drained once the outermost write or batch returns.
//!
//! # Algorithm
//!
//! 1. A write (or an explicit batch) opens a frame unless one is already
//!    open, in which case it runs inline against the open frame.
//! 2. Every live subscriber of a changed source is flagged stale and staged:
//!    effects into one set, derivations into another. Staging twice is a
//!    no-op. Memos further downstream of a staged derivation are flagged
//!    stale without being staged, so an effect that reads one before the
//!    drain reaches it pulls a fresh value instead of a glitch.
//! 3. When the outermost caller finishes, the frame is drained in passes.
//!    Each pass runs the staged effects (priority 0), then the staged
//!    derivations (priority 1) in topological order. With a scheduler
//!    configured, derivations are handed to it instead.
//! 4. Anything staged while a pass ran (an effect reading a memo that just
//!    changed, a memo downstream of another memo) is picked up by the next
//!    pass, until a pass finds nothing staged.
//! 5. The frame is torn down by a guard, so it closes on success, on error,
//!    and while unwinding from a panic.
//!
//! # Ordering
//!
//! A derivation that reads a memo's output set depends on that memo. Staged
//! derivations are sorted with an iterative depth-first search so every memo
//! runs before the staged memos that read it. A node reached again while it
//! is still being visited is part of a cycle; it is skipped, which keeps the
//! sort terminating at the price of order on cyclic graphs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, error, trace};

use crate::error::ReactiveError;
use crate::reactive::SubscriberSet;

use super::node::{ComputationId, NodeKind, Reactive};
use super::scheduler::Scheduler;

/// Default cap on drain passes per outermost batch.
pub const DEFAULT_MAX_DRAIN_PASSES: usize = 100;

type Staged = IndexMap<ComputationId, Rc<dyn Reactive>>;

/// Computations staged since the frame opened.
#[derive(Default)]
struct Frame {
    effects: Staged,
    derivations: Staged,
}

impl Frame {
    fn stage(&mut self, reactive: Rc<dyn Reactive>) {
        let id = reactive.node().id();
        let staged = match reactive.node().kind() {
            NodeKind::Effect => &mut self.effects,
            NodeKind::Derivation => &mut self.derivations,
        };
        staged.entry(id).or_insert(reactive);
    }
}

/// Owns the single batch frame of a runtime.
pub(crate) struct BatchCoordinator {
    frame: RefCell<Option<Frame>>,
    scheduler: RefCell<Option<Rc<dyn Scheduler>>>,
    max_passes: usize,
}

/// Closes the frame when dropped.
pub(crate) struct FrameGuard<'a> {
    coordinator: &'a BatchCoordinator,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.frame.replace(None);
        trace!("batch frame closed");
    }
}

impl BatchCoordinator {
    pub(crate) fn new(max_passes: usize) -> Self {
        Self {
            frame: RefCell::new(None),
            scheduler: RefCell::new(None),
            max_passes,
        }
    }

    /// Check whether a frame is open.
    pub(crate) fn is_open(&self) -> bool {
        self.frame.borrow().is_some()
    }

    /// Open a new frame. The caller must check [`is_open`](Self::is_open) first.
    pub(crate) fn open(&self) -> FrameGuard<'_> {
        let previous = self.frame.replace(Some(Frame::default()));
        debug_assert!(previous.is_none(), "batch frame opened twice");
        trace!("batch frame opened");
        FrameGuard { coordinator: self }
    }

    pub(crate) fn set_scheduler(&self, scheduler: Option<Rc<dyn Scheduler>>) {
        self.scheduler.replace(scheduler);
    }

    pub(crate) fn has_scheduler(&self) -> bool {
        self.scheduler.borrow().is_some()
    }

    /// Flag every live subscriber of `source` stale and stage it.
    ///
    /// Returns how many computations were staged.
    pub(crate) fn stage(&self, source: &SubscriberSet) -> usize {
        let subscribers = source.live();
        let mut frame = self.frame.borrow_mut();
        let Some(frame) = frame.as_mut() else {
            debug_assert!(false, "staging outside a batch frame");
            return 0;
        };

        let mut staged = 0;
        for subscriber in subscribers {
            let node = subscriber.node();
            if node.is_disposed() {
                continue;
            }
            node.mark_stale();
            if node.kind() == NodeKind::Derivation {
                mark_downstream_stale(&*subscriber);
            }
            trace!(computation = %node.id(), kind = ?node.kind(), "staged");
            frame.stage(subscriber);
            staged += 1;
        }
        staged
    }

    /// Take everything staged so far, or `None` if nothing is.
    fn take_pass(&self) -> Option<(Staged, Staged)> {
        let mut frame = self.frame.borrow_mut();
        let frame = frame.as_mut()?;
        if frame.effects.is_empty() && frame.derivations.is_empty() {
            return None;
        }
        Some((
            std::mem::take(&mut frame.effects),
            std::mem::take(&mut frame.derivations),
        ))
    }

    /// Drain the open frame until nothing is staged.
    ///
    /// A failing computation does not stop the drain; the first error is
    /// returned once the frame has settled.
    pub(crate) fn drain(&self) -> Result<(), ReactiveError> {
        let mut first_error = None;
        let mut record = |result: Result<(), ReactiveError>| {
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        };

        let mut passes = 0;
        while let Some((effects, derivations)) = self.take_pass() {
            if passes == self.max_passes {
                error!(passes, "batch drain did not settle; dropping staged work");
                return Err(ReactiveError::DrainLimit { passes });
            }
            passes += 1;
            trace!(
                pass = passes,
                effects = effects.len(),
                derivations = derivations.len(),
                "draining batch"
            );

            for effect in effects.into_values() {
                record(effect.run());
            }

            let scheduler = self.scheduler.borrow().clone();
            for derivation in topological_sort(derivations) {
                match &scheduler {
                    Some(scheduler) => scheduler.schedule(Box::new(move || {
                        if let Err(err) = derivation.run() {
                            error!(error = %err, "deferred memo failed");
                        }
                    })),
                    None => record(derivation.run()),
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Flag every memo that reads `root`, directly or through other memos, stale.
fn mark_downstream_stale(root: &dyn Reactive) {
    let mut stack: Vec<Rc<dyn Reactive>> = match root.output() {
        Some(output) => output.live().into_vec(),
        None => return,
    };
    while let Some(reader) = stack.pop() {
        let node = reader.node();
        if node.kind() != NodeKind::Derivation || node.is_disposed() || node.is_stale() || node.is_running() {
            continue;
        }
        node.mark_stale();
        if let Some(output) = reader.output() {
            stack.extend(output.live());
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Visited,
}

/// Order staged derivations so each runs after the staged memos it reads.
pub(crate) fn topological_sort(mut staged: Staged) -> Vec<Rc<dyn Reactive>> {
    let mut marks: HashMap<ComputationId, Mark> = HashMap::with_capacity(staged.len());
    let mut order = Vec::with_capacity(staged.len());
    let mut stack: Vec<(ComputationId, bool)> = Vec::new();

    for &root in staged.keys() {
        stack.push((root, false));

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                marks.insert(id, Mark::Visited);
                order.push(id);
                continue;
            }

            match marks.get(&id) {
                Some(Mark::Visited) => continue,
                Some(Mark::Visiting) => {
                    debug!(computation = %id, "dependency cycle while ordering; node skipped");
                    continue;
                }
                None => {}
            }

            marks.insert(id, Mark::Visiting);
            stack.push((id, true));

            let Some(reactive) = staged.get(&id) else {
                continue;
            };
            for owner in reactive.node().dependency_owners().into_iter().rev() {
                if staged.contains_key(&owner) && marks.get(&owner) != Some(&Mark::Visited) {
                    stack.push((owner, false));
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| staged.swap_remove(&id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Weak;

    use crate::graph::Node;
    use crate::graph::scheduler::TaskQueue;

    /// A graph node whose output set can be read by other probes.
    struct Probe {
        node: Node,
        output: Rc<SubscriberSet>,
        runs: Rc<RefCell<Vec<ComputationId>>>,
    }

    impl Reactive for Probe {
        fn node(&self) -> &Node {
            &self.node
        }

        fn run(&self) -> Result<(), ReactiveError> {
            self.node.begin_run();
            self.node.finish_run();
            self.runs.borrow_mut().push(self.node.id());
            Ok(())
        }

        fn output(&self) -> Option<&SubscriberSet> {
            Some(&self.output)
        }
    }

    fn probe(kind: NodeKind, runs: &Rc<RefCell<Vec<ComputationId>>>) -> Rc<Probe> {
        let node = Node::new(kind);
        let output = Rc::new(SubscriberSet::new(Some(node.id())));
        Rc::new(Probe {
            node,
            output,
            runs: runs.clone(),
        })
    }

    /// Make `reader` depend on `source`'s output.
    fn read(reader: &Rc<Probe>, source: &Rc<Probe>) {
        let weak: Weak<dyn Reactive> = Rc::downgrade(reader) as Weak<dyn Reactive>;
        reader.node.link(&source.output, weak);
    }

    fn staged(probes: &[&Rc<Probe>]) -> Staged {
        probes
            .iter()
            .map(|p| (p.node.id(), Rc::clone(p) as Rc<dyn Reactive>))
            .collect()
    }

    fn ids(order: &[Rc<dyn Reactive>]) -> Vec<ComputationId> {
        order.iter().map(|r| r.node().id()).collect()
    }

    #[test]
    fn sort_orders_dependencies_first() {
        let runs = Rc::new(RefCell::new(Vec::new()));
        let a = probe(NodeKind::Derivation, &runs);
        let b = probe(NodeKind::Derivation, &runs);
        let c = probe(NodeKind::Derivation, &runs);

        // c reads b, b reads a; staged in reverse order
        read(&b, &a);
        read(&c, &b);

        let order = topological_sort(staged(&[&c, &b, &a]));
        assert_eq!(ids(&order), vec![a.node.id(), b.node.id(), c.node.id()]);
    }

    #[test]
    fn sort_handles_diamonds() {
        let runs = Rc::new(RefCell::new(Vec::new()));
        let top = probe(NodeKind::Derivation, &runs);
        let left = probe(NodeKind::Derivation, &runs);
        let right = probe(NodeKind::Derivation, &runs);
        let bottom = probe(NodeKind::Derivation, &runs);

        read(&left, &top);
        read(&right, &top);
        read(&bottom, &left);
        read(&bottom, &right);

        let order = ids(&topological_sort(staged(&[&bottom, &right, &left, &top])));
        let pos = |id| order.iter().position(|x| *x == id);

        assert_eq!(order.len(), 4);
        assert!(pos(top.node.id()) < pos(left.node.id()));
        assert!(pos(top.node.id()) < pos(right.node.id()));
        assert!(pos(left.node.id()) < pos(bottom.node.id()));
        assert!(pos(right.node.id()) < pos(bottom.node.id()));
    }

    #[test]
    fn sort_tolerates_cycles() {
        let runs = Rc::new(RefCell::new(Vec::new()));
        let a = probe(NodeKind::Derivation, &runs);
        let b = probe(NodeKind::Derivation, &runs);

        read(&a, &b);
        read(&b, &a);

        let order = topological_sort(staged(&[&a, &b]));
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn sort_ignores_unstaged_owners() {
        let runs = Rc::new(RefCell::new(Vec::new()));
        let upstream = probe(NodeKind::Derivation, &runs);
        let reader = probe(NodeKind::Derivation, &runs);
        read(&reader, &upstream);

        let order = topological_sort(staged(&[&reader]));
        assert_eq!(ids(&order), vec![reader.node.id()]);
    }

    #[test]
    fn stage_splits_by_kind_and_dedupes() {
        let runs = Rc::new(RefCell::new(Vec::new()));
        let coordinator = BatchCoordinator::new(DEFAULT_MAX_DRAIN_PASSES);
        let source = probe(NodeKind::Derivation, &runs);
        let memo = probe(NodeKind::Derivation, &runs);
        let effect = probe(NodeKind::Effect, &runs);
        // Settle the memo first; a run drops its edges
        memo.node.begin_run();
        memo.node.finish_run();
        read(&memo, &source);
        read(&effect, &source);

        let _frame = coordinator.open();
        assert_eq!(coordinator.stage(&source.output), 2);
        assert_eq!(coordinator.stage(&source.output), 2);
        assert!(memo.node.is_stale());

        let (effects, derivations) = coordinator.take_pass().unwrap();
        assert_eq!(effects.len(), 1);
        assert_eq!(derivations.len(), 1);
        assert!(coordinator.take_pass().is_none());
    }

    #[test]
    fn stage_flags_downstream_memos_only() {
        let runs = Rc::new(RefCell::new(Vec::new()));
        let coordinator = BatchCoordinator::new(DEFAULT_MAX_DRAIN_PASSES);
        let source = probe(NodeKind::Derivation, &runs);
        let first = probe(NodeKind::Derivation, &runs);
        let second = probe(NodeKind::Derivation, &runs);
        let effect = probe(NodeKind::Effect, &runs);
        for p in [&first, &second, &effect] {
            p.node.begin_run();
            p.node.finish_run();
        }
        read(&first, &source);
        read(&second, &first);
        read(&effect, &second);

        let _frame = coordinator.open();
        assert_eq!(coordinator.stage(&source.output), 1);

        assert!(first.node.is_stale());
        assert!(second.node.is_stale());
        assert!(!effect.node.is_stale());

        // Only the direct reader is staged
        let (effects, derivations) = coordinator.take_pass().unwrap();
        assert!(effects.is_empty());
        assert_eq!(derivations.len(), 1);
    }

    #[test]
    fn stage_skips_disposed() {
        let runs = Rc::new(RefCell::new(Vec::new()));
        let coordinator = BatchCoordinator::new(DEFAULT_MAX_DRAIN_PASSES);
        let source = probe(NodeKind::Derivation, &runs);
        let effect = probe(NodeKind::Effect, &runs);
        read(&effect, &source);

        // Keep the edge but flag the node disposed
        effect.node.dispose();
        source
            .output
            .subscribe(effect.node.id(), Rc::downgrade(&effect) as Weak<dyn Reactive>);

        let _frame = coordinator.open();
        assert_eq!(coordinator.stage(&source.output), 0);
    }

    #[test]
    fn drain_runs_effects_before_derivations() {
        let runs = Rc::new(RefCell::new(Vec::new()));
        let coordinator = BatchCoordinator::new(DEFAULT_MAX_DRAIN_PASSES);
        let source = probe(NodeKind::Derivation, &runs);
        let memo = probe(NodeKind::Derivation, &runs);
        let effect = probe(NodeKind::Effect, &runs);
        read(&memo, &source);
        read(&effect, &source);

        let frame = coordinator.open();
        coordinator.stage(&source.output);
        coordinator.drain().unwrap();
        drop(frame);

        assert_eq!(*runs.borrow(), vec![effect.node.id(), memo.node.id()]);
        assert!(!coordinator.is_open());
    }

    #[test]
    fn scheduler_defers_derivations_only() {
        let runs = Rc::new(RefCell::new(Vec::new()));
        let coordinator = BatchCoordinator::new(DEFAULT_MAX_DRAIN_PASSES);
        let queue = Rc::new(TaskQueue::new());
        coordinator.set_scheduler(Some(queue.clone() as Rc<dyn Scheduler>));

        let source = probe(NodeKind::Derivation, &runs);
        let memo = probe(NodeKind::Derivation, &runs);
        let effect = probe(NodeKind::Effect, &runs);
        read(&memo, &source);
        read(&effect, &source);

        {
            let _frame = coordinator.open();
            coordinator.stage(&source.output);
            coordinator.drain().unwrap();
        }

        assert_eq!(*runs.borrow(), vec![effect.node.id()]);
        assert_eq!(queue.len(), 1);

        queue.run_pending();
        assert_eq!(*runs.borrow(), vec![effect.node.id(), memo.node.id()]);
    }

    /// An effect that re-stages itself every time it runs.
    struct Restager {
        node: Node,
        source: Rc<SubscriberSet>,
        coordinator: Rc<BatchCoordinator>,
        runs: Cell<usize>,
    }

    impl Reactive for Restager {
        fn node(&self) -> &Node {
            &self.node
        }

        fn run(&self) -> Result<(), ReactiveError> {
            self.runs.set(self.runs.get() + 1);
            self.coordinator.stage(&self.source);
            Ok(())
        }
    }

    #[test]
    fn drain_gives_up_after_max_passes() {
        let coordinator = Rc::new(BatchCoordinator::new(3));
        let source = Rc::new(SubscriberSet::new(None));
        let looping = Rc::new(Restager {
            node: Node::new(NodeKind::Effect),
            source: source.clone(),
            coordinator: coordinator.clone(),
            runs: Cell::new(0),
        });
        looping
            .node
            .link(&source, Rc::downgrade(&looping) as Weak<dyn Reactive>);

        let _frame = coordinator.open();
        coordinator.stage(&source);
        let err = coordinator.drain().unwrap_err();

        assert!(matches!(err, ReactiveError::DrainLimit { passes: 3 }));
        assert_eq!(looping.runs.get(), 3);
    }

    #[test]
    fn frame_guard_closes_on_drop() {
        let coordinator = BatchCoordinator::new(DEFAULT_MAX_DRAIN_PASSES);
        {
            let _frame = coordinator.open();
            assert!(coordinator.is_open());
        }
        assert!(!coordinator.is_open());
    }
}
