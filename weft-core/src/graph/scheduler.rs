//! Deferred Execution
//!
//! The engine never picks an event loop. A host that wants memo
//! recomputation pushed to a later turn (an animation frame, an idle
//! callback, the next tick of its own loop) hands the runtime a
//! [`Scheduler`]. During a drain each staged memo is then wrapped in a
//! [`Task`] and given to the scheduler instead of running in place. Effects
//! are never deferred.
//!
//! Results of a deferred memo become visible only once the host runs the
//! task; until then a read still pulls the memo synchronously.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Host capability that runs tasks at a time of its choosing.
pub trait Scheduler {
    /// Queue `task` to run later. Must not run it synchronously.
    fn schedule(&self, task: Task);
}

impl<F> Scheduler for F
where
    F: Fn(Task),
{
    fn schedule(&self, task: Task) {
        self(task)
    }
}

/// A FIFO [`Scheduler`] that runs nothing until the host drains it.
#[derive(Default)]
pub struct TaskQueue {
    tasks: RefCell<VecDeque<Task>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Run queued tasks until the queue is empty, including tasks queued by
    /// the tasks themselves. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Release the borrow before running, so tasks may schedule more.
            let next = self.tasks.borrow_mut().pop_front();
            let Some(task) = next else {
                return ran;
            };
            task();
            ran += 1;
        }
    }
}

impl Scheduler for TaskQueue {
    fn schedule(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn queue_defers_until_run() {
        let queue = TaskQueue::new();
        let hits = Rc::new(Cell::new(0));

        let h = hits.clone();
        queue.schedule(Box::new(move || h.set(h.get() + 1)));

        assert_eq!(hits.get(), 0);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.run_pending(), 1);
        assert_eq!(hits.get(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn tasks_may_schedule_more_tasks() {
        let queue = Rc::new(TaskQueue::new());
        let hits = Rc::new(Cell::new(0));

        let q = queue.clone();
        let h = hits.clone();
        queue.schedule(Box::new(move || {
            h.set(h.get() + 1);
            let h = h.clone();
            q.schedule(Box::new(move || h.set(h.get() + 10)));
        }));

        assert_eq!(queue.run_pending(), 2);
        assert_eq!(hits.get(), 11);
    }

    #[test]
    fn closures_are_schedulers() {
        let seen = Rc::new(Cell::new(0));
        let s = seen.clone();
        let scheduler = move |task: Task| {
            s.set(s.get() + 1);
            task();
        };

        scheduler.schedule(Box::new(|| {}));
        assert_eq!(seen.get(), 1);
    }
}
