//! Propagation queue: a priority-ordered, freezable FIFO of demons.
//!
//! Grounded on the three-FIFO `Queue` in OR-tools' `constraint_solver.cc` (`enqueue_`,
//! `FreezeQueue`/`UnfreezeQueue`, `AfterFailure`): demons are queued at one of three priorities and
//! drained in a staircase order so finer-grained constraints get to propagate ahead of coarser
//! aggregating ones, and a demon already queued in the current stamp period is never queued twice.
//!
//! The queue does not own demons; it only schedules opaque [`DemonId`]s. The caller supplies the
//! actual demon table (see [`crate::constraint`]) and a closure to run one demon by id.

use std::collections::VecDeque;

/// Relative urgency of a queued demon.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub enum Priority {
    /// Coarse, aggregating demons (e.g. a constraint re-checking all its variables).
    Delayed,
    /// Demons specific to a single variable.
    Var,
    /// Fine-grained demons that should run as soon as possible.
    Normal,
}

/// Opaque identifier for a demon, interpreted only by the owner of the demon table.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct DemonId(pub u32);

/// Marker error type returned by a demon to request an unwind to the most recent choice point.
#[derive(Copy, Clone, Debug)]
pub struct Unsat;

/// The propagation queue.
pub struct PropagationQueue {
    normal: VecDeque<DemonId>,
    var: VecDeque<DemonId>,
    delayed: VecDeque<DemonId>,
    /// Stamp at which each demon was last enqueued; a demon whose stamp equals `current_stamp` is
    /// already queued and is not queued again.
    stamps: Vec<u64>,
    current_stamp: u64,
    freeze_count: u32,
    processing: bool,
}

impl PropagationQueue {
    pub fn new() -> PropagationQueue {
        PropagationQueue {
            normal: VecDeque::new(),
            var: VecDeque::new(),
            delayed: VecDeque::new(),
            stamps: Vec::new(),
            current_stamp: 1,
            freeze_count: 0,
            processing: false,
        }
    }

    /// Grows the per-demon stamp table so `id` is addressable.
    pub fn ensure_demon_count(&mut self, count: usize) {
        if self.stamps.len() < count {
            self.stamps.resize(count, 0);
        }
    }

    /// Enqueues `id` at `priority` unless it is already queued within the current stamp period.
    pub fn enqueue(&mut self, id: DemonId, priority: Priority) {
        let idx = id.0 as usize;
        if self.stamps[idx] == self.current_stamp {
            return;
        }
        self.stamps[idx] = self.current_stamp;
        match priority {
            Priority::Normal => self.normal.push_back(id),
            Priority::Var => self.var.push_back(id),
            Priority::Delayed => self.delayed.push_back(id),
        }
    }

    /// Suppresses processing until a matching [`unfreeze`](Self::unfreeze).
    pub fn freeze(&mut self) {
        self.freeze_count += 1;
    }

    /// Lifts one level of freezing; drains the queue if this brings the freeze count back to
    /// zero.
    ///
    /// Returns `Err(Unsat)` if draining failed; on error the queue has already been cleared by
    /// [`after_failure`](Self::after_failure).
    pub fn unfreeze(
        &mut self,
        run: impl FnMut(&mut Self, DemonId) -> Result<(), Unsat>,
    ) -> Result<(), Unsat> {
        debug_assert!(self.freeze_count > 0);
        self.freeze_count -= 1;
        if self.freeze_count == 0 {
            self.process(run)
        } else {
            Ok(())
        }
    }

    /// Whether the queue is currently suppressed.
    pub fn is_frozen(&self) -> bool {
        self.freeze_count > 0
    }

    /// Drains the queue in priority-staircase order: all `Normal` demons, then one `Var` demon,
    /// repeating until both are empty, then one `Delayed` demon, repeating from the top.
    ///
    /// A demon may enqueue further demons while running; these are picked up by the same loop. If
    /// `run` returns `Err(Unsat)`, the queue is cleared and the error propagated.
    pub fn process(
        &mut self,
        mut run: impl FnMut(&mut Self, DemonId) -> Result<(), Unsat>,
    ) -> Result<(), Unsat> {
        if self.processing || self.freeze_count > 0 {
            return Ok(());
        }
        self.processing = true;
        let result = self.process_inner(&mut run);
        self.processing = false;
        if result.is_err() {
            self.after_failure();
        }
        result
    }

    fn process_inner(
        &mut self,
        run: &mut impl FnMut(&mut Self, DemonId) -> Result<(), Unsat>,
    ) -> Result<(), Unsat> {
        loop {
            if let Some(id) = self.normal.pop_front() {
                run(self, id)?;
                continue;
            }
            if let Some(id) = self.var.pop_front() {
                run(self, id)?;
                continue;
            }
            if let Some(id) = self.delayed.pop_front() {
                run(self, id)?;
                continue;
            }
            break;
        }
        Ok(())
    }

    /// Empties all three queues and advances the stamp so every demon becomes re-queueable.
    pub fn after_failure(&mut self) {
        self.normal.clear();
        self.var.clear();
        self.delayed.clear();
        self.current_stamp += 1;
    }

    /// Whether every queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.normal.is_empty() && self.var.is_empty() && self.delayed.is_empty()
    }
}

impl Default for PropagationQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_within_stamp_period() {
        let mut q = PropagationQueue::new();
        q.ensure_demon_count(1);
        q.enqueue(DemonId(0), Priority::Normal);
        q.enqueue(DemonId(0), Priority::Normal);

        let mut runs = 0;
        q.process(|_, _| {
            runs += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(runs, 1);
    }

    #[test]
    fn priority_staircase_order() {
        let mut q = PropagationQueue::new();
        q.ensure_demon_count(3);
        q.enqueue(DemonId(2), Priority::Delayed);
        q.enqueue(DemonId(1), Priority::Var);
        q.enqueue(DemonId(0), Priority::Normal);

        let mut order = Vec::new();
        q.process(|_, id| {
            order.push(id.0);
            Ok(())
        })
        .unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn freeze_suppresses_processing() {
        let mut q = PropagationQueue::new();
        q.ensure_demon_count(1);
        q.freeze();
        q.enqueue(DemonId(0), Priority::Normal);

        let mut ran = false;
        q.process(|_, _| {
            ran = true;
            Ok(())
        })
        .unwrap();
        assert!(!ran);

        q.unfreeze(|_, _| {
            ran = true;
            Ok(())
        })
        .unwrap();
        assert!(ran);
    }

    #[test]
    fn failure_clears_queue_and_bumps_stamp() {
        let mut q = PropagationQueue::new();
        q.ensure_demon_count(2);
        q.enqueue(DemonId(0), Priority::Normal);
        q.enqueue(DemonId(1), Priority::Normal);

        let result = q.process(|_, _| Err(Unsat));
        assert!(result.is_err());
        assert!(q.is_empty());

        // Re-enqueueing after failure works even though the same stamp would have blocked it.
        q.enqueue(DemonId(0), Priority::Normal);
        let mut ran = false;
        q.process(|_, _| {
            ran = true;
            Ok(())
        })
        .unwrap();
        assert!(ran);
    }
}
