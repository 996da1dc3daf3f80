//! Constraint / demon framework: attaches reactions to variable events and drives initial
//! propagation.
//!
//! Grounded on OR-tools' `Constraint`/`Demon` base classes (`constraint_solver.h`): `post()`
//! registers demons, `initial_propagate()` runs the domain reduction implied by the constraint in
//! isolation, and [`post_and_propagate`] wraps both under a single freeze so a constraint's own
//! first propagation never fires its own just-registered demons redundantly. Concrete
//! propagators (element, all-different) live in [`crate::propagators`]; this module only supplies
//! the generic interface and the store that owns them, including the FIFO of constraints posted
//! mid-search: `add_constraint_deferred` enqueues a constraint onto a deferred-add list that
//! `drain_deferred` posts in order.

use std::collections::VecDeque;

use crate::intvar::IntVarStore;
use crate::queue::{DemonId, Priority, PropagationQueue, Unsat};
use crate::reversible::Trail;

/// Shared context every constraint and demon propagates against.
pub struct PropCtx<'a> {
    pub trail: &'a mut Trail,
    pub vars: &'a mut IntVarStore,
    pub queue: &'a mut PropagationQueue,
}

/// A reaction to a variable event, queued in [`PropagationQueue`] and run by
/// [`ConstraintStore::drain`].
pub trait Demon {
    fn run(&mut self, ctx: &mut PropCtx) -> Result<(), Unsat>;

    /// A human-readable label used when `profile_level` is enabled; defaults to the type name.
    fn name(&self) -> &'static str {
        "demon"
    }
}

/// A posted constraint: registers its demons once via `post`, then establishes whatever domain
/// reduction follows from its own literals alone via `initial_propagate`, independent of any
/// demon having fired yet.
pub trait Constraint {
    fn post(&mut self, ctx: &mut PropCtx, register: &mut dyn FnMut(Box<dyn Demon>) -> DemonId);

    fn initial_propagate(&mut self, ctx: &mut PropCtx) -> Result<(), Unsat>;
}

/// Owns every demon and constraint posted to the solver and drives the propagation queue.
#[derive(Default)]
pub struct ConstraintStore {
    demons: Vec<Box<dyn Demon>>,
    /// Constraints posted mid-search, processed FIFO; posting may itself append further
    /// constraints, which the next `drain_deferred` call picks up.
    deferred: VecDeque<Box<dyn Constraint>>,
}

impl ConstraintStore {
    pub fn new() -> ConstraintStore {
        ConstraintStore::default()
    }

    fn register_demon(
        demons: &mut Vec<Box<dyn Demon>>,
        queue: &mut PropagationQueue,
        demon: Box<dyn Demon>,
    ) -> DemonId {
        let id = DemonId(demons.len() as u32);
        demons.push(demon);
        queue.ensure_demon_count(demons.len());
        id
    }

    /// Posts and immediately runs initial propagation for `constraint`, all under one freeze so
    /// demons the constraint just registered do not also run redundantly for the very same
    /// reduction `initial_propagate` already performs.
    pub fn post_and_propagate(
        &mut self,
        trail: &mut Trail,
        vars: &mut IntVarStore,
        queue: &mut PropagationQueue,
        mut constraint: Box<dyn Constraint>,
    ) -> Result<(), Unsat> {
        queue.freeze();
        {
            let demons = &mut self.demons;
            let mut register = |demon: Box<dyn Demon>| Self::register_demon(demons, queue, demon);
            let mut ctx = PropCtx { trail, vars, queue };
            constraint.post(&mut ctx, &mut register);
            let result = constraint.initial_propagate(&mut ctx);
            if result.is_err() {
                queue.after_failure();
                return result;
            }
        }
        let unfreeze_result = {
            // Demons are taken out of `self` for the duration of the drain so the closure handed
            // to `PropagationQueue::unfreeze` can both index them and hand them a fresh `PropCtx`
            // without a second borrow of `self` through `queue`.
            let mut demons = std::mem::take(&mut self.demons);
            let result = queue.unfreeze(|q, id| {
                let mut ctx = PropCtx { trail, vars, queue: q };
                demons[id.0 as usize].run(&mut ctx)
            });
            self.demons = demons;
            result
        };
        unfreeze_result
    }

    /// Enqueues a constraint for posting on the next call to [`drain_deferred`](Self::drain_deferred),
    /// per the mid-search `add-constraint` operation.
    pub fn add_constraint_deferred(&mut self, constraint: Box<dyn Constraint>) {
        self.deferred.push_back(constraint);
    }

    /// Posts every constraint queued by [`add_constraint_deferred`](Self::add_constraint_deferred),
    /// in FIFO order; a constraint posted while draining is appended and will be picked up by the
    /// same call before it returns.
    pub fn drain_deferred(
        &mut self,
        trail: &mut Trail,
        vars: &mut IntVarStore,
        queue: &mut PropagationQueue,
    ) -> Result<(), Unsat> {
        while let Some(constraint) = self.deferred.pop_front() {
            self.post_and_propagate(trail, vars, queue, constraint)?;
        }
        Ok(())
    }

    /// Runs a single demon by id. Exposed so the search driver can drive
    /// [`PropagationQueue::process`]/`unfreeze` with this store's table.
    pub fn run_one(
        &mut self,
        trail: &mut Trail,
        vars: &mut IntVarStore,
        queue: &mut PropagationQueue,
        id: DemonId,
    ) -> Result<(), Unsat> {
        let mut ctx = PropCtx { trail, vars, queue };
        self.demons[id.0 as usize].run(&mut ctx)
    }

    pub fn demon_count(&self) -> usize {
        self.demons.len()
    }
}

/// Convenience closure-backed demon, for small one-off reactions that don't warrant a named type.
pub struct ClosureDemon<F> {
    pub name: &'static str,
    pub f: F,
}

impl<F> Demon for ClosureDemon<F>
where
    F: FnMut(&mut PropCtx) -> Result<(), Unsat>,
{
    fn run(&mut self, ctx: &mut PropCtx) -> Result<(), Unsat> {
        (self.f)(ctx)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

