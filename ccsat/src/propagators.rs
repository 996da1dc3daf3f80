//! Concrete constraints: element (variable array and constant array) and all-different.
//!
//! Grounded on OR-tools' `element.cc` (`IntElementConstraint`, `IntExprElement`) for the two
//! element variants and on its basic `AllDifferent` (value-propagation only, not full Hall-set
//! bounds consistency -- `all_different.cc`'s `BoundsAllDifferent` is a further refinement this
//! does not attempt).

use std::rc::Rc;

use crate::constraint::{Constraint, Demon, PropCtx};
use crate::error::LoadError;
use crate::intvar::{DomainEvent, IntVar};
use crate::queue::{Priority, Unsat};

/// `target == array[index]`, where `array` holds variables.
///
/// Bounds-consistent: narrows `index` to values whose variable's current bounds can still match
/// `target`'s bounds, then widens/narrows `target` to the union of the bounds of the variables
/// `index` could still select.
pub struct ElementVar {
    array: Rc<Vec<IntVar>>,
    index: IntVar,
    target: IntVar,
}

impl ElementVar {
    pub fn new(array: Vec<IntVar>, index: IntVar, target: IntVar) -> Result<ElementVar, LoadError> {
        if array.is_empty() {
            return Err(LoadError::EmptyArgumentArray("element"));
        }
        Ok(ElementVar {
            array: Rc::new(array),
            index,
            target,
        })
    }
}

struct ElementVarDemon {
    array: Rc<Vec<IntVar>>,
    index: IntVar,
    target: IntVar,
}

impl Demon for ElementVarDemon {
    fn run(&mut self, ctx: &mut PropCtx) -> Result<(), Unsat> {
        propagate_element_var(ctx, &self.array, self.index, self.target)
    }

    fn name(&self) -> &'static str {
        "element_var"
    }
}

fn propagate_element_var(
    ctx: &mut PropCtx,
    array: &[IntVar],
    index: IntVar,
    target: IntVar,
) -> Result<(), Unsat> {
    let target_lo = ctx.vars.min(ctx.trail, target);
    let target_hi = ctx.vars.max(ctx.trail, target);

    let mut surviving: Vec<i64> = Vec::new();
    for i in ctx.vars.iter(ctx.trail, index).collect::<Vec<_>>() {
        let array_var = match array.get(i as usize) {
            Some(&v) => v,
            None => {
                // An index value outside the array is never a valid selector.
                ctx.vars
                    .remove_value(ctx.trail, ctx.queue, index, i)
                    .map_err(|_| Unsat)?;
                continue;
            }
        };
        let lo = ctx.vars.min(ctx.trail, array_var);
        let hi = ctx.vars.max(ctx.trail, array_var);
        if hi < target_lo || lo > target_hi {
            ctx.vars
                .remove_value(ctx.trail, ctx.queue, index, i)
                .map_err(|_| Unsat)?;
        } else {
            surviving.push(i);
        }
    }

    if surviving.is_empty() {
        return Err(Unsat);
    }

    let mut new_lo = i64::MAX;
    let mut new_hi = i64::MIN;
    for &i in &surviving {
        let array_var = array[i as usize];
        new_lo = new_lo.min(ctx.vars.min(ctx.trail, array_var));
        new_hi = new_hi.max(ctx.vars.max(ctx.trail, array_var));
    }
    ctx.vars
        .set_range(ctx.trail, ctx.queue, target, new_lo, new_hi)
        .map_err(|_| Unsat)?;

    if surviving.len() == 1 {
        let selected = array[surviving[0] as usize];
        let lo = ctx.vars.min(ctx.trail, target).max(ctx.vars.min(ctx.trail, selected));
        let hi = ctx.vars.max(ctx.trail, target).min(ctx.vars.max(ctx.trail, selected));
        ctx.vars
            .set_range(ctx.trail, ctx.queue, selected, lo, hi)
            .map_err(|_| Unsat)?;
        ctx.vars
            .set_range(ctx.trail, ctx.queue, target, lo, hi)
            .map_err(|_| Unsat)?;
    }

    Ok(())
}

impl Constraint for ElementVar {
    fn post(&mut self, ctx: &mut PropCtx, register: &mut dyn FnMut(Box<dyn Demon>) -> crate::queue::DemonId) {
        let demon = || {
            Box::new(ElementVarDemon {
                array: self.array.clone(),
                index: self.index,
                target: self.target,
            }) as Box<dyn Demon>
        };

        let id = register(demon());
        ctx.vars.watch(self.index, DomainEvent::DomainRemoval, id, Priority::Normal);
        let id = register(demon());
        ctx.vars.watch(self.target, DomainEvent::RangeChange, id, Priority::Normal);
        for &v in self.array.iter() {
            let id = register(demon());
            ctx.vars.watch(v, DomainEvent::RangeChange, id, Priority::Normal);
        }
    }

    fn initial_propagate(&mut self, ctx: &mut PropCtx) -> Result<(), Unsat> {
        propagate_element_var(ctx, &self.array, self.index, self.target)
    }
}

/// The shape `array`'s `true` entries take, detected once at construction since the array never
/// changes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BoolPattern {
    AllOnes,
    AllZeros,
    Singleton(usize),
    Contiguous { lo: usize, hi: usize },
    General,
}

fn classify(array: &[bool]) -> BoolPattern {
    let ones: Vec<usize> = array
        .iter()
        .enumerate()
        .filter_map(|(i, &b)| if b { Some(i) } else { None })
        .collect();
    if ones.is_empty() {
        BoolPattern::AllZeros
    } else if ones.len() == array.len() {
        BoolPattern::AllOnes
    } else if ones.len() == 1 {
        BoolPattern::Singleton(ones[0])
    } else if ones[ones.len() - 1] - ones[0] + 1 == ones.len() {
        BoolPattern::Contiguous {
            lo: ones[0],
            hi: ones[ones.len() - 1],
        }
    } else {
        BoolPattern::General
    }
}

/// `target == array[index]` where `array` is a fixed table of booleans (represented as `i64`
/// `0`/`1`) and `target` is itself a 0/1 variable. Exploits the shape of `array` instead of
/// treating it as an arbitrary constant table: an all-true or all-false table fixes `target`
/// outright with no index reasoning at all, and a contiguous run of `true` entries turns into a
/// single range restriction on `index` rather than a per-index scan.
pub struct ElementConstBool {
    array: Rc<Vec<bool>>,
    index: IntVar,
    target: IntVar,
    pattern: BoolPattern,
}

impl ElementConstBool {
    pub fn new(array: Vec<bool>, index: IntVar, target: IntVar) -> Result<ElementConstBool, LoadError> {
        if array.is_empty() {
            return Err(LoadError::EmptyArgumentArray("element_bool"));
        }
        let pattern = classify(&array);
        Ok(ElementConstBool {
            array: Rc::new(array),
            index,
            target,
            pattern,
        })
    }
}

struct ElementConstBoolDemon {
    array: Rc<Vec<bool>>,
    index: IntVar,
    target: IntVar,
    pattern: BoolPattern,
}

impl Demon for ElementConstBoolDemon {
    fn run(&mut self, ctx: &mut PropCtx) -> Result<(), Unsat> {
        propagate_element_const_bool(ctx, &self.array, self.index, self.target, self.pattern)
    }

    fn name(&self) -> &'static str {
        "element_const_bool"
    }
}

fn propagate_element_const_bool(
    ctx: &mut PropCtx,
    array: &[bool],
    index: IntVar,
    target: IntVar,
    pattern: BoolPattern,
) -> Result<(), Unsat> {
    match pattern {
        BoolPattern::AllOnes => {
            ctx.vars.set_min(ctx.trail, ctx.queue, target, 1).map_err(|_| Unsat)
        }
        BoolPattern::AllZeros => {
            ctx.vars.set_max(ctx.trail, ctx.queue, target, 0).map_err(|_| Unsat)
        }
        BoolPattern::Singleton(one) => {
            let target_excludes_one = !ctx.vars.contains(ctx.trail, target, 1);
            let target_excludes_zero = !ctx.vars.contains(ctx.trail, target, 0);
            let index_has_one = ctx.vars.contains(ctx.trail, index, one as i64);

            if target_excludes_zero {
                // target forced to 1: only `one` can be selected.
                return ctx
                    .vars
                    .set_value(ctx.trail, ctx.queue, index, one as i64)
                    .map_err(|_| Unsat);
            }
            if target_excludes_one || !index_has_one {
                // target forced to 0, or `one` already excluded from the index: either way the
                // index can never select `one`, and if it must (is bound to it) target is 0.
                if !index_has_one {
                    return ctx.vars.set_max(ctx.trail, ctx.queue, target, 0).map_err(|_| Unsat);
                }
                return ctx
                    .vars
                    .remove_value(ctx.trail, ctx.queue, index, one as i64)
                    .map_err(|_| Unsat);
            }
            if ctx.vars.is_bound(ctx.trail, index) && ctx.vars.min(ctx.trail, index) == one as i64 {
                ctx.vars.set_min(ctx.trail, ctx.queue, target, 1).map_err(|_| Unsat)?;
            }
            Ok(())
        }
        BoolPattern::Contiguous { lo, hi } => {
            let target_excludes_zero = !ctx.vars.contains(ctx.trail, target, 0);
            let target_excludes_one = !ctx.vars.contains(ctx.trail, target, 1);
            if target_excludes_zero {
                return ctx
                    .vars
                    .set_range(ctx.trail, ctx.queue, index, lo as i64, hi as i64)
                    .map_err(|_| Unsat);
            }
            if target_excludes_one {
                return ctx
                    .vars
                    .remove_values(ctx.trail, ctx.queue, index, lo as i64..=hi as i64)
                    .map_err(|_| Unsat);
            }
            let index_lo = ctx.vars.min(ctx.trail, index);
            let index_hi = ctx.vars.max(ctx.trail, index);
            if index_hi < lo as i64 || index_lo > hi as i64 {
                return ctx.vars.set_max(ctx.trail, ctx.queue, target, 0).map_err(|_| Unsat);
            }
            let any_outside = ctx
                .vars
                .iter(ctx.trail, index)
                .any(|i| i < lo as i64 || i > hi as i64);
            if !any_outside {
                ctx.vars.set_min(ctx.trail, ctx.queue, target, 1).map_err(|_| Unsat)?;
            }
            Ok(())
        }
        BoolPattern::General => {
            let target_lo = ctx.vars.min(ctx.trail, target);
            let target_hi = ctx.vars.max(ctx.trail, target);
            let mut any_zero_survives = false;
            let mut any_one_survives = false;
            for i in ctx.vars.iter(ctx.trail, index).collect::<Vec<_>>() {
                let value = array.get(i as usize).copied().unwrap_or(false) as i64;
                if value < target_lo || value > target_hi {
                    ctx.vars
                        .remove_value(ctx.trail, ctx.queue, index, i)
                        .map_err(|_| Unsat)?;
                } else if value == 0 {
                    any_zero_survives = true;
                } else {
                    any_one_survives = true;
                }
            }
            if !any_zero_survives && !any_one_survives {
                return Err(Unsat);
            }
            if !any_zero_survives {
                ctx.vars.set_min(ctx.trail, ctx.queue, target, 1).map_err(|_| Unsat)?;
            }
            if !any_one_survives {
                ctx.vars.set_max(ctx.trail, ctx.queue, target, 0).map_err(|_| Unsat)?;
            }
            Ok(())
        }
    }
}

impl Constraint for ElementConstBool {
    fn post(&mut self, ctx: &mut PropCtx, register: &mut dyn FnMut(Box<dyn Demon>) -> crate::queue::DemonId) {
        let demon = || {
            Box::new(ElementConstBoolDemon {
                array: self.array.clone(),
                index: self.index,
                target: self.target,
                pattern: self.pattern,
            }) as Box<dyn Demon>
        };
        let id = register(demon());
        ctx.vars.watch(self.index, DomainEvent::DomainRemoval, id, Priority::Normal);
        let id = register(demon());
        ctx.vars.watch(self.target, DomainEvent::RangeChange, id, Priority::Normal);
    }

    fn initial_propagate(&mut self, ctx: &mut PropCtx) -> Result<(), Unsat> {
        propagate_element_const_bool(ctx, &self.array, self.index, self.target, self.pattern)
    }
}

/// Pairwise-distinct constraint over a set of variables, propagated by value removal only: when
/// a variable becomes bound, its value is removed from every other variable's domain. This is the
/// forward-checking form of all-different, not the Hall-interval bounds-consistent form.
pub struct AllDifferent {
    vars: Rc<Vec<IntVar>>,
}

impl AllDifferent {
    pub fn new(vars: Vec<IntVar>) -> Result<AllDifferent, LoadError> {
        if vars.is_empty() {
            return Err(LoadError::EmptyArgumentArray("all_different"));
        }
        Ok(AllDifferent { vars: Rc::new(vars) })
    }
}

struct AllDifferentDemon {
    vars: Rc<Vec<IntVar>>,
    own_index: usize,
}

impl Demon for AllDifferentDemon {
    fn run(&mut self, ctx: &mut PropCtx) -> Result<(), Unsat> {
        let fixed = self.vars[self.own_index];
        if !ctx.vars.is_bound(ctx.trail, fixed) {
            return Ok(());
        }
        let value = ctx.vars.min(ctx.trail, fixed);
        for (i, &other) in self.vars.iter().enumerate() {
            if i == self.own_index {
                continue;
            }
            ctx.vars
                .remove_value(ctx.trail, ctx.queue, other, value)
                .map_err(|_| Unsat)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "all_different"
    }
}

impl Constraint for AllDifferent {
    fn post(&mut self, ctx: &mut PropCtx, register: &mut dyn FnMut(Box<dyn Demon>) -> crate::queue::DemonId) {
        for i in 0..self.vars.len() {
            let id = register(Box::new(AllDifferentDemon {
                vars: self.vars.clone(),
                own_index: i,
            }));
            ctx.vars.watch(self.vars[i], DomainEvent::ValueAssigned, id, Priority::Var);
        }
    }

    fn initial_propagate(&mut self, ctx: &mut PropCtx) -> Result<(), Unsat> {
        for (i, &v) in self.vars.iter().enumerate() {
            if !ctx.vars.is_bound(ctx.trail, v) {
                continue;
            }
            let value = ctx.vars.min(ctx.trail, v);
            for (j, &other) in self.vars.iter().enumerate() {
                if i == j {
                    continue;
                }
                ctx.vars
                    .remove_value(ctx.trail, ctx.queue, other, value)
                    .map_err(|_| Unsat)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::ConstraintStore;
    use crate::intvar::IntVarStore;
    use crate::queue::PropagationQueue;
    use crate::reversible::Trail;

    #[test]
    fn element_var_narrows_target_to_reachable_union() {
        let mut trail = Trail::new(64);
        let mut vars = IntVarStore::new();
        let mut queue = PropagationQueue::new();
        let mut store = ConstraintStore::new();

        let a0 = vars.new_var(&mut trail, 10, 10);
        let a1 = vars.new_var(&mut trail, 20, 25);
        let index = vars.new_var(&mut trail, 0, 1);
        let target = vars.new_var(&mut trail, 0, 100);

        let constraint = ElementVar::new(vec![a0, a1], index, target).unwrap();
        store
            .post_and_propagate(&mut trail, &mut vars, &mut queue, Box::new(constraint))
            .unwrap();

        assert_eq!(vars.min(&trail, target), 10);
        assert_eq!(vars.max(&trail, target), 25);
    }

    #[test]
    fn element_var_index_narrows_when_target_is_fixed() {
        let mut trail = Trail::new(64);
        let mut vars = IntVarStore::new();
        let mut queue = PropagationQueue::new();
        let mut store = ConstraintStore::new();

        let a0 = vars.new_var(&mut trail, 10, 10);
        let a1 = vars.new_var(&mut trail, 20, 20);
        let index = vars.new_var(&mut trail, 0, 1);
        let target = vars.new_var(&mut trail, 20, 20);

        let constraint = ElementVar::new(vec![a0, a1], index, target).unwrap();
        store
            .post_and_propagate(&mut trail, &mut vars, &mut queue, Box::new(constraint))
            .unwrap();

        assert_eq!(vars.min(&trail, index), 1);
        assert!(vars.is_bound(&trail, index));
    }

    #[test]
    fn element_const_bool_all_ones_forces_target() {
        let mut trail = Trail::new(64);
        let mut vars = IntVarStore::new();
        let mut queue = PropagationQueue::new();
        let mut store = ConstraintStore::new();

        let index = vars.new_var(&mut trail, 0, 2);
        let target = vars.new_var(&mut trail, 0, 1);
        let constraint = ElementConstBool::new(vec![true, true, true], index, target).unwrap();
        store
            .post_and_propagate(&mut trail, &mut vars, &mut queue, Box::new(constraint))
            .unwrap();

        assert_eq!(vars.min(&trail, target), 1);
    }

    #[test]
    fn element_const_bool_singleton_forces_index() {
        let mut trail = Trail::new(64);
        let mut vars = IntVarStore::new();
        let mut queue = PropagationQueue::new();
        let mut store = ConstraintStore::new();

        let index = vars.new_var(&mut trail, 0, 2);
        let target = vars.new_var(&mut trail, 1, 1);
        let constraint = ElementConstBool::new(vec![false, true, false], index, target).unwrap();
        store
            .post_and_propagate(&mut trail, &mut vars, &mut queue, Box::new(constraint))
            .unwrap();

        assert!(vars.is_bound(&trail, index));
        assert_eq!(vars.min(&trail, index), 1);
    }

    #[test]
    fn element_const_bool_contiguous_restricts_index_range() {
        let mut trail = Trail::new(64);
        let mut vars = IntVarStore::new();
        let mut queue = PropagationQueue::new();
        let mut store = ConstraintStore::new();

        let index = vars.new_var(&mut trail, 0, 4);
        let target = vars.new_var(&mut trail, 1, 1);
        let constraint =
            ElementConstBool::new(vec![false, true, true, true, false], index, target).unwrap();
        store
            .post_and_propagate(&mut trail, &mut vars, &mut queue, Box::new(constraint))
            .unwrap();

        assert_eq!(vars.min(&trail, index), 1);
        assert_eq!(vars.max(&trail, index), 3);
    }

    #[test]
    fn all_different_removes_bound_value_from_others() {
        let mut trail = Trail::new(64);
        let mut vars = IntVarStore::new();
        let mut queue = PropagationQueue::new();
        let mut store = ConstraintStore::new();

        let x = vars.new_var(&mut trail, 1, 1);
        let y = vars.new_var(&mut trail, 1, 2);
        let z = vars.new_var(&mut trail, 1, 3);

        let constraint = AllDifferent::new(vec![x, y, z]).unwrap();
        store
            .post_and_propagate(&mut trail, &mut vars, &mut queue, Box::new(constraint))
            .unwrap();

        assert!(!vars.contains(&trail, y, 1));
        assert!(!vars.contains(&trail, z, 1));
        assert_eq!(vars.min(&trail, y), 2);
    }

    #[test]
    fn all_different_detects_conflict_via_demon() {
        let mut trail = Trail::new(64);
        let mut vars = IntVarStore::new();
        let mut queue = PropagationQueue::new();
        let mut store = ConstraintStore::new();

        let x = vars.new_var(&mut trail, 1, 2);
        let y = vars.new_var(&mut trail, 1, 2);

        let constraint = AllDifferent::new(vec![x, y]).unwrap();
        store
            .post_and_propagate(&mut trail, &mut vars, &mut queue, Box::new(constraint))
            .unwrap();

        let result = vars.set_value(&mut trail, &mut queue, x, 1);
        assert!(result.is_ok());
        let drain = queue.process(|q, id| {
            let mut ctx = PropCtx {
                trail: &mut trail,
                vars: &mut vars,
                queue: q,
            };
            store.run_one(ctx.trail, ctx.vars, ctx.queue, id)
        });
        assert!(drain.is_ok());
        assert!(!vars.contains(&trail, y, 1));
    }

    #[test]
    fn rejects_empty_argument_arrays() {
        let mut trail = Trail::new(8);
        let mut vars = IntVarStore::new();
        let index = vars.new_var(&mut trail, 0, 0);
        let target = vars.new_var(&mut trail, 0, 0);
        assert!(ElementVar::new(vec![], index, target).is_err());
        assert!(ElementConstBool::new(vec![], index, target).is_err());
        assert!(AllDifferent::new(vec![]).is_err());
    }
}
