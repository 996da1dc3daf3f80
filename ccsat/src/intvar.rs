//! Integer domain variables.
//!
//! Grounded on the reversible bound/domain variables of OR-tools' `Solver` (the various
//! `IntVar` implementations in `constraint_solver.cc`), adapted to Rust's ownership model: rather
//! than each variable owning its own heap state behind a virtual interface, every variable's state
//! lives in one flat [`IntVarStore`] and is addressed by the small `Copy` handle [`IntVar`]. This
//! keeps propagation free of the lifetime and aliasing issues a `dyn IntVarImpl`-per-object design
//! would run into once demons need to mutate several variables from one callback.
//!
//! Domains are represented as a reversible `(min, max)` bound pair plus a reversible per-value
//! presence bitmap sized to the variable's initial range, which is the representation real
//! CP domains use once they need holes, not just bounds.

use crate::queue::{DemonId, Priority, PropagationQueue};
use crate::reversible::{RevBool, RevInt, Trail};

/// Handle to an integer variable. Valid only for the [`IntVarStore`] that created it.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct IntVar(u32);

impl IntVar {
    /// The dense index this handle was assigned by [`IntVarStore::new_var`], stable for the
    /// lifetime of the store. Used by [`crate::model`] to name variables in a visitor trace.
    pub fn index(&self) -> u32 {
        self.0
    }
}

/// The four event classes a domain change can raise, from coarsest to finest.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DomainEvent {
    /// The domain shrank (min and/or max moved, or a hole appeared), but min/max did not both
    /// collapse to a single value.
    RangeChange,
    /// `min()` or `max()` changed.
    BoundChange,
    /// The domain was reduced to exactly one value.
    ValueAssigned,
    /// A value was removed that was not the min or the max (a hole was punched).
    DomainRemoval,
}

struct VarData {
    offset: i64,
    capacity: usize,
    bits: Vec<RevBool>,
    min: RevInt,
    max: RevInt,
    size: RevInt,
    demons: [Vec<(DemonId, Priority)>; 4],
}

/// Marker error: a variable's domain became empty.
#[derive(Copy, Clone, Debug)]
pub struct DomainWipeout;

/// Owns the reversible state of every integer variable created so far.
pub struct IntVarStore {
    vars: Vec<VarData>,
}

impl IntVarStore {
    pub fn new() -> IntVarStore {
        IntVarStore { vars: Vec::new() }
    }

    /// Creates a new variable with domain `[lo, hi]` (inclusive, non-empty).
    pub fn new_var(&mut self, trail: &mut Trail, lo: i64, hi: i64) -> IntVar {
        assert!(lo <= hi, "cannot create a variable with an empty domain");
        let capacity = (hi - lo + 1) as usize;
        let bits = (0..capacity).map(|_| trail.new_bool(true)).collect();
        let min = trail.new_int(lo);
        let max = trail.new_int(hi);
        let size = trail.new_int(capacity as i64);
        let id = self.vars.len() as u32;
        self.vars.push(VarData {
            offset: lo,
            capacity,
            bits,
            min,
            max,
            size,
            demons: [Vec::new(), Vec::new(), Vec::new(), Vec::new()],
        });
        IntVar(id)
    }

    fn data(&self, v: IntVar) -> &VarData {
        &self.vars[v.0 as usize]
    }

    pub fn min(&self, trail: &Trail, v: IntVar) -> i64 {
        trail.get_int(self.data(v).min)
    }

    pub fn max(&self, trail: &Trail, v: IntVar) -> i64 {
        trail.get_int(self.data(v).max)
    }

    pub fn size(&self, trail: &Trail, v: IntVar) -> i64 {
        trail.get_int(self.data(v).size)
    }

    pub fn is_bound(&self, trail: &Trail, v: IntVar) -> bool {
        self.size(trail, v) == 1
    }

    pub fn contains(&self, trail: &Trail, v: IntVar, value: i64) -> bool {
        let data = self.data(v);
        let lo = trail.get_int(data.min);
        let hi = trail.get_int(data.max);
        if value < lo || value > hi {
            return false;
        }
        let offset = (value - data.offset) as usize;
        trail.get_bool(data.bits[offset])
    }

    /// Registers `demon` to run, at `priority`, whenever `event` (or a strictly finer one) fires
    /// on `v`. Finer events imply coarser ones: a value assignment also fires range-change and
    /// bound-change demons.
    pub fn watch(&mut self, v: IntVar, event: DomainEvent, demon: DemonId, priority: Priority) {
        self.vars[v.0 as usize].demons[event as usize].push((demon, priority));
    }

    fn raise(
        &self,
        trail: &Trail,
        queue: &mut PropagationQueue,
        v: IntVar,
        event: DomainEvent,
    ) {
        let data = self.data(v);
        for &(demon, priority) in &data.demons[event as usize] {
            queue.enqueue(demon, priority);
        }
        let _ = trail;
    }

    fn raise_up_to(&self, trail: &Trail, queue: &mut PropagationQueue, v: IntVar, finest: DomainEvent) {
        // Coarser event classes are always implied by a finer one; a caller raising
        // `ValueAssigned` also wants `RangeChange`/`BoundChange` demons to run.
        self.raise(trail, queue, v, DomainEvent::RangeChange);
        if finest != DomainEvent::RangeChange {
            self.raise(trail, queue, v, DomainEvent::BoundChange);
        }
        if finest == DomainEvent::ValueAssigned {
            self.raise(trail, queue, v, DomainEvent::ValueAssigned);
        }
        if finest == DomainEvent::DomainRemoval {
            self.raise(trail, queue, v, DomainEvent::DomainRemoval);
        }
    }

    /// Restricts `v` to values `>= lo`. A no-op if `lo <= min(v)`.
    pub fn set_min(
        &mut self,
        trail: &mut Trail,
        queue: &mut PropagationQueue,
        v: IntVar,
        lo: i64,
    ) -> Result<(), DomainWipeout> {
        let cur_min = self.min(trail, v);
        if lo <= cur_min {
            return Ok(());
        }
        let cur_max = self.max(trail, v);
        if lo > cur_max {
            return Err(DomainWipeout);
        }
        for value in cur_min..lo {
            self.clear_bit(trail, v, value);
        }
        self.advance_min_to_present(trail, v, lo)?;
        self.after_shrink(trail, queue, v)
    }

    /// Restricts `v` to values `<= hi`. A no-op if `hi >= max(v)`.
    pub fn set_max(
        &mut self,
        trail: &mut Trail,
        queue: &mut PropagationQueue,
        v: IntVar,
        hi: i64,
    ) -> Result<(), DomainWipeout> {
        let cur_max = self.max(trail, v);
        if hi >= cur_max {
            return Ok(());
        }
        let cur_min = self.min(trail, v);
        if hi < cur_min {
            return Err(DomainWipeout);
        }
        for value in (hi + 1)..=cur_max {
            self.clear_bit(trail, v, value);
        }
        self.retreat_max_to_present(trail, v, hi)?;
        self.after_shrink(trail, queue, v)
    }

    /// Restricts `v` to `[lo, hi]` in one shrink.
    pub fn set_range(
        &mut self,
        trail: &mut Trail,
        queue: &mut PropagationQueue,
        v: IntVar,
        lo: i64,
        hi: i64,
    ) -> Result<(), DomainWipeout> {
        self.set_min(trail, queue, v, lo)?;
        self.set_max(trail, queue, v, hi)
    }

    /// Restricts `v` to exactly `value`.
    pub fn set_value(
        &mut self,
        trail: &mut Trail,
        queue: &mut PropagationQueue,
        v: IntVar,
        value: i64,
    ) -> Result<(), DomainWipeout> {
        if !self.contains(trail, v, value) {
            return Err(DomainWipeout);
        }
        if self.is_bound(trail, v) {
            return Ok(());
        }
        let data = self.data(v);
        let lo = trail.get_int(data.min);
        let hi = trail.get_int(data.max);
        for removed in lo..=hi {
            if removed != value {
                self.clear_bit(trail, v, removed);
            }
        }
        trail.set_int(self.data(v).min, value);
        trail.set_int(self.data(v).max, value);
        trail.set_int(self.data(v).size, 1);
        self.raise_up_to(trail, queue, v, DomainEvent::ValueAssigned);
        Ok(())
    }

    /// Removes a single value from the domain.
    pub fn remove_value(
        &mut self,
        trail: &mut Trail,
        queue: &mut PropagationQueue,
        v: IntVar,
        value: i64,
    ) -> Result<(), DomainWipeout> {
        if !self.contains(trail, v, value) {
            return Ok(());
        }
        let cur_min = self.min(trail, v);
        let cur_max = self.max(trail, v);
        self.clear_bit(trail, v, value);
        if value == cur_min {
            self.advance_min_to_present(trail, v, cur_min + 1)?;
        } else if value == cur_max {
            self.retreat_max_to_present(trail, v, cur_max - 1)?;
        }
        self.after_shrink_tagged(
            trail,
            queue,
            v,
            value != cur_min && value != cur_max,
        )
    }

    /// Removes every value in `values` from the domain.
    pub fn remove_values(
        &mut self,
        trail: &mut Trail,
        queue: &mut PropagationQueue,
        v: IntVar,
        values: impl IntoIterator<Item = i64>,
    ) -> Result<(), DomainWipeout> {
        for value in values {
            self.remove_value(trail, queue, v, value)?;
        }
        Ok(())
    }

    /// Forward iterator over the values still present in `v`'s domain. Not reversible: positions
    /// are not remembered across backtracks, matching a fresh `make_domain_iterator(false)`.
    pub fn iter<'a>(&'a self, trail: &'a Trail, v: IntVar) -> DomainIter<'a> {
        let data = self.data(v);
        DomainIter {
            bits: &data.bits,
            offset: data.offset,
            trail,
            next: (trail.get_int(data.min) - data.offset) as usize,
            last: (trail.get_int(data.max) - data.offset) as usize,
        }
    }

    fn clear_bit(&mut self, trail: &mut Trail, v: IntVar, value: i64) {
        let data = &self.vars[v.0 as usize];
        let idx = (value - data.offset) as usize;
        if trail.get_bool(data.bits[idx]) {
            trail.set_bool(data.bits[idx], false);
            let size = self.size(trail, v);
            trail.set_int(self.data(v).size, size - 1);
        }
    }

    fn advance_min_to_present(
        &mut self,
        trail: &mut Trail,
        v: IntVar,
        mut candidate: i64,
    ) -> Result<(), DomainWipeout> {
        let max = self.max(trail, v);
        while candidate <= max && !self.contains(trail, v, candidate) {
            candidate += 1;
        }
        if candidate > max {
            return Err(DomainWipeout);
        }
        trail.set_int(self.data(v).min, candidate);
        Ok(())
    }

    fn retreat_max_to_present(
        &mut self,
        trail: &mut Trail,
        v: IntVar,
        mut candidate: i64,
    ) -> Result<(), DomainWipeout> {
        let min = self.min(trail, v);
        while candidate >= min && !self.contains(trail, v, candidate) {
            candidate -= 1;
        }
        if candidate < min {
            return Err(DomainWipeout);
        }
        trail.set_int(self.data(v).max, candidate);
        Ok(())
    }

    fn after_shrink(
        &self,
        trail: &Trail,
        queue: &mut PropagationQueue,
        v: IntVar,
    ) -> Result<(), DomainWipeout> {
        self.after_shrink_tagged(trail, queue, v, false)
    }

    fn after_shrink_tagged(
        &self,
        trail: &Trail,
        queue: &mut PropagationQueue,
        v: IntVar,
        hole: bool,
    ) -> Result<(), DomainWipeout> {
        if self.is_bound(trail, v) {
            self.raise_up_to(trail, queue, v, DomainEvent::ValueAssigned);
        } else if hole {
            self.raise_up_to(trail, queue, v, DomainEvent::DomainRemoval);
        } else {
            self.raise_up_to(trail, queue, v, DomainEvent::BoundChange);
        }
        Ok(())
    }
}

impl Default for IntVarStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward iterator over the present values of a domain.
pub struct DomainIter<'a> {
    bits: &'a [RevBool],
    offset: i64,
    trail: &'a Trail,
    next: usize,
    last: usize,
}

impl<'a> Iterator for DomainIter<'a> {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        while self.next <= self.last {
            let idx = self.next;
            self.next += 1;
            if self.trail.get_bool(self.bits[idx]) {
                return Some(idx as i64 + self.offset);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reversible::MarkerKind;

    #[test]
    fn set_value_then_backtrack_restores_domain() {
        let mut trail = Trail::new(8);
        let mut vars = IntVarStore::new();
        let mut queue = PropagationQueue::new();
        let v = vars.new_var(&mut trail, 0, 9);

        let m = trail.push_marker(MarkerKind::Simple);
        vars.set_value(&mut trail, &mut queue, v, 3).unwrap();
        assert_eq!(vars.min(&trail, v), 3);
        assert_eq!(vars.max(&trail, v), 3);

        let m2 = trail.push_marker(MarkerKind::Simple);
        vars.set_value(&mut trail, &mut queue, v, 3).unwrap(); // no-op re-assignment
        trail.backtrack_to(m2);
        assert_eq!(vars.min(&trail, v), 3);

        trail.backtrack_to(m);
        assert_eq!(vars.min(&trail, v), 0);
        assert_eq!(vars.max(&trail, v), 9);
        assert_eq!(vars.size(&trail, v), 10);
    }

    #[test]
    fn remove_value_punches_a_hole() {
        let mut trail = Trail::new(8);
        let mut vars = IntVarStore::new();
        let mut queue = PropagationQueue::new();
        let v = vars.new_var(&mut trail, 0, 3);

        vars.remove_value(&mut trail, &mut queue, v, 1).unwrap();
        assert!(!vars.contains(&trail, v, 1));
        assert_eq!(vars.min(&trail, v), 0);
        assert_eq!(vars.max(&trail, v), 3);
        assert_eq!(
            vars.iter(&trail, v).collect::<Vec<_>>(),
            vec![0, 2, 3]
        );
    }

    #[test]
    fn set_min_wipes_out_an_infeasible_domain() {
        let mut trail = Trail::new(8);
        let mut vars = IntVarStore::new();
        let mut queue = PropagationQueue::new();
        let v = vars.new_var(&mut trail, 0, 3);

        assert!(vars.set_min(&mut trail, &mut queue, v, 10).is_err());
    }

    #[test]
    fn demon_runs_once_per_relevant_event() {
        let mut trail = Trail::new(8);
        let mut vars = IntVarStore::new();
        let mut queue = PropagationQueue::new();
        let v = vars.new_var(&mut trail, 0, 3);
        queue.ensure_demon_count(1);
        vars.watch(v, DomainEvent::BoundChange, DemonId(0), Priority::Normal);

        vars.set_min(&mut trail, &mut queue, v, 1).unwrap();
        let mut runs = 0;
        queue.process(|_, _| {
            runs += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(runs, 1);
    }
}
