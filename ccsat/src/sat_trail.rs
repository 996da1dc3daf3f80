//! Boolean (SAT) variable assignment and the append-only propagation trail.
//!
//! Grounded on `varisat::prop::assignment::{Assignment, Trail}`: unlike the reversible CP trail
//! of [`crate::reversible`], the SAT trail is never rewound value-by-value. Assignment bits are
//! simply cleared back to `None` on backtrack and the trail vector is truncated; the
//! `AssignmentInfo` of an unassigned variable is left in place and overwritten the next time that
//! variable is enqueued.

use ccsat_formula::{Lit, LitIdx, Var};

use crate::clause::ClausePtr;

/// Why a literal was assigned.
///
/// `unit`, `search-decision` and `same-reason-as` are represented as enum variants rather than
/// sentinel integers; `Clause` covers both a cached reason (re-derived on demand from the clause
/// database) and direct propagation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Reason {
    /// Assigned as a decision by the search driver.
    SearchDecision,
    /// Forced at level 0 independent of any clause (e.g. during simplification).
    Unit,
    /// Implied by a clause; the clause's literals minus the propagated one are the antecedent.
    Clause(ClausePtr),
    /// Shares its antecedent with another literal already on the trail (binary self-subsumption).
    SameReasonAs(Lit),
}

/// Per-variable bookkeeping recorded when it is assigned.
#[derive(Copy, Clone, Debug)]
pub struct AssignmentInfo {
    pub level: u32,
    pub trail_index: u32,
    pub reason: Reason,
}

impl Default for AssignmentInfo {
    fn default() -> Self {
        AssignmentInfo {
            level: 0,
            trail_index: 0,
            reason: Reason::Unit,
        }
    }
}

/// The current partial assignment, addressable by dense variable index.
#[derive(Default)]
pub struct Assignment {
    values: Vec<Option<bool>>,
    infos: Vec<AssignmentInfo>,
}

impl Assignment {
    pub fn set_var_count(&mut self, count: usize) {
        self.values.resize(count, None);
        self.infos.resize_with(count, AssignmentInfo::default);
    }

    pub fn var_count(&self) -> usize {
        self.values.len()
    }

    pub fn lit_value(&self, lit: Lit) -> Option<bool> {
        self.values[lit.index()].map(|b| b ^ lit.is_negative())
    }

    pub fn is_true(&self, lit: Lit) -> bool {
        self.lit_value(lit) == Some(true)
    }

    pub fn is_false(&self, lit: Lit) -> bool {
        self.lit_value(lit) == Some(false)
    }

    pub fn is_unknown(&self, lit: Lit) -> bool {
        self.values[lit.index()].is_none()
    }

    pub fn info(&self, var: Var) -> &AssignmentInfo {
        &self.infos[var.index()]
    }
}

/// Append-only assignment history plus the propagation frontier.
#[derive(Default)]
pub struct SatTrail {
    assignment: Assignment,
    trail: Vec<Lit>,
    queue_head: usize,
    /// Trail length at the start of each decision level (level 0 starts at index 0 implicitly).
    decisions: Vec<u32>,
}

impl SatTrail {
    pub fn set_var_count(&mut self, count: usize) {
        self.assignment.set_var_count(count);
    }

    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    pub fn trail(&self) -> &[Lit] {
        &self.trail
    }

    pub fn current_level(&self) -> usize {
        self.decisions.len()
    }

    /// Opens a new decision level without enqueuing the decision literal itself.
    pub fn new_decision_level(&mut self) {
        self.decisions.push(self.trail.len() as LitIdx);
    }

    /// Assigns `lit` true, appending it to the trail. `lit` must currently be unassigned.
    pub fn enqueue(&mut self, lit: Lit, reason: Reason) {
        debug_assert!(self.assignment.is_unknown(lit));
        self.assignment.values[lit.index()] = Some(lit.is_positive());
        let trail_index = self.trail.len() as u32;
        self.trail.push(lit);
        self.assignment.infos[lit.var().index()] = AssignmentInfo {
            level: self.decisions.len() as u32,
            trail_index,
            reason,
        };
    }

    /// The next trail literal awaiting propagation, without consuming it.
    pub fn queue_head(&self) -> Option<Lit> {
        self.trail.get(self.queue_head).copied()
    }

    /// Consumes and returns the next trail literal awaiting propagation.
    pub fn pop_queue(&mut self) -> Option<Lit> {
        let head = self.queue_head();
        if head.is_some() {
            self.queue_head += 1;
        }
        head
    }

    pub fn fully_propagated(&self) -> bool {
        self.queue_head == self.trail.len()
    }

    /// Re-processes every already-assigned literal, used after learning a clause whose
    /// propagation needs to be re-triggered at a lower level.
    pub fn reset_queue(&mut self) {
        self.queue_head = 0;
    }

    /// Undoes every assignment at a decision level deeper than `level`.
    pub fn backtrack(&mut self, level: usize) {
        if level >= self.decisions.len() {
            return;
        }
        let new_len = self.decisions[level] as usize;
        self.decisions.truncate(level);
        self.queue_head = self.queue_head.min(new_len);
        for &lit in &self.trail[new_len..] {
            self.assignment.values[lit.index()] = None;
        }
        self.trail.truncate(new_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccsat_formula::lit;

    #[test]
    fn assign_and_backtrack() {
        let mut trail = SatTrail::default();
        trail.set_var_count(4);
        trail.new_decision_level();
        trail.enqueue(lit![1], Reason::SearchDecision);
        trail.enqueue(lit![2], Reason::Unit);
        assert!(trail.assignment().is_true(lit![1]));
        assert!(trail.assignment().is_true(lit![2]));
        assert_eq!(trail.current_level(), 1);

        trail.backtrack(0);
        assert!(trail.assignment().is_unknown(lit![1]));
        assert!(trail.assignment().is_unknown(lit![2]));
        assert_eq!(trail.trail().len(), 0);
    }

    #[test]
    fn propagation_queue_drains_in_order() {
        let mut trail = SatTrail::default();
        trail.set_var_count(4);
        trail.enqueue(lit![1], Reason::Unit);
        trail.enqueue(lit![-2], Reason::Unit);
        assert_eq!(trail.pop_queue(), Some(lit![1]));
        assert_eq!(trail.pop_queue(), Some(lit![-2]));
        assert_eq!(trail.pop_queue(), None);
        assert!(trail.fully_propagated());
    }
}
