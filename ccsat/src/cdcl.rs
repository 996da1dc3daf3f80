//! Top-level CDCL solve loop: decide, propagate through both the clause manager and the binary
//! implication graph, analyze conflicts, learn, backtrack and restart.
//!
//! Grounded on `varisat::cdcl::conflict_step` and the top-level `Solver::solve` state machine,
//! collapsed into a single struct instead of spread across `partial_ref` context parts: every
//! piece of mutable SAT-mode state ([`SatTrail`], [`ClauseManager`], [`BinaryImplicationGraph`])
//! is owned directly by [`CdclSolver`]. Variable selection is the simplest policy that makes
//! progress (first unassigned variable, negative phase); phase saving and activity-based
//! ordering are an explicit Non-goal of the spec this crate implements.

use ccsat_formula::{Lit, Var};

use crate::clause::{Attached, ClauseManager, ClausePtr, Conflict, Tier};
use crate::config::SolverConfig;
use crate::conflict::analyze;
use crate::proof::{IdSource, LratSink, LratStep};
use crate::sat_trail::{Reason, SatTrail};
use crate::{binary_graph::BinaryImplicationGraph, error::LoadError};

/// The reluctant-doubling Luby sequence, used to scale the restart interval.
///
/// Grounded on the teacher's `schedule::luby::LubySequence` (OEIS A182105).
struct LubySequence {
    u: u64,
    v: u64,
}

impl Default for LubySequence {
    fn default() -> LubySequence {
        LubySequence { u: 1, v: 1 }
    }
}

impl LubySequence {
    fn advance(&mut self) -> u64 {
        let result = self.v;
        if (self.u & self.u.wrapping_neg()) == self.v {
            self.u += 1;
            self.v = 1;
        } else {
            self.v <<= 1;
        }
        result
    }
}

/// Outcome of a finished (or partially run) solve.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SatState {
    /// A full satisfying assignment was found.
    Sat,
    /// The empty clause was derived; the formula is unsatisfiable.
    Unsat,
    /// Neither was reached (only possible if a caller-supplied conflict budget is exhausted;
    /// [`CdclSolver::solve`] itself always runs to completion).
    Unknown,
}

/// Owns the CDCL-mode state: the boolean assignment trail, the two-watched-literal clause
/// manager, the binary implication graph, and the LRAT id allocator the two share so every clause
/// across both stores gets a distinct, strictly increasing proof identifier.
pub struct CdclSolver {
    pub trail: SatTrail,
    pub clauses: ClauseManager,
    pub binary: BinaryImplicationGraph,
    ids: IdSource,
    config: SolverConfig,
    conflicts_since_restart: u64,
    restart_bound: u64,
    luby: LubySequence,
    unsat: bool,
}

impl CdclSolver {
    pub fn new(var_count: usize, config: SolverConfig) -> CdclSolver {
        let mut trail = SatTrail::default();
        trail.set_var_count(var_count);
        let mut clauses = ClauseManager::default();
        clauses.set_var_count(var_count);
        let mut binary = BinaryImplicationGraph::default();
        binary.set_var_count(var_count);

        let mut luby = LubySequence::default();
        let restart_bound = config.luby_restart_interval_scale * luby.advance();

        CdclSolver {
            trail,
            clauses,
            binary,
            ids: IdSource::new(),
            config,
            conflicts_since_restart: 0,
            restart_bound,
            luby,
            unsat: false,
        }
    }

    pub fn is_unsat(&self) -> bool {
        self.unsat
    }

    /// Adds a clause of any size, routing it per the clause manager's Attach contract: a clause of
    /// size 0 is immediate UNSAT, size 1 a unit assignment at level 0, size 2 a binary
    /// implication, size >= 3 a watched clause. Duplicate literals and tautologies are filtered
    /// here rather than rejected, since a CNF source may legitimately contain either.
    pub fn add_clause(&mut self, mut lits: Vec<Lit>, sink: &mut dyn LratSink) {
        if self.unsat {
            return;
        }

        lits.sort();
        lits.dedup();
        for pair in lits.windows(2) {
            if pair[0].var() == pair[1].var() {
                return; // tautology: {x, ..., ¬x, ...} is trivially satisfied.
            }
        }

        match lits.len() {
            0 => self.unsat = true,
            1 => self.assign_unit(lits[0], sink),
            2 => {
                // Clause {x, y} is the implication ¬x -> y; `add_binary` installs both that edge
                // and its contrapositive ¬y -> x in one call.
                if let Err(forced) = self.binary.add_binary(!lits[0], lits[1], &mut self.ids, sink) {
                    self.assign_unit(forced, sink);
                }
            }
            _ => {
                let tier = Tier::Irreducible;
                match self.clauses.attach(lits, &mut self.trail, tier, &mut self.ids, sink) {
                    Attached::Satisfied | Attached::Watched(_) | Attached::Propagating(_, _) => {}
                }
            }
        }
    }

    /// Assigns `lit` true at level 0 with a unit reason, or detects the conflict if it is already
    /// assigned false.
    fn assign_unit(&mut self, lit: Lit, sink: &mut dyn LratSink) {
        match self.trail.assignment().lit_value(lit) {
            Some(false) => self.unsat = true,
            Some(true) => {}
            None => {
                self.trail.enqueue(lit, Reason::Unit);
                sink.step(LratStep::Rup {
                    id: self.ids.next_id(),
                    lits: vec![lit],
                    rup_chain: Vec::new(),
                });
            }
        }
    }

    /// Drains the propagation queue across both the clause manager and the binary implication
    /// graph until a fixpoint or a conflict is found, matching §2's "for SAT-style problems F and
    /// G replace C+D" data flow: every freshly assigned literal is propagated through both stores
    /// before the next is considered.
    fn propagate_all(&mut self) -> Result<(), Conflict> {
        while let Some(lit) = self.trail.pop_queue() {
            self.binary.propagate(&mut self.trail, lit)?;
            self.clauses.propagate(&mut self.trail, lit)?;
        }
        Ok(())
    }

    /// The simplest decision policy that makes progress: the first unassigned variable, in
    /// negative phase. Variable ordering and phase saving are out of scope (§1 Non-goals).
    fn decide(&self) -> Option<Lit> {
        for index in 0..self.trail.assignment().var_count() {
            let var = Var::from_index(index);
            if self.trail.assignment().lit_value(var.positive()).is_none() {
                return Some(var.negative());
            }
        }
        None
    }

    fn learn(&mut self, lits: Vec<Lit>, sink: &mut dyn LratSink) {
        match lits.len() {
            0 => unreachable!("empty learned clause is handled by the caller before learn()"),
            1 => self.assign_unit(lits[0], sink),
            2 => {
                let asserting = lits[0];
                if let Err(forced) = self.binary.add_binary(!lits[0], lits[1], &mut self.ids, sink) {
                    self.assign_unit(forced, sink);
                } else if self.trail.assignment().lit_value(asserting).is_none() {
                    self.trail.enqueue(asserting, Reason::Clause(ClausePtr::Binary(lits[1], asserting)));
                }
            }
            _ => {
                let tier = Tier::Local;
                let lbd = {
                    // Recomputed against the post-backtrack trail so `set_lbd` sees the final
                    // decision levels of the learned literals.
                    let mut distinct = lits
                        .iter()
                        .map(|l| self.trail.assignment().info(l.var()).level)
                        .collect::<Vec<_>>();
                    distinct.sort_unstable();
                    distinct.dedup();
                    distinct.len() as u32
                };
                match self.clauses.attach(lits, &mut self.trail, tier, &mut self.ids, sink) {
                    Attached::Watched(ptr) | Attached::Propagating(ptr, _) => {
                        self.clauses.set_lbd(ptr, lbd, self.config.clause_cleanup_lbd_bound);
                    }
                    Attached::Satisfied => {}
                }
            }
        }
    }

    /// The literals of the clause a [`Conflict`] points at, used to seed conflict analysis.
    fn conflict_lits(&self, conflict: Conflict) -> Vec<Lit> {
        self.clauses.clause_lits(conflict.0)
    }

    /// Runs decide/propagate/analyze/backtrack to completion: either every variable is assigned
    /// (SAT) or the empty clause is learned (UNSAT). Periodically restarts to level 0 on a Luby
    /// schedule without discarding any learned clause.
    pub fn solve(&mut self, sink: &mut dyn LratSink) -> SatState {
        if self.unsat {
            return SatState::Unsat;
        }

        loop {
            match self.propagate_all() {
                Ok(()) => {}
                Err(conflict) => {
                    let conflict_lits = self.conflict_lits(conflict);
                    let learned = analyze(&self.trail, &self.clauses, &conflict_lits);

                    if learned.lits.is_empty() && self.trail.current_level() == 0 {
                        self.unsat = true;
                        sink.step(LratStep::Rup {
                            id: self.ids.next_id(),
                            lits: Vec::new(),
                            rup_chain: Vec::new(),
                        });
                        return SatState::Unsat;
                    }

                    self.trail.backtrack(learned.backtrack_level);
                    self.trail.reset_queue();
                    self.conflicts_since_restart += 1;
                    self.learn(learned.lits, sink);
                    continue;
                }
            }

            if self.conflicts_since_restart >= self.restart_bound {
                self.trail.backtrack(0);
                self.trail.reset_queue();
                self.conflicts_since_restart = 0;
                self.restart_bound = self.config.luby_restart_interval_scale * self.luby.advance();
                continue;
            }

            match self.decide() {
                Some(lit) => {
                    self.trail.new_decision_level();
                    self.trail.enqueue(lit, Reason::SearchDecision);
                }
                None => return SatState::Sat,
            }
        }
    }

    /// The satisfying assignment after a [`SatState::Sat`] result, one entry per variable in
    /// index order.
    pub fn model(&self) -> Vec<bool> {
        (0..self.trail.assignment().var_count())
            .map(|i| self.trail.assignment().lit_value(Var::from_index(i).positive()) == Some(true))
            .collect()
    }
}

/// Builds a solver from a DIMACS-parsed formula, rejecting clauses that are empty at load time
/// per the spec's "malformed model" policy for that case when it is detectable up front. An empty
/// clause *in the formula itself* is still a legitimate (if trivial) way to express UNSAT and is
/// routed through [`CdclSolver::add_clause`]'s normal immediate-UNSAT handling instead.
pub fn solver_for_var_count(var_count: usize, config: SolverConfig) -> Result<CdclSolver, LoadError> {
    if var_count > ccsat_formula::Var::max_count() {
        return Err(LoadError::VarIndexOutOfRange(var_count));
    }
    Ok(CdclSolver::new(var_count, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::NullSink;
    use ccsat_formula::lit;

    fn solve_lits(var_count: usize, clauses: Vec<Vec<Lit>>) -> SatState {
        let mut solver = CdclSolver::new(var_count, SolverConfig::default());
        let mut sink = NullSink;
        for clause in clauses {
            solver.add_clause(clause, &mut sink);
        }
        solver.solve(&mut sink)
    }

    #[test]
    fn unit_chain_is_sat() {
        let state = solve_lits(3, vec![vec![lit![1]], vec![lit![-1], lit![2]], vec![lit![-2], lit![3]]]);
        assert_eq!(state, SatState::Sat);
    }

    #[test]
    fn trivial_contradiction_is_unsat() {
        let state = solve_lits(1, vec![vec![lit![1]], vec![lit![-1]]]);
        assert_eq!(state, SatState::Unsat);
    }

    #[test]
    fn pigeonhole_two_into_one_is_unsat() {
        // x1 v x2 (pigeon placed), and they can't both be true (one hole).
        let state = solve_lits(2, vec![vec![lit![1], lit![2]], vec![lit![-1], lit![-2]], vec![lit![1]], vec![lit![2]]]);
        assert_eq!(state, SatState::Unsat);
    }

    #[test]
    fn sat_instance_reports_a_satisfying_model() {
        let mut solver = CdclSolver::new(3, SolverConfig::default());
        let mut sink = NullSink;
        solver.add_clause(vec![lit![1], lit![2], lit![3]], &mut sink);
        solver.add_clause(vec![lit![-1], lit![-2]], &mut sink);
        let state = solver.solve(&mut sink);
        assert_eq!(state, SatState::Sat);
        let model = solver.model();
        let satisfied = model[0] || model[1] || model[2];
        assert!(satisfied);
        assert!(!(model[0] && model[1]));
    }
}
