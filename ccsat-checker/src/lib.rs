//! Incremental checker for RUP/RAT inference steps.
//!
//! Grounded on `varisat_checker::rup::check_clause_with_hashes`'s core idea -- assume the clause
//! to be added is false, unit-propagate through a caller-supplied chain of already-live clauses,
//! and accept if that reaches a conflict -- but addressed directly by the proof's own clause ids
//! instead of by clause-content hashing, and written with plain borrowed arguments rather than
//! `partial_ref`'s `Context`/`partial!` field slicing (matching the rest of this workspace's
//! departure from that crate; see `ccsat::reversible`'s module doc). RAT support resolves the
//! candidate clause against every live clause containing the pivot's negation and requires each
//! resolvent to itself be RUP.
//!
//! Failure is sticky: once a step is rejected, every later call fails with the same diagnostic
//! without touching checker state, matching the proof handler's contract.

pub mod lrat_text;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use thiserror::Error;

use ccsat::proof::LratStep;
use ccsat_formula::{Lit, Var};

/// Errors raised while validating a proof step.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error("clause id {0} referenced but not live")]
    UnknownClause(u64),

    #[error("RUP chain for clause {clause} did not reach a conflict")]
    RupChainIncomplete { clause: u64 },

    #[error("inferred clause {0} is empty and carries no pivot for a RAT step")]
    MissingPivot(u64),

    #[error(
        "RAT chain for clause {clause} does not match exactly the live clauses containing the \
         negated pivot"
    )]
    RatChainMismatch { clause: u64 },

    #[error("checker has already failed: {0}")]
    Sticky(String),
}

#[derive(Default)]
struct Assignment {
    values: Vec<Option<bool>>,
    trail: Vec<Var>,
}

impl Assignment {
    fn ensure(&mut self, var: Var) {
        if self.values.len() <= var.index() {
            self.values.resize(var.index() + 1, None);
        }
    }

    /// The truth value of `lit` under the current assignment, or `None` if its variable is
    /// unassigned.
    fn lit_value(&self, lit: Lit) -> Option<bool> {
        self.values
            .get(lit.var().index())
            .copied()
            .flatten()
            .map(|positive| positive == lit.is_positive())
    }

    /// Assigns a value making `lit` true. Used both to assume the negation of a candidate clause
    /// and to record a literal forced by unit propagation.
    fn force_true(&mut self, lit: Lit) {
        self.ensure(lit.var());
        self.values[lit.var().index()] = Some(lit.is_positive());
        self.trail.push(lit.var());
    }

    fn mark(&self) -> usize {
        self.trail.len()
    }

    fn undo_to(&mut self, mark: usize) {
        for var in self.trail.drain(mark..) {
            self.values[var.index()] = None;
        }
    }
}

enum ClauseStatus {
    Satisfied,
    Falsified,
    Unit(Lit),
    Unresolved,
}

fn classify(assignment: &Assignment, lits: &[Lit]) -> ClauseStatus {
    let mut unresolved = None;
    let mut unresolved_count = 0;
    for &lit in lits {
        match assignment.lit_value(lit) {
            Some(true) => return ClauseStatus::Satisfied,
            Some(false) => {}
            None => {
                unresolved_count += 1;
                unresolved = Some(lit);
            }
        }
    }
    match unresolved_count {
        0 => ClauseStatus::Falsified,
        1 => ClauseStatus::Unit(unresolved.expect("counted exactly one")),
        _ => ClauseStatus::Unresolved,
    }
}

fn is_tautological(lits: &[Lit]) -> bool {
    lits.iter().any(|&lit| lits.contains(&!lit))
}

/// Incrementally validates problem clauses, RUP/RAT inferences, deletions and rewrites against a
/// live clause set.
#[derive(Default)]
pub struct Checker {
    live: FxHashMap<u64, Vec<Lit>>,
    occurrences: FxHashMap<Lit, FxHashSet<u64>>,
    assignment: Assignment,
    complete: bool,
    failure: Option<String>,
    steps_checked: u64,
}

impl Checker {
    pub fn new() -> Checker {
        Checker::default()
    }

    /// Whether the empty clause has been accepted, completing the proof.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The diagnostic of the first failed step, if any. Sticky: every call after the first
    /// failure returns this same message without re-checking anything.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn check_not_failed(&self) -> Result<(), CheckError> {
        match &self.failure {
            Some(msg) => Err(CheckError::Sticky(msg.clone())),
            None => Ok(()),
        }
    }

    fn fail(&mut self, err: CheckError) -> CheckError {
        if self.failure.is_none() {
            self.failure = Some(err.to_string());
        }
        err
    }

    fn occurrence_entry(&mut self, lit: Lit) -> &mut FxHashSet<u64> {
        self.occurrences.entry(lit).or_default()
    }

    fn record_occurrences(&mut self, id: u64, lits: &[Lit]) {
        for &lit in lits {
            self.occurrence_entry(lit).insert(id);
        }
    }

    fn forget_occurrences(&mut self, id: u64, lits: &[Lit]) {
        for &lit in lits {
            if let Some(set) = self.occurrences.get_mut(&lit) {
                set.remove(&id);
                if set.is_empty() {
                    self.occurrences.remove(&lit);
                }
            }
        }
    }

    fn commit_clause(&mut self, id: u64, lits: Vec<Lit>) {
        if let Some(old) = self.live.remove(&id) {
            self.forget_occurrences(id, &old);
        }
        self.record_occurrences(id, &lits);
        if lits.is_empty() {
            self.complete = true;
            log::info!("checker reached the empty clause after {} steps", self.steps_checked);
        }
        self.live.insert(id, lits);
    }

    fn note_step(&mut self) {
        self.steps_checked += 1;
        if self.steps_checked % 100_000 == 0 {
            log::info!("checked {}k proof steps", self.steps_checked / 1000);
        }
    }

    /// Inserts a clause of the input formula. Always accepted.
    pub fn add_problem_clause(&mut self, id: u64, lits: Vec<Lit>) -> Result<(), CheckError> {
        self.check_not_failed()?;
        self.note_step();
        self.commit_clause(id, lits);
        Ok(())
    }

    /// Removes clauses from the live set. Fails if any id is not currently live.
    pub fn delete_clauses(&mut self, ids: &[u64]) -> Result<(), CheckError> {
        self.check_not_failed()?;
        self.note_step();
        for &id in ids {
            match self.live.remove(&id) {
                Some(lits) => self.forget_occurrences(id, &lits),
                None => {
                    let err = CheckError::UnknownClause(id);
                    return Err(self.fail(err));
                }
            }
        }
        Ok(())
    }

    /// Runs unit propagation over `chain`, an ordered list of live clause ids, returning whether
    /// a falsified clause (a conflict) was reached. Clauses already satisfied, or with more than
    /// one unresolved literal, are skipped rather than rejected: a sound chain does not need every
    /// listed clause to fire, and extra entries after the conflict is reached are never consulted.
    fn propagate_chain(&mut self, chain: &[u64]) -> Result<bool, CheckError> {
        for &id in chain {
            let lits = self
                .live
                .get(&id)
                .ok_or(CheckError::UnknownClause(id))?
                .clone();
            match classify(&self.assignment, &lits) {
                ClauseStatus::Falsified => return Ok(true),
                ClauseStatus::Unit(forced) => self.assignment.force_true(forced),
                ClauseStatus::Satisfied | ClauseStatus::Unresolved => {}
            }
        }
        Ok(false)
    }

    /// Validates that `lits` is implied by the live clause set via `rup_chain`, falling back to a
    /// RAT check over `rat_chain` when the RUP chain alone does not reach a conflict, then commits
    /// it under `id`. Rebinds `id` in place (a rewrite) if it is already live.
    pub fn add_inferred_clause(
        &mut self,
        id: u64,
        lits: Vec<Lit>,
        rup_chain: Vec<u64>,
        rat_chain: Vec<(u64, Vec<u64>)>,
    ) -> Result<(), CheckError> {
        self.check_not_failed()?;
        if self.complete {
            return Ok(());
        }
        self.note_step();

        match self.try_add_inferred_clause(id, &lits, &rup_chain, &rat_chain) {
            Ok(()) => {
                self.commit_clause(id, lits);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn try_add_inferred_clause(
        &mut self,
        id: u64,
        lits: &[Lit],
        rup_chain: &[u64],
        rat_chain: &[(u64, Vec<u64>)],
    ) -> Result<(), CheckError> {
        let mark = self.assignment.mark();
        for &lit in lits {
            self.assignment.force_true(!lit);
        }

        let reached_conflict = self.propagate_chain(rup_chain);
        let reached_conflict = match reached_conflict {
            Ok(reached) => reached,
            Err(err) => {
                self.assignment.undo_to(mark);
                return Err(err);
            }
        };

        if reached_conflict {
            self.assignment.undo_to(mark);
            return Ok(());
        }

        if rat_chain.is_empty() {
            self.assignment.undo_to(mark);
            return Err(CheckError::RupChainIncomplete { clause: id });
        }

        let result = self.check_rat(id, lits, rat_chain);
        self.assignment.undo_to(mark);
        result
    }

    fn check_rat(
        &mut self,
        id: u64,
        lits: &[Lit],
        rat_chain: &[(u64, Vec<u64>)],
    ) -> Result<(), CheckError> {
        let pivot = *lits.first().ok_or(CheckError::MissingPivot(id))?;

        let required = self
            .occurrences
            .get(&!pivot)
            .cloned()
            .unwrap_or_default();
        let provided: FxHashSet<u64> = rat_chain.iter().map(|(r, _)| *r).collect();
        if required != provided {
            return Err(CheckError::RatChainMismatch { clause: id });
        }

        for (r, sub_chain) in rat_chain {
            let r_lits = self
                .live
                .get(r)
                .ok_or(CheckError::UnknownClause(*r))?
                .clone();

            let mut resolvent: Vec<Lit> = lits.to_vec();
            resolvent.extend(r_lits.iter().copied().filter(|&l| l != !pivot));

            if is_tautological(&resolvent) {
                continue;
            }

            let sub_mark = self.assignment.mark();
            for &lit in &resolvent {
                self.assignment.force_true(!lit);
            }
            let sub_conflict = self.propagate_chain(sub_chain);
            self.assignment.undo_to(sub_mark);

            match sub_conflict {
                Ok(true) => {}
                Ok(false) => return Err(CheckError::RupChainIncomplete { clause: *r }),
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    /// Applies one proof step produced by [`ccsat::proof::LratSink`] or parsed from the LRAT text
    /// wire format.
    pub fn apply_step(&mut self, step: LratStep) -> Result<(), CheckError> {
        match step {
            LratStep::Rup { id, lits, rup_chain } => {
                self.add_inferred_clause(id, lits, rup_chain, Vec::new())
            }
            LratStep::Rat {
                id,
                lits,
                rup_chain,
                rat_chain,
            } => self.add_inferred_clause(id, lits, rup_chain, rat_chain),
            LratStep::Delete { ids } => self.delete_clauses(&ids),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccsat_formula::lit;

    #[test]
    fn problem_clause_is_always_accepted() {
        let mut checker = Checker::new();
        assert!(checker
            .add_problem_clause(1, vec![lit![1], lit![2]])
            .is_ok());
        assert!(!checker.is_complete());
    }

    #[test]
    fn rup_chain_derives_empty_clause() {
        // Unit clauses {1}, {2} plus {-1, -2, 3}: assuming 3 false forces 1 and 2 true via the
        // unit clauses, which then falsifies the ternary clause outright.
        let mut checker = Checker::new();
        checker.add_problem_clause(1, vec![lit![1]]).unwrap();
        checker.add_problem_clause(2, vec![lit![2]]).unwrap();
        checker
            .add_problem_clause(3, vec![lit![-1], lit![-2], lit![3]])
            .unwrap();

        checker
            .add_inferred_clause(4, vec![lit![3]], vec![1, 2, 3], Vec::new())
            .unwrap();
        assert!(!checker.is_complete());

        checker.add_problem_clause(5, vec![lit![-3]]).unwrap();
        checker
            .add_inferred_clause(6, Vec::new(), vec![4, 5], Vec::new())
            .unwrap();
        assert!(checker.is_complete());
    }

    #[test]
    fn incomplete_rup_chain_is_rejected() {
        let mut checker = Checker::new();
        checker
            .add_problem_clause(1, vec![lit![1], lit![2], lit![-3]])
            .unwrap();
        let err = checker
            .add_inferred_clause(2, vec![lit![3]], vec![1], Vec::new())
            .unwrap_err();
        assert!(matches!(err, CheckError::RupChainIncomplete { clause: 2 }));
    }

    #[test]
    fn failure_is_sticky() {
        let mut checker = Checker::new();
        checker
            .add_problem_clause(1, vec![lit![1], lit![2], lit![-3]])
            .unwrap();
        assert!(checker
            .add_inferred_clause(2, vec![lit![3]], vec![1], Vec::new())
            .is_err());

        let err = checker
            .add_problem_clause(3, vec![lit![4]])
            .unwrap_err();
        assert!(matches!(err, CheckError::Sticky(_)));
    }

    #[test]
    fn rat_step_resolves_against_every_clause_containing_the_negated_pivot() {
        // Only clause 1 contains -3 (pivot 3's negation). The resolvent of {3} against clause 1
        // on that pivot is {3, -1}, which clause 2 falsifies outright.
        let mut checker = Checker::new();
        checker
            .add_problem_clause(1, vec![lit![-3], lit![-1]])
            .unwrap();
        checker.add_problem_clause(2, vec![lit![-1], lit![3]]).unwrap();

        checker
            .add_inferred_clause(5, vec![lit![3]], Vec::new(), vec![(1, vec![2])])
            .unwrap();
        assert!(checker.live.contains_key(&5));
    }

    #[test]
    fn rewrite_rebinds_an_existing_id_and_updates_occurrences() {
        let mut checker = Checker::new();
        checker.add_problem_clause(1, vec![lit![1]]).unwrap();
        checker.add_problem_clause(2, vec![lit![2]]).unwrap();
        checker
            .add_problem_clause(3, vec![lit![-1], lit![-2], lit![3]])
            .unwrap();

        // {1, 2, 3} is trivially RUP: assuming it false falsifies unit clause {1} immediately.
        checker
            .add_inferred_clause(4, vec![lit![1], lit![2], lit![3]], vec![1], Vec::new())
            .unwrap();
        assert_eq!(checker.live[&4], vec![lit![1], lit![2], lit![3]]);
        assert!(checker.occurrences[&lit![2]].contains(&4));

        // Rewriting id 4 down to just {3} drops its occurrences under 1 and 2.
        checker
            .add_inferred_clause(4, vec![lit![3]], vec![1, 2, 3], Vec::new())
            .unwrap();
        assert_eq!(checker.live[&4], vec![lit![3]]);
        assert!(!checker.occurrences[&lit![2]].contains(&4));
    }
}
