//! First-UIP conflict-clause analysis.
//!
//! Grounded on `varisat::analyze_conflict::analyze_conflict`: walks the trail in reverse
//! chronological order, resolving away every literal of the conflicting clause assigned at the
//! current decision level until exactly one remains (the first unique implication point), then
//! returns the learned clause together with the decision level to backtrack to. Reimplemented
//! with plain borrowed arguments and `Result`-free control flow instead of `partial_ref`'s
//! `Context`/`partial!`/`split_borrow!` field-slicing, matching the rest of this crate's departure
//! from that crate (see [`crate::reversible`]'s module doc).
//!
//! Recursive clause minimization is not implemented: the learned clause is exactly the resolvent
//! produced by first-UIP resolution, unreduced.

use ccsat_formula::Lit;

use crate::clause::{ClauseManager, ClausePtr};
use crate::sat_trail::{Reason, SatTrail};

/// The outcome of analyzing a conflict: a learned clause (asserting literal first) and the
/// decision level to backtrack to before re-enqueuing it.
pub struct LearnedClause {
    pub lits: Vec<Lit>,
    pub backtrack_level: usize,
    pub lbd: u32,
}

fn reason_lits(trail: &SatTrail, clauses: &ClauseManager, reason: Reason) -> Vec<Lit> {
    match reason {
        Reason::Clause(ptr @ ClausePtr::Nary(_)) => clauses.reason(ptr),
        // `ClausePtr::Binary(antecedent, propagated)`: the antecedent is the clause's other
        // literal, already false at the point the propagated literal was enqueued.
        Reason::Clause(ClausePtr::Binary(antecedent, _)) => vec![antecedent],
        Reason::Clause(ClausePtr::Unit(_)) | Reason::Clause(ClausePtr::Empty) => Vec::new(),
        Reason::SameReasonAs(lit) => {
            reason_lits(trail, clauses, trail.assignment().info(lit.var()).reason)
        }
        Reason::SearchDecision | Reason::Unit => Vec::new(),
    }
}

/// Resolves the conflicting clause back to its first unique implication point.
///
/// `conflict_lits` are the literals of the clause that is currently false under every variable
/// (the clause found by `ClauseManager::propagate` or `BinaryImplicationGraph::propagate`,
/// expressed as plain literals rather than a [`ClausePtr`] so both sources share one entry point;
/// a binary conflict's reason literal is already carried inside `Reason::Clause(ClausePtr::Binary)`
/// on the trail, so resolving it back needs no separate handle on the implication graph itself).
pub fn analyze(trail: &SatTrail, clauses: &ClauseManager, conflict_lits: &[Lit]) -> LearnedClause {
    let current_level = trail.current_level();

    if current_level == 0 {
        return LearnedClause {
            lits: Vec::new(),
            backtrack_level: 0,
            lbd: 0,
        };
    }

    let assignment = trail.assignment();
    let mut in_clause = vec![false; assignment.var_count()];
    let mut current_level_count = 0usize;
    let mut learned: Vec<Lit> = Vec::new();
    let mut levels_seen = vec![false; current_level + 1];

    let mut add_literal = |lit: Lit| {
        let level = assignment.info(lit.var()).level as usize;
        if level == 0 || in_clause[lit.var().index()] {
            return;
        }
        in_clause[lit.var().index()] = true;
        levels_seen[level] = true;
        if level == current_level {
            current_level_count += 1;
        } else {
            learned.push(lit);
        }
    };

    for &lit in conflict_lits {
        add_literal(lit);
    }

    let mut asserting = None;
    for &lit in trail.trail().iter().rev() {
        if !in_clause[lit.var().index()] {
            continue;
        }
        in_clause[lit.var().index()] = false;
        current_level_count -= 1;
        if current_level_count == 0 {
            asserting = Some(!lit);
            break;
        }
        let reason = assignment.info(lit.var()).reason;
        for r_lit in reason_lits(trail, clauses, reason) {
            add_literal(r_lit);
        }
    }

    let asserting = asserting.expect("conflict at level > 0 always has an asserting literal");
    learned.insert(0, asserting);

    let mut backtrack_level = 0;
    if learned.len() > 1 {
        let mut best = 1;
        for i in 2..learned.len() {
            let level_i = assignment.info(learned[i].var()).level as usize;
            let level_best = assignment.info(learned[best].var()).level as usize;
            if level_i > level_best {
                best = i;
            }
        }
        learned.swap(1, best);
        backtrack_level = assignment.info(learned[1].var()).level as usize;
    }

    let lbd = levels_seen.iter().filter(|&&seen| seen).count() as u32;

    LearnedClause {
        lits: learned,
        backtrack_level,
        lbd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccsat_formula::lit;
    use crate::clause::{Attached, Tier};
    use crate::proof::NullSink;

    #[test]
    fn unit_propagation_chain_learns_a_single_literal_at_level_zero() {
        let mut trail = SatTrail::default();
        trail.set_var_count(4);
        let mut clauses = ClauseManager::default();
        clauses.set_var_count(4);

        trail.enqueue(lit![1], Reason::Unit);
        trail.enqueue(lit![-2], Reason::Unit);
        trail.enqueue(lit![-3], Reason::Unit);

        let learned = analyze(&trail, &clauses, &[lit![-1], lit![2], lit![3]]);
        assert_eq!(learned.backtrack_level, 0);
        assert!(learned.lits.is_empty());
    }

    #[test]
    fn decision_level_conflict_learns_the_negated_decision() {
        let mut trail = SatTrail::default();
        trail.set_var_count(4);
        let mut clauses = ClauseManager::default();
        clauses.set_var_count(4);

        trail.new_decision_level();
        trail.enqueue(lit![1], Reason::SearchDecision);

        let attached = clauses.attach(
            vec![lit![-1], lit![2], lit![3]],
            &mut trail,
            Tier::Irreducible,
            &mut NullSink,
        );
        let ptr = match attached {
            Attached::Watched(ptr) => ptr,
            other => panic!("expected watched clause, got {:?}", other),
        };
        let _ = ptr;

        trail.enqueue(lit![-2], Reason::SearchDecision);
        trail.enqueue(lit![-3], Reason::SearchDecision);

        // The clause {-1, 2, 3} is now fully false: a conflict at the current (only) level.
        let learned = analyze(&trail, &clauses, &[lit![-1], lit![2], lit![3]]);
        assert_eq!(learned.lits, vec![lit![-1]]);
        assert_eq!(learned.backtrack_level, 0);
    }
}
