//! Clause manager: n-ary clause storage, two-watched-literal propagation, reason reporting,
//! deletion and rewriting.
//!
//! Grounded on `varisat::clause`/`varisat::prop::{watch, long}`, with two deliberate departures:
//!
//! - Clauses are stored as plain `Vec<Lit>` behind a slab (`Vec<Option<NaryClause>>`) rather than
//!   a byte-packed DST allocator reached through raw pointer arithmetic (`ClauseAlloc` in
//!   `varisat::clause::alloc`). [`ClausePtr`] is a value-comparable tagged enum of
//!   `Unit(lit)`, `Binary(l1, l2)`, `Nary(index)`, `Empty` in place of the pointer-stealing
//!   scheme.
//! - The watch-list scan in [`ClauseManager::propagate`] follows the same cyclic `start_index`
//!   algorithm as `prop::long::propagate_long`, but with safe `Vec` indexing throughout rather
//!   than raw pointers; the invariants and the blocking-literal optimization are the same.
//!
//! Binary clauses (`n = 2`) never enter this manager: attaching one routes it to
//! [`crate::binary_graph::BinaryImplicationGraph`] instead.

use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;

use ccsat_formula::Lit;

use crate::proof::{IdSource, LratSink, LratStep};
use crate::sat_trail::{Reason, SatTrail};

/// Value-comparable handle to a clause, replacing a raw-pointer-tagging scheme.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ClausePtr {
    Unit(Lit),
    Binary(Lit, Lit),
    Nary(u32),
    Empty,
}

/// Tier a long clause is sorted into for cleanup purposes, grounded on
/// `varisat::clause::{activity, reduce, gc}`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Tier {
    /// An input clause; never removed by cleanup.
    Irreducible,
    /// A learned clause whose LBD is at or below `clause_cleanup_lbd_bound`; kept permanently.
    Core,
    /// A learned clause eligible for the mid-tier reduction sweep.
    Mid,
    /// A learned clause eligible for the (more frequent) local-tier reduction sweep.
    Local,
}

struct NaryClause {
    lits: Vec<Lit>,
    /// Cyclic scan cursor into `lits[2..]`, advanced on each `propagate` call.
    start_index: usize,
    tier: Tier,
    lbd: u32,
    activity: f32,
    deleted: bool,
}

/// Slab of heap-allocated (`n >= 3`) clauses, addressed by [`ClausePtr::Nary`].
#[derive(Default)]
struct ClauseDb {
    clauses: Vec<NaryClause>,
    live_count: usize,
}

impl ClauseDb {
    fn insert(&mut self, lits: Vec<Lit>, tier: Tier) -> u32 {
        let idx = self.clauses.len() as u32;
        self.clauses.push(NaryClause {
            lits,
            start_index: 0,
            tier,
            lbd: u32::max_value(),
            activity: 0.0,
            deleted: false,
        });
        self.live_count += 1;
        idx
    }

    fn get(&self, idx: u32) -> &NaryClause {
        &self.clauses[idx as usize]
    }

    fn get_mut(&mut self, idx: u32) -> &mut NaryClause {
        &mut self.clauses[idx as usize]
    }
}

/// A watch entry: `clause` has `¬lit` in one of its first two slots (where `lit` is the literal
/// whose watch list this entry lives in); `blocking` is a literal of the clause read before
/// touching the clause itself.
#[derive(Copy, Clone)]
struct Watcher {
    clause: u32,
    blocking: Lit,
}

#[derive(Default)]
struct Watchlists {
    by_lit: Vec<Vec<Watcher>>,
}

impl Watchlists {
    fn set_var_count(&mut self, count: usize) {
        self.by_lit.resize(count * 2, Vec::new());
    }

    fn watch(&mut self, lit: Lit, watcher: Watcher) {
        self.by_lit[lit.code()].push(watcher);
    }

    fn of_mut(&mut self, lit: Lit) -> &mut Vec<Watcher> {
        &mut self.by_lit[lit.code()]
    }
}

/// A conflicting clause detected during propagation.
#[derive(Copy, Clone, Debug)]
pub struct Conflict(pub ClausePtr);

/// Outcome of attaching a new clause.
#[derive(Copy, Clone, Debug)]
pub enum Attached {
    /// The clause is a no-op (it was a tautology or already satisfied at the root).
    Satisfied,
    /// The clause was attached to the watch lists and is not yet propagating.
    Watched(ClausePtr),
    /// The clause was attached and immediately forced a unit propagation.
    Propagating(ClausePtr, Lit),
}

/// The n-ary clause database together with its two-watched-literal index.
#[derive(Default)]
pub struct ClauseManager {
    db: ClauseDb,
    watch: Watchlists,
    /// Per-clause-id LRAT id, populated only when proof recording is enabled.
    lrat_ids: FxHashMap<u32, u64>,
}

impl ClauseManager {
    pub fn set_var_count(&mut self, count: usize) {
        self.watch.set_var_count(count);
    }

    /// Attaches a clause of size `>= 3` (size 0 is immediate UNSAT and size 2 belongs in the
    /// binary implication graph; the caller routes those before reaching here).
    ///
    /// `lits` must already be deduplicated and free of complementary pairs (a tautology should
    /// never reach the clause manager; callers filter at load time and reject it as a malformed
    /// model).
    pub fn attach(
        &mut self,
        mut lits: Vec<Lit>,
        trail: &mut SatTrail,
        tier: Tier,
        ids: &mut IdSource,
        sink: &mut dyn LratSink,
    ) -> Attached {
        debug_assert!(lits.len() >= 3);

        // Place the two literals with the highest assigned decision level (or unassigned/true
        // literals, which outrank any assigned-false one) at positions 0 and 1.
        let assignment = trail.assignment();
        let rank = |l: Lit| -> i64 {
            match assignment.lit_value(l) {
                None => i64::max_value(),
                Some(true) => i64::max_value() - 1,
                Some(false) => i64::from(assignment.info(l.var()).level),
            }
        };
        lits.sort_by_key(|&l| std::cmp::Reverse(rank(l)));

        if assignment.is_true(lits[0]) {
            return Attached::Satisfied;
        }

        let idx = self.db.insert(lits, tier);
        let clause_lits = self.db.get(idx).lits.clone();
        self.watch.watch(
            clause_lits[0],
            Watcher {
                clause: idx,
                blocking: clause_lits[1],
            },
        );
        self.watch.watch(
            clause_lits[1],
            Watcher {
                clause: idx,
                blocking: clause_lits[0],
            },
        );

        let ptr = ClausePtr::Nary(idx);
        let id = ids.next_id();
        self.lrat_ids.insert(idx, id);
        sink.step(LratStep::Rup {
            id,
            lits: clause_lits.clone(),
            rup_chain: Vec::new(),
        });

        if trail.assignment().is_false(clause_lits[1]) && trail.assignment().is_unknown(clause_lits[0]) {
            trail.enqueue(clause_lits[0], Reason::Clause(ptr));
            Attached::Propagating(ptr, clause_lits[0])
        } else {
            Attached::Watched(ptr)
        }
    }

    /// The id assigned to this clause when it was attached.
    fn lrat_id(&self, idx: u32) -> u64 {
        self.lrat_ids[&idx]
    }

    /// Propagates every consequence of `lit` having just become false.
    ///
    /// Uses the blocking-literal short-circuit and the cyclic `start_index` scan of
    /// `prop::long::propagate_long`, reimplemented with safe `Vec` indexing throughout.
    pub fn propagate(&mut self, trail: &mut SatTrail, lit: Lit) -> Result<(), Conflict> {
        let false_lit = !lit;
        let watchers = std::mem::take(self.watch.of_mut(false_lit));
        let mut kept = Vec::with_capacity(watchers.len());
        let mut conflict = None;

        for watcher in watchers {
            if conflict.is_some() {
                kept.push(watcher);
                continue;
            }

            if trail.assignment().is_true(watcher.blocking) {
                kept.push(watcher);
                continue;
            }

            let clause = self.db.get_mut(watcher.clause);
            if clause.deleted {
                continue;
            }

            // Ensure false_lit sits at slot 1 so slot 0 holds the "other" watched literal.
            if clause.lits[0] == false_lit {
                clause.lits.swap(0, 1);
            }
            let other = clause.lits[0];

            if other != watcher.blocking && trail.assignment().is_true(other) {
                kept.push(Watcher {
                    clause: watcher.clause,
                    blocking: other,
                });
                continue;
            }

            let len = clause.lits.len();
            let mut found = None;
            for step in 0..(len - 2) {
                let probe = 2 + (clause.start_index + step) % (len - 2);
                if !trail.assignment().is_false(clause.lits[probe]) {
                    found = Some(probe);
                    clause.start_index = (probe - 1) % (len - 2);
                    break;
                }
            }

            if let Some(probe) = found {
                // `lits[1]` currently holds `false_lit`; swapping it with the found non-false
                // literal moves the new watch into place and parks `false_lit` among the
                // unwatched literals, where the cyclic scan will skip right past it.
                clause.lits.swap(1, probe);
                let new_watched = clause.lits[1];
                self.watch.watch(
                    !new_watched,
                    Watcher {
                        clause: watcher.clause,
                        blocking: other,
                    },
                );
                continue;
            }

            // No replacement literal: the clause is unit under `other`, or conflicting.
            kept.push(Watcher {
                clause: watcher.clause,
                blocking: other,
            });
            if trail.assignment().is_false(other) {
                conflict = Some(ClausePtr::Nary(watcher.clause));
            } else if trail.assignment().is_unknown(other) {
                trail.enqueue(other, Reason::Clause(ClausePtr::Nary(watcher.clause)));
            }
        }

        *self.watch.of_mut(false_lit) = kept;

        match conflict {
            Some(ptr) => Err(Conflict(ptr)),
            None => Ok(()),
        }
    }

    /// The antecedent of a literal propagated by this manager: the clause's literals minus the
    /// propagated one, which always occupies position 0 of the stored clause.
    pub fn reason(&self, ptr: ClausePtr) -> Vec<Lit> {
        match ptr {
            ClausePtr::Nary(idx) => self.db.get(idx).lits[1..].to_vec(),
            // `ClausePtr::Binary(antecedent, propagated)`: see `crate::conflict::reason_lits`.
            ClausePtr::Binary(antecedent, _) => vec![antecedent],
            ClausePtr::Unit(_) | ClausePtr::Empty => Vec::new(),
        }
    }

    /// Every literal of the clause identified by `ptr`, used when the clause itself (not one of
    /// its reasons) is the thing being examined, e.g. a conflicting clause handed to conflict
    /// analysis.
    pub fn clause_lits(&self, ptr: ClausePtr) -> Vec<Lit> {
        match ptr {
            ClausePtr::Nary(idx) => self.db.get(idx).lits.clone(),
            ClausePtr::Binary(a, b) => vec![a, b],
            ClausePtr::Unit(l) => vec![l],
            ClausePtr::Empty => Vec::new(),
        }
    }

    /// Marks a clause for deletion. Actual storage reclamation happens on the next
    /// [`ClauseManager::sweep`]; watch-list entries for a deleted clause are simply skipped by
    /// `propagate` and dropped from `kept`.
    pub fn delete(&mut self, ptr: ClausePtr, sink: &mut dyn LratSink) {
        if let ClausePtr::Nary(idx) = ptr {
            let id = self.lrat_id(idx);
            let clause = self.db.get_mut(idx);
            if !clause.deleted {
                clause.deleted = true;
                self.db.live_count -= 1;
                sink.step(LratStep::Delete { ids: vec![id] });
            }
        }
    }

    /// Rewrites a clause to a (smaller) subset of its literals, with an LRAT justification.
    ///
    /// If the rewrite crosses the 2/>=3 boundary, the caller is responsible for detaching this
    /// clause and re-attaching the result as a binary clause or unit assignment instead.
    pub fn rewrite(
        &mut self,
        ptr: ClausePtr,
        new_lits: Vec<Lit>,
        rup_chain: Vec<u64>,
        sink: &mut dyn LratSink,
    ) {
        if let ClausePtr::Nary(idx) = ptr {
            let id = self.lrat_id(idx);
            sink.step(LratStep::Rup {
                id,
                lits: new_lits.clone(),
                rup_chain,
            });
            self.db.get_mut(idx).lits = new_lits;
        }
    }

    /// Compacts out every clause tombstoned by [`delete`](Self::delete), dropping and rebuilding
    /// watch lists. Triggered by the caller once a cleanup threshold (or an inprocessing pass) is
    /// reached; never run implicitly inside `propagate`.
    pub fn sweep(&mut self) {
        let mut keep = Vec::with_capacity(self.db.live_count);
        for clause in self.db.clauses.drain(..) {
            if !clause.deleted {
                keep.push(clause);
            }
        }
        self.db.clauses = keep;
        self.db.live_count = self.db.clauses.len();

        for list in self.watch.by_lit.iter_mut() {
            list.clear();
        }
        for (idx, clause) in self.db.clauses.iter().enumerate() {
            let idx = idx as u32;
            self.watch.watch(
                clause.lits[0],
                Watcher {
                    clause: idx,
                    blocking: clause.lits[1],
                },
            );
            self.watch.watch(
                clause.lits[1],
                Watcher {
                    clause: idx,
                    blocking: clause.lits[0],
                },
            );
        }
    }

    /// Applies VSIDS-style activity decay to every live clause.
    pub fn decay_activity(&mut self, decay: f32) {
        for clause in self.db.clauses.iter_mut() {
            clause.activity *= decay;
        }
    }

    pub fn bump_activity(&mut self, ptr: ClausePtr, amount: f32) {
        if let ClausePtr::Nary(idx) = ptr {
            self.db.get_mut(idx).activity += amount;
        }
    }

    pub fn set_lbd(&mut self, ptr: ClausePtr, lbd: u32, cleanup_bound: u32) {
        if let ClausePtr::Nary(idx) = ptr {
            let clause = self.db.get_mut(idx);
            clause.lbd = lbd;
            if clause.tier != Tier::Irreducible && lbd <= cleanup_bound {
                clause.tier = Tier::Core;
            }
        }
    }

    /// Clauses eligible for removal in tier `tier`, worst activity first, used by the reduction
    /// sweep.
    pub fn reduction_candidates(&self, tier: Tier) -> Vec<ClausePtr> {
        let mut candidates: Vec<(u32, OrderedFloat<f32>)> = self
            .db
            .clauses
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.deleted && c.tier == tier)
            .map(|(idx, c)| (idx as u32, OrderedFloat(c.activity)))
            .collect();
        candidates.sort_by_key(|&(_, activity)| activity);
        candidates
            .into_iter()
            .map(|(idx, _)| ClausePtr::Nary(idx))
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.db.live_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccsat_formula::lit;
    use crate::proof::NullSink;

    fn attach_nary(mgr: &mut ClauseManager, trail: &mut SatTrail, lits: Vec<Lit>) -> Attached {
        mgr.attach(
            lits,
            trail,
            Tier::Irreducible,
            &mut IdSource::new(),
            &mut NullSink,
        )
    }

    #[test]
    fn conflict_detected_when_all_literals_false() {
        let mut trail = SatTrail::default();
        trail.set_var_count(4);
        let mut mgr = ClauseManager::default();
        mgr.set_var_count(4);

        attach_nary(&mut mgr, &mut trail, vec![lit![1], lit![2], lit![3]]);

        trail.enqueue(lit![-1], Reason::SearchDecision);
        assert!(mgr.propagate(&mut trail, lit![1]).is_ok());
        trail.enqueue(lit![-2], Reason::SearchDecision);
        assert!(mgr.propagate(&mut trail, lit![2]).is_ok());

        // Only lit![3] remains: the clause should already have propagated it true.
        assert!(trail.assignment().is_true(lit![3]));
    }

    #[test]
    fn attaching_with_two_false_others_propagates_immediately() {
        let mut trail = SatTrail::default();
        trail.set_var_count(4);
        let mut mgr = ClauseManager::default();
        mgr.set_var_count(4);

        trail.enqueue(lit![-1], Reason::SearchDecision);
        trail.enqueue(lit![-2], Reason::SearchDecision);

        let attached = attach_nary(&mut mgr, &mut trail, vec![lit![1], lit![2], lit![3]]);
        assert!(matches!(attached, Attached::Propagating(_, l) if l == lit![3]));
        assert!(trail.assignment().is_true(lit![3]));
    }

    #[test]
    fn reason_excludes_the_propagated_literal() {
        let mut trail = SatTrail::default();
        trail.set_var_count(4);
        let mut mgr = ClauseManager::default();
        mgr.set_var_count(4);

        trail.enqueue(lit![-1], Reason::SearchDecision);
        trail.enqueue(lit![-2], Reason::SearchDecision);
        let attached = attach_nary(&mut mgr, &mut trail, vec![lit![1], lit![2], lit![3]]);
        let ptr = match attached {
            Attached::Propagating(ptr, _) => ptr,
            _ => panic!("expected propagation"),
        };
        let reason = mgr.reason(ptr);
        assert!(!reason.contains(&lit![3]));
        assert!(reason.contains(&lit![-1]) || reason.contains(&lit![-2]));
    }
}
