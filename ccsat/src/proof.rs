//! Sink for LRAT proof steps emitted while propagating, attaching, rewriting or deleting clauses.
//!
//! Grounded on `varisat::proof::Proof`/the `ProofProcessor` trait: the clause manager and the
//! binary implication graph do not know how proof steps are persisted or checked; they only call
//! into a `dyn LratSink` whenever a clause is added, rewritten or deleted. `ccsat-checker` is one
//! consumer; a text writer for the LRAT wire format is another.
//!
//! Clause identifiers here are the strictly increasing positive integers of the LRAT text format,
//! assigned by [`IdSource`] in the order clauses are added -- not [`crate::clause::ClausePtr`],
//! which is an internal, non-stable addressing scheme.

use ccsat_formula::Lit;

/// Assigns the strictly increasing clause ids the LRAT wire format requires.
pub struct IdSource {
    next: u64,
}

impl IdSource {
    pub fn new() -> IdSource {
        IdSource { next: 1 }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

impl Default for IdSource {
    fn default() -> Self {
        IdSource::new()
    }
}

/// A single LRAT proof step, matching the `rup`/`rat`/`delete` line shapes of the wire format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LratStep {
    /// `<id> <literal>* 0 <rup-id>* 0` with an empty RAT portion.
    Rup {
        id: u64,
        lits: Vec<Lit>,
        rup_chain: Vec<u64>,
    },
    /// A RAT inference: the pivot is `lits[0]`.
    Rat {
        id: u64,
        lits: Vec<Lit>,
        rup_chain: Vec<u64>,
        rat_chain: Vec<(u64, Vec<u64>)>,
    },
    /// `<id> d <id>* 0`.
    Delete { ids: Vec<u64> },
}

/// Receives proof steps as the solver core produces them.
///
/// All methods have a no-op default so a solver run with proof checking disabled pays no cost
/// beyond the `dyn` dispatch of a [`NullSink`].
pub trait LratSink {
    fn step(&mut self, _step: LratStep) {}
}

/// The default sink: discards every step.
pub struct NullSink;

impl LratSink for NullSink {}

/// Records every step in order, for tests and for the standalone LRAT text writer.
#[derive(Default)]
pub struct VecSink {
    pub steps: Vec<LratStep>,
}

impl LratSink for VecSink {
    fn step(&mut self, step: LratStep) {
        self.steps.push(step);
    }
}
