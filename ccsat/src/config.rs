//! Solver configuration.
//!
//! Unlike the macro-derived config this is based on, every default is written by hand in the
//! accompanying `impl Default` instead of being extracted from doc comments at compile time.

/// Compression scheme applied to completed trail blocks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrailCompression {
    /// Completed blocks are kept as-is.
    NoCompression,
    /// Completed blocks are run-length packed.
    CompressWithRle,
}

/// Demon execution profiling level.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProfileLevel {
    /// No profiling.
    NoProfiling,
    /// Count demon executions per constraint.
    CountCalls,
}

/// Configurable parameters used during solving.
///
/// Covers both the CP engine (trail block size, compression) and the CDCL core (decay rates,
/// reduction intervals, LRAT checking).
#[derive(Clone, Debug)]
pub struct SolverConfig {
    /// Number of reversible slots per compressed trail block.
    pub trail_block_size: usize,

    /// Compression scheme for completed trail blocks.
    pub compress_trail: TrailCompression,

    /// Whether to retain user-assigned names on variables and constraints.
    pub store_names: bool,

    /// Demon execution profiling level.
    pub profile_level: ProfileLevel,

    /// Multiplicative decay for the VSIDS-style decision heuristic.
    pub vsids_decay: f32,

    /// Multiplicative decay for clause activities.
    pub clause_activity_decay: f32,

    /// Number of conflicts between local-tier clause reductions.
    pub reduce_locals_interval: u64,

    /// Number of conflicts between mid-tier clause reductions.
    pub reduce_mids_interval: u64,

    /// Scaling factor for luby sequence based restarts (number of conflicts).
    pub luby_restart_interval_scale: u64,

    /// Literal-blocks-distance at or below which a learned clause is kept in the core tier
    /// permanently instead of becoming eligible for reduction.
    pub clause_cleanup_lbd_bound: u32,

    /// Threshold above which an at-most-one group is kept in its compact offset form instead of
    /// being expanded into explicit pairwise implications.
    pub at_most_one_max_expansion_size: usize,

    /// If set, every inference recorded in the proof stream is validated against the live clause
    /// database before it is accepted.
    pub check_lrat_proof: bool,
}

impl Default for SolverConfig {
    fn default() -> SolverConfig {
        SolverConfig {
            trail_block_size: 8000,
            compress_trail: TrailCompression::NoCompression,
            store_names: true,
            profile_level: ProfileLevel::NoProfiling,
            vsids_decay: 0.95,
            clause_activity_decay: 0.999,
            reduce_locals_interval: 15_000,
            reduce_mids_interval: 10_000,
            luby_restart_interval_scale: 128,
            clause_cleanup_lbd_bound: 3,
            at_most_one_max_expansion_size: 16,
            check_lrat_proof: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SolverConfig::default();
        assert!(config.vsids_decay > 0.0 && config.vsids_decay < 1.0);
        assert!(config.clause_activity_decay > 0.0 && config.clause_activity_decay < 1.0);
        assert!(config.trail_block_size > 0);
    }
}
