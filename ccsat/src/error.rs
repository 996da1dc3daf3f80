//! Error types shared across the CP engine and the CDCL core.
//!
//! Search failure itself (an unsatisfiable branch) is not an error: it is signalled by
//! [`crate::queue::Unsat`], a plain marker returned through ordinary `Result`s and handled
//! entirely inside the search driver. The types here cover what the design calls "malformed
//! model" and "proof-step" errors, which do surface to the caller.

use thiserror::Error;

use crate::model::{ArgName, ConstraintTag};

/// Errors detected while a model is being built, before any search begins.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("variable index {0} exceeds the maximum supported variable count")]
    VarIndexOutOfRange(usize),

    #[error("constraint {0} was posted with an empty argument array")]
    EmptyArgumentArray(&'static str),

    #[error("integer domain [{min}, {max}] is empty or invalid")]
    InvalidDomain { min: i64, max: i64 },

    #[error("clause of size 0 makes the formula unsatisfiable at load time")]
    EmptyClause,

    #[error("constraint tag {0:?} has no propagator in this core")]
    UnsupportedConstraintTag(ConstraintTag),

    #[error("constraint {constraint:?} is missing its {arg:?} argument")]
    MissingArgument {
        constraint: ConstraintTag,
        arg: ArgName,
    },

    #[error("constraint {constraint:?}'s {arg:?} argument has the wrong shape")]
    WrongArgumentType {
        constraint: ConstraintTag,
        arg: ArgName,
    },
}

/// Errors produced while validating an LRAT proof stream.
#[derive(Debug, Error)]
pub enum ProofError {
    #[error("clause id {0} referenced but not live")]
    UnknownClause(u64),

    #[error("RUP chain for clause {clause} did not reach a conflict")]
    RupChainIncomplete { clause: u64 },

    #[error("RAT pivot literal missing from inferred clause {0}")]
    MissingPivot(u64),

    #[error("malformed proof line at offset {0}")]
    MalformedLine(usize),
}
