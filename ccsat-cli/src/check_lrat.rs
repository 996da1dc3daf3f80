//! `check-lrat` subcommand: validates an LRAT proof against a DIMACS CNF formula.
//!
//! Grounded on the teacher's `varisat-cli --check` subcommand (`varisat-cli/src/check.rs`): reads
//! the formula, feeds its clauses into the checker as problem clauses (ids assigned in file
//! order, starting at 1, matching the convention [`ccsat::cdcl::CdclSolver`] uses when it emits a
//! proof itself), then replays the proof file's steps. Exit code follows §6: `0` iff the proof
//! validates to the empty clause, non-zero otherwise with a one-line diagnostic.

use std::fs;
use std::io::Read;

use anyhow::{Context, Error};
use clap::{App, ArgMatches, SubCommand};

use ccsat_checker::{lrat_text::parse_lrat_text, Checker};

use crate::{banner, init_logging, open_input};

pub fn args() -> App<'static, 'static> {
    SubCommand::with_name("check-lrat")
        .about("Validate an LRAT proof against a DIMACS CNF formula")
        .arg_from_usage("[INPUT] 'The input DIMACS CNF file to use (stdin if omitted)'")
        .arg_from_usage("<proof-file> --proof=[FILE] 'The LRAT proof file to check'")
}

pub fn main(matches: &ArgMatches) -> Result<i32, Error> {
    init_logging();
    banner();

    let input = open_input(matches, "CNF formula")?;
    let formula = ccsat_dimacs::DimacsParser::parse(input).context("parsing DIMACS CNF")?;

    let mut checker = Checker::new();
    for (index, clause) in formula.iter().enumerate() {
        checker
            .add_problem_clause((index + 1) as u64, clause.to_vec())
            .context("seeding checker with problem clauses")?;
    }

    let proof_path = matches.value_of("proof-file").expect("required by clap");
    log::info!("Checking proof file '{}'", proof_path);
    let proof_file: Box<dyn Read> = Box::new(fs::File::open(proof_path).with_context(|| format!("opening {}", proof_path))?);
    let steps = parse_lrat_text(proof_file).context("parsing LRAT proof")?;

    for step in steps {
        if let Err(err) = checker.apply_step(step) {
            log::error!("{}", err);
            println!("s NOT VERIFIED");
            return Ok(1);
        }
    }

    if checker.is_complete() {
        println!("s VERIFIED");
        Ok(0)
    } else {
        println!("s NOT VERIFIED");
        log::error!("proof stream ended without deriving the empty clause");
        Ok(1)
    }
}
