use std::fs;
use std::io::{self, Read};

use anyhow::{Context, Error};
use clap::{App, AppSettings, Arg, SubCommand};
use log::info;

mod check_lrat;

fn main() {
    let exit_code = match main_with_err() {
        Err(err) => {
            log::error!("{}", err);
            1
        }
        Ok(exit_code) => exit_code,
    };
    std::process::exit(exit_code);
}

pub(crate) fn init_logging() {
    let mut builder = env_logger::Builder::new();
    builder.target(env_logger::Target::Stdout).filter(None, log::LevelFilter::Info);
    if let Ok(env_var) = std::env::var("CCSAT_LOG") {
        builder.parse_filters(&env_var);
    }
    let _ = builder.try_init();
}

pub(crate) fn banner() {
    info!("This is ccsat {}", env!("CARGO_PKG_VERSION"));
}

pub(crate) fn open_input(matches: &clap::ArgMatches, label: &str) -> Result<Box<dyn Read>, Error> {
    match matches.value_of("INPUT") {
        Some(path) => {
            info!("Reading {} from '{}'", label, path);
            Ok(Box::new(fs::File::open(path).with_context(|| format!("opening {}", path))?))
        }
        None => {
            info!("Reading {} from stdin", label);
            Ok(Box::new(io::stdin()))
        }
    }
}

fn main_with_err() -> Result<i32, Error> {
    let matches = App::new("ccsat")
        .version(env!("CARGO_PKG_VERSION"))
        .setting(AppSettings::DisableHelpSubcommand)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg_from_usage("[INPUT] 'The input DIMACS CNF file to use (stdin if omitted)'")
        .arg(
            Arg::from_usage("--proof=[FILE] 'Write an LRAT proof to the given path if the instance is unsatisfiable'"),
        )
        .subcommand(check_lrat::args())
        .get_matches();

    if let Some(matches) = matches.subcommand_matches("check-lrat") {
        return check_lrat::main(matches);
    }

    init_logging();
    banner();

    let input = open_input(&matches, "CNF formula")?;
    let formula = ccsat_dimacs::DimacsParser::parse(input).context("parsing DIMACS CNF")?;

    info!(
        "Parsed formula with {} variables and {} clauses",
        formula.var_count(),
        formula.len()
    );

    let config = ccsat::config::SolverConfig::default();
    let mut solver =
        ccsat::cdcl::solver_for_var_count(formula.var_count(), config).context("building solver")?;

    let mut sink = ccsat::proof::VecSink::default();
    for clause in formula.iter() {
        solver.add_clause(clause.to_vec(), &mut sink);
    }

    match solver.solve(&mut sink) {
        ccsat::cdcl::SatState::Sat => {
            println!("s SATISFIABLE");
            let model = solver.model();
            print!("v ");
            for (index, value) in model.iter().enumerate() {
                let lit = ccsat_formula::Var::from_index(index).lit(*value);
                print!("{} ", lit.to_dimacs());
            }
            println!("0");
            Ok(10)
        }
        ccsat::cdcl::SatState::Unsat => {
            println!("s UNSATISFIABLE");
            if let Some(path) = matches.value_of("proof") {
                let mut file = fs::File::create(path).with_context(|| format!("creating {}", path))?;
                for step in &sink.steps {
                    ccsat_checker::lrat_text::write_lrat_step(&mut file, step)
                        .with_context(|| format!("writing proof to {}", path))?;
                }
                info!("Wrote LRAT proof to '{}'", path);
            }
            Ok(20)
        }
        ccsat::cdcl::SatState::Unknown => {
            println!("s UNKNOWN");
            Ok(0)
        }
    }
}
