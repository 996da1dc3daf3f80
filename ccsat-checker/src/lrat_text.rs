//! Reader and writer for the line-based LRAT proof text format.
//!
//! Grounded on `ccsat_dimacs`'s DIMACS reader/writer pair: a line-oriented format where fields are
//! whitespace-separated signed integers terminated by `0`, parsed with `str::parse` and written
//! with `itoa`. Unlike the DIMACS parser this format has no incremental chunked-input variant --
//! proofs are consumed one line at a time by a streaming checker, so a line iterator is enough.
//!
//! Each line is one of:
//!
//! - `<id> d <id>* 0` -- deletes the listed clause ids.
//! - `<id> <literal>* 0 <rup-id-or-rat-block>* 0` -- adds or rewrites a clause. Positive
//!   references are RUP antecedent ids; a negative reference `-r` opens a RAT resolvent block
//!   naming the live clause `r`, whose own RUP sub-chain follows until the next negative
//!   reference or the line's end.

use std::io::{self, BufRead, Write};

use thiserror::Error;

use ccsat::proof::LratStep;
use ccsat_formula::Lit;

#[derive(Debug, Error)]
pub enum LratTextError {
    #[error("line {0}: I/O error: {1}")]
    Io(usize, #[source] io::Error),

    #[error("line {0}: expected a leading clause id")]
    MissingId(usize),

    #[error("line {0}: malformed integer token {1:?}")]
    MalformedToken(usize, String),

    #[error("line {0}: clause literals are not terminated by 0")]
    UnterminatedLits(usize),

    #[error("line {0}: proof chain is not terminated by 0")]
    UnterminatedChain(usize),

    #[error("line {0}: empty line")]
    EmptyLine(usize),
}

fn parse_i64(line_no: usize, token: &str) -> Result<i64, LratTextError> {
    token
        .parse()
        .map_err(|_| LratTextError::MalformedToken(line_no, token.to_string()))
}

fn parse_line(line_no: usize, line: &str) -> Result<LratStep, LratTextError> {
    let mut tokens = line.split_whitespace();
    let _id = parse_i64(
        line_no,
        tokens.next().ok_or(LratTextError::MissingId(line_no))?,
    )? as u64;

    let mut peek = tokens.clone();
    if peek.next() == Some("d") {
        tokens.next();
        let mut ids = Vec::new();
        let mut terminated = false;
        for token in tokens {
            let value = parse_i64(line_no, token)?;
            if value == 0 {
                terminated = true;
                break;
            }
            ids.push(value as u64);
        }
        if !terminated {
            return Err(LratTextError::UnterminatedChain(line_no));
        }
        return Ok(LratStep::Delete { ids });
    }

    let id = _id;
    let mut lits = Vec::new();
    let mut lits_terminated = false;
    let mut rest = tokens;
    for token in &mut rest {
        let value = parse_i64(line_no, token)?;
        if value == 0 {
            lits_terminated = true;
            break;
        }
        lits.push(Lit::from_dimacs(value as isize));
    }
    if !lits_terminated {
        return Err(LratTextError::UnterminatedLits(line_no));
    }

    let mut rup_chain = Vec::new();
    let mut rat_chain: Vec<(u64, Vec<u64>)> = Vec::new();
    let mut chain_terminated = false;
    for token in rest {
        let value = parse_i64(line_no, token)?;
        if value == 0 {
            chain_terminated = true;
            break;
        }
        if value > 0 {
            match rat_chain.last_mut() {
                Some((_, sub_chain)) => sub_chain.push(value as u64),
                None => rup_chain.push(value as u64),
            }
        } else {
            rat_chain.push(((-value) as u64, Vec::new()));
        }
    }
    if !chain_terminated {
        return Err(LratTextError::UnterminatedChain(line_no));
    }

    if rat_chain.is_empty() {
        Ok(LratStep::Rup {
            id,
            lits,
            rup_chain,
        })
    } else {
        Ok(LratStep::Rat {
            id,
            lits,
            rup_chain,
            rat_chain,
        })
    }
}

/// Parses an entire LRAT text proof into a sequence of steps, in file order.
pub fn parse_lrat_text(input: impl io::Read) -> Result<Vec<LratStep>, LratTextError> {
    let reader = io::BufReader::new(input);
    let mut steps = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|e| LratTextError::Io(line_no, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        steps.push(parse_line(line_no, trimmed)?);
    }
    Ok(steps)
}

/// Writes a single step in LRAT text form. Deletion lines reuse the first deleted id as their
/// own leading id, since the format does not otherwise name one.
pub fn write_lrat_step(target: &mut impl Write, step: &LratStep) -> io::Result<()> {
    match step {
        LratStep::Rup {
            id,
            lits,
            rup_chain,
        } => {
            write_id(target, *id)?;
            write_lits(target, lits)?;
            write_ids(target, rup_chain)?;
            target.write_all(b"0\n")
        }
        LratStep::Rat {
            id,
            lits,
            rup_chain,
            rat_chain,
        } => {
            write_id(target, *id)?;
            write_lits(target, lits)?;
            write_ids(target, rup_chain)?;
            for (r, sub_chain) in rat_chain {
                target.write_all(b"-")?;
                itoa::write(&mut *target, *r)?;
                target.write_all(b" ")?;
                write_ids(target, sub_chain)?;
            }
            target.write_all(b"0\n")
        }
        LratStep::Delete { ids } => {
            let lead = *ids.first().unwrap_or(&0);
            write_id(target, lead)?;
            target.write_all(b"d ")?;
            write_ids(target, ids)?;
            target.write_all(b"0\n")
        }
    }
}

fn write_id(target: &mut impl Write, id: u64) -> io::Result<()> {
    itoa::write(&mut *target, id)?;
    target.write_all(b" ")
}

fn write_lits(target: &mut impl Write, lits: &[Lit]) -> io::Result<()> {
    for lit in lits {
        itoa::write(&mut *target, lit.to_dimacs())?;
        target.write_all(b" ")?;
    }
    target.write_all(b"0 ")
}

fn write_ids(target: &mut impl Write, ids: &[u64]) -> io::Result<()> {
    for id in ids {
        itoa::write(&mut *target, *id)?;
        target.write_all(b" ")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccsat_formula::lit;

    #[test]
    fn parses_a_plain_rup_line() {
        let steps = parse_lrat_text(b"4 3 0 1 2 3 0\n" as &[_]).unwrap();
        assert_eq!(
            steps,
            vec![LratStep::Rup {
                id: 4,
                lits: vec![lit![3]],
                rup_chain: vec![1, 2, 3],
            }]
        );
    }

    #[test]
    fn parses_a_rat_line_with_two_resolvents() {
        let steps = parse_lrat_text(b"5 3 0 -1 2 -6 7 8 0\n" as &[_]).unwrap();
        assert_eq!(
            steps,
            vec![LratStep::Rat {
                id: 5,
                lits: vec![lit![3]],
                rup_chain: Vec::new(),
                rat_chain: vec![(1, vec![2]), (6, vec![7, 8])],
            }]
        );
    }

    #[test]
    fn parses_a_deletion_line() {
        let steps = parse_lrat_text(b"9 d 4 5 0\n" as &[_]).unwrap();
        assert_eq!(steps, vec![LratStep::Delete { ids: vec![4, 5] }]);
    }

    #[test]
    fn round_trips_through_the_writer() {
        let step = LratStep::Rat {
            id: 5,
            lits: vec![lit![3], lit![-2]],
            rup_chain: vec![1],
            rat_chain: vec![(2, vec![3, 4])],
        };
        let mut buf = Vec::new();
        write_lrat_step(&mut buf, &step).unwrap();
        let parsed = parse_lrat_text(&buf[..]).unwrap();
        assert_eq!(parsed, vec![step]);
    }

    #[test]
    fn rejects_an_unterminated_line() {
        let err = parse_lrat_text(b"1 2 3\n" as &[_]).unwrap_err();
        assert!(matches!(err, LratTextError::UnterminatedLits(1)));
    }
}
