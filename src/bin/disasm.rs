//! Print the bytecode listing of a pattern and try it against subjects.
//!
//! Usage: `disasm PATTERN [FLAGS] [SUBJECT...]` where FLAGS is a string of
//! `i` (caseless), `n` (newline), `v` (verbatim), `e` (not empty) and
//! `x` (no captures), or `-` for the defaults.

use std::process::ExitCode;

use regvm::{Flags, Regex};

fn parse_flags(letters: &str) -> Option<Flags> {
    let mut flags = Flags::default();
    for letter in letters.chars().filter(|&c| c != '-') {
        match letter {
            'i' => flags |= Flags::CASELESS,
            'n' => flags |= Flags::NEWLINE,
            'v' => flags |= Flags::VERBATIM,
            'e' => flags |= Flags::NOT_EMPTY,
            'x' => flags -= Flags::CAPTURE,
            _ => return None,
        }
    }
    Some(flags)
}

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let Some(pattern) = args.next() else {
        eprintln!("usage: disasm PATTERN [FLAGS] [SUBJECT...]");
        return ExitCode::FAILURE;
    };
    let letters = args.next().unwrap_or_default();
    let Some(flags) = parse_flags(&letters) else {
        eprintln!("unknown flag in {letters:?}");
        return ExitCode::FAILURE;
    };

    let regex = match Regex::with_flags(&pattern, flags) {
        Ok(regex) => regex,
        Err(e) => {
            eprintln!("{pattern}: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Pattern: {pattern}");
    println!("Groups: {}", regex.group_count());
    println!("Bytecode length: {}", regex.program().code().len());
    print!("{}", regex.program());

    for subject in args {
        match regex.captures(&subject) {
            Some(caps) => {
                print!("  {subject:?} ->");
                for (i, slot) in caps.iter().enumerate().take(regex.group_count() + 1) {
                    match slot {
                        Some((start, end)) => print!(" {i}:{start}..{end}"),
                        None => print!(" {i}:-"),
                    }
                }
                println!();
            }
            None => println!("  {subject:?} -> no match"),
        }
    }
    ExitCode::SUCCESS
}
