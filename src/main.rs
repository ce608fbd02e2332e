use std::env;
use std::fs;
use std::process;

use crossfill::{render_grid, solve, Grid, SolveFailure, Vocabulary};
use log::info;

fn read_file(path: &str, what: &str) -> String {
    match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            eprintln!("Failed to read {} file {}: {}", what, path, err);
            process::exit(1);
        }
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 || args.len() > 4 {
        eprintln!("Usage: crossfill <structure-file> <words-file> [output-file]");
        process::exit(2);
    }

    let template = read_file(&args[1], "structure");
    let words = read_file(&args[2], "words");

    let grid = match Grid::parse(&template) {
        Ok(grid) => grid,
        Err(err) => {
            eprintln!("Bad structure: {}", err);
            process::exit(1);
        }
    };

    let vocabulary = Vocabulary::new(
        words
            .lines()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .map(str::to_string),
    );
    info!("{} slots, {} candidate words", grid.slot_count(), vocabulary.len());

    match solve(&grid, &vocabulary) {
        Ok(solution) => {
            let rendered = render_grid(&grid, &vocabulary, &solution.choices);
            println!("{}", rendered);

            if let Some(output) = args.get(3) {
                if let Err(err) = fs::write(output, &rendered) {
                    eprintln!("Failed to write {}: {}", output, err);
                    process::exit(1);
                }
            }
        }
        Err(SolveFailure::NoSolution) | Err(SolveFailure::StateLimitReached) => {
            println!("No solution.");
        }
    }
}
