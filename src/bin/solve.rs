//! Thin CLI front-end over the core API (§4.5 / §6): open a compiled database, parse a grid
//! template, and print the lowest-cost fill. Exit codes: 0 on success, 1 if no solution
//! exists, 2 for malformed inputs or internal errors.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use gridfill_core::{solve_grid, Error, WordDb};

#[derive(Parser)]
#[command(about = "Fill a crossword grid template against a compiled word database")]
struct Args {
    /// Path to a compiled word database (see `gridfill-gen-db`).
    #[arg(long)]
    db: PathBuf,

    /// The grid template, given inline.
    #[arg(long, conflicts_with = "template_file")]
    template: Option<String>,

    /// The grid template, read from a file.
    #[arg(long = "template-file", conflicts_with = "template")]
    template_file: Option<PathBuf>,
}

impl Args {
    fn template_text(&self) -> std::io::Result<String> {
        match (&self.template, &self.template_file) {
            (Some(inline), None) => Ok(inline.clone()),
            (None, Some(path)) => std::fs::read_to_string(path),
            _ => Ok(String::new()), // unreachable given clap's conflicts_with; caller validates
        }
    }
}

fn run(args: &Args) -> Result<Option<(String, f64)>, Error> {
    let file = File::open(&args.db)?;
    let db = WordDb::open(BufReader::new(file))?;

    let template = args.template_text()?;
    let solved = solve_grid(&db, &template)?;
    Ok(solved.map(|grid| (grid.render(), grid.min_cost())))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if args.template.is_none() && args.template_file.is_none() {
        eprintln!("gridfill-solve: one of --template or --template-file is required");
        return ExitCode::from(2);
    }

    match run(&args) {
        Ok(Some((rendered, cost))) => {
            println!("{rendered}");
            println!();
            println!("{cost}");
            ExitCode::SUCCESS
        }
        Ok(None) => {
            eprintln!("gridfill-solve: no solution exists for this template");
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("gridfill-solve: {e}");
            ExitCode::from(2)
        }
    }
}
