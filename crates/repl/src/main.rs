//! Interactive shell for the database engine.
//!
//! Supports both execute mode (one-shot statements) and an interactive
//! prompt backed by rustyline.

use anyhow::Result;
use clap::Parser;
use common::pretty::{self, TableStyleKind};
use database::Database;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

#[derive(Parser, Debug)]
#[command(name = "cdb", about = "Embeddable single-file SQL database")]
struct Args {
    /// Database file name (a `.db` suffix is added); empty selects the
    /// default database
    #[arg(default_value = "")]
    database: String,

    /// Keep the database in memory; nothing is written to disk
    #[arg(long)]
    memory: bool,

    /// Execute the provided SQL and exit
    #[arg(short = 'e', long = "execute")]
    execute: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let db = if args.memory {
        Database::open_in_memory()?
    } else {
        Database::open(&args.database)?
    };

    if let Some(sql) = args.execute {
        run_sql(&db, &sql);
        return Ok(());
    }
    interactive(&db)
}

fn interactive(db: &Database) -> Result<()> {
    println!("cdb shell - Ctrl-D to quit");
    let mut editor = DefaultEditor::new()?;

    loop {
        match editor.readline("cdb> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                editor.add_history_entry(line)?;
                run_sql(db, line);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Execute statements and print each result; errors are reported without
/// ending the session.
fn run_sql(db: &Database, sql: &str) {
    match db.execute(sql) {
        Ok(results) => {
            for result in results {
                if let Some(text) = &result.text {
                    println!("{text}");
                }
                if !result.rows.is_empty() {
                    println!(
                        "{}",
                        pretty::render_result_rows(&result.rows, TableStyleKind::Modern)
                    );
                }
            }
        }
        Err(err) => eprintln!("error: {err}"),
    }
}
