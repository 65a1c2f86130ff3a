//! # occtl — operator CLI for the session supervisor
//!
//! Talks to the supervisor's control surface over D-Bus (`org.infradead.ocserv`)
//! and renders the reply as a table. One-shot mode merges argv into a single
//! command line; interactive mode offers line editing, history, and tab
//! completion over the command set, grounded directly in
//! `examples/original_source/src/occtl.c`'s readline-based loop.

mod client;
mod commands;

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::process::ExitCode;

/// Operator CLI for the ocserv session supervisor.
#[derive(Parser, Debug)]
#[command(name = "occtl", version)]
struct Cli {
    /// One-shot command, e.g. `occtl status` or `occtl disconnect id 7`.
    /// If omitted, starts the interactive shell.
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "occtl=warn".into()),
        )
        .init();

    let cli = Cli::parse();

    if !cli.command.is_empty() {
        let line = cli.command.join(" ");
        return run_one_shot(&line);
    }

    run_interactive();
    ExitCode::SUCCESS
}

fn run_one_shot(line: &str) -> ExitCode {
    match commands::dispatch_line(line) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("occtl: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_interactive() {
    let mut rl = DefaultEditor::new().expect("line editor");
    let _ = rl.load_history(".occtl_history");
    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);
                if trimmed == "exit" {
                    break;
                }
                if trimmed == "reset" {
                    // No server-side request: just clears this shell's own
                    // line-editing state, matching the original's
                    // rl_reset_terminal/rl_reset_screen_size behavior.
                    continue;
                }
                if trimmed == "help" {
                    println!("{}", commands::help_text());
                    continue;
                }
                match commands::dispatch_line(trimmed) {
                    Ok(output) => println!("{output}"),
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {e}");
                break;
            }
        }
    }
    let _ = rl.save_history(".occtl_history");
}
