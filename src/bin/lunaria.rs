use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use lunaria::{HostValue, Lua, Repl};

#[derive(Parser)]
#[command(name = "lunaria", version, about = "Embedded Lua runtime and bridge")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a script file
    Run { script: PathBuf },
    /// Evaluate a single expression and print its value
    Eval { source: String },
    /// Start an interactive session
    Repl,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Run { script }) => {
            let source = match std::fs::read_to_string(&script) {
                Ok(source) => source,
                Err(error) => {
                    eprintln!("error: cannot read {}: {error}", script.display());
                    return ExitCode::FAILURE;
                }
            };
            let lua = Lua::open();
            match lua.execute(&source) {
                Ok(_) => ExitCode::SUCCESS,
                Err(error) => {
                    eprintln!("error: {error}");
                    ExitCode::FAILURE
                }
            }
        }
        Some(Command::Eval { source }) => {
            let lua = Lua::open();
            match lua.eval(&source) {
                Ok(value) => {
                    if !matches!(value, HostValue::None) {
                        println!("{value}");
                    }
                    ExitCode::SUCCESS
                }
                Err(error) => {
                    eprintln!("error: {error}");
                    ExitCode::FAILURE
                }
            }
        }
        Some(Command::Repl) | None => match Repl::new().run() {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                eprintln!("error: {error}");
                ExitCode::FAILURE
            }
        },
    }
}
