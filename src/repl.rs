use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::{bridge::Lua, diagnostics::Result};

/// Interactive session against a single interpreter instance.
pub struct Repl {
    lua: Lua,
}

impl Default for Repl {
    fn default() -> Self {
        Self::new()
    }
}

impl Repl {
    pub fn new() -> Self {
        Self { lua: Lua::open() }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new().map_err(readline_io)?;
        println!("lunaria repl. Type 'exit' or press Ctrl-D to quit.");
        loop {
            match editor.readline("lunaria> ") {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if line == "exit" {
                        break;
                    }
                    let _ = editor.add_history_entry(line);
                    self.feed(line);
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(error) => return Err(readline_io(error).into()),
            }
        }
        Ok(())
    }

    /// Tries the input as an expression first so `1+1` prints its value,
    /// then falls back to running it as a statement chunk.
    fn feed(&mut self, line: &str) {
        match self.lua.eval(line) {
            Ok(value) => {
                if !value.is_none() {
                    println!("{value}");
                }
            }
            Err(_) => match self.lua.execute(line) {
                Ok(value) => {
                    if !value.is_none() {
                        println!("{value}");
                    }
                }
                Err(error) => eprintln!("error: {error}"),
            },
        }
    }
}

fn readline_io(error: ReadlineError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, error.to_string())
}
