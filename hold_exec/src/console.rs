//! # Console command port
//!
//! Reads typed phrases from the terminal in place of speech recognition. A quit word ends the run
//! through the cancel latch, Ctrl-C is treated as a process interrupt and Ctrl-D closes the source.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::path::PathBuf;

use log::{info, warn};
use rustyline::{error::ReadlineError, DefaultEditor};

use crate::{
    ports::{CancelLatch, CommandPort, ListenError},
    shutdown::InterruptFlag,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const PROMPT: &str = "hold> ";

/// Words which end the run when typed on their own.
pub const QUIT_WORDS: [&str; 2] = ["quit", "exit"];

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Terminal backed command port.
pub struct ConsoleCommand {
    editor: DefaultEditor,
    cancel: CancelLatch,
    interrupt: InterruptFlag,
    history_path: Option<PathBuf>,
}

/// What a typed line means.
#[derive(Debug, PartialEq)]
enum Line {
    Phrase(String),
    Empty,
    Quit,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ConsoleCommand {
    /// Open the terminal, loading line history from `history_path` if given.
    pub fn new(
        cancel: CancelLatch,
        interrupt: InterruptFlag,
        history_path: Option<PathBuf>
    ) -> Result<Self, ListenError> {
        let mut editor = DefaultEditor::new()
            .map_err(|e| ListenError::Engine(format!("Cannot open the terminal: {}", e)))?;

        if let Some(ref p) = history_path {
            if editor.load_history(p).is_err() {
                info!("No console history found at {:?}", p);
            }
        }

        println!(
            "Type a phrase and press enter to say it. Type \"{}\" to end the run.",
            QUIT_WORDS[0]
        );

        Ok(Self {
            editor,
            cancel,
            interrupt,
            history_path,
        })
    }
}

impl CommandPort for ConsoleCommand {
    fn listen_once(&mut self) -> Result<Option<String>, ListenError> {
        match self.editor.readline(PROMPT) {
            Ok(line) => {
                self.editor.add_history_entry(line.as_str()).ok();

                match classify(&line) {
                    Line::Phrase(p) => Ok(Some(p)),
                    Line::Empty => Ok(None),
                    Line::Quit => {
                        info!("Quit requested from the console");
                        self.cancel.set();
                        Ok(None)
                    }
                }
            }
            // The terminal is in raw mode so Ctrl-C arrives here rather than as a signal
            Err(ReadlineError::Interrupted) => {
                self.interrupt.set();
                Ok(None)
            }
            Err(ReadlineError::Eof) => Err(ListenError::Closed),
            Err(ReadlineError::Io(e)) => Err(ListenError::Io(e)),
            Err(e) => Err(ListenError::Engine(e.to_string())),
        }
    }
}

impl Drop for ConsoleCommand {
    fn drop(&mut self) {
        if let Some(ref p) = self.history_path {
            if let Err(e) = self.editor.save_history(p) {
                warn!("Could not save console history to {:?}: {}", p, e);
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn classify(line: &str) -> Line {
    let trimmed = line.trim();

    if trimmed.is_empty() {
        Line::Empty
    }
    else if QUIT_WORDS.iter().any(|q| trimmed.eq_ignore_ascii_case(q)) {
        Line::Quit
    }
    else {
        Line::Phrase(trimmed.to_string())
    }
}
