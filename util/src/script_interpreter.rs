//! # Timed script interpreter module
//!
//! This module provides an interpreter for timed scripts, where each entry
//! consists of an execution time in seconds followed by a JSON payload and a
//! terminating semicolon:
//!
//! ```text
//! 1.0: {"Phrase": "come hold this"};
//! 2.5: "Cancel";
//! ```
//!
//! Any line not matching this form (for example `#` comments) is ignored. The
//! payload must not itself contain a `;`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::fs;
use regex::RegexBuilder;
use serde::de::DeserializeOwned;
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Matches `<time>: <payload>;` at the start of a line.
const ENTRY_PATTERN: &str = r"^\s*(\d+(\.\d+)?)\s*:\s*([^;]*);";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An item which is scripted to occur at a specific time.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<T> {
    /// The time the item is supposed to occur at
    pub exec_time_s: f64,

    /// The item itself
    pub item: T
}

/// A script interpreter.
///
/// After loading a script use `.pop_due` to take the entries that are due.
#[derive(Debug)]
pub struct ScriptInterpreter<T> {
    entries: VecDeque<Entry<T>>
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not find the script at {0:?}")]
    ScriptNotFound(PathBuf),

    #[error("Could not load the script: {0}")]
    ScriptLoadError(std::io::Error),

    #[error("The script is empty (or is so bad it can't be read)")]
    ScriptEmpty,

    #[error(
        "Script contains an invalid timestamp: {0}. \
        Should be a float (like 1.0)")]
    InvalidTimestamp(String),

    #[error("Script contains an invalid entry at {0} s: {1}")]
    InvalidEntry(f64, serde_json::Error),

    #[error("Script entry at {0} s is earlier than the entry before it")]
    OutOfOrder(f64)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<T> ScriptInterpreter<T>
where
    T: DeserializeOwned
{

    /// Create a new interpreter from the given script path.
    pub fn new<P: AsRef<Path>>(script_path: P) -> Result<Self, ScriptError> {

        // Get the path in a buffer
        let path = PathBuf::from(script_path.as_ref());
        
        // Check that the script file exists.
        if !path.exists() {
            return Err(ScriptError::ScriptNotFound(path));
        }

        // Load the script into a string
        let script = fs::read_to_string(&path)
            .map_err(ScriptError::ScriptLoadError)?;

        Self::from_script(&script)
    }

    /// Create a new interpreter from the text of a script.
    pub fn from_script(script: &str) -> Result<Self, ScriptError> {

        // Empty queue of entries
        let mut entries: VecDeque<Entry<T>> = VecDeque::new();

        let re = RegexBuilder::new(ENTRY_PATTERN)
            .multi_line(true)
            .build()
            .expect("Script entry pattern is not a valid regex");

        for cap in re.captures_iter(script) {
            // Parse the exec time
            let exec_time_s: f64 = cap[1].parse()
                .map_err(|e| ScriptError::InvalidTimestamp(format!("{}", e)))?;

            if let Some(last) = entries.back() {
                if exec_time_s < last.exec_time_s {
                    return Err(ScriptError::OutOfOrder(exec_time_s))
                }
            }

            // The payload is JSON only
            let item = serde_json::from_str(&cap[3])
                .map_err(|e| ScriptError::InvalidEntry(exec_time_s, e))?;

            entries.push_back(Entry {
                exec_time_s,
                item
            });
        }

        if entries.is_empty() {
            return Err(ScriptError::ScriptEmpty)
        }

        Ok(ScriptInterpreter { entries })
    }
}

impl<T> ScriptInterpreter<T> {

    /// Remove and return the entries due at or before `current_time_s`,
    /// keeping their scripted times.
    pub fn pop_due(&mut self, current_time_s: f64) -> Vec<Entry<T>> {
        let mut due = vec![];

        while self.entries.front()
            .map(|e| e.exec_time_s <= current_time_s)
            .unwrap_or(false)
        {
            if let Some(e) = self.entries.pop_front() {
                due.push(e);
            }
        }

        due
    }

    /// Get the number of entries remaining in the script
    pub fn get_num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Get the length of the script in seconds
    pub fn get_duration(&self) -> f64 {
        match self.entries.back() {
            Some(e) => e.exec_time_s,
            None => 0f64
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug, PartialEq)]
    enum Event {
        Phrase(String),
        Cancel
    }

    const SCRIPT: &str = "
        # Comment lines are skipped
        0.0: {\"Phrase\": \"hello there\"};
        1.5: \"Cancel\";
        1.5: {\"Phrase\": \"again\"};
    ";

    #[test]
    fn test_parse_and_pop_due() {
        let mut si: ScriptInterpreter<Event> = ScriptInterpreter::from_script(SCRIPT).unwrap();

        assert_eq!(si.get_num_entries(), 3);
        assert_eq!(si.get_duration(), 1.5);

        assert_eq!(
            si.pop_due(0.0),
            vec![Entry { exec_time_s: 0.0, item: Event::Phrase("hello there".into()) }]
        );
        assert!(si.pop_due(1.0).is_empty());

        let due: Vec<Event> = si.pop_due(2.0).into_iter().map(|e| e.item).collect();
        assert_eq!(due, vec![Event::Cancel, Event::Phrase("again".into())]);
        assert_eq!(si.get_num_entries(), 0);
        assert!(si.pop_due(3.0).is_empty());
    }

    #[test]
    fn test_bad_scripts() {
        match ScriptInterpreter::<Event>::from_script("# nothing here") {
            Err(ScriptError::ScriptEmpty) => (),
            r => panic!("Expected empty script error, got {:?}", r)
        }

        match ScriptInterpreter::<Event>::from_script("1.0: \"Dance\";") {
            Err(ScriptError::InvalidEntry(t, _)) => assert_eq!(t, 1.0),
            r => panic!("Expected invalid entry error, got {:?}", r)
        }

        match ScriptInterpreter::<Event>::from_script("2.0: \"Cancel\";\n1.0: \"Cancel\";") {
            Err(ScriptError::OutOfOrder(t)) => assert_eq!(t, 1.0),
            r => panic!("Expected out of order error, got {:?}", r)
        }
    }
}
