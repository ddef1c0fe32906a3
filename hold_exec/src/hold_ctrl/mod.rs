//! # Hold control module
//!
//! This module implements the [`HoldCtrl`] state machine, which drives the robot towards an object
//! when the wake phrase is heard and grips it once a palm sensor detects it. The states are:
//!
//! - `Idle` - Nothing is happening, waiting for the next listen.
//! - `Listening` - A listen is in progress.
//! - `Approaching` - Driving forward, sampling the palm sensors until contact, timeout or cancel.
//! - `Gripping` - Contact was made, the motors are stopped and the grippers are closing.
//! - `Holding` - The object is held for a fixed time.
//! - `ShuttingDown` - The run is ending, the [`crate::shutdown::ShutdownGuard`] makes the robot
//!   safe.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod approach;
mod params;
mod state;

// ---------------------------------------------------------------------------
// EXPORTS
// ---------------------------------------------------------------------------

pub use approach::ApproachSession;
pub use params::*;
pub use state::*;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Operating state of the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RobotState {
    Idle,
    Listening,
    Approaching,
    Gripping,
    Holding,
    ShuttingDown,
}

/// How the handling of one listen result ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HoldOutcome {
    /// Nothing (or nothing matching the wake phrase) was heard.
    NoCommand,

    /// An object was gripped and held for the hold duration.
    Held,

    /// No contact was made before the approach timeout.
    TimedOut,

    /// The user cancelled during the approach.
    Cancelled,

    /// A process interrupt arrived, the robot is shutting down.
    Interrupted,
}

/// Possible errors that can occur during HoldCtrl operation.
#[derive(Debug, thiserror::Error)]
pub enum HoldCtrlError {
    #[error("Invalid HoldCtrl parameters: {0}")]
    InvalidParams(#[from] ParamsError),
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Fold the case of a phrase and remove commas and full stops.
pub fn normalise_phrase(phrase: &str) -> String {
    phrase
        .chars()
        .filter(|c| *c != ',' && *c != '.')
        .collect::<String>()
        .to_lowercase()
}

/// Determine if a heard phrase contains the wake phrase.
///
/// `wake_phrase` must already be normalised with [`normalise_phrase`].
pub fn matches_wake_phrase(heard: &str, wake_phrase: &str) -> bool {
    normalise_phrase(heard).contains(wake_phrase)
}
