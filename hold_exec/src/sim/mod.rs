//! # Simulation
//!
//! Simulated ports which replay a scenario script. A scenario is a timed script (see
//! [`util::script_interpreter`]) of [`SimEvent`]s, for example:
//!
//! ```text
//! # Ask for something to be held, the object is reached 1.2 s later
//! 0.5: {"Phrase": "Josh, come hold this."};
//! 2.7: {"Contact": {"side": "Left", "duration_s": 0.5}};
//! 8.0: "Cancel";
//! ```
//!
//! All ports built from one [`SimWorld`] share its clock and event state.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod ports;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use ports::*;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    collections::VecDeque,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use util::script_interpreter::{ScriptError, ScriptInterpreter};

use crate::{
    clock::Clock,
    ports::{CancelLatch, Side},
};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// An event in a simulation scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimEvent {
    /// The user says something
    Phrase(String),

    /// A listen which hears nothing
    Silence,

    /// A listen which fails to recognise anything
    ListenFailure,

    /// An object is in contact with a palm for a time
    Contact { side: Side, duration_s: f64 },

    /// The user cancels the run
    Cancel,

    /// The camera stops delivering frames for a time
    CameraDropout { duration_s: f64 },
}

/// Something the simulated microphone picked up.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Heard {
    Phrase(String),
    Silence,
    Failure,
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the simulated ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    /// Length of a simulated listen.
    ///
    /// Units: seconds
    #[serde(default = "default_listen_window_s")]
    pub listen_window_s: f64,

    /// Size of the synthesised camera frames.
    ///
    /// Units: pixels
    #[serde(default = "default_frame_size")]
    pub frame_size: (u32, u32),

    /// Save every Nth rendered frame into the session directory, 0 disables saving.
    #[serde(default)]
    pub save_frame_every: u64,
}

/// Shared state of a simulation.
///
/// Clones share the same world, the clock itself is never copied.
pub struct SimWorld<C> {
    clock: Arc<C>,
    cancel: CancelLatch,
    state: Arc<Mutex<WorldState>>,
}

#[derive(Default)]
pub(crate) struct WorldState {
    script: Option<ScriptInterpreter<SimEvent>>,

    /// Things heard, with the time they were said
    heard: VecDeque<(f64, Heard)>,

    /// Contact windows, (side, start, end)
    contacts: Vec<(Side, f64, f64)>,

    /// Camera dropout windows, (start, end)
    dropouts: Vec<(f64, f64)>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for SimParams {
    fn default() -> Self {
        Self {
            listen_window_s: default_listen_window_s(),
            frame_size: default_frame_size(),
            save_frame_every: 0,
        }
    }
}

impl<C> Clone for SimWorld<C> {
    fn clone(&self) -> Self {
        Self {
            clock: self.clock.clone(),
            cancel: self.cancel.clone(),
            state: self.state.clone(),
        }
    }
}

impl<C: Clock> SimWorld<C> {
    /// Create a world with no scripted events.
    pub fn new(clock: Arc<C>, cancel: CancelLatch) -> Self {
        Self {
            clock,
            cancel,
            state: Arc::new(Mutex::new(WorldState::default())),
        }
    }

    /// Create a world which replays the given scenario.
    pub fn with_scenario(
        clock: Arc<C>,
        cancel: CancelLatch,
        scenario: ScriptInterpreter<SimEvent>
    ) -> Self {
        info!(
            "Simulation scenario lasts {:.02} s and contains {} events",
            scenario.get_duration(),
            scenario.get_num_entries()
        );

        let world = Self::new(clock, cancel);
        world.lock().script = Some(scenario);
        world
    }

    /// Load a scenario script from a file.
    pub fn load_scenario<P: AsRef<Path>>(
        clock: Arc<C>,
        cancel: CancelLatch,
        path: P
    ) -> Result<Self, ScriptError> {
        info!("Loading simulation scenario from {:?}", path.as_ref());
        Ok(Self::with_scenario(clock, cancel, ScriptInterpreter::new(path)?))
    }

    pub fn clock(&self) -> &Arc<C> {
        &self.clock
    }

    /// The run's cancel latch, set by scripted cancel events.
    pub fn cancel(&self) -> &CancelLatch {
        &self.cancel
    }

    pub fn now_s(&self) -> f64 {
        self.clock.now_s()
    }

    /// True once every scripted event has happened.
    pub fn scenario_finished(&self) -> bool {
        self.lock().script
            .as_ref()
            .map(|s| s.get_num_entries() == 0)
            .unwrap_or(true)
    }

    /// True if something has been said which no listen has taken yet.
    pub fn has_pending_speech(&self) -> bool {
        !self.lock().heard.is_empty()
    }

    /// Apply all events due by now, returning the current time.
    pub(crate) fn update(&self) -> (f64, MutexGuard<'_, WorldState>) {
        let now_s = self.clock.now_s();
        let mut state = self.lock();

        let due = match state.script {
            Some(ref mut s) => s.pop_due(now_s),
            None => vec![],
        };

        for entry in due {
            let t = entry.exec_time_s;
            debug!("Sim event at {:.2} s: {:?}", t, entry.item);

            match entry.item {
                SimEvent::Phrase(p) => state.heard.push_back((t, Heard::Phrase(p))),
                SimEvent::Silence => state.heard.push_back((t, Heard::Silence)),
                SimEvent::ListenFailure => state.heard.push_back((t, Heard::Failure)),
                SimEvent::Contact { side, duration_s } =>
                    state.contacts.push((side, t, t + duration_s)),
                SimEvent::Cancel => self.cancel.set(),
                SimEvent::CameraDropout { duration_s } =>
                    state.dropouts.push((t, t + duration_s)),
            }
        }

        // Forget windows which have closed
        state.contacts.retain(|(_, _, end)| *end > now_s);
        state.dropouts.retain(|(_, end)| *end > now_s);

        (now_s, state)
    }

    fn lock(&self) -> MutexGuard<'_, WorldState> {
        // A panic elsewhere doesn't invalidate the event state
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl WorldState {
    pub(crate) fn is_contact(&self, side: Side, now_s: f64) -> bool {
        self.contacts.iter()
            .any(|(s, start, end)| *s == side && *start <= now_s && now_s < *end)
    }

    pub(crate) fn is_dropout(&self, now_s: f64) -> bool {
        self.dropouts.iter().any(|(start, end)| *start <= now_s && now_s < *end)
    }

    /// Take the first thing said within `[start_s, end_s]`, discarding anything said before the
    /// listen started.
    pub(crate) fn take_heard(&mut self, start_s: f64, end_s: f64) -> Option<Heard> {
        while let Some((t, _)) = self.heard.front() {
            if *t < start_s {
                if let Some((t, h)) = self.heard.pop_front() {
                    debug!("{:?} at {:.2} s was said while not listening", h, t);
                }
            }
            else {
                break
            }
        }

        match self.heard.front() {
            Some((t, _)) if *t <= end_s => self.heard.pop_front().map(|(_, h)| h),
            _ => None,
        }
    }
}

fn default_listen_window_s() -> f64 {
    1.0
}

fn default_frame_size() -> (u32, u32) {
    (160, 120)
}
